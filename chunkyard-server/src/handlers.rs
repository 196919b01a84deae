//! HTTP request handlers for chunkyard server

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use chunkyard_core::{
    ChunkIndex, ChunkyardError, ErrorBody, ErrorKind, FileName, MergeOutcome, MergeRequest, UploadId,
};
use chunkyard_engine::Chunkyard;

/// Response body: in-memory JSON or a streamed artifact
pub type BoxBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Merge requests are small JSON documents
const MAX_JSON_BYTES: usize = 64 * 1024;

const ARTIFACT_PREFIX: &str = "/ReceivedFiles/";
const ABANDON_PREFIX: &str = "/api/upload/";

/// Characters escaped when an artifact name is placed in a URL path
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Shared per-server state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub chunkyard: Chunkyard,
    /// Base URL for artifact links, without trailing slash
    pub public_base: String,
    pub max_chunk_bytes: usize,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Chunkyard(#[from] ChunkyardError),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid percent-encoding in path")]
    PathEncoding,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Chunkyard(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Body(_) | ApiError::Json(_) | ApiError::PathEncoding => StatusCode::BAD_REQUEST,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing body; server-side failures do not echo internal detail
    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Chunkyard(e) if e.kind() == ErrorKind::Io => ErrorBody {
                error: match e {
                    ChunkyardError::MergeIoFailure { .. } => "File merge failed".to_string(),
                    _ => "Storage failure".to_string(),
                },
                kind: ErrorKind::Io.as_str().to_string(),
            },
            ApiError::Chunkyard(e) => ErrorBody::from(e),
            ApiError::Task(_) => ErrorBody {
                error: "Internal server error".to_string(),
                kind: ErrorKind::Io.as_str().to_string(),
            },
            other => ErrorBody {
                error: other.to_string(),
                kind: ErrorKind::Validation.as_str().to_string(),
            },
        }
    }
}

type HandlerResult = Result<Response<BoxBody>, ApiError>;

/// Main request handler
pub async fn handle_request<B>(req: Request<B>, state: AppState) -> Result<Response<BoxBody>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/health") => Ok(handle_health()),
        (&Method::OPTIONS, _) => Ok(empty_response(StatusCode::NO_CONTENT)),
        (&Method::POST, "/api/upload-chunk") => handle_upload_chunk(req, &state).await,
        (&Method::POST, "/api/merge") => handle_merge(req, &state).await,
        (&Method::DELETE, p) if p.starts_with(ABANDON_PREFIX) => {
            handle_abandon(&p[ABANDON_PREFIX.len()..], &state).await
        }
        (&Method::GET, p) if p.starts_with(ARTIFACT_PREFIX) => {
            handle_fetch(&p[ARTIFACT_PREFIX.len()..], &state).await
        }
        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody { error: "Not found".to_string(), kind: ErrorKind::NotFound.as_str().to_string() },
        )),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!("Handler error for {} {}: {}", method, path, e);
            } else {
                warn!("Rejected {} {}: {}", method, path, e);
            }
            json_response(status, &e.body())
        }
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(with_cors(response))
}

/// Health check handler
fn handle_health() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "chunkyard"
        }),
    )
}

/// POST /api/upload-chunk?fileId=..&chunkIndex=.. with the raw chunk as body
async fn handle_upload_chunk<B>(req: Request<B>, state: &AppState) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let params = parse_query(req.uri().query());

    // Reject bad parameters before reading a potentially large body
    let upload = UploadId::parse(params.get("fileId").map(String::as_str))?;
    let index = ChunkIndex::parse(params.get("chunkIndex").map(String::as_str))?;

    let payload = read_body(req.into_body(), state.max_chunk_bytes).await?;

    debug!("Receiving chunk: upload={}, index={}, size={}", upload, index, payload.len());

    let chunkyard = state.chunkyard.clone();
    let receipt = tokio::task::spawn_blocking(move || {
        chunkyard.receiver().receive_chunk(&upload, index, &payload)
    })
    .await??;

    Ok(json_response(StatusCode::OK, &receipt))
}

/// POST /api/merge with `{"fileId": .., "fileName": .., "expectedChunks": ..}`
async fn handle_merge<B>(req: Request<B>, state: &AppState) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = read_body(req.into_body(), MAX_JSON_BYTES).await?;
    let request: MergeRequest = serde_json::from_slice(&body)?;

    let upload = UploadId::parse(request.file_id.as_deref())?;
    let file_name = FileName::parse(request.file_name.as_deref())?;
    let expected = request.expected_chunks;

    let chunkyard = state.chunkyard.clone();
    let merged = tokio::task::spawn_blocking(move || {
        chunkyard.merger().merge(&upload, &file_name, expected)
    })
    .await??;

    let outcome = MergeOutcome {
        success: true,
        url: artifact_url(&state.public_base, &merged.file_name),
        file_name: merged.file_name.to_string(),
        file_id: merged.upload_id.to_string(),
        chunk_count: merged.chunk_count,
        bytes_written: merged.bytes_written,
    };

    Ok(json_response(StatusCode::OK, &outcome))
}

/// DELETE /api/upload/{fileId}
async fn handle_abandon(segment: &str, state: &AppState) -> HandlerResult {
    let upload = UploadId::new(&decode_segment(segment)?)?;

    let chunkyard = state.chunkyard.clone();
    let abandoned = upload.clone();
    tokio::task::spawn_blocking(move || chunkyard.merger().abandon(&abandoned)).await??;

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "fileId": upload.as_str(),
            "abandoned": true
        }),
    ))
}

/// GET /ReceivedFiles/{fileName}
async fn handle_fetch(segment: &str, state: &AppState) -> HandlerResult {
    let file_name = FileName::new(&decode_segment(segment)?)?;

    let chunkyard = state.chunkyard.clone();
    let (file, len) =
        tokio::task::spawn_blocking(move || chunkyard.merger().fetch(&file_name)).await??;

    debug!("Streaming artifact: size={}", len);

    let stream = ReaderStream::new(tokio::fs::File::from_std(file)).map_ok(Frame::data);
    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

/// Collect a request body, refusing anything over `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge { limit })
        }
        Err(e) => Err(ApiError::Body(e.to_string())),
    }
}

/// Public link for an artifact
pub fn artifact_url(public_base: &str, file_name: &FileName) -> String {
    format!(
        "{}{}{}",
        public_base,
        ARTIFACT_PREFIX,
        utf8_percent_encode(file_name.as_str(), PATH_SEGMENT)
    )
}

/// Parse `a=1&b=2` into a map; later duplicates win
fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn decode_segment(raw: &str) -> Result<String, ApiError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ApiError::PathEncoding)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            br#"{"error":"Internal server error","kind":"io"}"#.to_vec()
        }
    };

    let mut response = Response::new(full(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<BoxBody> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn full(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Browsers upload chunks cross-origin, so every response is permissive
fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    headers.insert(header::SERVER, HeaderValue::from_static("chunkyard"));
    response
}
