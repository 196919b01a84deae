//! HTTP/1.1 accept loop

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use chunkyard_engine::Chunkyard;
use crate::config::ServerConfig;
use crate::handlers::{handle_request, AppState};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

pub struct ChunkyardServer {
    state: AppState,
}

impl ChunkyardServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn from_config(chunkyard: Chunkyard, config: &ServerConfig) -> Self {
        Self::new(AppState {
            chunkyard,
            public_base: config.public_base(),
            max_chunk_bytes: config.max_chunk_bytes,
        })
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accept connections on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!("chunkyard server listening on {}", local);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    debug!("New connection from {}", remote_addr);

                    let state = self.state.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(stream, remote_addr, state).await;
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, state: AppState) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let state = state.clone();
            async move { handle_request(req, state).await }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            error!("Connection error from {}: {}", remote_addr, err);
        }
    }
}
