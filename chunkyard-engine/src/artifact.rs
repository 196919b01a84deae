//! Public namespace of merged artifacts

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use chunkyard_core::FileName;
use tracing::warn;

const WRITE_BUFFER: usize = 256 * 1024;

/// Flat directory of finished artifacts keyed by file name
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating `root` if necessary
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of an artifact
    pub fn path_of(&self, name: &FileName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Start writing an artifact. Nothing appears under `name` until commit.
    pub fn begin(&self, name: &FileName) -> io::Result<PendingArtifact> {
        // Fixed-length temporary name; any name the filesystem accepts can be merged
        let partial_path = self.root.join(format!(".{}.partial", ulid::Ulid::new()));
        let file = File::create(&partial_path)?;

        Ok(PendingArtifact {
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER, file)),
            partial_path,
            final_path: self.path_of(name),
            bytes_written: 0,
        })
    }

    /// Open a finished artifact along with its length
    pub fn open(&self, name: &FileName) -> io::Result<Option<(File, u64)>> {
        let file = match File::open(self.path_of(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let meta = file.metadata()?;
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some((file, meta.len())))
    }
}

/// An artifact being written under a hidden temporary name.
///
/// Dropping it without calling [`PendingArtifact::commit`] deletes the partial file.
pub struct PendingArtifact {
    writer: Option<BufWriter<File>>,
    partial_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl PendingArtifact {
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush, sync and move the artifact to its final name, replacing any previous one
    pub fn commit(mut self) -> io::Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("artifact already finalized"))?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path)?;
        Ok(self.final_path.clone())
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("artifact already finalized"))
    }
}

impl Write for PendingArtifact {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer()?.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        // Either commit moved the file away, or this is an abandoned write
        if self.partial_path.exists() {
            self.writer.take();
            if let Err(e) = fs::remove_file(&self.partial_path) {
                warn!(path = %self.partial_path.display(), error = %e, "failed to remove partial artifact");
            }
        }
    }
}
