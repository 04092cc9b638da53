//! Local staging of audio containers before upload

use std::io;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::wav::AudioContainer;

/// Name of the staged container inside the storage root
pub const STAGED_CONTAINER: &str = "audio.wav";

/// Byte-stream storage for staged containers
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    type Writer: AsyncWrite + Unpin + Send;
    type Reader: AsyncRead + Unpin + Send;

    /// Create (or truncate) `name` for writing
    async fn create(&self, name: &str) -> io::Result<Self::Writer>;

    /// Open `name` for reading, returning the stream and its length
    async fn open(&self, name: &str) -> io::Result<(Self::Reader, u64)>;

    /// Location of `name`, for diagnostics
    fn path_of(&self, name: &str) -> PathBuf;
}

/// Directory-backed storage
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Use `root` as the staging directory, creating it if needed
    pub async fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RelayError::init_failed("storage", format!("{}: {}", root.display(), e)))?;
        info!(root = %root.display(), "Staging directory ready");
        Ok(Self { root })
    }
}

#[async_trait::async_trait]
impl Storage for FsStorage {
    type Writer = File;
    type Reader = File;

    async fn create(&self, name: &str) -> io::Result<File> {
        File::create(self.path_of(name)).await
    }

    async fn open(&self, name: &str) -> io::Result<(File, u64)> {
        let file = File::open(self.path_of(name)).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Persist `container` as `name`, returning the number of bytes written
pub async fn stage_container<S: Storage + ?Sized>(
    storage: &S,
    name: &str,
    container: &AudioContainer<'_>,
) -> Result<usize> {
    let write_failed = |source| RelayError::ContainerWriteFailed {
        path: storage.path_of(name),
        source,
    };

    let bytes = container.to_vec();
    let mut out = storage.create(name).await.map_err(write_failed)?;
    out.write_all(&bytes).await.map_err(write_failed)?;
    out.flush().await.map_err(write_failed)?;

    debug!(name, bytes = bytes.len(), "Container staged");
    Ok(bytes.len())
}
