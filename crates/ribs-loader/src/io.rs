//! Non-blocking file access.
//!
//! The pipeline never touches the filesystem directly. It drives a [`FileIo`]
//! implementation, which keeps the real tokio-backed filesystem and in-memory
//! doubles interchangeable.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Asynchronous open/read/close on files addressed by path.
///
/// Handles are moved, never shared: `close` consumes the handle, so a
/// request cannot read from a file it already closed.
#[async_trait]
pub trait FileIo: Send + Sync + 'static {
    type Handle: Send + 'static;

    async fn open(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Total size of the open file, if cheaply known.
    async fn size_hint(&self, _handle: &mut Self::Handle) -> Option<u64> {
        None
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Returning fewer bytes than `buf.len()` means end of file.
    async fn read_at(
        &self,
        handle: &mut Self::Handle,
        buf: &mut [u8],
        offset: u64,
    ) -> io::Result<usize>;

    async fn close(&self, handle: Self::Handle) -> io::Result<()>;
}

/// [`FileIo`] over the real filesystem, scheduled on tokio's blocking pool.
///
/// `close` never fails: dropping a std `File` discards any error from the
/// underlying close, so [`crate::LoadError::Close`] only comes from other
/// [`FileIo`] implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileIo;

#[async_trait]
impl FileIo for TokioFileIo {
    type Handle = File;

    async fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path).await
    }

    async fn size_hint(&self, handle: &mut File) -> Option<u64> {
        handle.metadata().await.ok().map(|meta| meta.len())
    }

    async fn read_at(&self, file: &mut File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        file.seek(SeekFrom::Start(offset)).await?;

        // A single read may come back short before EOF; keep going so a short
        // return really means end of file.
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    async fn close(&self, file: File) -> io::Result<()> {
        // Waits for any in-flight background operation before the descriptor is dropped.
        let file = file.into_std().await;
        drop(file);
        Ok(())
    }
}

/// [`FileIo`] over an in-memory file table.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileIo {
    files: Arc<RwLock<HashMap<PathBuf, Arc<[u8]>>>>,
}

/// Open handle into a [`MemoryFileIo`]. Holds its own reference to the contents,
/// so removing the path does not affect reads already in progress.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    data: Arc<[u8]>,
}

impl MemoryFileIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let contents: Arc<[u8]> = Arc::from(contents.into());
        self.files.write().insert(path.into(), contents);
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl FileIo for MemoryFileIo {
    type Handle = MemoryHandle;

    async fn open(&self, path: &Path) -> io::Result<MemoryHandle> {
        let files = self.files.read();
        let data = files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })?;
        Ok(MemoryHandle { data })
    }

    async fn size_hint(&self, handle: &mut MemoryHandle) -> Option<u64> {
        u64::try_from(handle.data.len()).ok()
    }

    async fn read_at(
        &self,
        handle: &mut MemoryHandle,
        buf: &mut [u8],
        offset: u64,
    ) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(handle.data.len());
        let end = start.saturating_add(buf.len()).min(handle.data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&handle.data[start..end]);
        Ok(n)
    }

    async fn close(&self, _handle: MemoryHandle) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_tokio_read_at_offsets() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let io = TokioFileIo;
        let mut file = io.open(tmp.path()).await.unwrap();
        assert_eq!(io.size_hint(&mut file).await, Some(10));

        let mut buf = [0u8; 4];
        assert_eq!(io.read_at(&mut file, &mut buf, 0).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(io.read_at(&mut file, &mut buf, 8).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(io.read_at(&mut file, &mut buf, 10).await.unwrap(), 0);

        io.close(file).await.unwrap();
    }

    #[tokio::test]
    async fn test_tokio_close_succeeds_after_file_removed() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let io = TokioFileIo;
        let file = io.open(tmp.path()).await.unwrap();

        // unlinking does not affect the open descriptor
        tmp.close().unwrap();
        io.close(file).await.unwrap();
    }

    #[tokio::test]
    async fn test_tokio_open_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokioFileIo
            .open(&dir.path().join("missing.png"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_memory_io() {
        let io = MemoryFileIo::new();
        io.insert("/a.bin", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(io.len(), 1);

        let mut handle = io.open(Path::new("/a.bin")).await.unwrap();
        assert_eq!(io.size_hint(&mut handle).await, Some(5));

        let mut buf = [0u8; 3];
        assert_eq!(io.read_at(&mut handle, &mut buf, 3).await.unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(io.read_at(&mut handle, &mut buf, 99).await.unwrap(), 0);

        assert!(io.remove(Path::new("/a.bin")));
        // the open handle still sees the contents
        assert_eq!(io.read_at(&mut handle, &mut buf, 0).await.unwrap(), 3);
        io.close(handle).await.unwrap();

        let err = io.open(Path::new("/a.bin")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(io.is_empty());
    }
}
