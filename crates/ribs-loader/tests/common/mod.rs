//! Shared fixtures for the loader integration tests.

#![allow(dead_code)]

use std::io::{self, Cursor};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ribs_loader::{
    DecodeError, DecodedImage, FileIo, Job, LoadResult, Loader, MemoryFileIo, MemoryHandle,
    WorkerPool,
};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A PNG of the given size filled with one colour.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([12, 34, 56]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode fixture");
    out.into_inner()
}

/// Decoder that hands the raw bytes back as a one-row image.
pub fn echo_decoder(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    if bytes.starts_with(b"bad") {
        return Err(DecodeError::InvalidFormat);
    }
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(DecodedImage {
        width: u32::try_from(bytes.len()).expect("fixture fits u32"),
        height: 1,
        pixels: bytes.to_vec(),
    })
}

/// Counters for every call a [`ScriptedIo`] served.
#[derive(Debug, Default)]
pub struct IoStats {
    pub opened: AtomicUsize,
    pub reads: AtomicUsize,
    pub closed: AtomicUsize,
}

impl IoStats {
    pub fn open_handles(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory file facility with injectable failures and random completion delays.
#[derive(Debug, Clone, Default)]
pub struct ScriptedIo {
    pub files: MemoryFileIo,
    pub stats: Arc<IoStats>,
    /// Reads at or beyond this offset fail.
    pub fail_read_at: Option<u64>,
    pub fail_close: bool,
    pub jitter: bool,
}

impl ScriptedIo {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pause(&self) {
        if !self.jitter {
            return;
        }
        let micros: u64 = rand::random_range(0..300);
        if micros % 3 == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }
}

#[async_trait]
impl FileIo for ScriptedIo {
    type Handle = MemoryHandle;

    async fn open(&self, path: &Path) -> io::Result<MemoryHandle> {
        self.pause().await;
        let handle = self.files.open(path).await?;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn size_hint(&self, handle: &mut MemoryHandle) -> Option<u64> {
        self.files.size_hint(handle).await
    }

    async fn read_at(
        &self,
        handle: &mut MemoryHandle,
        buf: &mut [u8],
        offset: u64,
    ) -> io::Result<usize> {
        self.pause().await;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read_at.is_some_and(|at| offset >= at) {
            return Err(io::Error::other("device unplugged"));
        }
        self.files.read_at(handle, buf, offset).await
    }

    async fn close(&self, handle: MemoryHandle) -> io::Result<()> {
        self.pause().await;
        drop(handle);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(io::Error::other("stale file handle"));
        }
        Ok(())
    }
}

/// Pool that throws every job away.
pub struct DroppingPool;

impl WorkerPool for DroppingPool {
    fn submit(&self, job: Job) {
        drop(job);
    }
}

/// Run one request through [`Loader::decode`] and wait for its continuation.
pub async fn decode_once<F: FileIo>(loader: &Loader<F>, path: &str) -> LoadResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    loader.decode(path, move |result| {
        let _ = tx.send(result);
    });
    let result = rx.recv().await.expect("continuation fired");
    assert!(rx.recv().await.is_none(), "continuation fired twice");
    result
}
