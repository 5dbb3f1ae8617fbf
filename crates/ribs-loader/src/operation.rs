//! The per-request state machine.
//!
//! A request moves through `Open → Read (repeated) → Close → Decode → Deliver`.
//! Each stage is one variant of [`Stage`], and [`Operation::run`] dispatches
//! on it until it reaches `Deliver`. Resources travel inside the stage that
//! needs them: the file handle lives in `Read`/`Close`, the chunk buffer
//! only in `Read`, the accumulated bytes in `Read`, `Close` and `Decode`.
//! An error edge drops whatever the current stage owns, except the handle,
//! which always goes through `Close` first.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ribs_core::{DecodeError, ImageDecoder};
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::buffer::{BufferLedger, TrackedBuffer};
use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::io::FileIo;
use crate::pool::{run_on, WorkerPool};

/// Collaborators shared by every request of one loader.
pub(crate) struct Shared<F> {
    pub(crate) io: F,
    pub(crate) pool: Arc<dyn WorkerPool>,
    pub(crate) decoder: Arc<dyn ImageDecoder>,
    pub(crate) config: LoaderConfig,
    pub(crate) ledger: BufferLedger,
}

enum Stage<H> {
    Open,
    Read {
        handle: H,
        chunk: TrackedBuffer,
        bytes: TrackedBuffer,
    },
    Close {
        handle: H,
        /// Bytes read so far, or the failure that sent us here early.
        outcome: Result<TrackedBuffer, LoadError>,
    },
    Decode {
        bytes: TrackedBuffer,
    },
    Deliver(LoadResult),
}

impl<H> Stage<H> {
    fn name(&self) -> &'static str {
        match self {
            Stage::Open => "open",
            Stage::Read { .. } => "read",
            Stage::Close { .. } => "close",
            Stage::Decode { .. } => "decode",
            Stage::Deliver(_) => "deliver",
        }
    }
}

/// Operation context for one request. Consumed by [`Operation::run`].
pub(crate) struct Operation<F: FileIo> {
    path: PathBuf,
    shared: Arc<Shared<F>>,
    /// Bytes read so far; only ever grows by what a read returned.
    offset: u64,
}

impl<F: FileIo> Operation<F> {
    pub(crate) fn new(path: PathBuf, shared: Arc<Shared<F>>) -> Self {
        Self {
            path,
            shared,
            offset: 0,
        }
    }

    /// Drive the request from `Open` to a terminal result.
    pub(crate) async fn run(self) -> LoadResult {
        let span = info_span!("load", path = %self.path.display());
        self.drive(Stage::Open).instrument(span).await
    }

    /// Decode caller-supplied bytes, skipping the file stages.
    pub(crate) async fn run_bytes(self, bytes: Vec<u8>) -> LoadResult {
        let span = info_span!("load", source = "memory", len = bytes.len());
        let bytes = self.shared.ledger.adopt(bytes);
        self.drive(Stage::Decode { bytes }).instrument(span).await
    }

    async fn drive(mut self, mut stage: Stage<F::Handle>) -> LoadResult {
        loop {
            trace!(stage = stage.name(), offset = self.offset, "dispatch");
            stage = match stage {
                Stage::Open => self.open().await,
                Stage::Read {
                    handle,
                    chunk,
                    bytes,
                } => self.read(handle, chunk, bytes).await,
                Stage::Close { handle, outcome } => self.close(handle, outcome).await,
                Stage::Decode { bytes } => self.decode(bytes).await,
                Stage::Deliver(result) => return self.deliver(result),
            };
        }
    }

    async fn open(&mut self) -> Stage<F::Handle> {
        if self.path.as_os_str().is_empty() {
            let err = io::Error::new(io::ErrorKind::InvalidInput, "empty path");
            return Stage::Deliver(Err(LoadError::open(&self.path, &err)));
        }

        let io = &self.shared.io;
        let mut handle = match io.open(&self.path).await {
            Ok(handle) => handle,
            Err(err) => return Stage::Deliver(Err(LoadError::open(&self.path, &err))),
        };

        let size_hint = if self.shared.config.presize_from_metadata {
            io.size_hint(&mut handle).await
        } else {
            None
        };
        debug!(?size_hint, "opened");

        match self.allocate(size_hint) {
            Ok((chunk, bytes)) => Stage::Read {
                handle,
                chunk,
                bytes,
            },
            Err(err) => Stage::Close {
                handle,
                outcome: Err(err),
            },
        }
    }

    fn allocate(
        &self,
        size_hint: Option<u64>,
    ) -> Result<(TrackedBuffer, TrackedBuffer), LoadError> {
        let config = &self.shared.config;
        if let (Some(size), Some(limit)) = (size_hint, config.max_file_size) {
            if size > limit {
                return Err(LoadError::allocation(
                    &self.path,
                    size,
                    format!("file is {size} bytes, limit is {limit}"),
                ));
            }
        }

        let ledger = &self.shared.ledger;
        let chunk = ledger.chunk(config.buffer_size).map_err(|e| {
            LoadError::allocation(&self.path, config.buffer_size as u64, e.to_string())
        })?;

        // One extra byte lets the final zero-length read land without a regrow.
        let reserve = size_hint
            .and_then(|size| usize::try_from(size).ok())
            .map_or(0, |size| size.saturating_add(1));
        let bytes = ledger
            .accumulator(reserve)
            .map_err(|e| LoadError::allocation(&self.path, reserve as u64, e.to_string()))?;

        Ok((chunk, bytes))
    }

    async fn read(
        &mut self,
        mut handle: F::Handle,
        mut chunk: TrackedBuffer,
        mut bytes: TrackedBuffer,
    ) -> Stage<F::Handle> {
        let capacity = chunk.len();
        let read = self
            .shared
            .io
            .read_at(&mut handle, chunk.as_mut_slice(), self.offset)
            .await;

        let n = match read {
            Ok(n) => n.min(capacity),
            Err(err) => {
                warn!(offset = self.offset, error = %err, "read failed, closing");
                return Stage::Close {
                    handle,
                    outcome: Err(LoadError::read(&self.path, self.offset, &err)),
                };
            }
        };

        if let Err(err) = bytes.extend_from_slice(&chunk.as_slice()[..n]) {
            let requested = (bytes.len() + n) as u64;
            return Stage::Close {
                handle,
                outcome: Err(LoadError::allocation(&self.path, requested, err.to_string())),
            };
        }
        self.offset += n as u64;

        if let Some(limit) = self.shared.config.max_file_size {
            if self.offset > limit {
                return Stage::Close {
                    handle,
                    outcome: Err(LoadError::allocation(
                        &self.path,
                        self.offset,
                        format!("file exceeds limit of {limit} bytes"),
                    )),
                };
            }
        }

        if n == capacity {
            // Chunk filled exactly: there may be more.
            Stage::Read {
                handle,
                chunk,
                bytes,
            }
        } else {
            debug!(total = self.offset, "reached end of file");
            drop(chunk);
            Stage::Close {
                handle,
                outcome: Ok(bytes),
            }
        }
    }

    async fn close(
        &mut self,
        handle: F::Handle,
        outcome: Result<TrackedBuffer, LoadError>,
    ) -> Stage<F::Handle> {
        let closed = self.shared.io.close(handle).await;

        match (outcome, closed) {
            (Ok(bytes), Ok(())) => Stage::Decode { bytes },
            (Ok(_bytes), Err(err)) => Stage::Deliver(Err(LoadError::close(&self.path, &err))),
            (Err(failure), Ok(())) => Stage::Deliver(Err(failure)),
            (Err(failure), Err(err)) => {
                warn!(error = %err, "close after failure also failed");
                Stage::Deliver(Err(failure))
            }
        }
    }

    async fn decode(&mut self, bytes: TrackedBuffer) -> Stage<F::Handle> {
        let decoder = Arc::clone(&self.shared.decoder);
        let len = bytes.len();
        debug!(len, "submitting to decode pool");

        let outcome = run_on(self.shared.pool.as_ref(), move || {
            let result = decoder.decode(bytes.as_slice());
            // hand the bytes back so they are released on the loop
            (result, bytes)
        })
        .await;

        let result = match outcome {
            Ok((Ok(image), bytes)) => {
                drop(bytes);
                if image.is_empty() {
                    Err(DecodeError::CorruptedFile(
                        "decoder produced an empty image".to_string(),
                    ))
                } else {
                    Ok(image)
                }
            }
            Ok((Err(err), _bytes)) => Err(err),
            Err(failure) => Err(DecodeError::Aborted(failure.to_string())),
        };

        Stage::Deliver(result.map_err(|err| LoadError::decode(&self.path, err)))
    }

    fn deliver(self, result: LoadResult) -> LoadResult {
        match &result {
            Ok(image) => debug!(
                width = image.width,
                height = image.height,
                bytes = self.offset,
                "decoded"
            ),
            Err(err) => warn!(stage = %err.kind(), error = %err, "load failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryFileIo;
    use crate::pool::RayonPool;
    use crate::LoadErrorKind;
    use ribs_core::DecodedImage;

    /// Decoder that reports how many bytes it saw as the image width.
    fn length_decoder(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let width = u32::try_from(bytes.len()).unwrap();
        Ok(DecodedImage {
            width,
            height: 1,
            pixels: bytes.to_vec(),
        })
    }

    fn shared(io: MemoryFileIo, buffer_size: usize) -> Arc<Shared<MemoryFileIo>> {
        let mut config = LoaderConfig::default();
        config.buffer_size = buffer_size;
        Arc::new(Shared {
            io,
            pool: Arc::new(RayonPool::new(1).unwrap()),
            decoder: Arc::new(length_decoder),
            config,
            ledger: BufferLedger::new(),
        })
    }

    #[tokio::test]
    async fn test_multi_chunk_accumulates_every_chunk() {
        let io = MemoryFileIo::new();
        let data: Vec<u8> = (0..=250u8).collect();
        io.insert("/img", data.clone());

        let shared = shared(io, 16);
        let image = Operation::new("/img".into(), Arc::clone(&shared))
            .run()
            .await
            .unwrap();

        assert_eq!(image.pixels, data);
        assert_eq!(shared.ledger.outstanding(), 0);
        assert_eq!(shared.ledger.total_allocated(), 2);
    }

    #[tokio::test]
    async fn test_exact_multiple_terminates() {
        let io = MemoryFileIo::new();
        io.insert("/img", vec![3u8; 64]);

        let shared = shared(io, 16);
        let image = Operation::new("/img".into(), Arc::clone(&shared))
            .run()
            .await
            .unwrap();
        assert_eq!(image.width, 64);
    }

    #[tokio::test]
    async fn test_empty_path() {
        let shared = shared(MemoryFileIo::new(), 16);
        let err = Operation::new(PathBuf::new(), Arc::clone(&shared))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::Open);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::InvalidInput));
        assert_eq!(shared.ledger.total_allocated(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_is_decode_error() {
        let io = MemoryFileIo::new();
        io.insert("/empty", Vec::new());

        let shared = shared(io, 16);
        let err = Operation::new("/empty".into(), Arc::clone(&shared))
            .run()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoadError::Decode {
                path: "/empty".into(),
                source: DecodeError::Empty,
            }
        );
        assert_eq!(shared.ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_size_hint_over_limit() {
        let io = MemoryFileIo::new();
        io.insert("/big", vec![0u8; 100]);

        let mut config = LoaderConfig::default();
        config.buffer_size = 16;
        config.max_file_size = Some(50);
        let shared = Arc::new(Shared {
            io,
            pool: Arc::new(RayonPool::new(1).unwrap()),
            decoder: Arc::new(length_decoder),
            config,
            ledger: BufferLedger::new(),
        });

        let err = Operation::new("/big".into(), Arc::clone(&shared))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::Allocation);
        // rejected before any buffer was taken
        assert_eq!(shared.ledger.total_allocated(), 0);
    }

    #[tokio::test]
    async fn test_limit_enforced_while_reading() {
        let io = MemoryFileIo::new();
        io.insert("/big", vec![0u8; 100]);

        let mut config = LoaderConfig::default();
        config.buffer_size = 16;
        config.max_file_size = Some(50);
        config.presize_from_metadata = false;
        let shared = Arc::new(Shared {
            io,
            pool: Arc::new(RayonPool::new(1).unwrap()),
            decoder: Arc::new(length_decoder),
            config,
            ledger: BufferLedger::new(),
        });

        let err = Operation::new("/big".into(), Arc::clone(&shared))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Allocation { requested: 64, .. }));
        assert_eq!(shared.ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_run_bytes_skips_file_stages() {
        let shared = shared(MemoryFileIo::new(), 16);
        let image = Operation::new(PathBuf::new(), Arc::clone(&shared))
            .run_bytes(vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(image.width, 3);
        assert_eq!(shared.ledger.total_allocated(), 1);
        assert_eq!(shared.ledger.outstanding(), 0);
    }
}
