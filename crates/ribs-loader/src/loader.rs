//! Public entry point: [`Loader`] and its builder.

use std::path::PathBuf;
use std::sync::Arc;

use ribs_core::{ImageDecoder, StandardDecoder};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::buffer::BufferLedger;
use crate::config::LoaderConfig;
use crate::error::{ConfigError, LoadError, LoadResult};
use crate::io::{FileIo, TokioFileIo};
use crate::operation::{Operation, Shared};
use crate::pool::{RayonPool, WorkerPool};

/// Loads image files without blocking the caller.
///
/// File I/O runs as tasks on the injected tokio runtime; decoding runs on the
/// worker pool. Every request gets its own context and buffers, so any number
/// of requests may be in flight at once. Clones share the same collaborators.
///
/// Continuations run on the runtime's worker threads. On a multi-thread
/// runtime two continuations may run at the same time; pass a current-thread
/// handle to [`LoaderBuilder::runtime`] when they must be serialised.
pub struct Loader<F: FileIo = TokioFileIo> {
    shared: Arc<Shared<F>>,
    runtime: Handle,
}

impl<F: FileIo> Clone for Loader<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        }
    }
}

impl Loader<TokioFileIo> {
    /// Loader on the real filesystem, the current runtime and a fresh rayon pool.
    pub fn new(config: LoaderConfig) -> Result<Self, ConfigError> {
        LoaderBuilder::new(config).build()
    }

    pub fn builder(config: LoaderConfig) -> LoaderBuilder<TokioFileIo> {
        LoaderBuilder::new(config)
    }
}

impl<F: FileIo> Loader<F> {
    /// Start loading `path`; `continuation` receives the result exactly once.
    ///
    /// Returns immediately. The continuation runs on the loader's runtime
    /// after every buffer and handle of the request has been released. On a
    /// current-thread runtime it is therefore serialised with the loop's
    /// other completions. If the runtime shuts down first, the continuation
    /// receives [`LoadError::Abandoned`] on the thread dropping the task.
    pub fn decode<P, C>(&self, path: P, continuation: C)
    where
        P: Into<PathBuf>,
        C: FnOnce(LoadResult) + Send + 'static,
    {
        let path = path.into();
        let delivery = Delivery::new(path.clone(), continuation);
        let operation = Operation::new(path, Arc::clone(&self.shared));
        self.runtime.spawn(async move {
            let result = operation.run().await;
            delivery.deliver(result);
        });
    }

    /// Decode bytes already in memory, delivering like [`Loader::decode`].
    pub fn decode_bytes<C>(&self, bytes: Vec<u8>, continuation: C)
    where
        C: FnOnce(LoadResult) + Send + 'static,
    {
        let delivery = Delivery::new(PathBuf::new(), continuation);
        let operation = Operation::new(PathBuf::new(), Arc::clone(&self.shared));
        self.runtime.spawn(async move {
            let result = operation.run_bytes(bytes).await;
            delivery.deliver(result);
        });
    }

    /// Load `path` and await the result in place.
    pub async fn load(&self, path: impl Into<PathBuf>) -> LoadResult {
        Operation::new(path.into(), Arc::clone(&self.shared))
            .run()
            .await
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    /// Buffer accounting across every request of this loader.
    pub fn ledger(&self) -> &BufferLedger {
        &self.shared.ledger
    }

    pub fn file_io(&self) -> &F {
        &self.shared.io
    }
}

/// Holds a continuation until the request reaches a result.
///
/// Dropping an undelivered guard (the task was torn down with its runtime)
/// still fires the continuation, with [`LoadError::Abandoned`].
struct Delivery<C: FnOnce(LoadResult)> {
    path: PathBuf,
    continuation: Option<C>,
}

impl<C: FnOnce(LoadResult)> Delivery<C> {
    fn new(path: PathBuf, continuation: C) -> Self {
        Self {
            path,
            continuation: Some(continuation),
        }
    }

    fn deliver(mut self, result: LoadResult) {
        if let Some(continuation) = self.continuation.take() {
            continuation(result);
        }
    }
}

impl<C: FnOnce(LoadResult)> Drop for Delivery<C> {
    fn drop(&mut self) {
        if let Some(continuation) = self.continuation.take() {
            warn!(path = %self.path.display(), "request dropped before delivery");
            continuation(Err(LoadError::abandoned(&self.path)));
        }
    }
}

/// Assembles a [`Loader`], injecting any collaborator a caller wants to replace.
pub struct LoaderBuilder<F = TokioFileIo> {
    config: LoaderConfig,
    io: F,
    pool: Option<Arc<dyn WorkerPool>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    runtime: Option<Handle>,
}

impl LoaderBuilder<TokioFileIo> {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            io: TokioFileIo,
            pool: None,
            decoder: None,
            runtime: None,
        }
    }
}

impl<F: FileIo> LoaderBuilder<F> {
    /// Replace the filesystem.
    pub fn file_io<G: FileIo>(self, io: G) -> LoaderBuilder<G> {
        LoaderBuilder {
            config: self.config,
            io,
            pool: self.pool,
            decoder: self.decoder,
            runtime: self.runtime,
        }
    }

    pub fn worker_pool(mut self, pool: impl WorkerPool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }

    /// Share one pool between several loaders.
    pub fn shared_worker_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn decoder(mut self, decoder: impl ImageDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Runtime that drives the file stages and runs continuations.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Loader<F>, ConfigError> {
        let config = self.config;
        config.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()?,
        };

        let pool: Arc<dyn WorkerPool> = match self.pool {
            Some(pool) => pool,
            None => Arc::new(RayonPool::new(config.decode_threads)?),
        };

        let decoder: Arc<dyn ImageDecoder> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(StandardDecoder {
                apply_orientation: config.apply_orientation,
            }),
        };

        info!(
            buffer_size = config.buffer_size,
            decode_threads = config.decode_threads,
            max_file_size = ?config.max_file_size,
            "loader ready"
        );

        Ok(Loader {
            shared: Arc::new(Shared {
                io: self.io,
                pool,
                decoder,
                config,
                ledger: BufferLedger::new(),
            }),
            runtime,
        })
    }
}
