//! Ribs Loader - asynchronous image file decoding
//!
//! Turns a path into a decoded image without blocking the calling thread:
//! the file is opened, read in fixed-size chunks and closed through a
//! non-blocking [`FileIo`], then the accumulated bytes are decoded on a
//! [`WorkerPool`]. Exactly one [`LoadResult`] reaches the caller per request.
//!
//! # Module Structure
//!
//! - `config` - [`LoaderConfig`] and its JSON form
//! - `error` - [`LoadError`] per pipeline stage, [`ConfigError`]
//! - `io` - the file facility and its tokio and in-memory implementations
//! - `pool` - decode worker pool
//! - `buffer` - per-request buffers and the [`BufferLedger`]
//! - `loader` - [`Loader`] and [`LoaderBuilder`]
//!
//! # Usage
//!
//! ```ignore
//! let loader = Loader::new(LoaderConfig::default())?;
//! loader.decode("photo.png", |result| match result {
//!     Ok(image) => println!("{}x{}", image.width, image.height),
//!     Err(err) => eprintln!("{err}"),
//! });
//! ```

mod buffer;
mod config;
mod error;
mod io;
mod loader;
mod operation;
mod pool;

pub use buffer::BufferLedger;
pub use config::{LoaderConfig, DEFAULT_BUFFER_SIZE};
pub use error::{ConfigError, LoadError, LoadErrorKind, LoadResult};
pub use io::{FileIo, MemoryFileIo, MemoryHandle, TokioFileIo};
pub use loader::{Loader, LoaderBuilder};
pub use pool::{Job, RayonPool, WorkerPool};

pub use ribs_core::{DecodeError, DecodedImage, ImageDecoder, StandardDecoder};
