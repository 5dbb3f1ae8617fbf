//! Error types for the loader.
//!
//! Every [`LoadError`] is terminal for its request and carries the path it was
//! raised for. [`ConfigError`] only ever surfaces while building a loader.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use ribs_core::{DecodeError, DecodedImage};
use thiserror::Error;

/// Terminal value handed to a continuation.
pub type LoadResult = Result<DecodedImage, LoadError>;

/// Failures of a single load request, one variant per pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("open failed: {reason}")]
    Open {
        path: PathBuf,
        kind: io::ErrorKind,
        reason: String,
    },

    #[error("read failed: {reason}")]
    Read {
        path: PathBuf,
        /// File offset of the chunk that failed.
        offset: u64,
        kind: io::ErrorKind,
        reason: String,
    },

    #[error("close failed: {reason}")]
    Close {
        path: PathBuf,
        kind: io::ErrorKind,
        reason: String,
    },

    #[error("out of memory: {reason}")]
    Allocation {
        path: PathBuf,
        /// Bytes the pipeline tried to hold when it gave up.
        requested: u64,
        reason: String,
    },

    #[error("decode failed: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// The runtime driving the request shut down before it finished.
    #[error("request abandoned: runtime shut down before delivery")]
    Abandoned { path: PathBuf },
}

/// Stage a [`LoadError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
    Open,
    Read,
    Close,
    Allocation,
    Decode,
    Abandoned,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadErrorKind::Open => "open",
            LoadErrorKind::Read => "read",
            LoadErrorKind::Close => "close",
            LoadErrorKind::Allocation => "allocation",
            LoadErrorKind::Decode => "decode",
            LoadErrorKind::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

impl LoadError {
    pub(crate) fn open(path: &Path, err: &io::Error) -> Self {
        LoadError::Open {
            path: path.to_path_buf(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn read(path: &Path, offset: u64, err: &io::Error) -> Self {
        LoadError::Read {
            path: path.to_path_buf(),
            offset,
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn close(path: &Path, err: &io::Error) -> Self {
        LoadError::Close {
            path: path.to_path_buf(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn allocation(path: &Path, requested: u64, reason: impl Into<String>) -> Self {
        LoadError::Allocation {
            path: path.to_path_buf(),
            requested,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(path: &Path, source: DecodeError) -> Self {
        LoadError::Decode {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn abandoned(path: &Path) -> Self {
        LoadError::Abandoned {
            path: path.to_path_buf(),
        }
    }

    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::Open { .. } => LoadErrorKind::Open,
            LoadError::Read { .. } => LoadErrorKind::Read,
            LoadError::Close { .. } => LoadErrorKind::Close,
            LoadError::Allocation { .. } => LoadErrorKind::Allocation,
            LoadError::Decode { .. } => LoadErrorKind::Decode,
            LoadError::Abandoned { .. } => LoadErrorKind::Abandoned,
        }
    }

    /// Path of the request that failed. Empty for in-memory requests.
    pub fn path(&self) -> &Path {
        match self {
            LoadError::Open { path, .. }
            | LoadError::Read { path, .. }
            | LoadError::Close { path, .. }
            | LoadError::Allocation { path, .. }
            | LoadError::Decode { path, .. }
            | LoadError::Abandoned { path } => path,
        }
    }

    /// The underlying I/O error kind, for the stages that do I/O.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            LoadError::Open { kind, .. }
            | LoadError::Read { kind, .. }
            | LoadError::Close { kind, .. } => Some(*kind),
            LoadError::Allocation { .. }
            | LoadError::Decode { .. }
            | LoadError::Abandoned { .. } => None,
        }
    }
}

/// Errors raised while building a [`crate::Loader`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid loader configuration: `{field}` {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to parse loader configuration")]
    Parse(#[from] serde_json::Error),

    #[error("failed to build decode worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no tokio runtime available to drive file I/O")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
