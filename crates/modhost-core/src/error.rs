//! Host error types.
//!
//! [`HostError`] aborts a load cycle; its [`phase`](HostError::phase) names the
//! stage that failed. Patch and timer errors live in the SDK because they are
//! reported to the calling mod only.

use std::path::PathBuf;

use modhost_sdk::ModError;
use thiserror::Error;

use crate::compiler::CompileFailure;

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("discovery failed at {}: {message}", path.display())]
    Discovery { path: PathBuf, message: String },

    #[error("compilation of '{id}' failed: {failure}")]
    Compilation {
        id: String,
        #[source]
        failure: CompileFailure,
    },

    #[error("failed to load '{id}': {source}")]
    Load {
        id: String,
        #[source]
        source: LoadError,
    },

    #[error("initialization of '{id}' failed: {source}")]
    Initialization {
        id: String,
        #[source]
        source: ModError,
    },

    #[error("stopping '{id}' failed: {source}")]
    Stop {
        id: String,
        #[source]
        source: ModError,
    },

    #[error("invalid host state: {0}")]
    InvalidState(String),

    /// `context` is the mod id, or the cache root for cycle-wide operations.
    #[error("artifact cache error ({context}): {source}")]
    Cache {
        context: String,
        #[source]
        source: CacheError,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    /// Stage of the load/stop pipeline the error belongs to.
    pub fn phase(&self) -> &'static str {
        match self {
            HostError::Configuration(_) => "configuration",
            HostError::Discovery { .. } => "discovery",
            HostError::Compilation { .. } => "compilation",
            HostError::Load { .. } => "load",
            HostError::Initialization { .. } => "initialization",
            HostError::Stop { .. } => "stop",
            HostError::InvalidState(_) => "state",
            HostError::Cache { .. } => "cache",
            HostError::Io { .. } => "io",
        }
    }

    pub(crate) fn discovery(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        HostError::Discovery {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} did not exist; a default configuration was written there", path.display())]
    CreatedDefault { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("referenced library {} does not exist", path.display())]
    MissingLibrary { path: PathBuf },

    #[error("unknown compiler '{0}'")]
    UnknownCompiler(String),

    #[error("compiler '{name}' failed to initialize: {message}")]
    CompilerInit { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open library {}: {message}", path.display())]
    Library { path: PathBuf, message: String },

    #[error("cannot copy library {} for loading: {source}", path.display())]
    ShadowCopy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("library {} does not export {symbol}: {message}", path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        message: String,
    },

    #[error("incompatible ABI version: expected {expected}, got {got}")]
    AbiMismatch { expected: u32, got: u32 },

    #[error("entry type '{0}' not found among the library's exports")]
    EntryNotFound(String),

    #[error("export '{0}' does not implement the Mod contract")]
    NotAnEntry(String),

    #[error("no statically linked mod registered for '{0}'")]
    NotRegistered(String),
}
