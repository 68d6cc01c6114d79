//! Error taxonomy for the watch/build/run loop

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Invalid directory, unresolvable path, watcher registration failure.
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate {program}: {reason}")]
    Terminate { program: String, reason: String },

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("State transition error: {0}")]
    StateTransition(String),
}

impl WatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
