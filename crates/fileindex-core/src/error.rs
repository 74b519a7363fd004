use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Size of {} changed while reading (expected {expected} bytes, got {actual})", path.display())]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Error writing {}: {source}", path.display())]
    Transfer {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error reading archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Match mode {mode} creates duplicates within collection {input}")]
    DuplicateKey { mode: String, input: usize },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Hardlinked files disagree on content ({}: {expected:?} != {found:?})", path.display())]
    HardlinkMismatch {
        path: PathBuf,
        expected: Option<i64>,
        found: Option<i64>,
    },

    #[error("Catalog schema version {catalog} is newer than supported version {program}")]
    VersionMismatch { catalog: i64, program: i64 },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }

    pub fn transfer(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Transfer {
            path: path.into(),
            source,
        }
    }

    /// Failures confined to a single file or directory. The run records them and continues.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Error::Read { .. }
                | Error::SizeChanged { .. }
                | Error::Archive { .. }
                | Error::Transfer { .. }
        )
    }
}
