//! Crate-wide error types.
//!
//! Library modules return [`Result`] built on the [`Error`] enum below, while
//! the CLI and `main` use `anyhow` for convenient propagation.
//!
//! The variants follow the failure taxonomy of the sync engine:
//!
//! - [`Error::Extraction`]: one file could not be parsed
//! - [`Error::Traversal`]: the music root could not be walked while listing or fingerprinting
//! - [`Error::Database`]: a catalog operation failed
//! - [`Error::Watch`]: the OS file watcher failed
//!
//! Errors that concern a single file always carry the offending path.

use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Metadata could not be extracted from one file
    #[error("Error loading track at {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// A directory under the music root could not be read
    #[error("Failed to traverse {path}: {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File watcher failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an extraction error.
    pub fn extraction(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a traversal error.
    pub fn traversal(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Traversal {
            path: path.into(),
            source,
        }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a watch error.
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// The file this error is about, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Extraction { path, .. } | Self::Traversal { path, .. } | Self::NotFound(path) => {
                Some(path)
            }
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
