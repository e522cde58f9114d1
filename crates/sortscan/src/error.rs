//! Error types shared by the sort and scan engines.

use thiserror::Error;

/// Errors that can occur when building or running a sort or scan.
#[derive(Debug, Error)]
pub enum Error {
    /// Type name or index outside the registered type table.
    #[error("Unknown type: '{0}'")]
    UnknownType(String),

    /// Algorithm name not present in the registry of its family.
    #[error("The requested {family} implementation, '{name}', was not found")]
    UnknownAlgorithm { family: &'static str, name: String },

    /// Malformed or out-of-range option string or call arguments.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Failure reported by the compute runtime.
    #[error("Runtime error in {operation}: {source}")]
    Runtime {
        operation: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn runtime(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Runtime {
            operation: operation.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// True for errors raised before any device work was scheduled.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Runtime { .. })
    }
}

/// Result type for sortscan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the name of the failing runtime operation to a collaborator error.
pub trait ResultExt<T> {
    fn op(self, operation: &str) -> Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn op(self, operation: &str) -> Result<T> {
        self.map_err(|source| Error::runtime(operation, source))
    }
}
