use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of an [`Error`], deciding how callers react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broken graph or space definition. Fails at build time, never retried.
    Configuration,
    /// Bad input for a single entity or request.
    Data,
    /// Storage or model provider failure.
    Collaborator,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Duplicate node id {id}: registered as {existing}, redeclared as {requested}")]
    DuplicateNodeId {
        id: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid dag structure: {0}")]
    InvalidDagStructure(String),

    #[error("Invalid query definition: {0}")]
    QueryBranch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Unknown space: {0}")]
    UnknownSpace(String),

    #[error("Missing required field {schema}.{field} for object {object_id}")]
    MissingField {
        schema: String,
        field: String,
        object_id: String,
    },

    #[error("Invalid value for field {field}: expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Conflicting negative filter values at index {index}: {first} vs {second}")]
    NegativeFilterConflict { index: usize, first: f32, second: f32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Batch coordinator is closed")]
    BatcherClosed,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateNodeId { .. }
            | Error::InvalidDagStructure(_)
            | Error::QueryBranch(_)
            | Error::InvalidConfig(_)
            | Error::UnknownSchema(_)
            | Error::UnknownSpace(_) => ErrorKind::Configuration,
            Error::MissingField { .. }
            | Error::TypeMismatch { .. }
            | Error::InvalidDimension { .. }
            | Error::NegativeFilterConflict { .. }
            | Error::InvalidInput(_)
            | Error::Serialization(_) => ErrorKind::Data,
            Error::Storage(_)
            | Error::StorageUnavailable(_)
            | Error::ProviderUnavailable(_)
            | Error::BatcherClosed => ErrorKind::Collaborator,
        }
    }

    /// Whether an idempotent call that failed with this error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable(_) | Error::ProviderUnavailable(_)
        )
    }

    pub fn type_mismatch(field: &str, expected: &str) -> Self {
        Error::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::InvalidConfig("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::InvalidDimension { expected: 3, actual: 2 }.kind(),
            ErrorKind::Data
        );
        assert_eq!(
            Error::ProviderUnavailable("down".into()).kind(),
            ErrorKind::Collaborator
        );
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(Error::StorageUnavailable("timeout".into()).is_retryable());
        assert!(!Error::Storage("write rejected".into()).is_retryable());
        assert!(!Error::InvalidInput("bad".into()).is_retryable());
    }
}
