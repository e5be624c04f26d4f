//! Error types for the registry client and serializers

use thiserror::Error;

use crate::transport::Method;

/// Result type for registry and serialization operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry client and serialization errors
///
/// The type is `Clone` so that a single failed in-flight resolution can be
/// handed to every caller waiting on it. Foreign errors are kept as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Malformed wire format: {0}")]
    MalformedWireFormat(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Incompatible schema for subject {subject}: {message}")]
    IncompatibleSchema { subject: String, message: String },

    #[error("Unknown schema {name}; available schemas: {available:?}")]
    UnknownSchema { name: String, available: Vec<String> },

    #[error("Serializer is not registered; call register() first")]
    NotRegistered,

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Registry error ({method} {url}): status {status:?}, code {error_code:?}: {message}")]
    Transport {
        method: Method,
        url: String,
        status: Option<u16>,
        error_code: Option<i64>,
        message: String,
    },

    #[error("Registry lookup task failed: {0}")]
    Aborted(String),

    #[error("Avro encoding error: {0}")]
    Encoding(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    /// HTTP status of a transport failure, if the registry answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the registry reported that the requested resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::SchemaNotFound(_)) || self.status() == Some(404)
    }

    /// 3xx response
    pub fn is_redirection(&self) -> bool {
        matches!(self.status(), Some(300..=399))
    }

    /// 4xx response: the request was invalid, unauthenticated or unauthorized
    pub fn is_bad_request(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    /// 5xx response: something is wrong with the registry itself
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Json(e.to_string())
    }
}

impl From<apache_avro::Error> for RegistryError {
    fn from(e: apache_avro::Error) -> Self {
        RegistryError::Encoding(e.to_string())
    }
}
