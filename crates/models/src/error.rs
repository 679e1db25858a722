use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorShape {
    pub error_message: String,
    pub error_type: String,
}

/// KRPC error codes (BEP 5).
pub mod krpc_code {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;
}

#[derive(Error, Debug)]
pub enum GrapefruitError {
    #[error("Invalid identifier: {reason}")]
    InvalidId { reason: String },

    #[error("Bencode error at offset {offset}: {reason}")]
    Bencode { offset: usize, reason: String },

    #[error("Malformed KRPC message: {reason}")]
    Krpc { reason: String },

    #[error("Unknown KRPC method: {method}")]
    MethodUnknown { method: String, transaction_id: Vec<u8> },

    #[error("Peer protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid torrent metadata: {reason}")]
    MetadataInvalid { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Database error: {reason}")]
    DatabaseError { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Dockerfile error on line {line}: {reason}")]
    Dockerfile { line: usize, reason: String },

    #[error("Internal error: {reason}")]
    InternalError { reason: String },
}

impl GrapefruitError {
    pub fn to_error_shape(&self) -> ErrorShape {
        ErrorShape {
            error_message: self.to_string(),
            error_type: self.error_type().to_string(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GrapefruitError::InvalidId { .. } => "InvalidId",
            GrapefruitError::Bencode { .. } => "BencodeError",
            GrapefruitError::Krpc { .. } => "KrpcError",
            GrapefruitError::MethodUnknown { .. } => "MethodUnknown",
            GrapefruitError::Protocol { .. } => "ProtocolError",
            GrapefruitError::Timeout { .. } => "Timeout",
            GrapefruitError::MetadataInvalid { .. } => "MetadataInvalid",
            GrapefruitError::Io(_) => "IoError",
            GrapefruitError::SqlxError(_) => "DatabaseError",
            GrapefruitError::DatabaseError { .. } => "DatabaseError",
            GrapefruitError::ConfigError { .. } => "ConfigError",
            GrapefruitError::Dockerfile { .. } => "DockerfileError",
            GrapefruitError::InternalError { .. } => "InternalError",
        }
    }

    /// KRPC error code to answer a remote node with when this error ends a query.
    pub fn krpc_code(&self) -> i64 {
        match self {
            GrapefruitError::Bencode { .. }
            | GrapefruitError::Krpc { .. }
            | GrapefruitError::InvalidId { .. } => krpc_code::PROTOCOL,
            GrapefruitError::MethodUnknown { .. } => krpc_code::METHOD_UNKNOWN,
            _ => krpc_code::SERVER,
        }
    }

    pub fn krpc_message(&self) -> &'static str {
        match self.krpc_code() {
            krpc_code::PROTOCOL => "Protocol Error",
            krpc_code::METHOD_UNKNOWN => "Method Unknown",
            krpc_code::GENERIC => "Generic Error",
            _ => "Server Error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GrapefruitError::Timeout { .. })
    }
}

pub type Result<T, E = GrapefruitError> = std::result::Result<T, E>;
