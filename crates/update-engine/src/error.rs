//! Error types for the update engine

use thiserror::Error;

/// Result type alias for update engine operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Failures that abort a whole call.
///
/// Per-ticket problems never show up here; they are reported as
/// [`crate::models::UpdateVerdict::Error`] entries instead.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The same ticket identity appeared twice in one batch
    #[error("Duplicate ticket identity in batch: {id}")]
    DuplicateTicketIdentity { id: String },

    /// The envelope carried a protocol version other than the configured one
    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    ProtocolVersionMismatch { expected: String, found: String },

    /// The response envelope could not be decoded
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// The transport collaborator failed to deliver the request
    #[error("Transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    /// A global parameter key cannot be written as an XML attribute name
    #[error("Invalid parameter key {key:?}: not an XML name")]
    InvalidParamKey { key: String },

    /// A statistic could not be serialized
    #[error("Invalid stat '{name}': {message}")]
    InvalidStat { name: String, message: String },

    /// Writing an outbound document failed
    #[error("Encoding error: {message}")]
    Encode { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors while reading configuration
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// TOML parsing errors
    #[error("TOML parsing error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// URL parsing errors
    #[error("URL parsing error: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },
}

impl UpdateError {
    /// Create a new malformed response error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a new invalid stat error
    pub fn invalid_stat<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::InvalidStat {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new encoding error
    pub fn encode<S: Into<String>>(message: S) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error means the response envelope itself was rejected
    pub fn is_envelope_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. } | Self::ProtocolVersionMismatch { .. }
        )
    }
}

/// Failure reported by a [`crate::transport::Transport`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered with a non-2xx status
    #[error("server returned status {code}")]
    Status { code: u16 },

    /// The request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled before completing
    #[error("request cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: UpdateError = TransportError::Status { code: 503 }.into();
        assert!(matches!(err, UpdateError::Transport { .. }));
        assert_eq!(err.to_string(), "Transport error: server returned status 503");
    }

    #[test]
    fn test_envelope_failures() {
        assert!(UpdateError::malformed("bad root").is_envelope_failure());
        assert!(UpdateError::ProtocolVersionMismatch {
            expected: "3.0".to_string(),
            found: "2.0".to_string(),
        }
        .is_envelope_failure());
        assert!(!UpdateError::from(TransportError::Timeout).is_envelope_failure());
    }
}
