use rfbrelay_core::RelayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open telemetry log {path}: {source}")]
    Telemetry {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("logging setup failed: {message}")]
    Logging { message: String },
}

impl ServerError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 2,
            Self::Relay(RelayError::InvalidSessionId { .. }) => 2,
            Self::Bind { .. } => 3,
            Self::Relay(RelayError::ResourceUnavailable { .. }) => 4,
            _ => 1,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_usage_from_runtime_failures() {
        assert_eq!(ServerError::invalid("bad flag").exit_code(), 2);
        let bind = ServerError::Bind {
            addr: "0.0.0.0:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.exit_code(), 3);
        let missing = ServerError::Relay(RelayError::unavailable(
            "session x",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
        assert_eq!(missing.exit_code(), 4);
        assert_eq!(ServerError::from(std::io::Error::other("x")).exit_code(), 1);
    }

    #[test]
    fn relay_errors_display_transparently() {
        let error = ServerError::from(RelayError::InvalidSessionId {
            id: "../x".to_string(),
            reason: "starts with '.'",
        });
        assert_eq!(error.to_string(), "invalid session id \"../x\": starts with '.'");
        assert_eq!(error.exit_code(), 2);
    }
}
