use std::fmt;

/// Result type for jobstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for jobstream
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Invalid configuration
    Config(String),

    /// Invalid parameter
    InvalidParameter(String),

    /// API error response
    Api { status: u16, message: String },

    /// WebSocket connection error
    WebSocket(String),

    /// Connection attempt did not complete in time
    ConnectTimeout { after_ms: u64 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::Api { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            Error::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            Error::ConnectTimeout { after_ms } => {
                write!(f, "Connection attempt timed out after {}ms", after_ms)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::Api {
                status: 404,
                message: "job not found".to_string()
            }
            .to_string(),
            "API error (status 404): job not found"
        );
        assert_eq!(
            Error::ConnectTimeout { after_ms: 1500 }.to_string(),
            "Connection attempt timed out after 1500ms"
        );
        assert_eq!(
            Error::InvalidParameter("job id must not be empty".to_string()).to_string(),
            "Invalid parameter: job id must not be empty"
        );
    }

    #[test]
    fn test_json_error_has_source() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
