#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    /// Network-related errors before a response was obtained
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    /// The completion endpoint went quiet for longer than the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Non-2xx answer from the completion endpoint, body kept verbatim
    #[error("API request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },
    /// Response parsing errors (missing fields, invalid format)
    #[error("Failed to parse response: {0}")]
    ResponseFormat(String),
    /// A single event-stream frame that could not be decoded
    #[error("Malformed stream frame: {0}")]
    MalformedFrame(String),
    /// Stream-related errors
    #[error("Stream error: {0}")]
    StreamError(String),
    /// No transcript supplied
    #[error("No input text.")]
    EmptyInput,
    /// Tool execution errors
    #[error("Tool error: {0}")]
    ToolError(ToolError),
    /// I/O error
    #[error("I/O error: {0}")]
    IOError(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LLMError {
    /// HTTP status to report to the caller, preserving the upstream status.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::EmptyInput => 400,
            Self::Timeout(_) => 504,
            Self::Network(err) if err.is_timeout() => 504,
            Self::Network(_) | Self::StreamError(_) | Self::ResponseFormat(_) => 502,
            _ => 500,
        }
    }

    /// Short machine-readable name of the error kind.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "TransportError",
            Self::Timeout(_) => "Timeout",
            Self::Upstream { .. } => "UpstreamError",
            Self::ResponseFormat(_) => "ResponseFormat",
            Self::MalformedFrame(_) => "MalformedFrame",
            Self::StreamError(_) => "StreamError",
            Self::EmptyInput => "EmptyInput",
            Self::ToolError(_) => "ToolError",
            Self::IOError(_) => "IOError",
            Self::ConfigError(_) => "ConfigError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool not found error
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    /// Provider-reported failure
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
    /// Tool-call arguments were not valid JSON
    #[error("Invalid tool arguments: {0}")]
    ArgumentParse(String),
    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Fetched page had no usable text
    #[error("No substantial content found on page: {0}")]
    EmptyContent(String),
    /// Network or channel failure talking to a tool backend
    #[error("Transport error: {0}")]
    Transport(String),
    /// Tool backend did not answer in time
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Access outside the permitted area
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl From<ToolError> for LLMError {
    fn from(err: ToolError) -> Self {
        Self::ToolError(err)
    }
}

impl From<std::io::Error> for LLMError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err.to_string())
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err)
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::ExecutionError(format!("HTTP {status}: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::ExecutionError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_is_preserved() {
        let err = LLMError::Upstream {
            status: 429,
            body: "{\"error\":{\"message\":\"rate limited\"}}".to_string(),
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.code(), "UpstreamError");
    }

    #[test]
    fn test_empty_input_is_bad_request() {
        assert_eq!(LLMError::EmptyInput.status_code(), 400);
        assert_eq!(LLMError::EmptyInput.to_string(), "No input text.");
    }

    #[test]
    fn test_io_permission_maps_to_permission_denied() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ToolError::from(err), ToolError::PermissionDenied(_)));
    }
}
