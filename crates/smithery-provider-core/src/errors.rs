use smithery_protocol::openai::error::ErrorResponse;
use smithery_transform::generate_content::openai_chat_completions2smithery::request::TranslateError;

pub type ProxyResult<T> = Result<T, ProxyError>;

pub const MODEL_BLOCKED_MESSAGE: &str = "This model is temporarily blocked.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("no upstream credentials are configured")]
    NoCredentialsAvailable,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    UnsupportedContent(String),
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("model `{model}` is blocked")]
    ModelBlocked { model: String },
    #[error("upstream rejected credential {index} ({name}) with status {status}")]
    AuthRejected {
        index: usize,
        name: String,
        status: u16,
    },
    #[error("upstream answered credential {index} with an anti-bot challenge (status {status})")]
    UpstreamChallenge { index: usize, status: u16 },
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("upstream did not respond within {secs}s")]
    UpstreamTimeout { secs: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::UnsupportedContent(_) => 400,
            ProxyError::Unauthorized | ProxyError::AuthRejected { .. } => 401,
            ProxyError::ModelBlocked { .. } => 403,
            ProxyError::UpstreamChallenge { .. }
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::UpstreamTransport(_) => 502,
            ProxyError::UpstreamTimeout { .. } => 504,
            ProxyError::NoCredentialsAvailable | ProxyError::Internal(_) => 500,
        }
    }

    fn kind_and_code(&self) -> (&'static str, &'static str) {
        match self {
            ProxyError::InvalidRequest(_) => ("invalid_request_error", "invalid_request"),
            ProxyError::UnsupportedContent(_) => ("invalid_request_error", "unsupported_content"),
            ProxyError::Unauthorized => ("authentication_error", "invalid_api_key"),
            ProxyError::ModelBlocked { .. } => ("permission_error", "model_blocked"),
            ProxyError::AuthRejected { .. } => ("authentication_error", "upstream_auth_rejected"),
            ProxyError::UpstreamChallenge { .. } => ("upstream_error", "upstream_challenge"),
            ProxyError::UpstreamStatus { .. } => ("upstream_error", "upstream_status"),
            ProxyError::UpstreamTransport(_) => ("upstream_error", "upstream_transport"),
            ProxyError::UpstreamTimeout { .. } => ("timeout_error", "upstream_timeout"),
            ProxyError::NoCredentialsAvailable => ("server_error", "no_credentials"),
            ProxyError::Internal(_) => ("server_error", "internal_error"),
        }
    }

    /// Client-facing message. Blocked models get a fixed text.
    pub fn message(&self) -> String {
        match self {
            ProxyError::ModelBlocked { .. } => MODEL_BLOCKED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        let (kind, code) = self.kind_and_code();
        ErrorResponse::new(self.message(), kind, Some(code))
    }

    /// Failures that justify one more attempt on a different credential.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::AuthRejected { .. } | ProxyError::UpstreamChallenge { .. }
        )
    }
}

impl From<TranslateError> for ProxyError {
    fn from(value: TranslateError) -> Self {
        match value {
            TranslateError::InvalidRequest(_) => ProxyError::InvalidRequest(value.to_string()),
            TranslateError::UnsupportedContent { .. } => {
                ProxyError::UnsupportedContent(value.to_string())
            }
        }
    }
}
