/// Failures raised below the HTTP status layer: the request never produced a
/// response, or a streamed body broke off half way.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("response body interrupted: {0}")]
    Body(String),
    #[error("invalid request: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else if err.is_builder() {
            Self::Request(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Why a refresh exchange did not produce usable credentials.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token is stored in the session")]
    MissingRefreshToken,
    #[error("refresh endpoint rejected the exchange with status {status}")]
    Rejected { status: u16 },
    #[error("refresh exchange failed: {0}")]
    Transport(#[from] TransportError),
    #[error("refresh reply could not be decoded: {0}")]
    Decode(String),
}

/// Errors surfaced to callers of [`crate::client::ApiClient`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("session expired; please log in again")]
    SessionExpired,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status carried by the error, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}
