//! Wire shapes shared with the legal-assistant API.

use crate::session::{CredentialPair, UserIdentity};
use serde::{Deserialize, Serialize};

/// One line of the `/chat/` NDJSON stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Full replacement of the turn's source list.
    Sources(Vec<String>),
    /// Answer delta, appended to what has arrived so far.
    Content(String),
    /// Terminal server-side failure for the turn.
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Reply of the non-streaming `/chat` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleLoginRequest {
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenReply {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: UserIdentity,
}

/// The login endpoint answers with a token envelope in the bearer scheme and
/// with the bare user in the cookie scheme (tokens travel as cookies).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LoginReply {
    Tokens(TokenReply),
    User(UserIdentity),
}

impl LoginReply {
    pub fn into_parts(self) -> (UserIdentity, Option<CredentialPair>) {
        match self {
            Self::Tokens(reply) => (
                reply.user,
                Some(CredentialPair {
                    access_token: reply.access_token,
                    refresh_token: reply.refresh_token,
                }),
            ),
            Self::User(user) => (user, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshReply {
    pub access_token: String,
    /// Present when the server rotates the refresh token as well.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Source ids use underscores for spaces (`Điều_25`).
pub fn display_source(source: &str) -> String {
    source.replace('_', " ")
}
