//! Client core for the Lexis legal-assistant API: session state, the
//! refresh-on-401 request client, and the streaming chat consumer.

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod fake;
pub mod ndjson;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use auth::{AuthApi, AuthScheme, LogRedirect, LoginRedirect, RefreshCoordinator};
pub use chat::{AskOutcome, ChatCallbacks, ChatConsumer, ChatFailure, ChatObserver};
pub use client::ApiClient;
pub use config::{ClientSettings, ConfigError};
pub use error::{ApiError, RefreshError, TransportError};
pub use protocol::{display_source, ChatReply, StreamEvent};
pub use session::{CredentialPair, Session, SessionStore, UserIdentity};
pub use state::{ChatSession, ConversationTurn, Submitted, Transcript, TurnRole};
pub use store::SessionFile;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
