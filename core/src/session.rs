use crate::store::SessionFile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Identity issued by the server for one login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserIdentity {
    /// Name shown to the user: full name when present, otherwise the email.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// Opaque bearer credentials. The client never inspects either token.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: Option<UserIdentity>,
    pub authenticated: bool,
    /// Absent in the cookie scheme, where credentials live in the transport's jar.
    #[serde(default)]
    pub credential: Option<CredentialPair>,
}

impl Session {
    fn signed_in(user: UserIdentity, credential: Option<CredentialPair>) -> Self {
        Self {
            user: Some(user),
            authenticated: true,
            credential,
        }
    }

    /// A record is consistent when the flag and the identity agree.
    pub fn is_consistent(&self) -> bool {
        self.authenticated == self.user.is_some()
    }
}

/// Process-wide session container.
///
/// Clones share the same state. Every transition replaces the whole record in
/// one step, so readers (snapshots or subscribers) only ever observe complete
/// sessions. The only writers are [`SessionStore::login`],
/// [`SessionStore::update_credential`] and [`SessionStore::logout`].
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<Session>>,
    file: Option<SessionFile>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            state: Arc::new(state),
            file: None,
        }
    }

    /// Restore the persisted record (if any) and persist every later transition.
    pub fn with_file(file: SessionFile) -> Self {
        let restored = match file.load() {
            Ok(Some(session)) => session,
            Ok(None) => Session::default(),
            Err(err) => {
                tracing::warn!(%err, "failed to restore persisted session; starting logged out");
                Session::default()
            }
        };
        if restored.authenticated {
            tracing::debug!("restored persisted session");
        }
        let (state, _) = watch::channel(restored);
        Self {
            state: Arc::new(state),
            file: Some(file),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.state.borrow().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state
            .borrow()
            .credential
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state
            .borrow()
            .credential
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
    }

    pub fn login(&self, user: UserIdentity, credential: Option<CredentialPair>) {
        tracing::info!(user = %user.email, "session established");
        self.state.send_replace(Session::signed_in(user, credential));
        self.persist();
    }

    /// Install refreshed credentials. Ignored once the session has been cleared,
    /// so a refresh that completes after logout cannot bring the session back.
    pub fn update_credential(&self, credential: CredentialPair) -> bool {
        let applied = self.state.send_if_modified(|session| {
            if !session.authenticated {
                return false;
            }
            session.credential = Some(credential);
            true
        });
        if applied {
            self.persist();
        } else {
            tracing::debug!("discarding refreshed credentials for a cleared session");
        }
        applied
    }

    pub fn logout(&self) {
        self.state.send_replace(Session::default());
        if let Some(file) = &self.file {
            if let Err(err) = file.clear() {
                tracing::warn!(%err, "failed to clear persisted session");
            }
        }
        tracing::info!("session cleared");
    }

    fn persist(&self) {
        let Some(file) = &self.file else {
            return;
        };
        if let Err(err) = file.save(&self.snapshot()) {
            tracing::warn!(%err, "failed to persist session");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
