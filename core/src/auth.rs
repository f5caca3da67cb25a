use crate::error::{ApiError, RefreshError};
use crate::protocol::{GoogleLoginRequest, LoginReply, RefreshReply, RefreshRequest};
use crate::session::{CredentialPair, SessionStore, UserIdentity};
use crate::transport::{ApiRequest, HttpTransport};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const LOGIN_PATH: &str = "/auth/login/google";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
/// Where the user is sent once the session cannot be recovered.
pub const LOGIN_ENTRY: &str = "/login";

/// How credentials reach the API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// HttpOnly cookies held by the transport; the session carries identity only.
    #[default]
    Cookie,
    /// Access/refresh pair held in the session; access token sent as a header.
    Bearer,
}

impl AuthScheme {
    /// Attach whatever this scheme requires before a request is sent.
    pub fn attach(self, session: &SessionStore, request: ApiRequest) -> ApiRequest {
        match self {
            Self::Cookie => request,
            Self::Bearer => match session.access_token() {
                Some(token) => request.with_bearer(token),
                None => request,
            },
        }
    }
}

impl FromStr for AuthScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(Self::Cookie),
            "bearer" => Ok(Self::Bearer),
            other => Err(format!("unknown auth scheme `{other}` (expected cookie or bearer)")),
        }
    }
}

/// The one global side effect: sending the user back to the login entry point
/// after the session could not be refreshed.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

impl<F> LoginRedirect for F
where
    F: Fn() + Send + Sync,
{
    fn redirect_to_login(&self) {
        self()
    }
}

/// Default redirect for headless use: records the redirect in the log.
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!(entry = LOGIN_ENTRY, "session expired; redirecting to login");
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

#[derive(Default)]
struct RefreshState {
    /// Number of exchanges that have completed.
    epoch: u64,
    in_flight: Option<SharedRefresh>,
    last: Option<Result<(), RefreshError>>,
}

/// Funnels every refresh into at most one exchange at a time.
///
/// Refresh tokens rotate server side, so two racing exchanges could invalidate
/// each other. Callers record [`RefreshCoordinator::epoch`] before sending their
/// request; on a 401 they either join the exchange already in flight, reuse the
/// outcome of one that finished after their request went out, or start a new one.
#[derive(Clone)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    scheme: AuthScheme,
    redirect: Arc<dyn LoginRedirect>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: SessionStore,
        scheme: AuthScheme,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::default())),
            transport,
            session,
            scheme,
            redirect,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub async fn refresh(&self, seen_epoch: u64) -> Result<(), RefreshError> {
        let attempt = {
            let mut state = self.state.lock();
            if let Some(in_flight) = &state.in_flight {
                tracing::debug!("joining in-flight refresh");
                in_flight.clone()
            } else if state.epoch > seen_epoch {
                tracing::debug!(epoch = state.epoch, seen_epoch, "reusing completed refresh");
                return state.last.clone().unwrap_or(Ok(()));
            } else {
                let attempt = self.clone().run().boxed().shared();
                state.in_flight = Some(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    async fn run(self) -> Result<(), RefreshError> {
        let result = self.exchange().await;
        match &result {
            Ok(()) => tracing::info!(scheme = ?self.scheme, "credentials refreshed"),
            Err(err) => {
                tracing::warn!(%err, "refresh failed; clearing session");
                self.session.logout();
                self.redirect.redirect_to_login();
            }
        }
        let mut state = self.state.lock();
        state.epoch += 1;
        state.last = Some(result.clone());
        state.in_flight = None;
        result
    }

    async fn exchange(&self) -> Result<(), RefreshError> {
        match self.scheme {
            AuthScheme::Cookie => {
                let response = self.transport.execute(&ApiRequest::post(REFRESH_PATH)).await?;
                if !response.is_success() {
                    return Err(RefreshError::Rejected {
                        status: response.status.as_u16(),
                    });
                }
                Ok(())
            }
            AuthScheme::Bearer => {
                let refresh_token = self
                    .session
                    .refresh_token()
                    .ok_or(RefreshError::MissingRefreshToken)?;
                let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
                    refresh_token: refresh_token.clone(),
                })?;
                let response = self.transport.execute(&request).await?;
                if !response.is_success() {
                    return Err(RefreshError::Rejected {
                        status: response.status.as_u16(),
                    });
                }
                let reply: RefreshReply = response
                    .json()
                    .map_err(|err| RefreshError::Decode(err.to_string()))?;
                self.session.update_credential(CredentialPair {
                    access_token: reply.access_token,
                    refresh_token: reply.refresh_token.unwrap_or(refresh_token),
                });
                Ok(())
            }
        }
    }
}

/// Login and logout exchanges. These talk to the transport directly: neither
/// should trigger a refresh.
#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    scheme: AuthScheme,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionStore, scheme: AuthScheme) -> Self {
        Self {
            transport,
            session,
            scheme,
        }
    }

    /// Exchange a Google ID token for a session. An existing session is kept as is.
    pub async fn login_google(&self, credential: &str) -> Result<UserIdentity, ApiError> {
        if let Some(user) = self.session.user() {
            tracing::debug!(user = %user.email, "already logged in");
            return Ok(user);
        }
        let request = ApiRequest::post(LOGIN_PATH).json(&GoogleLoginRequest {
            credential: credential.to_owned(),
        })?;
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(ApiError::Status {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }
        let reply: LoginReply = response
            .json()
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        let (user, credential) = reply.into_parts();
        if self.scheme == AuthScheme::Bearer && credential.is_none() {
            return Err(ApiError::Decode(
                "login reply carried no tokens for the bearer scheme".into(),
            ));
        }
        self.session.login(user.clone(), credential);
        Ok(user)
    }

    /// Invalidate the server-side session, then clear the local one no matter
    /// how the call went.
    pub async fn logout(&self) {
        let mut request = ApiRequest::post(LOGOUT_PATH);
        if self.scheme == AuthScheme::Bearer {
            if let Some(refresh_token) = self.session.refresh_token() {
                match request.clone().json(&RefreshRequest { refresh_token }) {
                    Ok(with_body) => request = with_body,
                    Err(err) => tracing::warn!(%err, "failed to encode logout body"),
                }
            }
        }
        let request = self.scheme.attach(&self.session, request);
        match self.transport.execute(&request).await {
            Ok(response) if !response.is_success() => {
                tracing::warn!(status = %response.status, "logout rejected by server")
            }
            Err(err) => tracing::warn!(%err, "logout request failed"),
            Ok(_) => {}
        }
        self.session.logout();
        self.transport.clear_credentials();
    }
}
