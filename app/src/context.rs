use anyhow::Result;
use lexis_core::{
    ApiClient, ApiError, AuthApi, ChatConsumer, ClientSettings, HttpTransport, LoginRedirect,
    ReqwestTransport, SessionFile, SessionStore, UserIdentity,
};
use std::sync::Arc;

/// Tells the terminal user to sign in again once the session is gone.
pub struct PromptRedirect;

impl LoginRedirect for PromptRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!("session expired");
        eprintln!("Your session has expired. Sign in again with `lexis login --credential <token>`.");
    }
}

/// Everything one command invocation needs, wired from the settings.
#[derive(Clone)]
pub struct Lexis {
    session: SessionStore,
    client: ApiClient,
    auth: AuthApi,
}

impl Lexis {
    pub fn connect(settings: &ClientSettings) -> Result<Self> {
        let file = SessionFile::new(settings.data_dir.clone());
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::with_cookie_file(
            settings.api_base_url.clone(),
            settings.request_timeout,
            file.cookie_path(),
        )?);
        let session = SessionStore::with_file(file);
        Ok(Self::with_transport(settings, transport, session))
    }

    pub fn with_transport(
        settings: &ClientSettings,
        transport: Arc<dyn HttpTransport>,
        session: SessionStore,
    ) -> Self {
        let client = ApiClient::new(
            transport.clone(),
            session.clone(),
            settings.auth_scheme,
            Arc::new(PromptRedirect),
        );
        let auth = AuthApi::new(transport, session.clone(), settings.auth_scheme);
        Self {
            session,
            client,
            auth,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn auth(&self) -> &AuthApi {
        &self.auth
    }

    pub fn consumer(&self) -> ChatConsumer {
        ChatConsumer::from_client(&self.client)
    }

    /// Gate for commands that talk to protected endpoints.
    pub fn require_user(&self) -> Result<UserIdentity, ApiError> {
        self.session.user().ok_or(ApiError::NotAuthenticated)
    }
}
