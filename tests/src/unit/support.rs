use lexis_core::{
    ApiClient, AuthApi, AuthScheme, ChatConsumer, CredentialPair, HttpTransport, ReqwestTransport,
    SessionFile, SessionStore, UserIdentity,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::MockServer;

pub const API_PREFIX: &str = "/api/v1";

pub fn api_path(path: &str) -> String {
    format!("{API_PREFIX}{path}")
}

pub fn user() -> UserIdentity {
    UserIdentity {
        id: "7f1c".into(),
        email: "binh@example.com".into(),
        full_name: Some("Tran Binh".into()),
        avatar_url: None,
    }
}

pub fn user_json() -> Value {
    json!({
        "id": "7f1c",
        "email": "binh@example.com",
        "full_name": "Tran Binh",
        "avatar_url": null
    })
}

fn base_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}{API_PREFIX}", server.uri())).expect("mock url")
}

/// A client stack pointed at the mock server, with a counting login redirect.
pub struct Harness {
    pub session: SessionStore,
    pub client: ApiClient,
    pub auth: AuthApi,
    pub consumer: ChatConsumer,
    pub redirects: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(server: &MockServer, scheme: AuthScheme, session: SessionStore) -> Self {
        let transport = ReqwestTransport::new(base_url(server), Duration::from_secs(5));
        Self::over(Arc::new(transport.expect("transport")), scheme, session)
    }

    /// A stack that keeps its session record and cookie jar in `file`, the
    /// way the CLI does between runs.
    pub fn persisted(server: &MockServer, scheme: AuthScheme, file: &SessionFile) -> Self {
        let transport = ReqwestTransport::with_cookie_file(
            base_url(server),
            Duration::from_secs(5),
            file.cookie_path(),
        );
        let session = SessionStore::with_file(file.clone());
        Self::over(Arc::new(transport.expect("transport")), scheme, session)
    }

    fn over(transport: Arc<dyn HttpTransport>, scheme: AuthScheme, session: SessionStore) -> Self {
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = redirects.clone();
        let client = ApiClient::new(
            transport.clone(),
            session.clone(),
            scheme,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let auth = AuthApi::new(transport, session.clone(), scheme);
        let consumer = ChatConsumer::from_client(&client);
        Self {
            session,
            client,
            auth,
            consumer,
            redirects,
        }
    }

    /// Bearer stack already holding `access`/`refresh` tokens.
    pub fn signed_in_bearer(server: &MockServer, access: &str, refresh: &str) -> Self {
        let session = SessionStore::new();
        session.login(
            user(),
            Some(CredentialPair {
                access_token: access.into(),
                refresh_token: refresh.into(),
            }),
        );
        Self::new(server, AuthScheme::Bearer, session)
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}
