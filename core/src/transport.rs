use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use cookie_store::CookieStore;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use reqwest_cookie_store::CookieStoreMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// An outbound API call, described independently of the HTTP stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/auth/refresh`.
    pub path: String,
    pub body: Option<Value>,
    /// Explicit `Authorization: Bearer` value (bearer scheme only).
    pub bearer: Option<String>,
    /// Ask the transport to send its ambient credentials (the cookie jar).
    pub with_credentials: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
            with_credentials: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body)
            .map_err(|err| TransportError::Request(format!("unserializable body: {err}")))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn without_credentials(mut self) -> Self {
        self.with_credentials = false;
        self
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is handed out incrementally.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// The HTTP seam used by the request client and the chat consumer.
///
/// Implementations own credential propagation: when a request sets
/// `with_credentials`, the transport attaches its ambient credentials.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;

    async fn open_stream(&self, request: &ApiRequest) -> Result<StreamingResponse, TransportError>;

    /// Drop any ambient credentials the transport holds. Called on logout.
    fn clear_credentials(&self) {}
}

/// The cookie store behind credentialed calls, optionally mirrored to a file
/// so a restored session still has its cookies.
struct CookieJar {
    store: Arc<CookieStoreMutex>,
    path: Option<PathBuf>,
}

impl CookieJar {
    fn open(path: Option<PathBuf>) -> Self {
        let store = path.as_deref().map(load_cookies).unwrap_or_default();
        Self {
            store: Arc::new(CookieStoreMutex::new(store)),
            path,
        }
    }

    /// Write the jar out, session cookies included. Failures are logged only.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let mut serialized = Vec::new();
        {
            let Ok(store) = self.store.lock() else {
                tracing::warn!("cookie store poisoned; not persisting");
                return;
            };
            if let Err(err) =
                cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut serialized)
            {
                tracing::warn!(%err, "failed to serialize cookies");
                return;
            }
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(err) = fs::write(&tmp, serialized).and_then(|()| fs::rename(&tmp, path)) {
            tracing::warn!(path = %path.display(), %err, "failed to save cookies");
        }
    }

    fn clear(&self) {
        match self.store.lock() {
            Ok(mut store) => store.clear(),
            Err(_) => tracing::warn!("cookie store poisoned; not clearing"),
        }
        self.persist();
    }
}

fn load_cookies(path: &Path) -> CookieStore {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return CookieStore::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to open cookie file");
            return CookieStore::default();
        }
    };
    cookie_store::serde::json::load_all(BufReader::new(file)).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), %err, "discarding unreadable cookie file");
        CookieStore::default()
    })
}

/// `reqwest` backed transport. A shared cookie jar stands in for the
/// browser's credential store.
pub struct ReqwestTransport {
    credentialed: reqwest::Client,
    anonymous: reqwest::Client,
    cookies: CookieJar,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestTransport {
    /// A transport whose cookies live only as long as the process.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        Self::build_with(base_url, timeout, CookieJar::open(None))
    }

    /// A transport whose cookie jar is loaded from, and saved back to, `path`.
    pub fn with_cookie_file(
        base_url: Url,
        timeout: Duration,
        path: PathBuf,
    ) -> Result<Self, TransportError> {
        Self::build_with(base_url, timeout, CookieJar::open(Some(path)))
    }

    fn build_with(base_url: Url, timeout: Duration, cookies: CookieJar) -> Result<Self, TransportError> {
        let credentialed = reqwest::Client::builder()
            .cookie_provider(cookies.store.clone())
            .connect_timeout(timeout)
            .build()?;
        let anonymous = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            credentialed,
            anonymous,
            cookies,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let client = if request.with_credentials {
            &self.credentialed
        } else {
            &self.anonymous
        };
        let mut builder = client
            .request(request.method.clone(), self.url_for(&request.path))
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        tracing::debug!(method = %request.method, path = %request.path, "sending request");
        let response = self.build(request).timeout(self.timeout).send().await?;
        if request.with_credentials {
            self.cookies.persist();
        }
        let status = response.status();
        let body = response.bytes().await?;
        Ok(ApiResponse { status, body })
    }

    async fn open_stream(&self, request: &ApiRequest) -> Result<StreamingResponse, TransportError> {
        tracing::debug!(method = %request.method, path = %request.path, "opening stream");
        // No total timeout here: the body stays open for as long as the answer streams.
        let response = self.build(request).send().await?;
        if request.with_credentials {
            self.cookies.persist();
        }
        let status = response.status();
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        );
        Ok(StreamingResponse {
            status,
            body: Some(body),
        })
    }

    fn clear_credentials(&self) {
        self.cookies.clear();
    }
}
