use crate::auth::{AuthScheme, LoginRedirect, RefreshCoordinator};
use crate::error::ApiError;
use crate::protocol::{ChatReply, ChatRequest};
use crate::session::SessionStore;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;

pub const CHAT_PATH: &str = "/chat";

/// A request together with its retry decision. Kept local to one `send` call
/// so concurrent sends never observe each other's flag.
#[derive(Debug)]
struct RetryContext {
    request: ApiRequest,
    retried: bool,
}

impl RetryContext {
    fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    /// Claim the single retry. Returns false if it was already used.
    fn claim_retry(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

/// API client that recovers from expired credentials.
///
/// A 401 triggers one coordinated refresh and one replay of the original
/// request. Everything else, including a second 401, reaches the caller as is.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    scheme: AuthScheme,
    refresher: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: SessionStore,
        scheme: AuthScheme,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        let refresher =
            RefreshCoordinator::new(transport.clone(), session.clone(), scheme, redirect);
        Self {
            transport,
            session,
            scheme,
            refresher,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.transport.clone()
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut ctx = RetryContext::new(request);
        loop {
            let seen_epoch = self.refresher.epoch();
            let outgoing = self.scheme.attach(&self.session, ctx.request.clone());
            let response = self.transport.execute(&outgoing).await?;

            if response.status == StatusCode::UNAUTHORIZED && ctx.claim_retry() {
                tracing::debug!(path = %ctx.request.path, "credentials rejected; refreshing");
                if let Err(err) = self.refresher.refresh(seen_epoch).await {
                    tracing::debug!(%err, path = %ctx.request.path, "refresh did not recover request");
                    return Err(ApiError::SessionExpired);
                }
                continue;
            }

            if !response.is_success() {
                return Err(ApiError::Status {
                    status: response.status.as_u16(),
                    body: response.text(),
                });
            }
            return Ok(response);
        }
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    /// Non-streaming chat: the whole answer in one reply.
    pub async fn send_message(&self, message: &str) -> Result<ChatReply, ApiError> {
        let response = self
            .post_json(
                CHAT_PATH,
                &ChatRequest {
                    message: message.to_owned(),
                },
            )
            .await?;
        response
            .json()
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}
