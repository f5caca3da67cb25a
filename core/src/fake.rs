//! In-memory transport that replays scripted replies, for tests and the smoke task.

use crate::error::TransportError;
use crate::transport::{ApiRequest, ApiResponse, ByteStream, HttpTransport, StreamingResponse};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Chunk {
    Data(Bytes),
    Fail(String),
}

#[derive(Debug, Clone)]
enum ReplyBody {
    Chunks(Vec<Chunk>),
    Absent,
    Unreachable(String),
}

/// One scripted reply. Bodies are a list of chunks so streaming consumers see
/// exactly the byte boundaries the test chose.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    body: ReplyBody,
    latency: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: ReplyBody::Chunks(Vec::new()),
            latency: None,
        }
    }

    pub fn json(status: u16, value: Value) -> Self {
        Self::status(status).chunk(value.to_string())
    }

    /// A response that never arrives because the connection failed.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Unreachable(message.into()),
            ..Self::status(502)
        }
    }

    /// A response head with no body at all.
    pub fn without_body(status: u16) -> Self {
        Self {
            body: ReplyBody::Absent,
            ..Self::status(status)
        }
    }

    pub fn chunk(self, data: impl Into<Bytes>) -> Self {
        self.push(Chunk::Data(data.into()))
    }

    /// Break the body off with a transport error after the chunks so far.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Chunk::Fail(message.into()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(mut self, chunk: Chunk) -> Self {
        match &mut self.body {
            ReplyBody::Chunks(chunks) => chunks.push(chunk),
            body => *body = ReplyBody::Chunks(vec![chunk]),
        }
        self
    }
}

#[derive(Default)]
struct Script {
    routes: HashMap<(Method, String), VecDeque<Reply>>,
    log: Vec<ApiRequest>,
    cleared: usize,
}

/// Routes are matched on method and path. Each route pops its queued replies
/// in order and keeps repeating the last one.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, method: Method, path: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script
            .lock()
            .routes
            .entry((method, path.to_owned()))
            .or_default()
            .extend(replies);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.script.lock().log.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.script
            .lock()
            .log
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }

    /// How many times the credential store was wiped.
    pub fn credentials_cleared(&self) -> usize {
        self.script.lock().cleared
    }

    async fn next_reply(&self, request: &ApiRequest) -> Reply {
        let reply = {
            let mut script = self.script.lock();
            script.log.push(request.clone());
            let key = (request.method.clone(), request.path.clone());
            match script.routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let reply = reply.unwrap_or_else(|| Reply::json(404, serde_json::json!({"detail": "Not Found"})));
        if let Some(latency) = reply.latency {
            tokio::time::sleep(latency).await;
        }
        reply
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let reply = self.next_reply(request).await;
        let mut body = Vec::new();
        match reply.body {
            ReplyBody::Unreachable(message) => return Err(TransportError::Network(message)),
            ReplyBody::Absent => {}
            ReplyBody::Chunks(chunks) => {
                for chunk in chunks {
                    match chunk {
                        Chunk::Data(data) => body.extend_from_slice(&data),
                        Chunk::Fail(message) => return Err(TransportError::Body(message)),
                    }
                }
            }
        }
        Ok(ApiResponse {
            status: reply.status,
            body: Bytes::from(body),
        })
    }

    async fn open_stream(&self, request: &ApiRequest) -> Result<StreamingResponse, TransportError> {
        let reply = self.next_reply(request).await;
        let body = match reply.body {
            ReplyBody::Unreachable(message) => return Err(TransportError::Network(message)),
            ReplyBody::Absent => None,
            ReplyBody::Chunks(chunks) => {
                let items = chunks.into_iter().map(|chunk| match chunk {
                    Chunk::Data(data) => Ok(data),
                    Chunk::Fail(message) => Err(TransportError::Body(message)),
                });
                let stream: ByteStream = Box::pin(futures::stream::iter(items));
                Some(stream)
            }
        };
        Ok(StreamingResponse {
            status: reply.status,
            body,
        })
    }

    fn clear_credentials(&self) {
        self.script.lock().cleared += 1;
    }
}
