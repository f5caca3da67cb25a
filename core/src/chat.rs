use crate::auth::AuthScheme;
use crate::client::ApiClient;
use crate::ndjson::LineDecoder;
use crate::protocol::{ChatRequest, StreamEvent};
use crate::session::SessionStore;
use crate::transport::{ApiRequest, HttpTransport};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const STREAM_PATH: &str = "/chat/";
pub const FALLBACK_NOTICE: &str = "[Connection error or network lost. Please try again.]";

const LOGGED_LINE_LIMIT: usize = 120;

/// Why a turn ended before the server closed the stream normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFailure {
    /// The server sent an `error` event.
    Server(String),
    /// The request or the body stream failed.
    Transport(String),
}

impl ChatFailure {
    /// Text appended to the turn so the user sees what happened.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server(detail) => format!("[The assistant could not finish this answer: {detail}]"),
            Self::Transport(_) => FALLBACK_NOTICE.to_string(),
        }
    }
}

/// Receives a turn's progress as stream events are applied.
pub trait ChatObserver {
    /// The complete source list; replaces whatever was shown before.
    fn on_sources(&mut self, sources: &[String]);
    /// The accumulated answer so far, not just the latest delta.
    fn on_content(&mut self, answer: &str);
    fn on_error(&mut self, failure: &ChatFailure);
}

/// Adapts three closures into a [`ChatObserver`].
pub struct ChatCallbacks<S, C, E> {
    pub on_sources: S,
    pub on_content: C,
    pub on_error: E,
}

impl<S, C, E> ChatObserver for ChatCallbacks<S, C, E>
where
    S: FnMut(&[String]),
    C: FnMut(&str),
    E: FnMut(&ChatFailure),
{
    fn on_sources(&mut self, sources: &[String]) {
        (self.on_sources)(sources)
    }

    fn on_content(&mut self, answer: &str) {
        (self.on_content)(answer)
    }

    fn on_error(&mut self, failure: &ChatFailure) {
        (self.on_error)(failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// An `error` event arrived; nothing after it may be applied.
    Halt(String),
}

/// Terminal state of one `ask`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Completed,
    ErroredExplicit(String),
    ErroredTransport(String),
    Cancelled,
}

/// Folds raw body chunks into the turn's answer and sources.
#[derive(Debug, Default)]
pub struct StreamFolder {
    decoder: LineDecoder,
    answer: String,
    sources: Vec<String>,
    halted: Option<String>,
}

impl StreamFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk<O>(&mut self, chunk: &[u8], observer: &mut O) -> Flow
    where
        O: ChatObserver + ?Sized,
    {
        if let Some(message) = &self.halted {
            return Flow::Halt(message.clone());
        }
        for line in self.decoder.push_chunk(chunk) {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamEvent>(&line) {
                Ok(StreamEvent::Sources(sources)) => {
                    self.sources = sources;
                    observer.on_sources(&self.sources);
                }
                Ok(StreamEvent::Content(delta)) => {
                    self.answer.push_str(&delta);
                    observer.on_content(&self.answer);
                }
                Ok(StreamEvent::Error(message)) => {
                    self.halted = Some(message.clone());
                    return Flow::Halt(message);
                }
                Err(err) => {
                    let preview: String = line.chars().take(LOGGED_LINE_LIMIT).collect();
                    tracing::warn!(%err, line = %preview, "skipping malformed stream line");
                }
            }
        }
        Flow::Continue
    }

    /// Called once the body ends. An unterminated tail is never parsed.
    pub fn finish(&mut self) {
        if let Some(tail) = self.decoder.finish() {
            if !tail.trim().is_empty() {
                tracing::warn!(bytes = tail.len(), "discarding unterminated trailing stream line");
            }
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

/// Streams answers from `/chat/` into a [`ChatObserver`].
///
/// One `ask` per conversation at a time; the caller enforces that.
#[derive(Clone)]
pub struct ChatConsumer {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    scheme: AuthScheme,
}

impl ChatConsumer {
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionStore, scheme: AuthScheme) -> Self {
        Self {
            transport,
            session,
            scheme,
        }
    }

    pub fn from_client(client: &ApiClient) -> Self {
        Self::new(client.transport(), client.session().clone(), client.scheme())
    }

    pub async fn ask<O>(&self, question: &str, observer: &mut O) -> AskOutcome
    where
        O: ChatObserver + ?Sized,
    {
        self.ask_with_cancel(question, observer, CancellationToken::new())
            .await
    }

    pub async fn ask_with_cancel<O>(
        &self,
        question: &str,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> AskOutcome
    where
        O: ChatObserver + ?Sized,
    {
        let request = match ApiRequest::post(STREAM_PATH).json(&ChatRequest {
            message: question.to_owned(),
        }) {
            Ok(request) => self.scheme.attach(&self.session, request),
            Err(err) => return transport_failure(observer, err.to_string()),
        };

        tracing::debug!("requesting streamed answer");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AskOutcome::Cancelled,
            opened = self.transport.open_stream(&request) => opened,
        };
        let response = match opened {
            Ok(response) => response,
            Err(err) => return transport_failure(observer, err.to_string()),
        };
        if !response.status.is_success() {
            return transport_failure(observer, format!("server answered {}", response.status));
        }
        let Some(mut body) = response.body else {
            return transport_failure(observer, "response carried no body".to_string());
        };

        let mut folder = StreamFolder::new();
        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(chunks, "answer stream cancelled");
                    return AskOutcome::Cancelled;
                }
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    if let Flow::Halt(message) = folder.push_chunk(&chunk, &mut *observer) {
                        tracing::warn!(%message, "server ended the answer with an error");
                        observer.on_error(&ChatFailure::Server(message.clone()));
                        return AskOutcome::ErroredExplicit(message);
                    }
                }
                Some(Err(err)) => return transport_failure(&mut *observer, err.to_string()),
                None => {
                    folder.finish();
                    tracing::debug!(chunks, answer_len = folder.answer().len(), "answer stream completed");
                    return AskOutcome::Completed;
                }
            }
        }
    }
}

fn transport_failure<O>(observer: &mut O, detail: String) -> AskOutcome
where
    O: ChatObserver + ?Sized,
{
    tracing::warn!(%detail, "chat stream failed");
    observer.on_error(&ChatFailure::Transport(detail.clone()));
    AskOutcome::ErroredTransport(detail)
}
