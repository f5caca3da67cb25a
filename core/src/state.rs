use crate::chat::{AskOutcome, ChatConsumer, ChatFailure, ChatObserver};
use crate::session::UserIdentity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub content: String,
    /// Cited sources; only assistant turns carry any.
    #[serde(default)]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// The chat screen's conversation. Turns are appended, and assistant turns are
/// patched in place by id while their answer streams in.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript opening with the assistant's welcome.
    pub fn greeting(user: Option<&UserIdentity>) -> Self {
        let name = user.map(UserIdentity::display_name).unwrap_or("there");
        let mut transcript = Self::new();
        transcript.turns.push(ConversationTurn::new(
            TurnRole::Assistant,
            format!(
                "Hello {name}! I am a virtual legal assistant for the 2015 Civil Code. \
                 What legal question can I help you with?"
            ),
        ));
        transcript
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn turn(&self, id: Uuid) -> Option<&ConversationTurn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Append the user's question and the empty assistant placeholder that the
    /// answer will stream into. Returns the placeholder's id.
    pub fn begin_exchange(&mut self, question: &str) -> Uuid {
        self.turns
            .push(ConversationTurn::new(TurnRole::User, question));
        let placeholder = ConversationTurn::new(TurnRole::Assistant, String::new());
        let id = placeholder.id;
        self.turns.push(placeholder);
        id
    }

    pub fn patch_sources(&mut self, id: Uuid, sources: &[String]) -> bool {
        self.turn_mut(id)
            .map(|turn| turn.sources = sources.to_vec())
            .is_some()
    }

    pub fn set_content(&mut self, id: Uuid, content: &str) -> bool {
        self.turn_mut(id)
            .map(|turn| {
                turn.content.clear();
                turn.content.push_str(content);
            })
            .is_some()
    }

    /// Append a notice after whatever content the turn already has.
    pub fn append_notice(&mut self, id: Uuid, notice: &str) -> bool {
        self.turn_mut(id)
            .map(|turn| {
                if !turn.content.is_empty() {
                    turn.content.push_str("\n\n");
                }
                turn.content.push_str(notice);
            })
            .is_some()
    }

    fn turn_mut(&mut self, id: Uuid) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().find(|turn| turn.id == id)
    }
}

impl ChatObserver for () {
    fn on_sources(&mut self, _sources: &[String]) {}

    fn on_content(&mut self, _answer: &str) {}

    fn on_error(&mut self, _failure: &ChatFailure) {}
}

/// Applies stream progress to one placeholder turn, then forwards it.
struct TurnPatcher<'a, O: ?Sized> {
    transcript: &'a RwLock<Transcript>,
    turn_id: Uuid,
    forward: &'a mut O,
}

impl<O: ChatObserver + ?Sized> ChatObserver for TurnPatcher<'_, O> {
    fn on_sources(&mut self, sources: &[String]) {
        self.transcript.write().patch_sources(self.turn_id, sources);
        self.forward.on_sources(sources);
    }

    fn on_content(&mut self, answer: &str) {
        self.transcript.write().set_content(self.turn_id, answer);
        self.forward.on_content(answer);
    }

    fn on_error(&mut self, failure: &ChatFailure) {
        self.transcript
            .write()
            .append_notice(self.turn_id, &failure.user_message());
        self.forward.on_error(failure);
    }
}

/// Result of a submitted question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub turn_id: Uuid,
    pub outcome: AskOutcome,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Caller side of the chat consumer: owns the transcript and the busy flag.
#[derive(Clone)]
pub struct ChatSession {
    transcript: Arc<RwLock<Transcript>>,
    consumer: ChatConsumer,
    busy: Arc<AtomicBool>,
}

impl ChatSession {
    pub fn new(consumer: ChatConsumer, transcript: Transcript) -> Self {
        Self {
            transcript: Arc::new(RwLock::new(transcript)),
            consumer,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.read().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn submit(&self, question: &str) -> Option<Submitted> {
        self.submit_with(question, &mut (), CancellationToken::new())
            .await
    }

    /// Ask `question`, mirroring progress into `observer`. Returns `None`
    /// without touching the transcript when the question is blank or another
    /// answer is still streaming.
    pub async fn submit_with<O>(
        &self,
        question: &str,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> Option<Submitted>
    where
        O: ChatObserver + ?Sized,
    {
        let question = question.trim();
        if question.is_empty() {
            return None;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("ignoring question while an answer is streaming");
            return None;
        }
        let _busy = BusyGuard(self.busy.clone());

        let turn_id = self.transcript.write().begin_exchange(question);
        let mut patcher = TurnPatcher {
            transcript: &self.transcript,
            turn_id,
            forward: observer,
        };
        let outcome = self
            .consumer
            .ask_with_cancel(question, &mut patcher, cancel)
            .await;
        Some(Submitted { turn_id, outcome })
    }
}
