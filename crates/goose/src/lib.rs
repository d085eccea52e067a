use std::error::Error;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use uuid::Uuid;

pub mod auth;
pub mod directive;
pub mod http;
pub mod ingest;
pub mod markdown;
pub mod test_provider;
pub mod transcript;
pub mod widgets;

pub use directive::{NewsItem, PricePoint, StreamDirective, UiContent};
pub use ingest::{IngestEvent, IngestSink, StreamIngest, ingest_event_stream, run_ingest};
pub use transcript::Transcript;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_MAX_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One entry of the chat transcript.
///
/// `text` holds the HTML-safe rendering shown to the user, `markdown` the
/// source it was rendered from. User turns keep their input verbatim in
/// `markdown` and escaped in `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub sender: Sender,
    pub text: String,
    pub markdown: String,
}

impl ChatTurn {
    pub fn user(input: impl Into<String>) -> Self {
        let markdown = input.into();
        Self {
            sender: Sender::User,
            text: crate::markdown::escape_html(&markdown),
            markdown,
        }
    }

    pub fn assistant(text: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
            markdown: markdown.into(),
        }
    }
}

/// Identifies the request that owns an open assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMessage {
    pub role: Sender,
    pub content: String,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: Vec<RoleMessage>,
}

impl ChatRequest {
    /// Builds the request context: the last `max_history` turns followed by
    /// the new user input.
    pub fn from_history(turns: &[ChatTurn], user_text: &str, max_history: usize) -> Self {
        let skip = turns.len().saturating_sub(max_history);
        let message = turns[skip..]
            .iter()
            .map(|turn| RoleMessage {
                role: turn.sender,
                content: turn.markdown.clone(),
            })
            .chain(std::iter::once(RoleMessage {
                role: Sender::User,
                content: user_text.to_string(),
            }))
            .collect();
        Self { message }
    }
}

pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<String, Box<dyn Error + Send + Sync>>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<FragmentStream, Box<dyn Error + Send + Sync>>;
}
