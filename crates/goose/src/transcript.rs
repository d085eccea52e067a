use std::collections::HashMap;

use crate::{ChatTurn, RequestId, Sender};

/// Ordered chat turns. Each in-flight request owns at most one open
/// assistant turn, tracked by index. An open turn stays replaceable until a
/// user turn is appended after it.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    open: HashMap<RequestId, usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn is_open(&self, request: RequestId) -> bool {
        self.open.contains_key(&request)
    }

    /// Appends a user turn. Every open assistant turn now sits before it and
    /// is closed.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.open.clear();
        self.turns.push(ChatTurn::user(text));
    }

    /// Writes the full rendered reply of `request` and returns the turn
    /// holding it. Replaces the request's open assistant turn when there is
    /// one, otherwise opens a new turn at the end.
    pub fn upsert_assistant(
        &mut self,
        request: RequestId,
        html: String,
        markdown: String,
    ) -> &ChatTurn {
        let index = match self.open_index(request) {
            Some(index) => {
                let turn = &mut self.turns[index];
                turn.text = html;
                turn.markdown = markdown;
                index
            }
            None => {
                self.turns.push(ChatTurn::assistant(html, markdown));
                let index = self.turns.len() - 1;
                self.open.insert(request, index);
                index
            }
        };
        &self.turns[index]
    }

    fn open_index(&self, request: RequestId) -> Option<usize> {
        let index = *self.open.get(&request)?;
        let turn = self.turns.get(index)?;
        let user_after = self.turns[index + 1..]
            .iter()
            .any(|t| t.sender == Sender::User);
        (turn.sender == Sender::Assistant && !user_after).then_some(index)
    }

    pub fn close(&mut self, request: RequestId) {
        self.open.remove(&request);
    }

    /// Closes `request` and appends a terminal assistant turn carrying
    /// `message`.
    pub fn push_error(&mut self, request: RequestId, message: &str) -> &ChatTurn {
        self.open.remove(&request);
        self.turns
            .push(ChatTurn::assistant(crate::markdown::escape_html(message), message));
        &self.turns[self.turns.len() - 1]
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.open.clear();
    }
}
