use std::collections::VecDeque;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_stream::{StreamExt, iter};

use crate::{ChatClient, ChatRequest, FragmentStream};

enum Scripted {
    Items(Vec<Result<String, String>>),
    ConnectError(String),
}

/// A [`ChatClient`] that replays scripted responses and records requests.
pub struct TestProvider {
    pub requests: Mutex<Vec<ChatRequest>>,
    responses: Mutex<VecDeque<Scripted>>,
    reads: Arc<AtomicUsize>,
}

impl TestProvider {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn enqueue(&self, fragments: &[&str]) {
        self.enqueue_items(fragments.iter().map(|f| Ok(f.to_string())).collect());
    }

    /// `Err` items fail the read at that position.
    pub fn enqueue_items(&self, items: Vec<Result<String, String>>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Items(items));
    }

    pub fn enqueue_connect_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::ConnectError(message.to_string()));
    }

    /// Number of stream items pulled by consumers so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for TestProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for TestProvider {
    async fn send_chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<FragmentStream, Box<dyn Error + Send + Sync>> {
        self.requests.lock().unwrap().push(request);
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Items(Vec::new()));
        let items = match scripted {
            Scripted::Items(items) => items,
            Scripted::ConnectError(message) => return Err(message.into()),
        };
        let reads = self.reads.clone();
        let stream = iter(items).map(move |item| {
            reads.fetch_add(1, Ordering::SeqCst);
            item.map_err(Box::<dyn Error + Send + Sync>::from)
        });
        Ok(Box::pin(stream))
    }
}
