use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::directive::{Route, StreamDirective};
use crate::markdown::render_html;
use crate::{ChatClient, ChatRequest, ChatTurn, RequestId, Transcript};

pub const FETCH_ERROR: &str = "An error occurred while fetching the response.";
pub const STREAM_ERROR: &str = "An error occurred while streaming the response.";

/// Receives the side effects of ingesting one response.
pub trait IngestSink {
    /// A directive for the widget host.
    fn on_widget(&mut self, directive: StreamDirective);
    /// A directive targeting the news panel.
    fn on_news(&mut self, directive: StreamDirective);
    /// The assistant turn that was just opened or rewritten.
    fn on_transcript_update(&mut self, turn: &ChatTurn);
}

#[derive(Debug, Clone)]
pub enum IngestEvent {
    Widget(StreamDirective),
    News(StreamDirective),
    Transcript(ChatTurn),
}

impl IngestSink for UnboundedSender<IngestEvent> {
    fn on_widget(&mut self, directive: StreamDirective) {
        self.send(IngestEvent::Widget(directive)).ok();
    }

    fn on_news(&mut self, directive: StreamDirective) {
        self.send(IngestEvent::News(directive)).ok();
    }

    fn on_transcript_update(&mut self, turn: &ChatTurn) {
        self.send(IngestEvent::Transcript(turn.clone())).ok();
    }
}

/// Per-request ingest state. Dropped when the request ends.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub request: RequestId,
    pub accumulated_text: String,
    pub has_emitted_turn: bool,
}

/// Turns response fragments into directive dispatches and transcript updates.
///
/// Each fragment is classified on its own: a fragment that is exactly one
/// JSON object with a `ui_type` is a directive, anything else is text. A
/// directive split across fragments therefore ends up as text.
pub struct StreamIngest {
    state: StreamState,
}

impl StreamIngest {
    pub fn new(request: RequestId) -> Self {
        Self {
            state: StreamState {
                request,
                accumulated_text: String::new(),
                has_emitted_turn: false,
            },
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn handle_fragment(
        &mut self,
        fragment: &str,
        transcript: &mut Transcript,
        sink: &mut impl IngestSink,
    ) {
        if fragment.is_empty() {
            return;
        }
        if let Some(directive) = StreamDirective::classify(fragment) {
            tracing::debug!(
                request = %self.state.request,
                ui_type = %directive.ui_type,
                "directive received"
            );
            match directive.route() {
                Route::News => sink.on_news(directive),
                Route::Widget => sink.on_widget(directive),
            }
            return;
        }
        self.state.accumulated_text.push_str(fragment);
        let html = render_html(&self.state.accumulated_text);
        let turn = transcript.upsert_assistant(
            self.state.request,
            html,
            self.state.accumulated_text.clone(),
        );
        self.state.has_emitted_turn = true;
        sink.on_transcript_update(turn);
    }

    /// Final render of the trimmed buffer, then closes the turn.
    pub fn finish(self, transcript: &mut Transcript, sink: &mut impl IngestSink) {
        let trimmed = self.state.accumulated_text.trim();
        if !trimmed.is_empty() {
            let turn = transcript.upsert_assistant(
                self.state.request,
                render_html(trimmed),
                trimmed.to_string(),
            );
            sink.on_transcript_update(turn);
        }
        transcript.close(self.state.request);
        tracing::debug!(
            request = %self.state.request,
            emitted = self.state.has_emitted_turn,
            "stream complete"
        );
    }

    /// Ends the request with a terminal error turn.
    pub fn fail(self, message: &str, transcript: &mut Transcript, sink: &mut impl IngestSink) {
        let turn = transcript.push_error(self.state.request, message);
        sink.on_transcript_update(turn);
    }
}

/// Sends `request` and ingests the response into `transcript`. Transport
/// failures become an error turn; nothing is returned to the caller.
pub async fn run_ingest(
    client: Arc<dyn ChatClient>,
    request: ChatRequest,
    transcript: Arc<Mutex<Transcript>>,
    mut sink: impl IngestSink,
) {
    let mut ingest = StreamIngest::new(RequestId::new());
    let request_id = ingest.state().request;
    let mut stream = match client.send_chat_stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(request = %request_id, "chat request failed: {err}");
            let mut transcript = transcript.lock().unwrap();
            ingest.fail(FETCH_ERROR, &mut transcript, &mut sink);
            return;
        }
    };
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(fragment) => {
                let mut transcript = transcript.lock().unwrap();
                ingest.handle_fragment(&fragment, &mut transcript, &mut sink);
            }
            Err(err) => {
                tracing::warn!(request = %request_id, "stream read failed: {err}");
                let mut transcript = transcript.lock().unwrap();
                ingest.fail(STREAM_ERROR, &mut transcript, &mut sink);
                return;
            }
        }
    }
    let mut transcript = transcript.lock().unwrap();
    ingest.finish(&mut transcript, &mut sink);
}

/// Runs [`run_ingest`] on a task and exposes its side effects as a stream.
/// The stream ends when the response has been fully ingested.
pub fn ingest_event_stream(
    client: Arc<dyn ChatClient>,
    request: ChatRequest,
    transcript: Arc<Mutex<Transcript>>,
) -> (impl Stream<Item = IngestEvent>, JoinHandle<()>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(run_ingest(client, request, transcript, tx));
    (UnboundedReceiverStream::new(rx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_provider::TestProvider;
    use crate::{Sender, directive::NEWS_TARGET};

    #[derive(Default)]
    struct Recorder {
        widgets: Vec<StreamDirective>,
        news: Vec<StreamDirective>,
        updates: usize,
    }

    impl IngestSink for Recorder {
        fn on_widget(&mut self, directive: StreamDirective) {
            self.widgets.push(directive);
        }

        fn on_news(&mut self, directive: StreamDirective) {
            self.news.push(directive);
        }

        fn on_transcript_update(&mut self, _turn: &ChatTurn) {
            self.updates += 1;
        }
    }

    fn ingest_all(fragments: &[&str], transcript: &mut Transcript) -> Recorder {
        let mut sink = Recorder::default();
        let mut ingest = StreamIngest::new(RequestId::new());
        for fragment in fragments {
            ingest.handle_fragment(fragment, transcript, &mut sink);
        }
        ingest.finish(transcript, &mut sink);
        sink
    }

    #[test]
    fn text_fragments_merge_into_one_turn() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        let sink = ingest_all(&["Hello ", "world"], &mut transcript);
        assert_eq!(transcript.len(), 2);
        let reply = transcript.last().unwrap();
        assert_eq!(reply.sender, Sender::Assistant);
        assert_eq!(reply.text, "<p>Hello world</p>\n");
        assert_eq!(reply.markdown, "Hello world");
        assert!(sink.widgets.is_empty());
    }

    #[test]
    fn final_render_trims_whitespace() {
        let mut transcript = Transcript::new();
        ingest_all(&["\n  **bold** ", "\n\n"], &mut transcript);
        assert_eq!(transcript.len(), 1);
        assert_eq!(
            transcript.last().unwrap().text,
            "<p><strong>bold</strong></p>\n"
        );
        assert_eq!(transcript.last().unwrap().markdown, "**bold**");
    }

    #[test]
    fn mid_stream_render_uses_whole_buffer() {
        let mut transcript = Transcript::new();
        let mut sink = Recorder::default();
        let mut ingest = StreamIngest::new(RequestId::new());
        ingest.handle_fragment("**bo", &mut transcript, &mut sink);
        ingest.handle_fragment("ld**", &mut transcript, &mut sink);
        assert_eq!(transcript.len(), 1);
        assert_eq!(
            transcript.last().unwrap().text,
            "<p><strong>bold</strong></p>\n"
        );
        assert!(ingest.state().has_emitted_turn);
        assert_eq!(sink.updates, 2);
    }

    #[test]
    fn ticker_directive_goes_to_widget_sink_only() {
        let mut transcript = Transcript::new();
        transcript.push_user("price?");
        let sink = ingest_all(
            &[r#"{"ui_type":"ticker","ui_title":"ACME","ui_content":123.45}"#],
            &mut transcript,
        );
        assert_eq!(sink.widgets.len(), 1);
        assert_eq!(sink.widgets[0].ui_title, "ACME");
        assert_eq!(sink.widgets[0].ui_content, serde_json::json!(123.45));
        assert!(sink.news.is_empty());
        assert_eq!(sink.updates, 0);
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn directive_with_null_title_still_reaches_widget_sink() {
        let mut transcript = Transcript::new();
        transcript.push_user("price?");
        let sink = ingest_all(
            &[r#"{"ui_type":"ticker","ui_title":null,"ui_content":"1.00"}"#],
            &mut transcript,
        );
        assert_eq!(sink.widgets.len(), 1);
        assert_eq!(sink.widgets[0].ui_title, "");
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn news_directive_goes_to_news_sink_only() {
        let mut transcript = Transcript::new();
        let fragment = format!(
            r#"{{"ui_type":"news_feed","target":"{NEWS_TARGET}","ui_content":[{{"title":"t","summary":"s","timestamp":"now","source":"wire"}}]}}"#
        );
        let sink = ingest_all(&[fragment.as_str()], &mut transcript);
        assert_eq!(sink.news.len(), 1);
        assert!(sink.widgets.is_empty());
        assert!(transcript.is_empty());
    }

    #[test]
    fn directive_does_not_touch_accumulated_text() {
        let mut transcript = Transcript::new();
        let mut sink = Recorder::default();
        let mut ingest = StreamIngest::new(RequestId::new());
        ingest.handle_fragment("Price: ", &mut transcript, &mut sink);
        let before = transcript.last().unwrap().clone();
        let ticker = r#"{"ui_type":"ticker","ui_content":"1.00"}"#;
        ingest.handle_fragment(ticker, &mut transcript, &mut sink);
        assert_eq!(ingest.state().accumulated_text, "Price: ");
        assert_eq!(transcript.last().unwrap(), &before);
        ingest.handle_fragment("1.00", &mut transcript, &mut sink);
        ingest.finish(&mut transcript, &mut sink);
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().unwrap().markdown, "Price: 1.00");
    }

    #[test]
    fn json_without_discriminator_is_text() {
        let mut transcript = Transcript::new();
        let sink = ingest_all(&[r#"{"title":"x"}"#], &mut transcript);
        assert!(sink.widgets.is_empty());
        assert_eq!(transcript.last().unwrap().markdown, r#"{"title":"x"}"#);
    }

    #[test]
    fn split_directive_is_absorbed_as_text() {
        let mut transcript = Transcript::new();
        let sink = ingest_all(&[r#"{"ui_type":"tic"#, r#"ker"}"#], &mut transcript);
        assert!(sink.widgets.is_empty());
        assert_eq!(
            transcript.last().unwrap().markdown,
            r#"{"ui_type":"ticker"}"#
        );
    }

    #[test]
    fn finish_without_text_changes_nothing() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        let before = transcript.turns().to_vec();
        let mut sink = Recorder::default();
        StreamIngest::new(RequestId::new()).finish(&mut transcript, &mut sink);
        assert_eq!(transcript.turns(), before.as_slice());
        assert_eq!(sink.updates, 0);

        let mut ingest = StreamIngest::new(RequestId::new());
        ingest.handle_fragment("   ", &mut transcript, &mut sink);
        let after_blank = transcript.turns().to_vec();
        ingest.finish(&mut transcript, &mut sink);
        assert_eq!(transcript.turns(), after_blank.as_slice());
    }

    #[test]
    fn reply_after_user_turn_never_overwrites_it() {
        let mut transcript = Transcript::new();
        ingest_all(&["first reply"], &mut transcript);
        transcript.push_user("second question");
        ingest_all(&["second reply"], &mut transcript);
        let senders: Vec<Sender> = transcript.turns().iter().map(|t| t.sender).collect();
        assert_eq!(
            senders,
            vec![Sender::Assistant, Sender::User, Sender::Assistant]
        );
        assert_eq!(transcript.turns()[1].markdown, "second question");
    }

    #[test]
    fn interleaved_requests_do_not_duplicate_replies() {
        let mut transcript = Transcript::new();
        transcript.push_user("q1");
        let mut sink = Recorder::default();
        let mut a = StreamIngest::new(RequestId::new());
        let mut b = StreamIngest::new(RequestId::new());
        for (from_a, from_b) in [("a1 ", "b1 "), ("a2 ", "b2 "), ("a3", "b3")] {
            a.handle_fragment(from_a, &mut transcript, &mut sink);
            b.handle_fragment(from_b, &mut transcript, &mut sink);
        }
        a.finish(&mut transcript, &mut sink);
        b.finish(&mut transcript, &mut sink);

        let contents: Vec<&str> = transcript
            .turns()
            .iter()
            .map(|t| t.markdown.as_str())
            .collect();
        assert_eq!(contents, vec!["q1", "a1 a2 a3", "b1 b2 b3"]);
        assert_eq!(sink.updates, 8);
    }

    #[tokio::test]
    async fn run_ingest_streams_reply() {
        let client = Arc::new(TestProvider::new());
        client.enqueue(&[
            "Hello ",
            r#"{"ui_type":"line_chart","ui_title":"ACME","ui_content":[]}"#,
            "world",
        ]);
        let transcript = Arc::new(Mutex::new(Transcript::new()));
        transcript.lock().unwrap().push_user("hi");
        let request = ChatRequest::from_history(&[], "hi", 5);
        let (events, handle) = ingest_event_stream(client.clone(), request, transcript.clone());
        let events: Vec<IngestEvent> = events.collect().await;
        handle.await.unwrap();

        let widgets = events
            .iter()
            .filter(|e| matches!(e, IngestEvent::Widget(_)))
            .count();
        assert_eq!(widgets, 1);
        let Some(IngestEvent::Transcript(last)) = events.last() else {
            panic!("expected transcript update last");
        };
        assert_eq!(last.sender, Sender::Assistant);
        assert_eq!(last.text, "<p>Hello world</p>\n");
        assert_eq!(transcript.lock().unwrap().len(), 2);
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_failure_appends_error_and_stops() {
        let client = Arc::new(TestProvider::new());
        client.enqueue_items(vec![
            Ok("partial".into()),
            Err("connection reset".into()),
            Ok("never read".into()),
        ]);
        let transcript = Arc::new(Mutex::new(Transcript::new()));
        let request = ChatRequest::from_history(&[], "hi", 5);
        run_ingest(client.clone(), request, transcript.clone(), Recorder::default()).await;

        let transcript = transcript.lock().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.turns()[0].markdown, "partial");
        assert_eq!(transcript.last().unwrap().text, STREAM_ERROR);
        assert_eq!(client.reads(), 2);
    }

    #[tokio::test]
    async fn connect_failure_appends_fetch_error() {
        let client = Arc::new(TestProvider::new());
        client.enqueue_connect_error("refused");
        let transcript = Arc::new(Mutex::new(Transcript::new()));
        transcript.lock().unwrap().push_user("hi");
        let request = ChatRequest::from_history(&[], "hi", 5);
        run_ingest(client, request, transcript.clone(), Recorder::default()).await;

        let transcript = transcript.lock().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().unwrap().sender, Sender::Assistant);
        assert_eq!(transcript.last().unwrap().text, FETCH_ERROR);
    }
}
