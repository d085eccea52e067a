use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use goose::directive::UiContent;
use goose::widgets::{AnalyticsTabs, NewsPanel};
use goose::{
    ChatClient, ChatRequest, IngestEvent, Sender, StreamDirective, Transcript, ingest_event_stream,
};
use termimad::MadSkin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

pub struct Session {
    client: Arc<dyn ChatClient>,
    transcript: Arc<Mutex<Transcript>>,
    tabs: AnalyticsTabs,
    news: NewsPanel,
    max_history: usize,
    skin: MadSkin,
}

impl Session {
    pub fn new(client: Arc<dyn ChatClient>, max_history: usize) -> Self {
        Self {
            client,
            transcript: Arc::new(Mutex::new(Transcript::new())),
            tabs: AnalyticsTabs::new(),
            news: NewsPanel::new(),
            max_history,
            skin: MadSkin::default(),
        }
    }

    /// Sends one user message and prints the reply as it streams in.
    pub async fn send(&mut self, input: &str) -> Result<()> {
        let request = {
            let mut transcript = self.transcript.lock().unwrap();
            let request = ChatRequest::from_history(transcript.turns(), input, self.max_history);
            transcript.push_user(input);
            request
        };
        let (mut events, handle) =
            ingest_event_stream(self.client.clone(), request, self.transcript.clone());
        let mut printer = ReplyPrinter::default();
        while let Some(event) = events.next().await {
            match event {
                IngestEvent::Widget(directive) => {
                    println!("{}", describe_widget(&directive));
                    self.tabs.open(directive);
                }
                IngestEvent::News(directive) => {
                    if self.news.update(&directive) {
                        println!("{}", describe_news(&self.news));
                    }
                }
                IngestEvent::Transcript(turn) if turn.sender == Sender::Assistant => {
                    for block in printer.update(&turn.markdown) {
                        self.skin.print_text(&block);
                    }
                }
                IngestEvent::Transcript(_) => {}
            }
        }
        handle.await.context("ingest task failed")?;
        if let Some(rest) = printer.finish() {
            self.skin.print_text(&rest);
        }
        Ok(())
    }

    fn command(&mut self, line: &str) -> bool {
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        match cmd {
            "/quit" => return false,
            "/tabs" => {
                if self.tabs.tabs().is_empty() {
                    println!("no widgets open");
                }
                let active = self.tabs.active().map(|t| t.ui_title.clone());
                for tab in self.tabs.tabs() {
                    let marker = if Some(&tab.ui_title) == active.as_ref() {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {}", describe_widget(tab));
                }
            }
            "/show" => {
                if !self.tabs.activate(arg.trim()) {
                    println!("no widget titled {:?}", arg.trim());
                }
            }
            "/close" => self.tabs.close(arg.trim()),
            "/news" => println!("{}", describe_news(&self.news)),
            "/clear" => self.transcript.lock().unwrap().clear(),
            other => println!("unknown command {other}"),
        }
        true
    }
}

/// Splits a growing reply into Markdown blocks that can be printed before
/// the reply is complete. A block ends at a blank line outside a code fence.
#[derive(Debug, Default)]
struct ReplyPrinter {
    latest: String,
    printed: usize,
}

impl ReplyPrinter {
    /// Takes the current Markdown of the reply turn and returns the blocks
    /// completed since the last call.
    fn update(&mut self, markdown: &str) -> Vec<String> {
        let mut blocks = Vec::new();
        if !markdown.starts_with(self.latest.as_str()) {
            // The final render is the trimmed buffer.
            if markdown == self.latest.trim() {
                return blocks;
            }
            blocks.extend(self.finish());
        }
        self.latest = markdown.to_string();

        let pending = &self.latest[self.printed..];
        let mut end = None;
        for (offset, _) in pending.match_indices("\n\n") {
            let upto = self.printed + offset + 2;
            if self.latest[..upto].matches("```").count() % 2 == 0 {
                end = Some(upto);
            }
        }
        if let Some(upto) = end {
            let block = self.latest[self.printed..upto].trim();
            if !block.is_empty() {
                blocks.push(block.to_string());
            }
            self.printed = upto;
        }
        blocks
    }

    /// Returns whatever has not been printed yet and resets.
    fn finish(&mut self) -> Option<String> {
        let rest = self.latest[self.printed..].trim().to_string();
        *self = Self::default();
        (!rest.is_empty()).then_some(rest)
    }
}

pub async fn run(session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            if !session.command(line) {
                break;
            }
            continue;
        }
        session.send(line).await?;
    }
    Ok(())
}

pub fn describe_widget(directive: &StreamDirective) -> String {
    let title = &directive.ui_title;
    match directive.content() {
        UiContent::Ticker { price } => format!("[ticker] {title}: last price ${price}"),
        UiContent::LineChart(points) => match (points.first(), points.last()) {
            (Some(first), Some(last)) => format!(
                "[line_chart] {title}: {} points, {} {:.2} -> {} {:.2}",
                points.len(),
                first.date,
                first.close,
                last.date,
                last.close
            ),
            _ => format!("[line_chart] {title}: no data"),
        },
        UiContent::NewsFeed(items) => format!("[news_feed] {title}: {} articles", items.len()),
        UiContent::Unknown(_) => format!("[{}] {title}", directive.ui_type),
    }
}

pub fn describe_news(panel: &NewsPanel) -> String {
    if panel.items().is_empty() {
        return "no news summaries available".to_string();
    }
    let mut out = String::from("Latest News Summaries");
    for item in panel.items() {
        out.push_str(&format!(
            "\n- {}\n  {}\n  {} | {}",
            item.title, item.summary, item.timestamp, item.source
        ));
        if let Some(url) = &item.url {
            out.push_str(&format!("\n  {url}"));
        }
    }
    out
}
