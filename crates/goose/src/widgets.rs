use crate::directive::{NEWS_FEED, NewsItem, StreamDirective, UiContent};

/// Open analytics widgets, one tab per distinct `ui_title`.
///
/// `active() == None` means the welcome tab is shown.
#[derive(Debug, Default, Clone)]
pub struct AnalyticsTabs {
    tabs: Vec<StreamDirective>,
    active: Option<String>,
}

impl AnalyticsTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self) -> &[StreamDirective] {
        &self.tabs
    }

    pub fn active(&self) -> Option<&StreamDirective> {
        let key = self.active.as_deref()?;
        self.tabs.iter().find(|t| t.ui_title == key)
    }

    /// Opens a tab for `directive`, or focuses the existing tab with the
    /// same title.
    pub fn open(&mut self, directive: StreamDirective) {
        let title = directive.ui_title.clone();
        if !self.tabs.iter().any(|t| t.ui_title == title) {
            self.tabs.push(directive);
        }
        self.active = Some(title);
    }

    pub fn activate(&mut self, title: &str) -> bool {
        if self.tabs.iter().any(|t| t.ui_title == title) {
            self.active = Some(title.to_string());
            true
        } else {
            false
        }
    }

    pub fn close(&mut self, title: &str) {
        self.tabs.retain(|t| t.ui_title != title);
        if self.active.as_deref() == Some(title) {
            self.active = self.tabs.first().map(|t| t.ui_title.clone());
        }
    }
}

/// Items from the latest news feed.
#[derive(Debug, Default, Clone)]
pub struct NewsPanel {
    items: Vec<NewsItem>,
}

impl NewsPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[NewsItem] {
        &self.items
    }

    /// Replaces the items when `directive` is a news feed. Returns whether
    /// anything changed.
    pub fn update(&mut self, directive: &StreamDirective) -> bool {
        if directive.ui_type != NEWS_FEED {
            return false;
        }
        match directive.content() {
            UiContent::NewsFeed(items) => {
                self.items = items;
                true
            }
            _ => {
                tracing::debug!("news feed content did not decode");
                false
            }
        }
    }
}
