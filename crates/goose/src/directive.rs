use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `target` value that routes a directive to the news panel.
pub const NEWS_TARGET: &str = "news_space";

pub const TICKER: &str = "ticker";
pub const LINE_CHART: &str = "line_chart";
pub const NEWS_FEED: &str = "news_feed";

/// A structured control message embedded in the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDirective {
    pub ui_type: String,
    #[serde(default, deserialize_with = "lenient_title")]
    pub ui_title: String,
    #[serde(default)]
    pub ui_content: Value,
    #[serde(
        default,
        deserialize_with = "lenient_target",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<String>,
}

/// Titles are display-only: `null` becomes empty, other scalars their JSON text.
fn lenient_title<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(title) => title,
        other => other.to_string(),
    })
}

fn lenient_target<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(target) => Some(target),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    News,
    Widget,
}

impl StreamDirective {
    /// Classifies one whole fragment. Returns `None` when the fragment is not
    /// a self-contained JSON object carrying a `ui_type`, in which case the
    /// caller treats it as text.
    pub fn classify(fragment: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(fragment).ok()?;
        let has_discriminator = value
            .get("ui_type")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty());
        if !has_discriminator {
            if value.get("ui_type").is_some() {
                tracing::warn!("directive with unusable ui_type treated as text");
            } else if value.is_object() {
                tracing::debug!("json fragment without ui_type, treating as text");
            }
            return None;
        }
        match serde_json::from_value(value) {
            Ok(directive) => Some(directive),
            Err(err) => {
                tracing::warn!("malformed directive treated as text: {err}");
                None
            }
        }
    }

    pub fn route(&self) -> Route {
        if self.target.as_deref() == Some(NEWS_TARGET) {
            Route::News
        } else {
            Route::Widget
        }
    }

    /// Typed view over `ui_content`, selected by `ui_type`.
    pub fn content(&self) -> UiContent {
        match self.ui_type.as_str() {
            TICKER => match &self.ui_content {
                Value::Number(n) => UiContent::Ticker {
                    price: n.to_string(),
                },
                Value::String(s) => UiContent::Ticker { price: s.clone() },
                other => UiContent::Unknown(other.clone()),
            },
            LINE_CHART => serde_json::from_value(self.ui_content.clone())
                .map(UiContent::LineChart)
                .unwrap_or_else(|_| UiContent::Unknown(self.ui_content.clone())),
            NEWS_FEED => serde_json::from_value(self.ui_content.clone())
                .map(UiContent::NewsFeed)
                .unwrap_or_else(|_| UiContent::Unknown(self.ui_content.clone())),
            _ => UiContent::Unknown(self.ui_content.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiContent {
    Ticker { price: String },
    LineChart(Vec<PricePoint>),
    NewsFeed(Vec<NewsItem>),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: String,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
}
