use std::error::Error;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use crate::{ChatClient, ChatRequest, DEFAULT_API_BASE, FragmentStream};

/// [`ChatClient`] for the chat backend's `POST /chat` endpoint.
pub struct HttpChatClient {
    inner: reqwest::Client,
    api_base: String,
}

impl HttpChatClient {
    pub fn new(api_base: Option<&str>) -> Self {
        Self::with_client(reqwest::Client::new(), api_base)
    }

    pub fn with_client(inner: reqwest::Client, api_base: Option<&str>) -> Self {
        let api_base = api_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self { inner, api_base }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.inner
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn send_chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<FragmentStream, Box<dyn Error + Send + Sync>> {
        let url = self.url("/chat");
        tracing::debug!(%url, turns = request.message.len(), "sending chat request");
        let response = self
            .inner
            .post(url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let bytes = Box::pin(response.bytes_stream());
        let fragments = stream::unfold(
            (bytes, Utf8Decoder::default(), false),
            |(mut bytes, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.decode(&chunk);
                            if !text.is_empty() {
                                return Some((Ok(text), (bytes, decoder, false)));
                            }
                        }
                        Some(Err(err)) => {
                            let err: Box<dyn Error + Send + Sync> = Box::new(err);
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            let rest = decoder.finish();
                            if rest.is_empty() {
                                return None;
                            }
                            return Some((Ok(rest), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );
        Ok(Box::pin(fragments))
    }
}

/// Incremental UTF-8 decoding. A code point split across chunks is held
/// back until its remaining bytes arrive; invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    /// Flushes bytes left over at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
