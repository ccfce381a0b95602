pub mod gemini;
pub mod openai;
pub mod policy;

use async_trait::async_trait;
use futures::{ future, stream, Stream, StreamExt };
use log::{ debug, error, warn };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ChatError, ProviderConfig, ProviderType };
use self::gemini::GeminiChatClient;
use self::openai::OpenAIChatClient;

/// Incremental text deltas of one streamed answer, in arrival order.
/// Finite and single-use; dropping it closes the underlying connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

const STREAM_CHANNEL_CAPACITY: usize = 32;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// One request, one answer. Errors keep their kind.
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;

    /// Issues the streaming request and returns once the response status is
    /// known; the body is decoded lazily by the returned stream.
    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError>;

    fn provider(&self) -> ProviderType;
    fn model(&self) -> String;

    /// Like [`ChatClient::complete`] but every failure becomes displayable text.
    async fn send(&self, prompt: &str) -> String {
        match self.complete(prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!("{} request failed: {}", self.provider(), e);
                error_text(&e)
            }
        }
    }

    /// Like [`ChatClient::complete_stream`]; a failed request yields a single
    /// fragment holding the error text.
    async fn send_streaming(&self, prompt: &str) -> FragmentStream {
        match self.complete_stream(prompt).await {
            Ok(fragments) => fragments,
            Err(e) => {
                error!("{} streaming request failed: {}", self.provider(), e);
                full_response_as_stream(error_text(&e))
            }
        }
    }
}

pub fn error_text(err: &ChatError) -> String {
    format!("Error: {}", err)
}

/// Wraps an already complete answer as a one-fragment stream.
pub fn full_response_as_stream(text: String) -> FragmentStream {
    Box::pin(stream::once(future::ready(text)))
}

pub fn new_client(config: &ProviderConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client: Arc<dyn ChatClient> = match config.provider() {
        ProviderType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        ProviderType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// What a provider-specific parser made of one line of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Fragment(String),
    Skip,
    Done,
}

/// Splits a byte stream into lines regardless of how the network chunked it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever trailed the last newline when the connection closed.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() { None } else { decode_line(&self.pending) }
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => Some(line.to_string()),
        Err(e) => {
            debug!("Dropping non UTF-8 stream line: {}", e);
            None
        }
    }
}

/// Spawns the body reader for a streamed response. Lines are handed to
/// `line_parser` in order until it reports [`LineOutcome::Done`], the body
/// ends, or the consumer goes away.
pub fn stream_response(
    provider: ProviderType,
    resp: reqwest::Response,
    line_parser: fn(&str) -> LineOutcome
) -> FragmentStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk_result) = bytes.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("{} stream interrupted: {}", provider, e.without_url());
                    return;
                }
            };
            for line in lines.push(&chunk) {
                match line_parser(&line) {
                    LineOutcome::Fragment(text) => {
                        if tx.send(text).await.is_err() {
                            return;
                        }
                    }
                    LineOutcome::Skip => {}
                    LineOutcome::Done => {
                        return;
                    }
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let LineOutcome::Fragment(text) = line_parser(&line) {
                let _ = tx.send(text).await;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_joins_split_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b":1}\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string(), "data: [DONE]".to_string()]);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn line_buffer_keeps_trailing_line_for_finish() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"first\nsecond");
        assert_eq!(lines, vec!["first".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("second"));
    }

    #[test]
    fn line_buffer_handles_multibyte_split_across_chunks() {
        let text = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&text[..2]).is_empty());
        assert_eq!(buffer.push(&text[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn line_buffer_drops_invalid_utf8_lines() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"\xff\xfe\nok\n");
        assert_eq!(lines, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn full_response_as_stream_yields_once() {
        let fragments: Vec<String> = full_response_as_stream("whole".to_string()).collect().await;
        assert_eq!(fragments, vec!["whole".to_string()]);
    }

    #[test]
    fn error_text_is_prefixed() {
        let err = ChatError::EmptyResponse(ProviderType::Gemini);
        assert_eq!(error_text(&err), "Error: No response from gemini");
    }
}
