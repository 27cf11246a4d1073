pub mod openai;
pub mod gemini;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmType };
use self::openai::OpenAIChatClient;
use self::gemini::GeminiChatClient;
use crate::models::chat::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use log::debug;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Ordered fragments of assistant text as produced by the upstream model.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BoxError>> + Send>>;

/// Everything an upstream model needs for one streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a streamed completion. Implementations must stop producing
    /// chunks and release the upstream connection once `cancel` fires or the
    /// returned stream is dropped.
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, BoxError>;

    async fn health_check(&self) -> Result<(), BoxError>;

    fn provider(&self) -> LlmType;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, BoxError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// What a provider makes of one server-sent-event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Chunk(String),
    Done,
    Error(String),
    Skip,
}

/// Re-assembles lines across network chunk boundaries. Works on bytes so a
/// multi-byte character split between two reads survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Returns the trailing line of a body that did not end with a newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Payload of an SSE `data:` line, if `line` is one.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Sends `request` on a background task and relays the parsed SSE body as a
/// stream. The task exits when the body ends, the parser reports `Done` or an
/// error, the receiver goes away, or `cancel` fires.
pub fn spawn_sse_stream(
    label: &'static str,
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> LineEvent,
    cancel: CancellationToken
) -> ChunkStream {
    let (tx, rx) = mpsc::channel::<Result<String, BoxError>>(32);

    tokio::spawn(async move {
        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("{} request cancelled before a response arrived", label);
                return;
            }
            resp = request.send() => resp,
        };

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let _ = tx.send(Err(format!("{} returned {}: {}", label, status, body.trim()).into())).await;
            return;
        }

        let mut bytes = resp.bytes_stream();
        let mut lines = SseLineBuffer::default();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} stream cancelled, dropping upstream connection", label);
                    return;
                }
                next = bytes.next() => next,
            };

            match next {
                Some(Ok(buf)) => {
                    for line in lines.push(&buf) {
                        if !forward_line(&tx, line_parser(&line)).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
                None => {
                    if let Some(line) = lines.finish() {
                        forward_line(&tx, line_parser(&line)).await;
                    }
                    return;
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

async fn forward_line(tx: &mpsc::Sender<Result<String, BoxError>>, event: LineEvent) -> bool {
    match event {
        LineEvent::Chunk(text) => tx.send(Ok(text)).await.is_ok(),
        LineEvent::Done => false,
        LineEvent::Error(message) => {
            let _ = tx.send(Err(message.into())).await;
            false
        }
        LineEvent::Skip => true,
    }
}
