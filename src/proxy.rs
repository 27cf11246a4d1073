//! The chat streaming proxy: prompt assembly, one upstream call, and a relay
//! that forwards chunks in order until the model finishes or the caller
//! cancels.

use crate::config::prompt::PromptConfig;
use crate::config::SamplingConfig;
use crate::llm::chat::{ BoxError, ChatClient, ChunkStream, CompletionRequest };
use crate::models::chat::Message;
use futures::{ Stream, StreamExt };
use log::{ debug, error, info };
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ Context, Poll };
use thiserror::Error;
use tokio_util::sync::{ CancellationToken, WaitForCancellationFutureOwned };

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream model call failed: {0}")] Upstream(BoxError),
    #[error("request cancelled before the first chunk")]
    Cancelled,
}

/// Terminal state of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Aborted,
    Failed,
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOutcome::Completed => write!(f, "completed"),
            StreamOutcome::Aborted => write!(f, "aborted"),
            StreamOutcome::Failed => write!(f, "failed"),
        }
    }
}

pub type FinishHook = Box<dyn FnOnce(StreamOutcome) + Send>;

pub struct ChatProxy {
    client: Arc<dyn ChatClient>,
    prompt: PromptConfig,
    sampling: SamplingConfig,
}

impl ChatProxy {
    pub fn new(client: Arc<dyn ChatClient>, prompt: PromptConfig, sampling: SamplingConfig) -> Self {
        Self { client, prompt, sampling }
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.client
    }

    pub fn assemble(&self, conversation: Vec<Message>) -> Vec<Message> {
        self.prompt.assemble(conversation)
    }

    /// Invokes the upstream model and waits for its first item.
    ///
    /// An upstream failure before any chunk exists is returned as
    /// [`ProxyError::Upstream`] so the caller can answer with a plain error
    /// instead of a stream. Once a stream is returned it owns `cancel`.
    pub async fn open_stream(
        &self,
        request_id: &str,
        conversation: Vec<Message>,
        cancel: CancellationToken
    ) -> Result<RelayStream, ProxyError> {
        debug!("[{}] assembling prompt for {} message(s)", request_id, conversation.len());
        let request = CompletionRequest {
            model: self.sampling.model.clone(),
            messages: self.assemble(conversation),
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
        };

        let mut upstream = match self.client.stream_chat(request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("[{}] failed to start {} stream: {}", request_id, self.client.provider(), e);
                cancel.cancel();
                return Err(ProxyError::Upstream(e));
            }
        };

        let first = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] chat aborted before the first chunk", request_id);
                return Err(ProxyError::Cancelled);
            }
            first = upstream.next() => first,
        };

        match first {
            Some(Err(e)) => {
                error!("[{}] upstream failed before the first chunk: {}", request_id, e);
                cancel.cancel();
                Err(ProxyError::Upstream(e))
            }
            Some(Ok(chunk)) => Ok(RelayStream::new(request_id, Some(chunk), upstream, cancel)),
            None => Ok(RelayStream::new(request_id, None, upstream, cancel)),
        }
    }
}

/// Forwards upstream chunks in order and settles on exactly one
/// [`StreamOutcome`]. Dropping it unfinished counts as an abort.
pub struct RelayStream {
    request_id: String,
    pending: Option<String>,
    upstream: ChunkStream,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    forwarded: usize,
    outcome: Option<StreamOutcome>,
    on_finish: Option<FinishHook>,
}

impl RelayStream {
    fn new(
        request_id: &str,
        first: Option<String>,
        upstream: ChunkStream,
        token: CancellationToken
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            pending: first,
            upstream,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            forwarded: 0,
            outcome: None,
            on_finish: None,
        }
    }

    /// Registers an observer called once with the terminal outcome.
    pub fn on_finish<F>(mut self, hook: F) -> Self where F: FnOnce(StreamOutcome) + Send + 'static {
        self.on_finish = Some(Box::new(hook));
        self
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.outcome
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if self.outcome.is_some() {
            return;
        }
        self.outcome = Some(outcome);
        self.pending = None;
        self.token.cancel();

        match outcome {
            StreamOutcome::Completed => {
                info!("[{}] chat completed after {} chunk(s)", self.request_id, self.forwarded);
            }
            StreamOutcome::Aborted => {
                info!("[{}] chat aborted after {} chunk(s)", self.request_id, self.forwarded);
            }
            StreamOutcome::Failed => {
                error!("[{}] chat failed after {} chunk(s)", self.request_id, self.forwarded);
            }
        }

        if let Some(hook) = self.on_finish.take() {
            hook(outcome);
        }
    }
}

impl Stream for RelayStream {
    type Item = Result<String, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.outcome.is_some() {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finish(StreamOutcome::Aborted);
            return Poll::Ready(None);
        }

        if let Some(chunk) = this.pending.take() {
            this.forwarded += 1;
            return Poll::Ready(Some(Ok(chunk)));
        }

        match this.upstream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.forwarded += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!("[{}] upstream error mid-stream: {}", this.request_id, e);
                this.finish(StreamOutcome::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(StreamOutcome::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        self.finish(StreamOutcome::Aborted);
    }
}
