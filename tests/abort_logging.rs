//! Runs in its own test binary because it installs the global logger.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{ header, Request };
use care_chat_proxy::config::prompt::PromptConfig;
use care_chat_proxy::config::{ SamplingConfig, ServerSettings };
use care_chat_proxy::llm::chat::{ BoxError, ChatClient, ChunkStream, CompletionRequest };
use care_chat_proxy::llm::LlmType;
use care_chat_proxy::proxy::ChatProxy;
use care_chat_proxy::server::api::{ router, AppState };
use futures::stream::{ self, StreamExt };
use log::{ Level, LevelFilter, Log, Metadata, Record };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for Capture {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records.lock().unwrap().push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture { records: Mutex::new(Vec::new()) };

/// Upstream that accepts the call and never sends a chunk.
#[derive(Default)]
struct Silent {
    tokens: Mutex<Vec<CancellationToken>>,
}

#[async_trait]
impl ChatClient for Silent {
    async fn stream_chat(
        &self,
        _request: CompletionRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, BoxError> {
        self.tokens.lock().unwrap().push(cancel);
        Ok(stream::pending().boxed())
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn provider(&self) -> LlmType {
        LlmType::OpenAI
    }
}

#[tokio::test]
async fn client_disconnect_before_first_chunk_logs_one_abort() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Debug);

    let client = Arc::new(Silent::default());
    let proxy = Arc::new(
        ChatProxy::new(client.clone(), PromptConfig::default(), SamplingConfig {
            model: "gpt-4".into(),
            temperature: 0.7,
            max_tokens: 1000,
        })
    );
    let app = router(
        AppState::new(proxy, ServerSettings {
            max_duration: None,
            rate_limit_requests: 0,
            ..ServerSettings::default()
        })
    );

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();
    let call = tokio::spawn(app.oneshot(req));

    tokio::time::sleep(Duration::from_millis(100)).await;
    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());

    let records = CAPTURE.records.lock().unwrap();
    let aborts: Vec<&(Level, String)> = records
        .iter()
        .filter(|(_, msg)| msg.contains("aborted"))
        .collect();
    assert_eq!(aborts.len(), 1, "records: {:?}", *records);
    assert_eq!(aborts[0].0, Level::Info);
    assert!(aborts[0].1.ends_with("chat aborted before the first chunk"));
    assert!(client.tokens.lock().unwrap()[0].is_cancelled());
}
