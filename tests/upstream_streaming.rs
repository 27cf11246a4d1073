use axum::body::{ to_bytes, Body, Bytes };
use axum::extract::{ Path, State };
use axum::http::{ header, HeaderMap, Request, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::routing::post;
use axum::{ Json, Router };
use care_chat_proxy::config::prompt::{ PromptConfig, DEFAULT_SYSTEM_PROMPT };
use care_chat_proxy::config::{ SamplingConfig, ServerSettings, StreamFormat };
use care_chat_proxy::llm::chat::gemini::GeminiChatClient;
use care_chat_proxy::llm::chat::openai::OpenAIChatClient;
use care_chat_proxy::llm::chat::{ BoxError, ChatClient, CompletionRequest };
use care_chat_proxy::models::chat::Message;
use care_chat_proxy::proxy::ChatProxy;
use care_chat_proxy::server::api::{ router, AppState };
use futures::stream::{ self, StreamExt };
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    paths: Arc<Mutex<Vec<String>>>,
}

/// SSE body deliberately cut mid-line and mid-JSON to exercise re-assembly.
const OPENAI_BODY: &[&str] = &[
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"See a \"}}]}\n\ndata: {\"choi",
    "ces\":[{\"delta\":{\"content\":\"doctor\"}}]}\r\n\r\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" soon.\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
];

fn sse(parts: &'static [&'static str]) -> Response {
    let body = stream::iter(parts.iter().map(|p| Ok::<Bytes, Infallible>(Bytes::from_static(p.as_bytes()))));
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
}

async fn openai_completions(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>
) -> Response {
    captured.headers.lock().unwrap().push(headers);
    let model = body["model"].as_str().unwrap_or_default().to_string();
    captured.bodies.lock().unwrap().push(body);

    match model.as_str() {
        "gpt-unauthorized" =>
            (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": { "message": "bad key" } }))).into_response(),
        "gpt-slow" => {
            let ticks = stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let line = format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"tick{} \"}}}}]}}\n\n", n);
                Some((Ok::<Bytes, Infallible>(Bytes::from(line)), n + 1))
            });
            ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(ticks)).into_response()
        }
        _ => sse(OPENAI_BODY),
    }
}

async fn gemini_stream(
    State(captured): State<Captured>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>
) -> Response {
    captured.paths.lock().unwrap().push(model_action);
    captured.headers.lock().unwrap().push(headers);
    captured.bodies.lock().unwrap().push(body);
    sse(
        &[
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Consult \"}],\"role\":\"model\"}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a physician.\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        ]
    )
}

async fn spawn_upstream() -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(openai_completions))
        .route("/v1beta/models/{model_action}", post(gemini_stream))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), captured)
}

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![Message::system("rules"), Message::user("My chest hurts")],
        temperature: 0.7,
        max_tokens: 1000,
    }
}

async fn collect(client: &dyn ChatClient, model: &str) -> Vec<Result<String, BoxError>> {
    client
        .stream_chat(request(model), CancellationToken::new()).await
        .unwrap()
        .collect().await
}

#[tokio::test]
async fn openai_client_reassembles_split_events_in_order() {
    let (base, captured) = spawn_upstream().await;
    let client = OpenAIChatClient::new("sk-test".into(), Some(format!("{}/v1", base))).unwrap();

    let chunks: Vec<String> = collect(&client, "gpt-4").await
        .into_iter()
        .map(|c| c.unwrap())
        .collect();
    assert_eq!(chunks, vec!["See a ", "doctor", " soon."]);

    let body = &captured.bodies.lock().unwrap()[0];
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 1000);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "My chest hurts");
    assert_eq!(captured.headers.lock().unwrap()[0][header::AUTHORIZATION], "Bearer sk-test");
}

#[tokio::test]
async fn openai_error_status_becomes_single_error_item() {
    let (base, _) = spawn_upstream().await;
    let client = OpenAIChatClient::new("sk-bad".into(), Some(format!("{}/v1", base))).unwrap();

    let items = collect(&client, "gpt-unauthorized").await;
    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn cancelling_stops_an_endless_upstream() {
    let (base, _) = spawn_upstream().await;
    let client = OpenAIChatClient::new("sk-test".into(), Some(format!("{}/v1", base))).unwrap();
    let cancel = CancellationToken::new();

    let mut stream = client.stream_chat(request("gpt-slow"), cancel.clone()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "tick0 ");

    cancel.cancel();
    let drained = tokio::time
        ::timeout(Duration::from_secs(2), async {
            let mut extra = 0;
            while stream.next().await.is_some() {
                extra += 1;
            }
            extra
        }).await
        .expect("upstream stream should end after cancellation");
    assert!(drained <= 32);
}

#[tokio::test]
async fn gemini_client_streams_candidate_text() {
    let (base, captured) = spawn_upstream().await;
    let client = GeminiChatClient::new("g-key".into(), Some(base)).unwrap();

    let chunks: Vec<String> = collect(&client, "gemini-1.5-pro").await
        .into_iter()
        .map(|c| c.unwrap())
        .collect();
    assert_eq!(chunks, vec!["Consult ", "a physician."]);

    assert_eq!(captured.paths.lock().unwrap()[0], "gemini-1.5-pro:streamGenerateContent");
    assert_eq!(captured.headers.lock().unwrap()[0]["x-goog-api-key"], "g-key");
    let body = &captured.bodies.lock().unwrap()[0];
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
    assert_eq!(body["contents"][0]["role"], "user");
}

#[tokio::test]
async fn chat_endpoint_relays_real_upstream_end_to_end() {
    let (base, captured) = spawn_upstream().await;
    let client = Arc::new(OpenAIChatClient::new("sk-test".into(), Some(format!("{}/v1", base))).unwrap());
    let proxy = Arc::new(
        ChatProxy::new(client, PromptConfig::default(), SamplingConfig {
            model: "gpt-4".into(),
            temperature: 0.7,
            max_tokens: 1000,
        })
    );
    let app = router(
        AppState::new(proxy, ServerSettings {
            stream_format: StreamFormat::Text,
            rate_limit_requests: 0,
            ..ServerSettings::default()
        })
    );

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"messages":[{"role":"user","content":"My chest hurts"}]}"#))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"See a doctor soon.");
    assert_eq!(captured.bodies.lock().unwrap()[0]["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
}
