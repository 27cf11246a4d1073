use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use tokio_util::sync::CancellationToken;
use log::warn;

use super::{ sse_data, spawn_sse_stream, BoxError, ChatClient, ChunkStream, CompletionRequest, LineEvent };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::Message;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIChatClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: String,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    error: Option<OpenAIError>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: String,
}

impl OpenAIChatClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, BoxError> {
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as BoxError)?;

        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| "OpenAI API key is required".to_string())?;

        Self::new(api_key, config.base_url.clone())
    }
}

fn to_openai_messages(messages: &[Message]) -> Vec<OpenAIMessage<'_>> {
    messages
        .iter()
        .map(|m| OpenAIMessage {
            role: m.role.to_string(),
            content: &m.content,
        })
        .collect()
}

pub(crate) fn parse_openai_line(line: &str) -> LineEvent {
    let data = match sse_data(line) {
        Some(data) => data,
        None => {
            return LineEvent::Skip;
        }
    };
    if data.is_empty() {
        return LineEvent::Skip;
    }
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(resp) => {
            if let Some(err) = resp.error {
                return LineEvent::Error(format!("OpenAI stream error: {}", err.message));
            }
            let text = resp.choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect::<String>();
            if text.is_empty() {
                LineEvent::Skip
            } else {
                LineEvent::Chunk(text)
            }
        }
        Err(e) => {
            warn!("JSON parse error: {} for data: {}", e, data);
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, BoxError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = OpenAIChatRequest {
            model: &request.model,
            messages: to_openai_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };
        let builder = self.http.post(&url).json(&body);

        Ok(spawn_sse_stream("OpenAI", builder, parse_openai_line, cancel))
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        self.http
            .get(format!("{}/models", self.base_url))
            .send().await?
            .error_for_status()?;
        Ok(())
    }

    fn provider(&self) -> LlmType {
        LlmType::OpenAI
    }
}
