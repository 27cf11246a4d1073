use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use tokio_util::sync::CancellationToken;
use log::warn;

use super::{ sse_data, spawn_sse_stream, BoxError, ChatClient, ChunkStream, CompletionRequest, LineEvent };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::{ Message, Role };

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiInstruction>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

pub struct GeminiChatClient {
    http: HttpClient,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, BoxError> {
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&api_key).map_err(|e| format!("Invalid API key format: {}", e))?
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
            .ok_or_else(|| "Gemini API key is required".to_string())?;

        Self::new(api_key, config.base_url.clone())
    }
}

/// Gemini takes system text out of band: every system message, in order,
/// goes into `systemInstruction`; the rest become `user`/`model` turns.
fn build_request(request: &CompletionRequest) -> GeminiStreamRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for Message { role, content } in &request.messages {
        match role {
            Role::System => system_parts.push(GeminiPart { text: content.clone() }),
            Role::User | Role::Assistant => contents.push(GeminiContent {
                role: if *role == Role::User { "user" } else { "model" },
                parts: vec![GeminiPart { text: content.clone() }],
            }),
        }
    }

    GeminiStreamRequest {
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiInstruction { parts: system_parts })
        },
        contents,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        },
    }
}

pub(crate) fn parse_gemini_line(line: &str) -> LineEvent {
    let data = match sse_data(line) {
        Some(data) if !data.is_empty() => data,
        _ => {
            return LineEvent::Skip;
        }
    };

    match serde_json::from_str::<GoogleChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                return LineEvent::Error(format!("Gemini stream error: {}", err.message));
            }
            let text = chunk.candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c|
                    c.parts
                        .into_iter()
                        .map(|p| p.text)
                        .collect::<String>()
                )
                .unwrap_or_default();
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
impl ChatClient for GeminiChatClient {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, BoxError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url,
            request.model
        );
        let builder = self.http.post(&url).json(&build_request(&request));

        Ok(spawn_sse_stream("Gemini", builder, parse_gemini_line, cancel))
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        self.http
            .get(format!("{}/v1beta/models", self.base_url))
            .send().await?
            .error_for_status()?;
        Ok(())
    }

    fn provider(&self) -> LlmType {
        LlmType::Gemini
    }
}
