use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, gemini)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4, gemini-1.5-pro)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Sampling temperature sent with every completion request.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Maximum number of tokens the model may generate per reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1000")]
    pub max_tokens: u32,

    /// Optional JSON file ({"system_prompt": "..."}) replacing the built-in medical system prompt.
    #[arg(long, env = "SYSTEM_PROMPT_PATH")]
    pub system_prompt_path: Option<String>,

    // --- HTTP Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Response body format for /api/chat (text, data)
    #[arg(long, env = "STREAM_PROTOCOL", default_value = "text")]
    pub stream_protocol: String,

    /// Maximum lifetime of one streamed reply in seconds. 0 means no limit.
    #[arg(long, env = "MAX_DURATION_SECS", default_value = "30")]
    pub max_duration_secs: u64,

    /// Chat requests allowed per client IP within the rate limit window. 0 disables rate limiting.
    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value = "100")]
    pub rate_limit_requests: u32,

    /// Rate limit window in seconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value = "60")]
    pub rate_limit_window: u64,

    /// Comma separated list of allowed CORS origins. Use * to allow any origin.
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000,http://localhost:3001"
    )]
    pub allowed_origins: Vec<String>,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
