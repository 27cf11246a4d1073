pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod proxy;
pub mod server;

use cli::Args;
use config::prompt::{ load_prompts, PromptConfig };
use config::{ SamplingConfig, ServerSettings };
use llm::chat::new_client;
use llm::{ LlmConfig, LlmType };
use log::info;
use proxy::ChatProxy;
use server::api::AppState;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let llm_type: LlmType = args.chat_llm_type.parse()?;
    let model = args.chat_model
        .clone()
        .unwrap_or_else(|| llm_type.default_model().to_string());
    let settings = ServerSettings::from_args(&args)?;

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", llm_type);
    info!("Chat Model: {}", model);
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("(provider default)"));
    info!("Temperature: {}", args.temperature);
    info!("Max Tokens: {}", args.max_tokens);
    info!("System Prompt: {}", args.system_prompt_path.as_deref().unwrap_or("(built-in)"));
    info!("Stream Protocol: {}", settings.stream_format);
    info!("Max Duration: {}", match settings.max_duration {
        Some(d) => format!("{}s", d.as_secs()),
        None => "unlimited".to_string(),
    });
    if settings.rate_limit_requests > 0 {
        info!(
            "Rate Limit: {} requests / {}s per client",
            settings.rate_limit_requests,
            settings.rate_limit_window.as_secs()
        );
    } else {
        info!("Rate Limit: disabled");
    }
    info!("Allowed Origins: {}", settings.allowed_origins.join(", "));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let prompt = match &args.system_prompt_path {
        Some(path) => load_prompts(path)?,
        None => PromptConfig::default(),
    };

    let client = new_client(
        &(LlmConfig {
            llm_type,
            api_key: Some(args.chat_api_key.clone()),
            base_url: args.chat_base_url.clone(),
        })
    )?;

    let proxy = Arc::new(
        ChatProxy::new(client, prompt, SamplingConfig {
            model,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        })
    );

    let server = Server::new(args, AppState::new(proxy, settings));
    server.run().await?;

    Ok(())
}
