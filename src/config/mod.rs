pub mod prompt;

use crate::cli::Args;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sampling parameters fixed per deployment. Callers cannot override them.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Wire format of a successful `/api/chat` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    /// Raw assistant text, chunk after chunk.
    #[default]
    Text,
    /// Line-oriented data-stream protocol (`0:"..."` text parts, `d:` finish).
    Data,
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(StreamFormat::Text),
            "data" => Ok(StreamFormat::Data),
            _ => Err(format!("Invalid stream protocol: '{}' (expected text or data)", s)),
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Text => write!(f, "text"),
            StreamFormat::Data => write!(f, "data"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub stream_format: StreamFormat,
    /// Upper bound on one streamed response. `None` means unbounded.
    pub max_duration: Option<Duration>,
    /// Requests allowed per client IP per window. `0` disables limiting.
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_format: StreamFormat::Text,
            max_duration: Some(Duration::from_secs(30)),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl ServerSettings {
    pub fn from_args(args: &Args) -> Result<Self, String> {
        Ok(Self {
            stream_format: args.stream_protocol.parse()?,
            max_duration: match args.max_duration_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            rate_limit_requests: args.rate_limit_requests,
            rate_limit_window: Duration::from_secs(args.rate_limit_window.max(1)),
            allowed_origins: args.allowed_origins
                .iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        })
    }
}
