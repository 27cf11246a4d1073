use crate::models::chat::Message;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use log::info;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a medical AI assistant designed to help healthcare professionals and patients with medical information.

IMPORTANT GUIDELINES:
- Always emphasize that your responses are for informational purposes only
- Remind users to consult qualified healthcare professionals for medical advice
- Never provide specific diagnoses or treatment recommendations
- Focus on general medical knowledge, symptoms, and when to seek professional care
- Be helpful but cautious with medical information
- If asked about emergencies, always recommend immediate medical attention

You can help with:
- General medical information and education
- Symptom descriptions and when to see a doctor
- Medication information (general, not specific dosing)
- Health and wellness guidance
- Medical terminology explanations
- Preventive care recommendations

Always maintain a professional, caring, and informative tone.";

#[derive(Debug)]
pub enum PromptError {
    Empty(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::Empty(path) => write!(f, "System prompt in '{}' is empty", path),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// The instruction that is always placed ahead of the caller's conversation.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PromptConfig {
    pub system_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { system_prompt: DEFAULT_SYSTEM_PROMPT.to_string() }
    }
}

impl PromptConfig {
    /// Prepends the system prompt. Caller-supplied system messages are kept
    /// after it untouched.
    pub fn assemble(&self, conversation: Vec<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(conversation);
        messages
    }
}

pub fn load_prompts_from_str(source: &str, content: &str) -> Result<PromptConfig, PromptError> {
    let config: PromptConfig = serde_json::from_str(content)?;
    if config.system_prompt.trim().is_empty() {
        return Err(PromptError::Empty(source.to_string()));
    }
    Ok(config)
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<PromptConfig, PromptError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let config = load_prompts_from_str(&path.display().to_string(), &content)?;
    info!("Loaded system prompt from '{}' ({} chars)", path.display(), config.system_prompt.len());
    Ok(config)
}
