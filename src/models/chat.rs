use serde::{ Deserialize, Serialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged turn of a conversation.
///
/// On input the text may arrive either as `content` or as UI-style `parts`;
/// both forms are folded into `content` while deserializing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IncomingMessage")]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Deserialize)]
struct IncomingMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum MessagePart {
    #[serde(rename = "text")] Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl TryFrom<IncomingMessage> for Message {
    type Error = String;

    fn try_from(incoming: IncomingMessage) -> Result<Self, Self::Error> {
        if let Some(content) = incoming.content {
            return Ok(Message::new(incoming.role, content));
        }

        match incoming.parts {
            Some(parts) => {
                let content = parts
                    .into_iter()
                    .filter_map(|part| match part {
                        MessagePart::Text { text } => Some(text),
                        MessagePart::Other => None,
                    })
                    .collect::<String>();
                Ok(Message::new(incoming.role, content))
            }
            None => Err(format!("{} message has neither `content` nor `parts`", incoming.role)),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationRequest {
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
