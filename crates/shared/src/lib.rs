pub mod catalog;
pub mod settings;

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    /// Who produced a conversation turn. The backend only knows these two.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Model,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Part {
        pub text: String,
    }

    /// One turn of a conversation, serialized in the shape the streaming
    /// endpoint expects (`{ "role": "user", "parts": [{ "text": ".." }] }`).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: Role,
        pub parts: Vec<Part>,
    }

    impl ChatMessage {
        pub fn new(role: Role, text: impl Into<String>) -> Self {
            Self {
                role,
                parts: vec![Part { text: text.into() }],
            }
        }

        pub fn user(text: impl Into<String>) -> Self {
            Self::new(Role::User, text)
        }

        pub fn model(text: impl Into<String>) -> Self {
            Self::new(Role::Model, text)
        }

        /// All text parts joined together.
        pub fn text(&self) -> String {
            self.parts.iter().map(|p| p.text.as_str()).collect()
        }
    }

    /// Channel form of the stream callbacks.
    #[derive(Debug, Clone, PartialEq)]
    pub enum StreamChunk {
        /// Incremental text delta
        Text(String),
        /// Stream ended normally; carries everything that was streamed
        Done { full_text: String },
        /// Session failed; no further chunks follow
        Error(String),
    }
}
