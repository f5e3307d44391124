use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Literal typed text kept for the transcript only; never sent upstream.
    UserDisplay,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::UserDisplay => "user_display",
        }
    }

    /// Role name on the wire. `UserDisplay` has none.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            ChatRole::UserDisplay => None,
            other => Some(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Story,
    Chat,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Story => "story",
            Mode::Chat => "chat",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "story" => Some(Mode::Story),
            "chat" => Some(Mode::Chat),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            raw: None,
            cleaned: None,
            directives: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn typed_text(&self) -> &str {
        self.raw.as_deref().unwrap_or(&self.content)
    }

    pub fn is_user_turn(&self) -> bool {
        matches!(self.role, ChatRole::User | ChatRole::UserDisplay)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Persona {
    #[serde(default)]
    pub who: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub themes: String,
    #[serde(default)]
    pub boundaries: String,
}

impl Persona {
    pub fn is_empty(&self) -> bool {
        [&self.who, &self.role, &self.themes, &self.boundaries]
            .iter()
            .all(|field| field.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub canon: Vec<String>,
}

impl Conversation {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            messages: vec![ChatMessage::system(crate::heuristics::baseline_prompt(mode))],
            persona: Persona::default(),
            canon: Vec::new(),
        }
    }

    /// Puts the mode's baseline prompt back at index 0 when it went missing.
    pub fn ensure_baseline(&mut self) {
        let baseline = crate::heuristics::baseline_prompt(self.mode);
        match self.messages.first() {
            Some(first) if first.role == ChatRole::System => {}
            _ => self.messages.insert(0, ChatMessage::system(baseline)),
        }
    }

    /// Switches mode and rewrites the baseline prompt to match.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.ensure_baseline();
        self.messages[0].content = crate::heuristics::baseline_prompt(mode).to_owned();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnReply {
    pub conversation: String,
    pub text: String,
    pub directives: Vec<String>,
    pub short_circuited: bool,
    pub retried: bool,
    pub retry_accepted: bool,
    pub compliance_flags: Vec<String>,
    pub elapsed_ms: u64,
}
