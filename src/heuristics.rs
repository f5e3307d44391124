use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::{Mode, Persona};

const STORY_BASELINE: &str = "You are ScenePilot, a collaborative storyteller.\nWrite vivid, grounded prose that continues the scene the user is building.\nStay in the fiction: never mention being an AI, prompts, or hidden notes.";

const CHAT_BASELINE: &str = "You are ScenePilot, a warm and attentive conversation partner.\nReply naturally and concisely, as one person talking to another.\nNever mention being an AI, prompts, or hidden notes.";

const STORY_RULE: &str = "Story mode: continue the scene from where it stands. Narrate the world and the other characters; never decide the user's own dialogue, thoughts, or actions. Keep continuity with earlier events.";

const CHAT_RULE: &str = "Chat mode: answer the user's latest message directly in a conversational voice. No narration, no scene-setting, no stage directions.";

pub const STRICT_RETRY_RULE: &str = "Your previous draft did not follow the hidden notes. Rewrite the reply so it clearly carries out every hidden note, uses their key words naturally, and never mentions notes, instructions, brackets, or stage directions. Output only the reply.";

pub fn baseline_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Story => STORY_BASELINE,
        Mode::Chat => CHAT_BASELINE,
    }
}

pub fn mode_rule(mode: Mode) -> &'static str {
    match mode {
        Mode::Story => STORY_RULE,
        Mode::Chat => CHAT_RULE,
    }
}

/// Tunable rules behind the fuzzy parts of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    pub stop_words: Vec<String>,
    pub min_keyword_len: usize,
    pub leak_terms: Vec<String>,
    pub emphasis_verbs: Vec<String>,
    pub continuity_excerpt_chars: usize,
    pub history_window: usize,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            stop_words: [
                "that", "this", "with", "from", "have", "your", "they", "them", "then", "there",
                "their", "what", "when", "where", "which", "while", "would", "could", "should",
                "about", "into", "make", "more", "some", "just", "like", "very", "been", "were",
                "will", "want", "also", "than", "only", "over", "each", "reply", "respond",
                "response", "sentence", "sentences", "keep", "please", "say", "says", "saying",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            min_keyword_len: 4,
            leak_terms: ["instruction", "bracket", "stage direction"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            emphasis_verbs: ["offer", "ask", "suggest"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            continuity_excerpt_chars: 600,
            history_window: 40,
        }
    }
}

impl Heuristics {
    /// Loads overrides from a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read heuristics file {}", path.display()))?;
        let heuristics = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("failed to parse heuristics file {}", path.display()))?;
        Ok(heuristics)
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.iter().any(|stop| stop == word)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PersonaPreset {
    pub name: &'static str,
    pub who: &'static str,
    pub role: &'static str,
    pub themes: &'static str,
    pub boundaries: &'static str,
}

impl PersonaPreset {
    pub fn to_persona(self) -> Persona {
        Persona {
            who: self.who.to_owned(),
            role: self.role.to_owned(),
            themes: self.themes.to_owned(),
            boundaries: self.boundaries.to_owned(),
        }
    }
}

pub const PERSONA_PRESETS: &[PersonaPreset] = &[
    PersonaPreset {
        name: "narrator",
        who: "An omniscient narrator with a dry sense of humour",
        role: "Describes the world, voices side characters, keeps the pacing tight",
        themes: "adventure, mystery, small human moments",
        boundaries: "No graphic violence; never acts for the user's character",
    },
    PersonaPreset {
        name: "companion",
        who: "A thoughtful friend who remembers what matters to the user",
        role: "Listens first, then responds with warmth and curiosity",
        themes: "everyday life, hobbies, plans",
        boundaries: "No medical, legal, or financial advice",
    },
    PersonaPreset {
        name: "noir",
        who: "A world-weary detective narrator in a rain-soaked city",
        role: "Narrates in first person past tense with clipped, moody prose",
        themes: "crime, secrets, moral ambiguity",
        boundaries: "Keep violence off-page",
    },
];

pub fn find_preset(name: &str) -> Option<PersonaPreset> {
    let wanted = name.trim().to_ascii_lowercase();
    PERSONA_PRESETS
        .iter()
        .copied()
        .find(|preset| preset.name == wanted)
}
