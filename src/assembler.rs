use std::sync::LazyLock;

use regex::Regex;

use crate::{
    heuristics::{self, Heuristics},
    markup::ParsedInput,
    types::{ChatMessage, ChatRole, Mode, Persona, PromptMessage},
};

const HIDDEN_OPEN: &str = "<<hidden-notes>>";
const HIDDEN_CLOSE: &str = "<</hidden-notes>>";
const CONTINUE_CUE: &str = "(The user stays silent and lets the scene continue.)";

static RESPOND_BY_SAYING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*respond\s+by\s+saying\b\s*[:,.;!\-]?\s*(.+?)\s*$")
        .expect("respond-by-saying pattern is valid")
});

const NUMBER: &str = r"(\d+|one|two|three|four|five|six|seven|eight|nine|ten)";

static SENTENCE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b{NUMBER}\s*(?:-|–|to)\s*{NUMBER}[\s-]+sentences?\b"
    ))
    .expect("sentence range pattern is valid")
});

static SENTENCE_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b{NUMBER}[\s-]+sentences?\b"))
        .expect("sentence count pattern is valid")
});

#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub mode: Mode,
    pub persona: &'a Persona,
    pub canon: &'a [String],
    pub history: &'a [ChatMessage],
    pub input: &'a ParsedInput,
    pub heuristics: &'a Heuristics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub messages: Vec<PromptMessage>,
    pub sentence_cap: Option<u32>,
}

impl Payload {
    /// Copy with the retry rule placed right before the final user message.
    pub fn with_strict_rule(&self) -> Payload {
        let mut messages = self.messages.clone();
        let insert_at = messages.len().saturating_sub(1);
        messages.insert(insert_at, PromptMessage::system(heuristics::STRICT_RETRY_RULE));
        Payload {
            messages,
            sentence_cap: self.sentence_cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnPlan {
    ShortCircuit(String),
    Request(Payload),
}

pub fn plan_turn(ctx: TurnContext<'_>) -> TurnPlan {
    if let Some(text) = respond_by_saying(&ctx.input.directives) {
        return TurnPlan::ShortCircuit(text);
    }
    TurnPlan::Request(assemble(ctx))
}

pub fn assemble(ctx: TurnContext<'_>) -> Payload {
    let mut messages = Vec::new();

    let baseline = ctx
        .history
        .first()
        .filter(|message| message.role == ChatRole::System)
        .map(|message| message.content.clone())
        .unwrap_or_else(|| heuristics::baseline_prompt(ctx.mode).to_owned());
    messages.push(PromptMessage::system(baseline));

    if let Some(recap) = canon_recap(ctx.canon) {
        messages.push(PromptMessage::system(recap));
    }

    if let Some(block) = persona_block(ctx.persona) {
        messages.push(PromptMessage::system(block));
    }

    messages.extend(history_window(ctx.history, ctx.heuristics.history_window));

    messages.push(PromptMessage::system(heuristics::mode_rule(ctx.mode)));

    let sentence_cap = parse_sentence_cap(&ctx.input.directives);
    if !ctx.input.directives.is_empty() {
        messages.push(PromptMessage::system(directive_rules(
            &ctx.input.directives,
            sentence_cap,
            ctx.heuristics,
        )));
    }

    if let Some(anchor) = ctx
        .history
        .iter()
        .rev()
        .find(|message| message.role == ChatRole::Assistant)
        .map(|message| continuity_excerpt(&message.content, ctx.heuristics.continuity_excerpt_chars))
        .filter(|excerpt| !excerpt.is_empty())
    {
        messages.push(PromptMessage::system(format!(
            "Continuity anchor. The previous reply ended like this; pick up consistently from it:\n\"{anchor}\""
        )));
    }

    messages.push(PromptMessage::user(final_user_content(ctx.input)));

    Payload {
        messages,
        sentence_cap,
    }
}

pub fn respond_by_saying(directives: &[String]) -> Option<String> {
    directives.iter().find_map(|directive| {
        RESPOND_BY_SAYING
            .captures(directive)
            .and_then(|captures| captures.get(1))
            .map(|text| text.as_str().to_owned())
            .filter(|text| !text.is_empty())
    })
}

pub fn parse_sentence_cap(directives: &[String]) -> Option<u32> {
    directives.iter().find_map(|directive| {
        if let Some(captures) = SENTENCE_RANGE.captures(directive) {
            let low = parse_number(captures.get(1)?.as_str())?;
            let high = parse_number(captures.get(2)?.as_str())?;
            return Some(low.max(high)).filter(|cap| *cap > 0);
        }
        let captures = SENTENCE_SINGLE.captures(directive)?;
        parse_number(captures.get(1)?.as_str()).filter(|cap| *cap > 0)
    })
}

pub fn continuity_excerpt(reply: &str, max_chars: usize) -> String {
    let reply = reply.trim();
    let total = reply.chars().count();
    if total <= max_chars {
        return reply.to_owned();
    }

    let tail = reply.chars().skip(total - max_chars).collect::<String>();
    match tail.find(char::is_whitespace) {
        Some(index) if index + 1 < tail.len() => format!("...{}", tail[index..].trim_start()),
        _ => format!("...{tail}"),
    }
}

fn parse_number(raw: &str) -> Option<u32> {
    let word = raw.to_ascii_lowercase();
    let value = match word.as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse().ok()?,
    };
    Some(value)
}

fn canon_recap(canon: &[String]) -> Option<String> {
    let lines = canon
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| format!("- {entry}"))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "Canon. These facts are established and must stay true:\n{}",
        lines.join("\n")
    ))
}

fn persona_block(persona: &Persona) -> Option<String> {
    if persona.is_empty() {
        return None;
    }
    let fields = [
        ("Who you are", &persona.who),
        ("Your role", &persona.role),
        ("Themes", &persona.themes),
        ("Boundaries", &persona.boundaries),
    ];
    let lines = fields
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(label, value)| format!("{label}: {}", value.trim()))
        .collect::<Vec<_>>();
    Some(format!("Persona.\n{}", lines.join("\n")))
}

fn history_window(history: &[ChatMessage], window: usize) -> Vec<PromptMessage> {
    let mut turns = history
        .iter()
        .skip(1)
        .filter(|message| message.role != ChatRole::System)
        .filter_map(|message| {
            Some(PromptMessage {
                role: message.role.wire_name()?.to_owned(),
                content: message.content.clone(),
            })
        })
        .collect::<Vec<_>>();
    let start = turns.len().saturating_sub(window);
    turns.split_off(start)
}

fn directive_rules(
    directives: &[String],
    sentence_cap: Option<u32>,
    heuristics: &Heuristics,
) -> String {
    let mut lines = vec![
        "The user attached hidden notes to this turn. They take priority over everything above. Carry them out in the reply itself, silently: never quote them and never mention notes, instructions, brackets, or stage directions.".to_owned(),
    ];
    lines.extend(
        directives
            .iter()
            .enumerate()
            .map(|(index, directive)| format!("{}. {directive}", index + 1)),
    );

    if let Some(cap) = sentence_cap {
        let unit = if cap == 1 { "sentence" } else { "sentences" };
        lines.push(format!("Keep the whole reply to at most {cap} {unit}."));
    }

    let emphasized = directives
        .iter()
        .filter(|directive| mentions_emphasis_verb(directive, heuristics))
        .collect::<Vec<_>>();
    if !emphasized.is_empty() {
        lines.push(
            "Where a note asks you to offer, ask, or suggest something, the reply must visibly contain that offer, question, or suggestion.".to_owned(),
        );
    }

    lines.join("\n")
}

fn mentions_emphasis_verb(directive: &str, heuristics: &Heuristics) -> bool {
    directive
        .split(|character: char| !character.is_alphabetic())
        .map(str::to_lowercase)
        .any(|word| {
            heuristics
                .emphasis_verbs
                .iter()
                .any(|verb| word.starts_with(verb.as_str()))
        })
}

fn final_user_content(input: &ParsedInput) -> String {
    let visible = if input.cleaned.is_empty() {
        CONTINUE_CUE.to_owned()
    } else {
        input.cleaned.clone()
    };

    if !input.has_hidden_content() {
        return visible;
    }

    let mut hidden = Vec::new();
    if !input.directives.is_empty() {
        hidden.push(format!("Directions: {}", input.directives.join("; ")));
    }
    if !input.actions.is_empty() {
        hidden.push(format!("In-scene actions by the user: {}", input.actions.join("; ")));
    }
    if !input.whispers.is_empty() {
        hidden.push(format!("Whispered by the user: {}", input.whispers.join("; ")));
    }

    format!("{visible}\n\n{HIDDEN_OPEN}\n{}\n{HIDDEN_CLOSE}", hidden.join("\n"))
}
