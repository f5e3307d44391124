use std::fmt::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    heuristics::PERSONA_PRESETS,
    orchestrator::ChatOrchestrator,
    session::{SessionManager, SessionResult},
    types::{ChatRole, Mode, TurnReply},
};

const HELP: &str = "\
Type to talk. [notes] steer the reply without appearing in it,
(actions) describe what you do, *whispers* are asides.

/new [name]            start a conversation
/switch <name>         make another conversation active
/rename <name>         rename the active conversation
/delete [name]         delete a conversation (default: active)
/list                  list conversations
/mode story|chat       change the active conversation's mode
/persona [field text]  show persona, or set who|role|themes|boundaries; `clear` resets
/preset [name]         apply a persona preset, or list them
/canon                 list pinned facts
/pin <text>|#<index>   pin text, or the message at <index>, to the canon
/unpin <index>         remove a canon entry
/edit <index> <text>   rewrite a user message and resend from there
/regen                 regenerate the last reply
/history               show the transcript with message indexes
/clear                 drop every message in the active conversation
/help                  this text
/quit                  leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(Option<String>),
    Switch(String),
    Rename(String),
    Delete(Option<String>),
    List,
    Mode(Mode),
    ShowPersona,
    ClearPersona,
    SetPersonaField { field: PersonaField, text: String },
    Preset(Option<String>),
    Canon,
    Pin(String),
    PinMessage(usize),
    Unpin(usize),
    Edit { index: usize, text: String },
    Regenerate,
    History,
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaField {
    Who,
    Role,
    Themes,
    Boundaries,
}

/// `Ok(None)` means the line is chat input, not a command.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(None);
    };
    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let optional = || (!argument.is_empty()).then(|| argument.to_owned());
    let required = |usage: &str| {
        if argument.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(argument.to_owned())
        }
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "new" => Command::New(optional()),
        "switch" => Command::Switch(required("/switch <name>")?),
        "rename" => Command::Rename(required("/rename <name>")?),
        "delete" => Command::Delete(optional()),
        "list" => Command::List,
        "mode" => Command::Mode(
            Mode::parse(argument).ok_or_else(|| "usage: /mode story|chat".to_owned())?,
        ),
        "persona" => parse_persona(argument)?,
        "preset" => Command::Preset(optional()),
        "canon" => Command::Canon,
        "pin" => {
            let text = required("/pin <text>|#<index>")?;
            match text.strip_prefix('#').map(str::parse::<usize>) {
                Some(Ok(index)) => Command::PinMessage(index),
                Some(Err(_)) => return Err("usage: /pin #<index>".to_owned()),
                None => Command::Pin(text),
            }
        }
        "unpin" => Command::Unpin(parse_index(argument, "/unpin <index>")?),
        "edit" => {
            let (index, text) = argument
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /edit <index> <text>".to_owned())?;
            Command::Edit {
                index: parse_index(index, "/edit <index> <text>")?,
                text: text.trim().to_owned(),
            }
        }
        "regen" | "regenerate" => Command::Regenerate,
        "history" => Command::History,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{other}; try /help")),
    };
    Ok(Some(command))
}

fn parse_persona(argument: &str) -> Result<Command, String> {
    if argument.is_empty() {
        return Ok(Command::ShowPersona);
    }
    if argument.eq_ignore_ascii_case("clear") {
        return Ok(Command::ClearPersona);
    }
    let (field, text) = argument.split_once(char::is_whitespace).unwrap_or((argument, ""));
    let field = match field.to_ascii_lowercase().as_str() {
        "who" => PersonaField::Who,
        "role" => PersonaField::Role,
        "themes" => PersonaField::Themes,
        "boundaries" => PersonaField::Boundaries,
        other => return Err(format!("unknown persona field `{other}`")),
    };
    Ok(Command::SetPersonaField {
        field,
        text: text.trim().to_owned(),
    })
}

fn parse_index(raw: &str, usage: &str) -> Result<usize, String> {
    raw.trim().parse().map_err(|_| format!("usage: {usage}"))
}

pub struct Repl<'a> {
    orchestrator: &'a ChatOrchestrator,
    sessions: &'a mut SessionManager,
}

impl<'a> Repl<'a> {
    pub fn new(orchestrator: &'a ChatOrchestrator, sessions: &'a mut SessionManager) -> Self {
        Self {
            orchestrator,
            sessions,
        }
    }

    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output
            .write_all(format!("ScenePilot. /help for commands.\n{}", self.status()).as_bytes())
            .await?;
        output.flush().await?;

        // Each line is consumed once, so there is no re-run for a TurnGate to guard.
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                output.write_all(self.status().as_bytes()).await?;
                output.flush().await?;
                continue;
            }

            let text = match parse_command(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => self.chat(&line).await,
                Err(message) => format!("{message}\n"),
            };

            output.write_all(text.as_bytes()).await?;
            output.write_all(self.status().as_bytes()).await?;
            output.flush().await?;
        }
        Ok(())
    }

    fn status(&self) -> String {
        format!("[{} | {}] > ", self.sessions.active_name(), self.sessions.current_mode())
    }

    async fn chat(&mut self, line: &str) -> String {
        let result = self.orchestrator.submit(self.sessions, line).await;
        render_turn(result)
    }

    async fn execute(&mut self, command: Command) -> String {
        match command {
            Command::Regenerate => {
                let result = self.orchestrator.regenerate(self.sessions).await;
                render_turn(result)
            }
            Command::Edit { index, text } => {
                let result = self
                    .orchestrator
                    .edit_and_resend(self.sessions, index, &text)
                    .await;
                render_turn(result)
            }
            other => match self.apply(other) {
                Ok(text) => text,
                Err(error) => format!("error: {error}\n"),
            },
        }
    }

    fn apply(&mut self, command: Command) -> SessionResult<String> {
        let active = self.sessions.active_name().to_owned();
        let text = match command {
            Command::New(name) => {
                let name = self.sessions.create(name.as_deref(), None)?;
                format!("started {name}\n")
            }
            Command::Switch(name) => {
                self.sessions.switch(&name)?;
                format!("switched to {name}\n")
            }
            Command::Rename(to) => {
                self.sessions.rename(&active, &to)?;
                format!("renamed {active} to {}\n", to.trim())
            }
            Command::Delete(name) => {
                let name = name.unwrap_or(active);
                let now = self.sessions.delete(&name)?;
                format!("deleted {name}; active is {now}\n")
            }
            Command::List => {
                let mut text = String::new();
                for summary in self.sessions.list() {
                    let marker = if summary.active { '*' } else { ' ' };
                    let _ = writeln!(
                        text,
                        "{marker} {} ({}, {} messages, {} canon)",
                        summary.name, summary.mode, summary.turns, summary.canon
                    );
                }
                text
            }
            Command::Mode(mode) => {
                self.sessions.set_mode(&active, mode)?;
                format!("mode set to {mode}\n")
            }
            Command::ShowPersona => {
                let persona = &self.sessions.conversation(&active)?.persona;
                if persona.is_empty() {
                    "no persona set\n".to_owned()
                } else {
                    format!(
                        "who: {}\nrole: {}\nthemes: {}\nboundaries: {}\n",
                        persona.who, persona.role, persona.themes, persona.boundaries
                    )
                }
            }
            Command::ClearPersona => {
                self.sessions.set_persona(&active, Default::default())?;
                "persona cleared\n".to_owned()
            }
            Command::SetPersonaField { field, text } => {
                let mut persona = self.sessions.conversation(&active)?.persona.clone();
                let slot = match field {
                    PersonaField::Who => &mut persona.who,
                    PersonaField::Role => &mut persona.role,
                    PersonaField::Themes => &mut persona.themes,
                    PersonaField::Boundaries => &mut persona.boundaries,
                };
                *slot = text;
                self.sessions.set_persona(&active, persona)?;
                "persona updated\n".to_owned()
            }
            Command::Preset(None) => PERSONA_PRESETS
                .iter()
                .map(|preset| format!("{}: {}\n", preset.name, preset.who))
                .collect(),
            Command::Preset(Some(name)) => {
                let persona = self.sessions.apply_preset(&active, &name)?;
                format!("persona is now: {}\n", persona.who)
            }
            Command::Canon => {
                let canon = &self.sessions.conversation(&active)?.canon;
                if canon.is_empty() {
                    "canon is empty\n".to_owned()
                } else {
                    canon
                        .iter()
                        .enumerate()
                        .map(|(index, entry)| format!("[{index}] {entry}\n"))
                        .collect()
                }
            }
            Command::Pin(text) => {
                let entry = self.sessions.pin(&active, &text)?;
                format!("pinned: {entry}\n")
            }
            Command::PinMessage(index) => {
                let entry = self.sessions.pin_message(&active, index)?;
                format!("pinned: {entry}\n")
            }
            Command::Unpin(index) => {
                let entry = self.sessions.unpin(&active, index)?;
                format!("unpinned: {entry}\n")
            }
            Command::History => {
                let conversation = self.sessions.conversation(&active)?;
                let mut text = String::new();
                for (index, message) in conversation.messages.iter().enumerate() {
                    let who = match message.role {
                        ChatRole::System => continue,
                        ChatRole::User | ChatRole::UserDisplay => "you",
                        ChatRole::Assistant => "pilot",
                    };
                    let _ = writeln!(text, "[{index}] {who}: {}", message.typed_text());
                }
                if text.is_empty() {
                    text.push_str("no messages yet\n");
                }
                text
            }
            Command::Clear => {
                self.sessions.clear(&active)?;
                "conversation cleared\n".to_owned()
            }
            Command::Help => format!("{HELP}\n"),
            Command::Regenerate | Command::Edit { .. } | Command::Quit => String::new(),
        };
        Ok(text)
    }
}

fn render_turn<E: std::fmt::Display>(result: Result<TurnReply, E>) -> String {
    match result {
        Ok(reply) => format!("\n{}\n\n", reply.text),
        Err(error) => format!("error: {error}\n"),
    }
}
