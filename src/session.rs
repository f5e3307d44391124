use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    heuristics,
    markup::{self, MarkupOptions, ParsedInput},
    store::Store,
    types::{ChatMessage, ChatRole, Conversation, Mode, Persona},
};

const PIN_MAX_CHARS: usize = 280;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("conversation `{0}` does not exist")]
    NotFound(String),
    #[error("conversation `{0}` already exists")]
    AlreadyExists(String),
    #[error("conversation name must not be empty")]
    EmptyName,
    #[error("message {0} is not a user message")]
    NotAUserMessage(usize),
    #[error("message {0} does not exist")]
    MessageIndex(usize),
    #[error("there is no user turn to regenerate")]
    NothingToRegenerate,
    #[error("canon entry {0} does not exist")]
    CanonIndex(usize),
    #[error("canon entry must not be empty")]
    EmptyCanon,
    #[error("unknown persona preset `{0}`")]
    UnknownPreset(String),
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub name: String,
    pub mode: Mode,
    pub turns: usize,
    pub canon: usize,
    pub active: bool,
}

#[derive(Debug)]
pub struct SessionManager {
    store: Store,
    path: PathBuf,
}

impl SessionManager {
    pub fn open(path: impl Into<PathBuf>, default_mode: Mode) -> anyhow::Result<Self> {
        let path = path.into();
        let store = Store::load(&path, default_mode)?;
        info!(
            path = %path.display(),
            conversations = store.conversations.len(),
            active = %store.active,
            "session store loaded"
        );
        Ok(Self { store, path })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn active_name(&self) -> &str {
        &self.store.active
    }

    pub fn active(&self) -> SessionResult<&Conversation> {
        self.conversation(&self.store.active)
    }

    pub fn current_mode(&self) -> Mode {
        self.store
            .active_conversation()
            .map(|conversation| conversation.mode)
            .unwrap_or_default()
    }

    pub fn conversation(&self, name: &str) -> SessionResult<&Conversation> {
        self.store
            .conversations
            .get(name)
            .ok_or_else(|| SessionError::NotFound(name.to_owned()))
    }

    pub fn list(&self) -> Vec<ConversationSummary> {
        self.store
            .conversations
            .iter()
            .map(|(name, conversation)| ConversationSummary {
                name: name.clone(),
                mode: conversation.mode,
                turns: conversation
                    .messages
                    .iter()
                    .filter(|message| message.role != ChatRole::System)
                    .count(),
                canon: conversation.canon.len(),
                active: *name == self.store.active,
            })
            .collect()
    }

    pub fn create(&mut self, name: Option<&str>, mode: Option<Mode>) -> SessionResult<String> {
        let name = match name.map(str::trim) {
            Some("") => return Err(SessionError::EmptyName),
            Some(name) => name.to_owned(),
            None => self.store.next_free_name(),
        };
        if self.store.conversations.contains_key(&name) {
            return Err(SessionError::AlreadyExists(name));
        }

        let mode = mode.unwrap_or_else(|| self.current_mode());
        self.store
            .conversations
            .insert(name.clone(), Conversation::new(mode));
        self.store.active = name.clone();
        self.persist()?;
        info!(conversation = %name, %mode, "conversation created");
        Ok(name)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        let to = to.trim();
        if to.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if from == to {
            return self.conversation(from).map(|_| ());
        }
        if self.store.conversations.contains_key(to) {
            return Err(SessionError::AlreadyExists(to.to_owned()));
        }
        let conversation = self
            .store
            .conversations
            .remove(from)
            .ok_or_else(|| SessionError::NotFound(from.to_owned()))?;
        self.store.conversations.insert(to.to_owned(), conversation);
        if self.store.active == from {
            self.store.active = to.to_owned();
        }
        self.persist()?;
        info!(from, to, "conversation renamed");
        Ok(())
    }

    /// Deleting the last conversation leaves a fresh one in the current mode.
    pub fn delete(&mut self, name: &str) -> SessionResult<String> {
        let mode = self.current_mode();
        self.store
            .conversations
            .remove(name)
            .ok_or_else(|| SessionError::NotFound(name.to_owned()))?;

        if self.store.conversations.is_empty() {
            let fresh = self.store.next_free_name();
            self.store
                .conversations
                .insert(fresh.clone(), Conversation::new(mode));
            self.store.active = fresh;
        } else if self.store.active == name {
            if let Some(first) = self.store.conversations.keys().next() {
                self.store.active = first.clone();
            }
        }

        self.persist()?;
        info!(conversation = %name, active = %self.store.active, "conversation deleted");
        Ok(self.store.active.clone())
    }

    pub fn switch(&mut self, name: &str) -> SessionResult<()> {
        self.conversation(name)?;
        if self.store.active != name {
            self.store.active = name.to_owned();
            self.persist()?;
            debug!(conversation = %name, "active conversation switched");
        }
        Ok(())
    }

    pub fn set_mode(&mut self, name: &str, mode: Mode) -> SessionResult<()> {
        self.conversation_mut(name)?.set_mode(mode);
        self.persist()?;
        Ok(())
    }

    pub fn set_persona(&mut self, name: &str, persona: Persona) -> SessionResult<()> {
        self.conversation_mut(name)?.persona = persona;
        self.persist()?;
        Ok(())
    }

    pub fn apply_preset(&mut self, name: &str, preset: &str) -> SessionResult<Persona> {
        let persona = heuristics::find_preset(preset)
            .ok_or_else(|| SessionError::UnknownPreset(preset.to_owned()))?
            .to_persona();
        self.set_persona(name, persona.clone())?;
        Ok(persona)
    }

    pub fn pin(&mut self, name: &str, text: &str) -> SessionResult<String> {
        let entry = pin_excerpt(text);
        if entry.is_empty() {
            return Err(SessionError::EmptyCanon);
        }
        let conversation = self.conversation_mut(name)?;
        if !conversation.canon.contains(&entry) {
            conversation.canon.push(entry.clone());
        }
        self.persist()?;
        Ok(entry)
    }

    pub fn pin_message(&mut self, name: &str, index: usize) -> SessionResult<String> {
        let text = self
            .conversation(name)?
            .messages
            .get(index)
            .filter(|message| message.role != ChatRole::System)
            .map(|message| message.content.clone())
            .ok_or(SessionError::MessageIndex(index))?;
        self.pin(name, &text)
    }

    pub fn unpin(&mut self, name: &str, index: usize) -> SessionResult<String> {
        let conversation = self.conversation_mut(name)?;
        if index >= conversation.canon.len() {
            return Err(SessionError::CanonIndex(index));
        }
        let removed = conversation.canon.remove(index);
        self.persist()?;
        Ok(removed)
    }

    pub fn clear(&mut self, name: &str) -> SessionResult<()> {
        let conversation = self.conversation_mut(name)?;
        conversation.ensure_baseline();
        conversation.messages.truncate(1);
        self.persist()?;
        Ok(())
    }

    /// Appends the user's turn and returns the conversation as it stood before it.
    pub fn append_user_turn(
        &mut self,
        name: &str,
        parsed: &ParsedInput,
    ) -> SessionResult<Conversation> {
        let conversation = self.conversation_mut(name)?;
        let before = conversation.clone();
        conversation.messages.push(user_message(parsed));
        self.persist()?;
        Ok(before)
    }

    pub fn edit_snapshot(&self, name: &str, index: usize) -> SessionResult<Conversation> {
        let conversation = self.conversation(name)?;
        match conversation.messages.get(index) {
            Some(message) if message.is_user_turn() => {}
            Some(_) => return Err(SessionError::NotAUserMessage(index)),
            None => return Err(SessionError::MessageIndex(index)),
        }
        let mut before = conversation.clone();
        before.messages.truncate(index);
        Ok(before)
    }

    /// History before the last user turn, plus that turn re-parsed. The store
    /// is left untouched until `replace_reply`.
    pub fn regenerate_snapshot(
        &self,
        name: &str,
        options: MarkupOptions,
    ) -> SessionResult<(Conversation, ParsedInput)> {
        let conversation = self.conversation(name)?;
        let index = conversation
            .messages
            .iter()
            .rposition(ChatMessage::is_user_turn)
            .ok_or(SessionError::NothingToRegenerate)?;

        let parsed = markup::parse(conversation.messages[index].typed_text(), options);
        let mut before = conversation.clone();
        before.messages.truncate(index);
        Ok((before, parsed))
    }

    pub fn replace_user_turn(
        &mut self,
        name: &str,
        index: usize,
        parsed: &ParsedInput,
        reply: &str,
    ) -> SessionResult<()> {
        self.edit_snapshot(name, index)?;
        let messages = &mut self.conversation_mut(name)?.messages;
        messages.truncate(index);
        messages.push(user_message(parsed));
        messages.push(ChatMessage::assistant(reply));
        self.persist()?;
        Ok(())
    }

    pub fn replace_reply(&mut self, name: &str, user_index: usize, reply: &str) -> SessionResult<()> {
        let messages = &mut self.conversation_mut(name)?.messages;
        if !messages.get(user_index).is_some_and(ChatMessage::is_user_turn) {
            return Err(SessionError::NotAUserMessage(user_index));
        }
        messages.truncate(user_index + 1);
        messages.push(ChatMessage::assistant(reply));
        self.persist()?;
        Ok(())
    }

    pub fn record_reply(&mut self, name: &str, text: &str) -> SessionResult<()> {
        self.conversation_mut(name)?
            .messages
            .push(ChatMessage::assistant(text));
        self.persist()?;
        Ok(())
    }

    fn conversation_mut(&mut self, name: &str) -> SessionResult<&mut Conversation> {
        self.store
            .conversations
            .get_mut(name)
            .ok_or_else(|| SessionError::NotFound(name.to_owned()))
    }

    fn persist(&self) -> SessionResult<()> {
        self.store.save(&self.path)?;
        Ok(())
    }
}

fn user_message(parsed: &ParsedInput) -> ChatMessage {
    if parsed.cleaned.is_empty() && parsed.has_hidden_content() {
        let mut message = ChatMessage::new(ChatRole::UserDisplay, parsed.raw.clone());
        message.directives = parsed.directives.clone();
        return message;
    }

    let mut message = ChatMessage::new(ChatRole::User, parsed.cleaned.clone());
    if parsed.raw.trim() != parsed.cleaned {
        message.raw = Some(parsed.raw.clone());
        message.cleaned = Some(parsed.cleaned.clone());
    }
    message.directives = parsed.directives.clone();
    message
}

fn pin_excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= PIN_MAX_CHARS {
        return text.to_owned();
    }
    let head = text.chars().take(PIN_MAX_CHARS).collect::<String>();
    let cut = head.rfind(char::is_whitespace).unwrap_or(head.len());
    format!("{}...", head[..cut].trim_end())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::{
        heuristics,
        markup::{self, MarkupOptions},
        store::Store,
        types::{ChatRole, Mode, Persona},
    };

    use super::{SessionError, SessionManager};

    fn manager() -> (TempDir, SessionManager) {
        let dir = tempfile::tempdir().expect("temp dir");
        let manager =
            SessionManager::open(dir.path().join("sessions.json"), Mode::Story).expect("open");
        (dir, manager)
    }

    fn parsed(raw: &str) -> markup::ParsedInput {
        markup::parse(raw, MarkupOptions::default())
    }

    #[test]
    fn create_and_switch_leave_other_conversations_untouched() {
        let (_dir, mut sessions) = manager();
        sessions
            .append_user_turn("Chat 1", &parsed("hello"))
            .expect("append");
        sessions.pin("Chat 1", "The moon is red").expect("pin");
        sessions
            .set_persona(
                "Chat 1",
                Persona {
                    who: "Guide".into(),
                    ..Persona::default()
                },
            )
            .expect("persona");
        let snapshot = sessions.conversation("Chat 1").expect("chat 1").clone();

        let created = sessions.create(Some("Second"), Some(Mode::Chat)).expect("create");
        assert_eq!(created, "Second");
        assert_eq!(sessions.active_name(), "Second");
        sessions.switch("Chat 1").expect("switch back");
        sessions.switch("Second").expect("switch again");

        assert_eq!(sessions.conversation("Chat 1").expect("chat 1"), &snapshot);
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let (_dir, mut sessions) = manager();
        assert!(matches!(
            sessions.create(Some("Chat 1"), None),
            Err(SessionError::AlreadyExists(_))
        ));
        assert!(matches!(sessions.create(Some("  "), None), Err(SessionError::EmptyName)));
        assert_eq!(sessions.create(None, None).expect("auto name"), "Chat 2");
    }

    #[test]
    fn rename_moves_active_pointer() {
        let (_dir, mut sessions) = manager();
        sessions.rename("Chat 1", "Harbour").expect("rename");
        assert_eq!(sessions.active_name(), "Harbour");
        assert!(matches!(
            sessions.conversation("Chat 1"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_only_conversation_leaves_fresh_one_in_current_mode() {
        let (_dir, mut sessions) = manager();
        sessions.set_mode("Chat 1", Mode::Chat).expect("mode");
        sessions
            .append_user_turn("Chat 1", &parsed("hello"))
            .expect("append");

        let active = sessions.delete("Chat 1").expect("delete");
        let store = sessions.store();
        assert_eq!(store.conversations.len(), 1);
        let fresh = &store.conversations[&active];
        assert_eq!(fresh.mode, Mode::Chat);
        assert_eq!(fresh.messages.len(), 1);
        assert_eq!(fresh.messages[0].role, ChatRole::System);
        assert_eq!(fresh.messages[0].content, heuristics::baseline_prompt(Mode::Chat));
    }

    #[test]
    fn deleting_active_conversation_activates_another() {
        let (_dir, mut sessions) = manager();
        sessions.create(Some("B"), None).expect("create");
        let active = sessions.delete("B").expect("delete");
        assert_eq!(active, "Chat 1");
    }

    #[test]
    fn every_mutation_is_persisted() {
        let (dir, mut sessions) = manager();
        sessions.create(Some("Keep"), Some(Mode::Chat)).expect("create");
        sessions.pin("Keep", "A fact").expect("pin");

        let reloaded =
            Store::load(&dir.path().join("sessions.json"), Mode::Story).expect("reload");
        assert_eq!(reloaded.active, "Keep");
        assert_eq!(reloaded.conversations["Keep"].canon, vec!["A fact"]);
    }

    #[test]
    fn user_turns_keep_raw_text_and_directives() {
        let (_dir, mut sessions) = manager();
        sessions
            .append_user_turn("Chat 1", &parsed("Open the door [make it creak]"))
            .expect("append");
        sessions
            .append_user_turn("Chat 1", &parsed("[thunder outside]"))
            .expect("append directive only");

        let messages = &sessions.conversation("Chat 1").expect("chat").messages;
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].content, "Open the door");
        assert_eq!(messages[1].raw.as_deref(), Some("Open the door [make it creak]"));
        assert_eq!(messages[1].directives, vec!["make it creak"]);
        assert_eq!(messages[2].role, ChatRole::UserDisplay);
        assert_eq!(messages[2].content, "[thunder outside]");
    }

    #[test]
    fn edit_snapshot_leaves_store_alone_until_replace() {
        let (_dir, mut sessions) = manager();
        sessions.append_user_turn("Chat 1", &parsed("one")).expect("append");
        sessions.record_reply("Chat 1", "reply one").expect("reply");
        sessions.append_user_turn("Chat 1", &parsed("two")).expect("append");
        sessions.record_reply("Chat 1", "reply two").expect("reply");

        assert!(matches!(
            sessions.edit_snapshot("Chat 1", 2),
            Err(SessionError::NotAUserMessage(2))
        ));
        assert!(matches!(
            sessions.edit_snapshot("Chat 1", 9),
            Err(SessionError::MessageIndex(9))
        ));

        let before = sessions.edit_snapshot("Chat 1", 1).expect("snapshot");
        assert_eq!(before.messages.len(), 1);
        assert_eq!(sessions.conversation("Chat 1").expect("chat").messages.len(), 5);

        sessions
            .replace_user_turn("Chat 1", 1, &parsed("uno"), "reply uno")
            .expect("replace");
        let contents = sessions
            .conversation("Chat 1")
            .expect("chat")
            .messages
            .iter()
            .skip(1)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["uno", "reply uno"]);
    }

    #[test]
    fn regenerate_snapshot_then_replace_reply() {
        let (_dir, mut sessions) = manager();
        assert!(matches!(
            sessions.regenerate_snapshot("Chat 1", MarkupOptions::default()),
            Err(SessionError::NothingToRegenerate)
        ));

        sessions
            .append_user_turn("Chat 1", &parsed("look [mention owls]"))
            .expect("append");
        sessions.record_reply("Chat 1", "first take").expect("reply");

        let (before, input) = sessions
            .regenerate_snapshot("Chat 1", MarkupOptions::default())
            .expect("snapshot");
        assert_eq!(before.messages.len(), 1);
        assert_eq!(input.directives, vec!["mention owls"]);
        assert_eq!(input.cleaned, "look");
        assert_eq!(sessions.conversation("Chat 1").expect("chat").messages.len(), 3);

        assert!(matches!(
            sessions.replace_reply("Chat 1", 2, "nope"),
            Err(SessionError::NotAUserMessage(2))
        ));
        sessions.replace_reply("Chat 1", 1, "second take").expect("replace");
        let messages = &sessions.conversation("Chat 1").expect("chat").messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "second take");
    }

    #[test]
    fn canon_pin_and_unpin() {
        let (_dir, mut sessions) = manager();
        sessions.record_reply("Chat 1", "The tower fell at dawn.").expect("reply");
        let pinned = sessions.pin_message("Chat 1", 1).expect("pin message");
        assert_eq!(pinned, "The tower fell at dawn.");
        assert!(matches!(
            sessions.pin_message("Chat 1", 0),
            Err(SessionError::MessageIndex(0))
        ));
        assert!(matches!(sessions.pin("Chat 1", "   "), Err(SessionError::EmptyCanon)));

        let removed = sessions.unpin("Chat 1", 0).expect("unpin");
        assert_eq!(removed, "The tower fell at dawn.");
        assert!(matches!(sessions.unpin("Chat 1", 0), Err(SessionError::CanonIndex(0))));
    }

    #[test]
    fn long_pins_are_shortened_on_a_word() {
        let (_dir, mut sessions) = manager();
        let long = "word ".repeat(100);
        let pinned = sessions.pin("Chat 1", &long).expect("pin");
        assert!(pinned.ends_with("word..."));
        assert!(pinned.chars().count() <= super::PIN_MAX_CHARS + 3);
    }

    #[test]
    fn presets_fill_persona() {
        let (_dir, mut sessions) = manager();
        let persona = sessions.apply_preset("Chat 1", "narrator").expect("preset");
        assert_eq!(sessions.conversation("Chat 1").expect("chat").persona, persona);
        assert!(matches!(
            sessions.apply_preset("Chat 1", "pirate"),
            Err(SessionError::UnknownPreset(_))
        ));
    }

    #[test]
    fn clear_keeps_only_baseline() {
        let (_dir, mut sessions) = manager();
        sessions.append_user_turn("Chat 1", &parsed("hi")).expect("append");
        sessions.clear("Chat 1").expect("clear");
        let conversation = sessions.conversation("Chat 1").expect("chat");
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, ChatRole::System);
    }
}
