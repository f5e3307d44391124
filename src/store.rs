use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::types::{Conversation, Mode};

pub const SCHEMA_VERSION: u64 = 2;
const DEFAULT_NAME_PREFIX: &str = "Chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub schema_version: u64,
    pub active: String,
    pub conversations: BTreeMap<String, Conversation>,
}

impl Store {
    pub fn fresh(mode: Mode) -> Self {
        let name = format!("{DEFAULT_NAME_PREFIX} 1");
        let mut conversations = BTreeMap::new();
        conversations.insert(name.clone(), Conversation::new(mode));
        Self {
            schema_version: SCHEMA_VERSION,
            active: name,
            conversations,
        }
    }

    /// Reads the store, migrating legacy shapes. A missing file yields a fresh
    /// store; an unreadable document is moved aside and replaced.
    pub fn load(path: &Path, default_mode: Mode) -> anyhow::Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no session store yet; starting fresh");
                return Ok(Self::fresh(default_mode));
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read session store {}", path.display()));
            }
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(anyhow::Error::from)
            .and_then(|value| Self::from_value(value, default_mode));

        match parsed {
            Ok(store) => Ok(store),
            Err(error) => {
                let backup = corrupt_backup_path(path);
                fs::rename(path, &backup).with_context(|| {
                    format!("failed to move corrupt store to {}", backup.display())
                })?;
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    %error,
                    "session store unreadable; moved aside and starting fresh"
                );
                Ok(Self::fresh(default_mode))
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let encoded = serde_json::to_string_pretty(self)?;
        let temp = temp_path(path);
        fs::write(&temp, encoded).with_context(|| format!("failed to write {}", temp.display()))?;
        fs::rename(&temp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn from_value(value: Value, default_mode: Mode) -> anyhow::Result<Self> {
        let mut version = stored_version(&value)?;
        let mut value = value;

        while version < SCHEMA_VERSION {
            value = match version {
                0 => migrate_v0_to_v1(value),
                1 => migrate_v1_to_v2(value, default_mode)?,
                other => anyhow::bail!("no migration from schema version {other}"),
            };
            version += 1;
        }

        if version > SCHEMA_VERSION {
            anyhow::bail!("session store schema {version} is newer than supported {SCHEMA_VERSION}");
        }

        let mut store = serde_json::from_value::<Store>(value)?;
        store.normalize(default_mode);
        Ok(store)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.conversations.get(&self.active)
    }

    pub fn next_free_name(&self) -> String {
        (1..)
            .map(|index| format!("{DEFAULT_NAME_PREFIX} {index}"))
            .find(|name| !self.conversations.contains_key(name))
            .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_owned())
    }

    fn normalize(&mut self, default_mode: Mode) {
        self.schema_version = SCHEMA_VERSION;
        for conversation in self.conversations.values_mut() {
            conversation.ensure_baseline();
        }
        if self.conversations.is_empty() {
            *self = Self::fresh(default_mode);
            return;
        }
        if !self.conversations.contains_key(&self.active) {
            if let Some(first) = self.conversations.keys().next() {
                self.active = first.clone();
            }
        }
    }
}

// Version 0 is a bare message list, version 1 a name-keyed map; neither
// carried a version field.
fn stored_version(value: &Value) -> anyhow::Result<u64> {
    match value {
        Value::Array(_) => Ok(0),
        Value::Object(map) => match map.get("schema_version") {
            Some(version) => version
                .as_u64()
                .ok_or_else(|| anyhow::anyhow!("schema_version must be an integer")),
            None => Ok(1),
        },
        _ => anyhow::bail!("session store must be a JSON object or list"),
    }
}

fn migrate_v0_to_v1(value: Value) -> Value {
    let mut entries = Map::new();
    entries.insert(
        format!("{DEFAULT_NAME_PREFIX} 1"),
        json!({ "messages": value }),
    );
    Value::Object(entries)
}

fn migrate_v1_to_v2(value: Value, default_mode: Mode) -> anyhow::Result<Value> {
    let Value::Object(entries) = value else {
        anyhow::bail!("version 1 store must be an object");
    };

    let mut conversations = Map::new();
    for (name, entry) in entries {
        let mut conversation = match entry {
            Value::Array(messages) => {
                let mut conversation = Map::new();
                conversation.insert("messages".to_owned(), Value::Array(messages));
                conversation
            }
            Value::Object(conversation) => conversation,
            _ => anyhow::bail!("conversation {name} has an unsupported shape"),
        };
        conversation
            .entry("mode")
            .or_insert_with(|| Value::String(default_mode.as_str().to_owned()));
        conversations.insert(name, Value::Object(conversation));
    }

    let active = conversations.keys().next().cloned().unwrap_or_default();
    Ok(json!({
        "schema_version": 2,
        "active": active,
        "conversations": conversations,
    }))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}
