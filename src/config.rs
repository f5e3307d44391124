use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{model::DEFAULT_BASE_URL, types::Mode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required secret {0} is not set")]
    MissingSecret(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenRouter,
    Mock,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: SocketAddr,
    pub model_provider: ProviderKind,
    pub openrouter_api_key: String,
    pub openrouter_referer: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    pub openrouter_title: Option<String>,
    pub store_path: PathBuf,
    pub default_mode: Mode,
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
    pub heuristics_path: Option<PathBuf>,
    pub parse_actions: bool,
    pub parse_whispers: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let port = var("PORT").unwrap_or_else(|| "8080".to_owned());
        let raw_bind = var("HTTP_BIND").unwrap_or_else(|| format!("127.0.0.1:{port}"));
        let http_bind: SocketAddr = raw_bind
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "HTTP_BIND",
                value: raw_bind.clone(),
            })?;

        let model_provider = match var("MODEL_PROVIDER")
            .unwrap_or_else(|| "openrouter".to_owned())
            .to_ascii_lowercase()
            .as_str()
        {
            "openrouter" | "auto" => ProviderKind::OpenRouter,
            "mock" => ProviderKind::Mock,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "MODEL_PROVIDER",
                    value: other.to_owned(),
                });
            }
        };

        let (openrouter_api_key, openrouter_referer) = match model_provider {
            ProviderKind::OpenRouter => (
                var("OPENROUTER_API_KEY").ok_or(ConfigError::MissingSecret("OPENROUTER_API_KEY"))?,
                var("OPENROUTER_REFERER").ok_or(ConfigError::MissingSecret("OPENROUTER_REFERER"))?,
            ),
            ProviderKind::Mock => (
                var("OPENROUTER_API_KEY").unwrap_or_default(),
                var("OPENROUTER_REFERER").unwrap_or_default(),
            ),
        };

        let default_mode = match var("SCENEPILOT_MODE") {
            Some(raw) => Mode::parse(&raw).ok_or(ConfigError::InvalidValue {
                name: "SCENEPILOT_MODE",
                value: raw,
            })?,
            None => Mode::Story,
        };

        Ok(Self {
            http_bind,
            model_provider,
            openrouter_api_key,
            openrouter_referer,
            openrouter_model: var("OPENROUTER_MODEL")
                .unwrap_or_else(|| "openai/gpt-4o-mini".to_owned()),
            openrouter_base_url: var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            openrouter_title: var("OPENROUTER_TITLE"),
            store_path: var("SCENEPILOT_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("scenepilot_sessions.json")),
            default_mode,
            temperature: parse_or(&var, "SCENEPILOT_TEMPERATURE", 0.9)?,
            retry_temperature: parse_or(&var, "SCENEPILOT_RETRY_TEMPERATURE", 0.5)?,
            max_tokens: var("SCENEPILOT_MAX_TOKENS")
                .map(|raw| {
                    raw.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                        name: "SCENEPILOT_MAX_TOKENS",
                        value: raw.clone(),
                    })
                })
                .transpose()?,
            request_timeout: Duration::from_secs(parse_or(&var, "SCENEPILOT_TIMEOUT_SEC", 60u64)?),
            heuristics_path: var("SCENEPILOT_HEURISTICS").map(PathBuf::from),
            parse_actions: flag_or(&var, "SCENEPILOT_ACTIONS", true),
            parse_whispers: flag_or(&var, "SCENEPILOT_WHISPERS", true),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn flag_or(var: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    var(name)
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use crate::types::Mode;

    use super::{AppConfig, ConfigError, ProviderKind};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let error = AppConfig::from_lookup(lookup(&[("OPENROUTER_REFERER", "https://x")]))
            .expect_err("api key is required");
        assert_eq!(error, ConfigError::MissingSecret("OPENROUTER_API_KEY"));
    }

    #[test]
    fn missing_referer_is_fatal() {
        let error = AppConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "k")]))
            .expect_err("referer is required");
        assert_eq!(error, ConfigError::MissingSecret("OPENROUTER_REFERER"));
    }

    #[test]
    fn defaults_apply_when_secrets_present() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "k"),
            ("OPENROUTER_REFERER", "https://x"),
        ]))
        .expect("config loads");

        assert_eq!(config.model_provider, ProviderKind::OpenRouter);
        assert_eq!(config.default_mode, Mode::Story);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_tokens, None);
        assert!(config.parse_actions);
        assert_eq!(config.http_bind.port(), 8080);
    }

    #[test]
    fn mock_provider_makes_secrets_optional() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MODEL_PROVIDER", "mock"),
            ("SCENEPILOT_MODE", "Chat"),
            ("SCENEPILOT_MAX_TOKENS", "300"),
            ("SCENEPILOT_WHISPERS", "off"),
        ]))
        .expect("mock config loads");

        assert_eq!(config.model_provider, ProviderKind::Mock);
        assert_eq!(config.default_mode, Mode::Chat);
        assert_eq!(config.max_tokens, Some(300));
        assert!(!config.parse_whispers);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let error = AppConfig::from_lookup(lookup(&[
            ("MODEL_PROVIDER", "mock"),
            ("SCENEPILOT_TEMPERATURE", "warm"),
        ]))
        .expect_err("temperature must parse");
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "SCENEPILOT_TEMPERATURE",
                value: "warm".to_owned()
            }
        );
    }
}
