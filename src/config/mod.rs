//! Configuration management.
//!
//! Runtime configuration is resolved with the precedence
//! CLI flag > environment variable > `settings` row > built-in default.

mod settings;

pub use settings::{Settings, SettingsError};

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

use crate::relay::anthropic::{AnthropicConfig, DEFAULT_MODEL};
use crate::session::FailurePolicy;

/// Default address for `offshoot serve`.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Values given on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub model: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub upstream: AnthropicConfig,
    pub default_model: String,
    /// Hard wall-clock cap on one generation; `None` leaves it to the transport.
    pub generation_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub persist_failed_turns: bool,
}

impl AppConfig {
    /// Resolve from the process environment and stored settings.
    pub fn resolve(settings: &Settings<'_>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        Self::resolve_with(settings, overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with(
        settings: &Settings<'_>,
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let bind = overrides
            .bind
            .clone()
            .or_else(|| env("OFFSHOOT_BIND"))
            .unwrap_or_else(|| settings.get_or("bind", DEFAULT_BIND));
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", bind))?;

        let default_model = overrides
            .model
            .clone()
            .or_else(|| env("OFFSHOOT_MODEL"))
            .unwrap_or_else(|| settings.get_or("model", DEFAULT_MODEL));

        let defaults = AnthropicConfig::default();
        let max_tokens = match settings.get_u64("max_tokens")? {
            Some(n) => u32::try_from(n).context("max_tokens out of range")?,
            None => defaults.max_tokens,
        };
        let upstream = AnthropicConfig {
            api_key: env("ANTHROPIC_API_KEY"),
            base_url: env("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
            max_tokens,
            system_prompt: settings.get_or("system_prompt", &defaults.system_prompt),
        };

        let timeout_secs = match env("OFFSHOOT_GENERATION_TIMEOUT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid OFFSHOOT_GENERATION_TIMEOUT: {}", raw))?,
            ),
            None => settings.get_u64("generation_timeout_secs")?,
        };
        let generation_timeout = timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let failure_policy = match settings.get("failure_policy")? {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            None => FailurePolicy::default(),
        };

        Ok(Self {
            bind,
            upstream,
            default_model,
            generation_timeout,
            failure_policy,
            persist_failed_turns: settings.get_bool("persist_failed_turns")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::collections::HashMap;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let db = setup_db();
        let config =
            AppConfig::resolve_with(&Settings::new(&db), &ConfigOverrides::default(), env_from(&[]))
                .unwrap();

        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.upstream.max_tokens, 4096);
        assert!(config.upstream.api_key.is_none());
        assert!(config.generation_timeout.is_none());
        assert_eq!(config.failure_policy, FailurePolicy::ReplaceWithApology);
        assert!(!config.persist_failed_turns);
    }

    #[test]
    fn precedence_flag_over_env_over_setting() {
        let db = setup_db();
        let settings = Settings::new(&db);
        settings.set("model", "from-setting").unwrap();

        let env = env_from(&[("OFFSHOOT_MODEL", "from-env")]);
        let config = AppConfig::resolve_with(&settings, &ConfigOverrides::default(), &env).unwrap();
        assert_eq!(config.default_model, "from-env");

        let overrides = ConfigOverrides {
            model: Some("from-flag".into()),
            ..Default::default()
        };
        let config = AppConfig::resolve_with(&settings, &overrides, &env).unwrap();
        assert_eq!(config.default_model, "from-flag");

        let config =
            AppConfig::resolve_with(&settings, &ConfigOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(config.default_model, "from-setting");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let db = setup_db();
        let config = AppConfig::resolve_with(
            &Settings::new(&db),
            &ConfigOverrides::default(),
            env_from(&[("ANTHROPIC_API_KEY", "  ")]),
        )
        .unwrap();
        assert!(config.upstream.api_key.is_none());
    }

    #[test]
    fn generation_timeout_from_env_or_setting() {
        let db = setup_db();
        let settings = Settings::new(&db);
        settings.set("generation_timeout_secs", "90").unwrap();

        let config =
            AppConfig::resolve_with(&settings, &ConfigOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(90)));

        let config = AppConfig::resolve_with(
            &settings,
            &ConfigOverrides::default(),
            env_from(&[("OFFSHOOT_GENERATION_TIMEOUT", "0")]),
        )
        .unwrap();
        assert!(config.generation_timeout.is_none(), "zero disables the cap");
    }

    #[test]
    fn failure_policy_and_persistence_from_settings() {
        let db = setup_db();
        let settings = Settings::new(&db);
        settings.set("failure_policy", "keep_partial").unwrap();
        settings.set("persist_failed_turns", "true").unwrap();

        let config =
            AppConfig::resolve_with(&settings, &ConfigOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::KeepPartial);
        assert!(config.persist_failed_turns);
    }

    #[test]
    fn invalid_values_are_reported() {
        let db = setup_db();
        let settings = Settings::new(&db);

        let overrides = ConfigOverrides {
            bind: Some("not an address".into()),
            ..Default::default()
        };
        assert!(AppConfig::resolve_with(&settings, &overrides, env_from(&[])).is_err());

        settings.set("failure_policy", "shrug").unwrap();
        assert!(
            AppConfig::resolve_with(&settings, &ConfigOverrides::default(), env_from(&[])).is_err()
        );
    }
}
