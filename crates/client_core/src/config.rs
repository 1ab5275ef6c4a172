use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

const DEFAULT_SETTINGS_FILE: &str = "expenses.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base of the expense API, e.g. `http://127.0.0.1:3000/api`.
    pub api_base_url: String,
    /// Raw `Cookie` header value issued by the identity provider's callback.
    pub session_cookie: Option<String>,
    pub stale_after: Duration,
    pub refresh_retries: u32,
    pub serialize_mutations: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000/api".into(),
            session_cookie: None,
            stale_after: Duration::from_secs(5),
            refresh_retries: 1,
            serialize_mutations: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    session_cookie: Option<String>,
    stale_after_ms: Option<u64>,
    refresh_retries: Option<u32>,
    serialize_mutations: Option<bool>,
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

/// Defaults, then the TOML file at `path` if it exists, then environment.
pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring unparsable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.session_cookie {
        settings.session_cookie = Some(v);
    }
    if let Some(v) = file_cfg.stale_after_ms {
        settings.stale_after = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.refresh_retries {
        settings.refresh_retries = v;
    }
    if let Some(v) = file_cfg.serialize_mutations {
        settings.serialize_mutations = v;
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("EXPENSES_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("APP__API_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = var("EXPENSES_SESSION_COOKIE") {
        settings.session_cookie = Some(v);
    }
    if let Some(v) = var("APP__SESSION_COOKIE") {
        settings.session_cookie = Some(v);
    }

    if let Some(v) = var("APP__STALE_AFTER_MS") {
        match v.parse::<u64>() {
            Ok(ms) => settings.stale_after = Duration::from_millis(ms),
            Err(err) => warn!(value = %v, error = %err, "invalid APP__STALE_AFTER_MS"),
        }
    }

    if let Some(v) = var("APP__REFRESH_RETRIES") {
        match v.parse::<u32>() {
            Ok(n) => settings.refresh_retries = n,
            Err(err) => warn!(value = %v, error = %err, "invalid APP__REFRESH_RETRIES"),
        }
    }

    if let Some(v) = var("APP__SERIALIZE_MUTATIONS") {
        match v.parse::<bool>() {
            Ok(flag) => settings.serialize_mutations = flag,
            Err(err) => warn!(value = %v, error = %err, "invalid APP__SERIALIZE_MUTATIONS"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
