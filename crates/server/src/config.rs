use std::{fs, path::Path};

use serde::Deserialize;
use tracing::warn;

const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Name of the cookie carrying the session token.
    pub session_cookie: String,
    pub cookie_secure: bool,
    /// Frames queued per live connection before pushes count as backpressure.
    pub outbound_buffer: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/chat.db".into(),
            session_cookie: "session".into(),
            cookie_secure: false,
            outbound_buffer: 64,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    session_cookie: Option<String>,
    cookie_secure: Option<bool>,
    outbound_buffer: Option<usize>,
    log_filter: Option<String>,
}

/// Defaults, then `server.toml` in the working directory, then environment.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

pub(crate) fn load_settings_from(
    config_path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(error) => warn!(path = %config_path.display(), %error, "ignoring unreadable config file"),
        }
    }

    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = env(key) {
            settings.database_url = v;
        }
    }
    if let Some(v) = env("APP__SESSION_COOKIE").filter(|v| !v.trim().is_empty()) {
        settings.session_cookie = v;
    }
    if let Some(v) = env("APP__COOKIE_SECURE") {
        match v.parse::<bool>() {
            Ok(parsed) => settings.cookie_secure = parsed,
            Err(_) => warn!(value = %v, "APP__COOKIE_SECURE is not a bool; keeping {}", settings.cookie_secure),
        }
    }
    if let Some(v) = env("APP__OUTBOUND_BUFFER") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.outbound_buffer = parsed,
            _ => warn!(value = %v, "APP__OUTBOUND_BUFFER must be a positive integer; keeping {}", settings.outbound_buffer),
        }
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.session_cookie {
        settings.session_cookie = v;
    }
    if let Some(v) = file_cfg.cookie_secure {
        settings.cookie_secure = v;
    }
    if let Some(v) = file_cfg.outbound_buffer.filter(|v| *v > 0) {
        settings.outbound_buffer = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
}

/// Turns a configured path or URL into an sqlx SQLite URL. The parent
/// directory is created later, when storage opens the database.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    normalize_database_url(raw_database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if has_windows_drive(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url)
        .replace('\\', "/");
    if has_windows_drive(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'/' | b'\\')
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
