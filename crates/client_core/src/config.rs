use std::{fs, path::Path, time::Duration};

use tracing::warn;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const SETTINGS_KEYS: &[&str] = &[
    "server_url",
    "database_url",
    "request_timeout_ms",
    "upload_timeout_ms",
    "cache_ttl_ms",
    "ws_connect_timeout_ms",
    "reconnect_delay_ms",
    "ws_auth",
];

/// How the realtime socket presents the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsAuthMode {
    /// `?token=` on the upgrade request.
    #[default]
    QueryToken,
    /// `{"type":"auth","token":...}` sent right after the socket opens.
    AuthFrame,
}

impl WsAuthMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "query" | "query_token" => Some(WsAuthMode::QueryToken),
            "frame" | "auth_frame" => Some(WsAuthMode::AuthFrame),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: Option<String>,
    pub database_url: String,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub cache_ttl: Duration,
    pub ws_connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ws_auth: WsAuthMode,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            database_url: "sqlite://./data/client.db".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            ws_connect_timeout: DEFAULT_WS_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ws_auth: WsAuthMode::default(),
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then `APP__*` variables.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<toml::Table>(&raw) {
            Ok(table) => {
                for (key, value) in &table {
                    let value = match value {
                        toml::Value::String(text) => text.clone(),
                        toml::Value::Integer(number) => number.to_string(),
                        other => other.to_string(),
                    };
                    apply_setting(&mut settings, key, &value);
                }
            }
            Err(err) => warn!(path = %path.display(), "ignoring unreadable settings file: {err}"),
        }
    }

    for key in SETTINGS_KEYS {
        let env_key = format!("APP__{}", key.to_ascii_uppercase());
        if let Some(value) = env(&env_key) {
            apply_setting(&mut settings, key, &value);
        }
    }

    settings
}

fn apply_setting(settings: &mut ClientSettings, key: &str, value: &str) {
    let applied = match key {
        "server_url" => {
            settings.server_url = Some(value.trim().trim_end_matches('/').to_string());
            true
        }
        "database_url" => {
            settings.database_url = value.trim().to_string();
            true
        }
        "request_timeout_ms" => set_millis(&mut settings.request_timeout, value),
        "upload_timeout_ms" => set_millis(&mut settings.upload_timeout, value),
        "cache_ttl_ms" => set_millis(&mut settings.cache_ttl, value),
        "ws_connect_timeout_ms" => set_millis(&mut settings.ws_connect_timeout, value),
        "reconnect_delay_ms" => set_millis(&mut settings.reconnect_delay, value),
        "ws_auth" => match WsAuthMode::parse(value) {
            Some(mode) => {
                settings.ws_auth = mode;
                true
            }
            None => false,
        },
        _ => {
            warn!(key, "unknown client setting");
            return;
        }
    };

    if !applied {
        warn!(key, value, "ignoring invalid client setting");
    }
}

fn set_millis(target: &mut Duration, value: &str) -> bool {
    match value.trim().parse::<u64>() {
        Ok(millis) if millis > 0 => {
            *target = Duration::from_millis(millis);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
