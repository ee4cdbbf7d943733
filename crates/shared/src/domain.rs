use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

macro_rules! text_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

text_newtype!(ClientMessageId);
text_newtype!(VoiceId);

/// Server-assigned identifier. The backend emits both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(value) => write!(f, "{value}"),
            RecordId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Authenticated identity against one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub server_url: String,
    pub token: String,
    pub username: String,
}

impl Session {
    pub fn new(
        server_url: impl Into<String>,
        token: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            server_url: normalize_server_url(&server_url.into()),
            token: token.into(),
            username: username.into(),
        }
    }
}

pub fn normalize_server_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ChannelWire")]
pub struct Channel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Channel as the backend sends it: `name` may be missing (the id names the
/// channel then) and `memberCount` may be absent or null.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelWire {
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    member_count: Option<u64>,
    #[serde(default)]
    description: Option<String>,
}

impl From<ChannelWire> for Channel {
    fn from(wire: ChannelWire) -> Self {
        let name = wire
            .name
            .filter(|name| !name.is_empty())
            .or_else(|| wire.id.as_ref().map(RecordId::to_string))
            .unwrap_or_default();
        Self {
            id: wire.id,
            name,
            member_count: wire.member_count.unwrap_or(0),
            description: wire.description,
        }
    }
}

impl Channel {
    /// Case-insensitive match on name and description, substring match on id.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self
                .id
                .as_ref()
                .is_some_and(|id| id.to_string().contains(query))
            || self
                .description
                .as_ref()
                .is_some_and(|description| description.to_lowercase().contains(&needle))
    }
}

pub fn filter_channels<'a>(channels: &'a [Channel], query: &str) -> Vec<&'a Channel> {
    channels
        .iter()
        .filter(|channel| channel.matches(query))
        .collect()
}

pub fn is_member(joined: &[Channel], channel: &Channel) -> bool {
    joined.iter().any(|candidate| {
        (candidate.id.is_some() && candidate.id == channel.id) || candidate.name == channel.name
    })
}

/// Message time as sent by the backend: either RFC 3339 text or epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageTime {
    EpochMillis(i64),
    Text(String),
}

impl MessageTime {
    pub fn now() -> Self {
        MessageTime::Text(Utc::now().to_rfc3339())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            MessageTime::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
            MessageTime::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub from: String,
    #[serde(default, alias = "content")]
    pub text: String,
    #[serde(default, alias = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<MessageTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(default, alias = "voice", skip_serializing_if = "Option::is_none")]
    pub voice_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
}

impl Message {
    /// Identity used to drop duplicates when the same message arrives twice.
    pub fn dedup_key(&self) -> String {
        match &self.id {
            Some(id) => format!("id:{id}"),
            None => {
                let time = match &self.timestamp {
                    Some(MessageTime::EpochMillis(millis)) => millis.to_string(),
                    Some(MessageTime::Text(text)) => text.clone(),
                    None => String::new(),
                };
                format!("body:{}|{}|{}", self.from, self.text, time)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Option<RecordId>,
    pub from: String,
    pub text: String,
    pub timestamp: Option<MessageTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerBookmark {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "light" => Some(ThemeMode::Light),
            "dark" => Some(ThemeMode::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerStatus {
    Online { ping_ms: u64 },
    Error { http_status: u16 },
    Offline,
}
