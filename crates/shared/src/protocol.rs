use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ClientMessageId, Message, RecordId, UserInfo, VoiceId},
    error::{ErrorBody, ShapeError},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLoginRequest {
    pub username: String,
    pub session_id: String,
    pub two_factor_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableTwoFactorRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisableTwoFactorRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchChannelsRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinChannelRequest {
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub channel: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
}

impl OutgoingMessage {
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            reply_to: None,
            file_id: None,
            voice_message: None,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceOnlyMessageRequest {
    pub channel: String,
    pub voice_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceUploadRequest {
    pub channel: String,
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscriptionRequest {
    pub subscription: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTokenRequest {
    pub push_token: String,
    pub platform: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, rename = "requires2FA", alias = "requiresTwoFactor")]
    pub requires_two_factor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn failure_message(&self) -> String {
        ErrorBody {
            error: self.error.clone(),
            message: self.message.clone(),
        }
        .into_message()
        .unwrap_or_else(|| "Authentication failed".to_string())
    }
}

/// Generic `{success?, error?, message?}` acknowledgement; extra fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ack {
    /// Explicit `success: false` means the server refused the request.
    pub fn is_rejected(&self) -> bool {
        self.success == Some(false)
    }

    /// `error`, then a textual `message`, then a generic fallback.
    pub fn failure_message(&self) -> String {
        ErrorBody {
            error: self.error.clone(),
            message: self
                .message
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_string),
        }
        .into_message()
        .unwrap_or_else(|| "request failed".to_string())
    }

    /// The message object echoed back by `/api/message`, when the server sends one.
    pub fn echoed_message(&self) -> Option<Message> {
        match &self.message {
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUploadTicket {
    #[serde(default)]
    pub success: bool,
    pub voice_id: VoiceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    #[serde(default)]
    pub success: bool,
    pub file: UploadedFile,
}

/// Post-connect authentication frame for the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
}

impl AuthFrame {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            kind: "auth".to_string(),
            token: token.into(),
        }
    }
}

/// Inbound realtime frame. Only `type`, `action` and `channel` are used for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewMessage { channel: String, message: Message },
    ChannelsUpdated,
    Other(RealtimeFrame),
}

impl RealtimeFrame {
    pub fn classify(self) -> RealtimeEvent {
        if self.kind == "channels-updated" || self.action.as_deref() == Some("channels-updated") {
            return RealtimeEvent::ChannelsUpdated;
        }

        if self.kind == "message" && self.action.as_deref() == Some("new") {
            if let Some(channel) = self.channel.clone() {
                let message = match self.payload.get("message") {
                    Some(nested @ Value::Object(_)) => {
                        serde_json::from_value::<Message>(nested.clone())
                    }
                    _ => serde_json::from_value::<Message>(Value::Object(self.payload.clone())),
                };
                if let Ok(message) = message {
                    return RealtimeEvent::NewMessage { channel, message };
                }
            }
        }

        RealtimeEvent::Other(self)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decodes a list endpoint body.
///
/// Accepted shapes are a bare array, `{"<resource>": [...]}` and
/// `{"data": [...]}`, each optionally carrying `success`. A body with
/// `success: false` is a rejection; anything else is a shape error.
pub fn decode_list<T: DeserializeOwned>(
    resource: &'static str,
    body: Value,
) -> Result<Vec<T>, ShapeError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            if object.get("success") == Some(&Value::Bool(false)) {
                let body = ErrorBody {
                    error: object
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    message: object
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                return Err(ShapeError::Rejected(
                    body.into_message()
                        .unwrap_or_else(|| "request failed".to_string()),
                ));
            }
            match object.remove(resource).or_else(|| object.remove("data")) {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(ShapeError::UnexpectedShape {
                        resource,
                        found: json_kind(&other),
                    })
                }
                None => {
                    return Err(ShapeError::UnexpectedShape {
                        resource,
                        found: "an object without a list field",
                    })
                }
            }
        }
        other => {
            return Err(ShapeError::UnexpectedShape {
                resource,
                found: json_kind(&other),
            })
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|source| ShapeError::Entry { resource, source })
        })
        .collect()
}
