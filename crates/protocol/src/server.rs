//! Service → Client payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{HandshakeResult, Profile};

/// Response of `GET /auth-url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUrlResponse {
    pub url: String,
}

/// Response of `GET /user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileResponse {
    pub image_512: String,
    pub real_name_normalized: String,
}

impl From<UserProfileResponse> for Profile {
    fn from(res: UserProfileResponse) -> Self {
        Profile {
            display_name: res.real_name_normalized,
            avatar_url: res.image_512,
        }
    }
}

/// Response of `GET /test`, the session validity probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidityResponse {
    pub ok: bool,
}

/// One realtime frame: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl RealtimeFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Data of the `connected` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub socket_id: String,
}

/// Data of the `auth:success` frame.
///
/// Despite the name the service emits it for failures too, with `ok = false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthCompletion {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthCompletion {
    pub fn into_result(self) -> HandshakeResult {
        if !self.ok {
            return HandshakeResult::Failure {
                reason: self.error.unwrap_or_else(|| "unknown".to_string()),
            };
        }
        match (self.access_token, self.user_id) {
            (Some(token), Some(user_id)) => HandshakeResult::Success {
                token,
                user_id,
                scope: self.scope.unwrap_or_default(),
            },
            _ => HandshakeResult::Failure {
                reason: "malformed completion".to_string(),
            },
        }
    }
}
