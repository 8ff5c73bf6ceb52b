//! Client → Service payloads

use serde::{Deserialize, Serialize};

/// Body of `POST /knock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnockBody {
    pub user_id: String,
    pub user_name: String,
}

/// Correlation blob appended to the authorization URL as `state`.
///
/// The authorization server echoes it back to the service, which uses
/// `socket_id` to pick the realtime connection that receives `auth:success`.
/// Nothing signs or verifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationState {
    pub socket_id: String,
}

impl CorrelationState {
    pub fn new(socket_id: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
        }
    }

    /// Append this state to an authorization URL as a URL-encoded JSON
    /// `state` parameter.
    pub fn append_to(&self, url: &str) -> String {
        // Serializing two plain strings cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}state={}", urlencoding::encode(&json))
    }
}
