//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Display data for the signed-in user.
///
/// Persisted as `{"name": ..., "avatar": ...}` under the `userProfile` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "avatar")]
    pub avatar_url: String,
}

/// Persisted authentication state.
///
/// `token` present means authenticated; `user_id` is always written together
/// with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub profile: Option<Profile>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

/// Outcome of one handshake attempt, delivered once over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResult {
    Success {
        token: String,
        user_id: String,
        scope: String,
    },
    Failure {
        reason: String,
    },
}
