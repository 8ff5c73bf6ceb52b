//! Knock Protocol
//!
//! Wire types shared by the knock client and the knock service.
//! HTTP bodies and realtime frames are all plain JSON.

use uuid::Uuid;

pub mod client;
pub mod server;
pub mod types;

pub use client::{CorrelationState, KnockBody};
pub use server::{
    AuthCompletion, AuthUrlResponse, ConnectedPayload, RealtimeFrame, UserProfileResponse,
    ValidityResponse,
};
pub use types::*;

/// Realtime event carrying the handshake outcome.
pub const AUTH_SUCCESS_EVENT: &str = "auth:success";

/// First realtime event the service sends on a fresh connection.
pub const CONNECTED_EVENT: &str = "connected";

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
