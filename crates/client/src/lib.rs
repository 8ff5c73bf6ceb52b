//! Knock client core.
//!
//! Session persistence, the realtime channel used to correlate the OAuth
//! handshake, the handshake itself, and the knock coalescer that turns user
//! intents into sparse `POST /knock` requests.

pub mod app;
pub mod auth;
pub mod browser;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod handshake;
pub mod realtime;
pub mod service;
pub mod store;

pub use app::{App, UiEvent};
pub use auth::{AuthCorrelator, CheckOutcome};
pub use browser::{Browser, PrintBrowser, SystemBrowser};
pub use coalescer::{CoalescerTimings, KnockCoalescer, KnockOutcome};
pub use config::ClientConfig;
pub use error::{ChannelError, KnockError, ServiceError, StoreError};
pub use handshake::HandshakePhase;
pub use realtime::RealtimeChannel;
pub use service::{HttpService, RemoteService};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};
