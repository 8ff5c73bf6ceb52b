//! Realtime channel - one long-lived WebSocket to the knock service.
//!
//! The service identifies the connection by the `socketId` it sends in the
//! first `connected` frame; that id is the channel's stable `session_id`.
//! Callers wait for named events through single-shot [`Subscription`]s:
//! a subscription resolves at most once and is torn down the moment it
//! fires, so late duplicates of the same event have nowhere to land.
//!
//! If the socket reconnects, the service assigns a new id and any handshake
//! correlated with the old one is lost. Pending subscriptions resolve with
//! [`ChannelError::Closed`] when the socket goes away.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use knock_protocol::{ConnectedPayload, RealtimeFrame, CONNECTED_EVENT};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Delivery = Result<Value, ChannelError>;

struct Waiter {
    id: u64,
    event: String,
    tx: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    closed: bool,
    waiters: Vec<Waiter>,
}

struct Inner {
    session_id: String,
    registry: Mutex<Registry>,
    reader: Mutex<Option<AbortHandle>>,
}

impl Inner {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_waiter(&self, id: u64) -> Option<Waiter> {
        let mut registry = self.registry();
        let pos = registry.waiters.iter().position(|w| w.id == id)?;
        Some(registry.waiters.swap_remove(pos))
    }
}

/// Handle to the realtime connection (cheap to Clone).
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}

impl RealtimeChannel {
    /// Create a channel with no transport attached. Frames are fed through
    /// [`RealtimeChannel::dispatch`]; the WebSocket reader uses the same path.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                registry: Mutex::new(Registry::default()),
                reader: Mutex::new(None),
            }),
        }
    }

    /// Connect to the service and wait for the `connected` frame that names
    /// this connection.
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let (mut ws, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let session_id = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: RealtimeFrame = serde_json::from_str(text.as_str())?;
                    if frame.event == CONNECTED_EVENT {
                        let payload: ConnectedPayload = serde_json::from_value(frame.data)?;
                        break payload.socket_id;
                    }
                    debug!(
                        component = "realtime",
                        event = "realtime.frame_before_connected",
                        name = %frame.event,
                        "Ignoring frame received before connected"
                    );
                }
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
            }
        };

        info!(
            component = "realtime",
            event = "realtime.connected",
            url = %url,
            session_id = %session_id,
            "Realtime channel connected"
        );

        let channel = Self::new(session_id);
        let task = tokio::spawn(read_loop(ws, channel.clone()));
        *channel
            .inner
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task.abort_handle());
        Ok(channel)
    }

    /// The id the service knows this connection by.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Register interest in the next `event`. The subscription is armed
    /// before this returns, so an event dispatched at any later point is
    /// captured even if nobody is awaiting yet.
    pub fn subscribe_once(&self, event: &str) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.inner.registry();
        let id = registry.next_id;
        registry.next_id += 1;

        if registry.closed {
            let _ = tx.send(Err(ChannelError::Closed));
        } else {
            registry.waiters.push(Waiter {
                id,
                event: event.to_string(),
                tx,
            });
        }

        Subscription {
            id,
            rx: Some(rx),
            inner: self.inner.clone(),
        }
    }

    /// Deliver a frame to every subscription waiting on its event name.
    /// Returns how many subscriptions it resolved.
    pub fn dispatch(&self, frame: RealtimeFrame) -> usize {
        let matched: Vec<Waiter> = {
            let mut registry = self.inner.registry();
            let (matched, rest): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut registry.waiters)
                .into_iter()
                .partition(|w| w.event == frame.event);
            registry.waiters = rest;
            matched
        };

        let mut delivered = 0;
        for waiter in matched {
            if waiter.tx.send(Ok(frame.data.clone())).is_ok() {
                delivered += 1;
            }
        }

        debug!(
            component = "realtime",
            event = "realtime.dispatched",
            name = %frame.event,
            delivered,
            "Dispatched realtime frame"
        );
        delivered
    }

    /// Mark the channel closed and fail every pending subscription.
    pub fn close(&self) {
        let waiters = {
            let mut registry = self.inner.registry();
            registry.closed = true;
            std::mem::take(&mut registry.waiters)
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(ChannelError::Closed));
        }
    }

    /// Stop the socket reader (if any) and close the channel.
    pub fn shutdown(&self) {
        if let Some(reader) = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
        self.close();
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.inner.registry().waiters.len()
    }
}

async fn read_loop(mut ws: WsStream, channel: RealtimeChannel) {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeFrame>(text.as_str()) {
                Ok(frame) => {
                    channel.dispatch(frame);
                }
                Err(e) => {
                    warn!(
                        component = "realtime",
                        event = "realtime.frame_invalid",
                        error = %e,
                        "Skipping unparseable realtime frame"
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    component = "realtime",
                    event = "realtime.read_failed",
                    error = %e,
                    "Realtime socket read failed"
                );
                break;
            }
        }
    }

    info!(
        component = "realtime",
        event = "realtime.closed",
        session_id = %channel.session_id(),
        "Realtime channel closed"
    );
    channel.close();
}

/// Single-shot wait for one named event. Dropping it unregisters it.
pub struct Subscription {
    id: u64,
    rx: Option<oneshot::Receiver<Delivery>>,
    inner: Arc<Inner>,
}

impl Subscription {
    /// Handle that can cancel this subscription from elsewhere.
    pub fn canceller(&self) -> SubscriptionCanceller {
        SubscriptionCanceller {
            id: self.id,
            inner: self.inner.clone(),
        }
    }

    /// Wait for the event payload.
    pub async fn recv(mut self) -> Result<Value, ChannelError> {
        let Some(rx) = self.rx.take() else {
            return Err(ChannelError::Cancelled);
        };
        rx.await.unwrap_or(Err(ChannelError::Cancelled))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.take_waiter(self.id);
    }
}

/// Cancels a [`Subscription`] that is possibly being awaited elsewhere.
#[derive(Clone)]
pub struct SubscriptionCanceller {
    id: u64,
    inner: Arc<Inner>,
}

impl SubscriptionCanceller {
    /// Returns `true` if the subscription was still pending.
    pub fn cancel(&self) -> bool {
        match self.inner.take_waiter(self.id) {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(ChannelError::Cancelled));
                true
            }
            None => false,
        }
    }
}
