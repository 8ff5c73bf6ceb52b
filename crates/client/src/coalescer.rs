//! Knock coalescer - turns a stream of knock intents into sparse knock requests.
//!
//! The very first intent fires immediately. Every later intent (re)starts a
//! quiet-window timer and only the last intent of a burst fires, once the
//! window has passed with no new intent. Authentication is checked when a
//! request fires, not when the intent arrives.
//!
//! Runs as its own tokio task; the timer is private to that task.

use std::sync::Arc;
use std::time::Duration;

use knock_protocol::KnockBody;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::service::RemoteService;
use crate::store::{self, SessionStore};

/// What happened to a fired knock.
#[derive(Debug, Clone, PartialEq)]
pub enum KnockOutcome {
    /// Request issued; the in-flight indicator is set.
    Started,
    Sent { ack: Value },
    Failed { reason: String },
    /// Fired while signed out; dropped without a request.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct CoalescerTimings {
    pub debounce: Duration,
    pub settle: Duration,
}

/// Handle to a running coalescer (cheap to Clone).
#[derive(Clone)]
pub struct KnockCoalescer {
    intent_tx: mpsc::UnboundedSender<()>,
    in_flight: watch::Receiver<bool>,
    outcomes: broadcast::Sender<KnockOutcome>,
}

impl KnockCoalescer {
    /// Spawn the coalescer task. It stops once every handle is dropped,
    /// after flushing any pending trailing fire.
    pub fn spawn<S, R>(
        store: Arc<S>,
        service: Arc<R>,
        timings: CoalescerTimings,
    ) -> (KnockCoalescer, JoinHandle<()>)
    where
        S: SessionStore,
        R: RemoteService,
    {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (in_flight_tx, in_flight) = watch::channel(false);
        let (outcomes, _) = broadcast::channel(64);

        let worker = Worker {
            store,
            service,
            timings,
            in_flight_tx: Arc::new(in_flight_tx),
            outcomes: outcomes.clone(),
            last_fire: None,
            deadline: None,
            current: None,
        };
        let task = tokio::spawn(worker.run(intent_rx));

        (
            KnockCoalescer {
                intent_tx,
                in_flight,
                outcomes,
            },
            task,
        )
    }

    /// Record one user knock intent.
    pub fn intent(&self) {
        if self.intent_tx.send(()).is_err() {
            warn!(
                component = "coalescer",
                event = "coalescer.closed",
                "Coalescer stopped, knock intent dropped"
            );
        }
    }

    /// `true` while a knock request (plus its settle delay) is running.
    pub fn in_flight(&self) -> watch::Receiver<bool> {
        self.in_flight.clone()
    }

    pub fn outcomes(&self) -> broadcast::Receiver<KnockOutcome> {
        self.outcomes.subscribe()
    }
}

struct Worker<S, R> {
    store: Arc<S>,
    service: Arc<R>,
    timings: CoalescerTimings,
    in_flight_tx: Arc<watch::Sender<bool>>,
    outcomes: broadcast::Sender<KnockOutcome>,
    last_fire: Option<Instant>,
    deadline: Option<Instant>,
    current: Option<JoinHandle<()>>,
}

impl<S, R> Worker<S, R>
where
    S: SessionStore,
    R: RemoteService,
{
    async fn run(mut self, mut intent_rx: mpsc::UnboundedReceiver<()>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                intent = intent_rx.recv() => {
                    let Some(()) = intent else { break };
                    if self.last_fire.is_none() {
                        debug!(
                            component = "coalescer",
                            event = "coalescer.first_intent",
                            "First knock intent fires immediately"
                        );
                        self.fire();
                    } else {
                        self.deadline = Some(Instant::now() + self.timings.debounce);
                    }
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.deadline = None;
                    self.fire();
                }
            }
        }

        // All handles dropped: honor a pending trailing fire, then let the
        // last request settle.
        if let Some(deadline) = self.deadline.take() {
            tokio::time::sleep_until(deadline).await;
            self.fire();
        }
        if let Some(current) = self.current.take() {
            let _ = current.await;
        }
    }

    /// Start a knock request. A request still in flight is superseded.
    fn fire(&mut self) {
        self.last_fire = Some(Instant::now());
        if let Some(previous) = self.current.take() {
            if !previous.is_finished() {
                debug!(
                    component = "coalescer",
                    event = "coalescer.superseded",
                    "Superseding in-flight knock"
                );
            }
            previous.abort();
        }

        self.current = Some(tokio::spawn(send_knock(
            self.store.clone(),
            self.service.clone(),
            self.timings.settle,
            self.in_flight_tx.clone(),
            self.outcomes.clone(),
        )));
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn knock_body<S: SessionStore>(store: &S) -> Option<KnockBody> {
    let session = match store::load_session(store).await {
        Ok(session) => session,
        Err(e) => {
            warn!(
                component = "coalescer",
                event = "coalescer.session_read_failed",
                error = %e,
                "Failed to read session, treating as signed out"
            );
            return None;
        }
    };
    if !session.is_authenticated() {
        return None;
    }
    let user_id = session.user_id?;
    let user_name = match session.profile {
        Some(profile) => profile.display_name,
        None => {
            warn!(
                component = "coalescer",
                event = "coalescer.profile_missing",
                "Knocking without a display name"
            );
            String::new()
        }
    };
    Some(KnockBody { user_id, user_name })
}

async fn send_knock<S, R>(
    store: Arc<S>,
    service: Arc<R>,
    settle: Duration,
    in_flight: Arc<watch::Sender<bool>>,
    outcomes: broadcast::Sender<KnockOutcome>,
) where
    S: SessionStore,
    R: RemoteService,
{
    let Some(body) = knock_body(store.as_ref()).await else {
        debug!(
            component = "coalescer",
            event = "coalescer.skipped",
            "Not signed in, knock dropped"
        );
        in_flight.send_replace(false);
        let _ = outcomes.send(KnockOutcome::Skipped);
        return;
    };

    in_flight.send_replace(true);
    let _ = outcomes.send(KnockOutcome::Started);
    info!(
        component = "coalescer",
        event = "coalescer.requesting",
        user_id = %body.user_id,
        "Requesting knock"
    );

    let outcome = match service.knock(&body).await {
        Ok(ack) => {
            info!(
                component = "coalescer",
                event = "coalescer.sent",
                "Knock sent"
            );
            KnockOutcome::Sent { ack }
        }
        Err(e) => {
            warn!(
                component = "coalescer",
                event = "coalescer.failed",
                error = %e,
                "Knock request failed"
            );
            KnockOutcome::Failed {
                reason: e.to_string(),
            }
        }
    };

    tokio::time::sleep(settle).await;
    in_flight.send_replace(false);
    let _ = outcomes.send(outcome);
}
