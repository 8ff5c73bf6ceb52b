//! App - wires the store, correlator and coalescer together for a UI.
//!
//! Auth state is held in an `ArcSwap` snapshot so the knock path can gate on
//! it without touching the store. Knock outcomes and sign-in results are
//! republished as [`UiEvent`]s.

use std::sync::Arc;

use arc_swap::ArcSwap;
use knock_protocol::{Profile, Session};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthCorrelator, CheckOutcome};
use crate::browser::Browser;
use crate::coalescer::{CoalescerTimings, KnockCoalescer, KnockOutcome};
use crate::config::ClientConfig;
use crate::error::KnockError;
use crate::handshake::HandshakePhase;
use crate::realtime::RealtimeChannel;
use crate::service::RemoteService;
use crate::store::{self, SessionStore};

/// Feedback for whatever renders the app.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    KnockStarted,
    KnockSent { ack: Value },
    KnockFailed { reason: String },
    SignedIn { profile: Profile },
    SignInFailed { reason: String },
}

pub struct App<S, R, B> {
    store: Arc<S>,
    correlator: AuthCorrelator<S, R, B>,
    coalescer: KnockCoalescer,
    coalescer_task: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    session: Arc<ArcSwap<Session>>,
    events: broadcast::Sender<UiEvent>,
}

impl<S, R, B> App<S, R, B>
where
    S: SessionStore,
    R: RemoteService,
    B: Browser,
{
    /// Must be called inside a tokio runtime; spawns the coalescer.
    pub fn new(
        config: &ClientConfig,
        store: Arc<S>,
        service: Arc<R>,
        browser: Arc<B>,
        channel: RealtimeChannel,
    ) -> Self {
        let (coalescer, coalescer_task) = KnockCoalescer::spawn(
            store.clone(),
            service.clone(),
            CoalescerTimings {
                debounce: config.debounce,
                settle: config.settle,
            },
        );
        let (events, _) = broadcast::channel(64);
        let forwarder = tokio::spawn(forward_outcomes(coalescer.outcomes(), events.clone()));

        Self {
            correlator: AuthCorrelator::new(store.clone(), service, browser, channel),
            store,
            coalescer,
            coalescer_task,
            forwarder,
            session: Arc::new(ArcSwap::from_pointee(Session::default())),
            events,
        }
    }

    /// Load the persisted session into the in-memory snapshot.
    pub async fn restore(&self) -> Result<Arc<Session>, KnockError> {
        let session = self.refresh().await?;
        info!(
            component = "app",
            event = "app.restored",
            authenticated = session.is_authenticated(),
            has_profile = session.profile.is_some(),
            "Session restored"
        );
        Ok(session)
    }

    /// Lock-free read of the current auth state.
    pub fn session(&self) -> Arc<Session> {
        self.session.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.load().is_authenticated()
    }

    pub async fn sign_in(&self) -> Result<Profile, KnockError> {
        let result = self.correlator.sign_in().await;
        self.after_sign_in(result.as_ref()).await;
        result
    }

    pub async fn check_user(&self) -> Result<CheckOutcome, KnockError> {
        let result = self.correlator.check_user().await;
        match &result {
            Ok(CheckOutcome::Reauthenticated(profile)) => self.after_sign_in(Ok(profile)).await,
            Ok(CheckOutcome::Probed { .. }) => {}
            Err(e) => self.after_sign_in(Err(e)).await,
        }
        result
    }

    /// Forward one knock intent. Signed-out intents are dropped with
    /// [`KnockError::NotAuthenticated`].
    pub fn knock(&self) -> Result<(), KnockError> {
        if !self.is_authenticated() {
            debug!(
                component = "app",
                event = "app.knock_gated",
                "Knock ignored while signed out"
            );
            return Err(KnockError::NotAuthenticated);
        }
        self.coalescer.intent();
        Ok(())
    }

    /// Clear the persisted session.
    pub async fn logout(&self) -> Result<(), KnockError> {
        store::clear_session(self.store.as_ref()).await?;
        self.session.store(Arc::new(Session::default()));
        info!(component = "app", event = "app.logged_out", "Session cleared");
        Ok(())
    }

    pub fn in_flight(&self) -> watch::Receiver<bool> {
        self.coalescer.in_flight()
    }

    pub fn handshake_phase(&self) -> watch::Receiver<HandshakePhase> {
        self.correlator.phase()
    }

    pub fn events(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Stop taking intents, wait for a pending trailing knock to fire and
    /// settle, then drain the event forwarder.
    pub async fn shutdown(self) {
        let App {
            coalescer,
            coalescer_task,
            forwarder,
            ..
        } = self;
        drop(coalescer);
        if let Err(e) = coalescer_task.await {
            warn!(
                component = "app",
                event = "app.coalescer_join_failed",
                error = %e,
                "Coalescer task ended abnormally"
            );
        }
        let _ = forwarder.await;
    }

    async fn refresh(&self) -> Result<Arc<Session>, KnockError> {
        let session = Arc::new(store::load_session(self.store.as_ref()).await?);
        self.session.store(session.clone());
        Ok(session)
    }

    async fn after_sign_in(&self, result: Result<&Profile, &KnockError>) {
        let event = match result {
            Ok(profile) => UiEvent::SignedIn {
                profile: profile.clone(),
            },
            // A superseded attempt is not a user-visible failure; the newer
            // attempt reports for itself.
            Err(KnockError::Superseded) => return,
            Err(e) => UiEvent::SignInFailed {
                reason: e.to_string(),
            },
        };
        if let Err(e) = self.refresh().await {
            warn!(
                component = "app",
                event = "app.refresh_failed",
                error = %e,
                "Failed to reload session after sign-in"
            );
        }
        let _ = self.events.send(event);
    }
}

async fn forward_outcomes(
    mut outcomes: broadcast::Receiver<KnockOutcome>,
    events: broadcast::Sender<UiEvent>,
) {
    loop {
        let outcome = match outcomes.recv().await {
            Ok(outcome) => outcome,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    component = "app",
                    event = "app.outcomes_lagged",
                    skipped,
                    "Dropped knock outcomes"
                );
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let event = match outcome {
            KnockOutcome::Started => UiEvent::KnockStarted,
            KnockOutcome::Sent { ack } => UiEvent::KnockSent { ack },
            KnockOutcome::Failed { reason } => UiEvent::KnockFailed { reason },
            KnockOutcome::Skipped => continue,
        };
        let _ = events.send(event);
    }
}
