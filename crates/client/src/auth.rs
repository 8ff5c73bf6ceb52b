//! Auth correlator - drives the out-of-band OAuth handshake.
//!
//! Each sign-in is an attempt with its own id and its own realtime
//! subscription. Starting a new attempt cancels the previous attempt's
//! subscription, so a completion meant for the old attempt can never resolve
//! the new one. Only the current attempt may write credentials or publish
//! its phase.
//!
//! The wait for completion has no timeout: if the service never emits
//! `auth:success` the attempt stays in `AwaitingCompletion` until superseded
//! or until the realtime channel closes.
//!
//! The `state` parameter is a plain `{"socketId"}` blob. Nothing here checks
//! that an `auth:success` on this channel really belongs to the browser flow
//! we started; correlation is by channel id only.

use std::sync::Arc;

use knock_protocol::{
    new_id, AuthCompletion, CorrelationState, Profile, ValidityResponse, AUTH_SUCCESS_EVENT,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::browser::Browser;
use crate::error::{ChannelError, KnockError};
use crate::handshake::{transition, Effect, HandshakePhase, Input};
use crate::realtime::{RealtimeChannel, Subscription, SubscriptionCanceller};
use crate::service::RemoteService;
use crate::store::{self, SessionStore};

struct ActiveAttempt {
    attempt_id: String,
    canceller: Option<SubscriptionCanceller>,
}

/// Result of a validity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The probe answered; the stored session was left as is.
    Probed { ok: bool },
    /// The probe failed and a fresh handshake completed.
    Reauthenticated(Profile),
}

pub struct AuthCorrelator<S, R, B> {
    store: Arc<S>,
    service: Arc<R>,
    browser: Arc<B>,
    channel: RealtimeChannel,
    active: Mutex<Option<ActiveAttempt>>,
    phase_tx: watch::Sender<HandshakePhase>,
}

impl<S, R, B> AuthCorrelator<S, R, B>
where
    S: SessionStore,
    R: RemoteService,
    B: Browser,
{
    pub fn new(store: Arc<S>, service: Arc<R>, browser: Arc<B>, channel: RealtimeChannel) -> Self {
        let (phase_tx, _) = watch::channel(HandshakePhase::Idle);
        Self {
            store,
            service,
            browser,
            channel,
            active: Mutex::new(None),
            phase_tx,
        }
    }

    /// Phase of the current attempt.
    pub fn phase(&self) -> watch::Receiver<HandshakePhase> {
        self.phase_tx.subscribe()
    }

    /// Run a full sign-in attempt. Always starts a new attempt, even when
    /// already authenticated; callers that want to skip redundant sign-ins
    /// must check the session themselves.
    pub async fn sign_in(&self) -> Result<Profile, KnockError> {
        let attempt_id = new_id();
        {
            let mut guard = self.active.lock().await;
            if let Some(previous) = guard.take() {
                if let Some(canceller) = previous.canceller {
                    canceller.cancel();
                }
                info!(
                    component = "auth",
                    event = "auth.attempt_superseded",
                    attempt_id = %previous.attempt_id,
                    "Superseding pending sign-in attempt"
                );
            }
            *guard = Some(ActiveAttempt {
                attempt_id: attempt_id.clone(),
                canceller: None,
            });
        }

        info!(
            component = "auth",
            event = "auth.attempt_started",
            attempt_id = %attempt_id,
            session_id = %self.channel.session_id(),
            "Starting sign-in attempt"
        );

        let mut result = self.run_attempt(&attempt_id).await;

        {
            let mut guard = self.active.lock().await;
            if guard.as_ref().map(|a| a.attempt_id.as_str()) == Some(attempt_id.as_str()) {
                *guard = None;
            } else if result.is_ok() {
                result = Err(KnockError::Superseded);
            }
        }

        match &result {
            Ok(profile) => info!(
                component = "auth",
                event = "auth.attempt_authenticated",
                attempt_id = %attempt_id,
                display_name = %profile.display_name,
                "Sign-in completed"
            ),
            Err(e) => warn!(
                component = "auth",
                event = "auth.attempt_failed",
                attempt_id = %attempt_id,
                error = %e,
                "Sign-in failed"
            ),
        }
        result
    }

    /// Probe the stored token; on any probe failure fall through to a new
    /// sign-in attempt.
    pub async fn check_user(&self) -> Result<CheckOutcome, KnockError> {
        let token = self.store.get(store::TOKEN_KEY).await?;
        let probe = match token {
            Some(token) => self.service.check_token(&token).await,
            None => {
                info!(
                    component = "auth",
                    event = "auth.check_no_token",
                    "No stored token, starting sign-in"
                );
                return self.sign_in().await.map(CheckOutcome::Reauthenticated);
            }
        };

        match probe {
            Ok(ValidityResponse { ok }) => {
                info!(
                    component = "auth",
                    event = "auth.check_ok",
                    ok,
                    "Session validity probe answered"
                );
                Ok(CheckOutcome::Probed { ok })
            }
            Err(e) => {
                warn!(
                    component = "auth",
                    event = "auth.check_failed",
                    error = %e,
                    "Session validity probe failed, starting sign-in"
                );
                self.sign_in().await.map(CheckOutcome::Reauthenticated)
            }
        }
    }

    async fn is_current(&self, attempt_id: &str) -> bool {
        self.active.lock().await.as_ref().map(|a| a.attempt_id.as_str()) == Some(attempt_id)
    }

    /// Lock the active slot if it still belongs to `attempt_id`. Store writes
    /// happen while the guard is held so a newer attempt cannot start between
    /// the check and the write.
    async fn lock_current(
        &self,
        attempt_id: &str,
    ) -> Result<MutexGuard<'_, Option<ActiveAttempt>>, KnockError> {
        let guard = self.active.lock().await;
        if guard.as_ref().map(|a| a.attempt_id.as_str()) == Some(attempt_id) {
            Ok(guard)
        } else {
            Err(KnockError::Superseded)
        }
    }

    async fn publish(&self, attempt_id: &str, phase: &HandshakePhase) {
        if self.is_current(attempt_id).await {
            self.phase_tx.send_replace(phase.clone());
        }
    }

    async fn run_attempt(&self, attempt_id: &str) -> Result<Profile, KnockError> {
        let correlation = CorrelationState::new(self.channel.session_id());
        let mut phase = HandshakePhase::Idle;
        let mut subscription: Option<Subscription> = None;
        let mut failure: Option<KnockError> = None;
        let mut next = Some(Input::SignInRequested);

        while let Some(input) = next.take() {
            let (new_phase, effects) = transition(phase, input, &correlation);
            phase = new_phase;
            self.publish(attempt_id, &phase).await;

            for effect in effects {
                match self.execute(attempt_id, effect, &mut subscription).await {
                    Ok(Some(input)) => next = Some(input),
                    Ok(None) => {}
                    Err(KnockError::Superseded) if phase.is_terminal() => {
                        failure = Some(KnockError::Superseded);
                        break;
                    }
                    Err(e) if phase.is_terminal() => {
                        warn!(
                            component = "auth",
                            event = "auth.effect_failed_after_terminal",
                            attempt_id = %attempt_id,
                            error = %e,
                            "Effect failed after the attempt settled"
                        );
                    }
                    Err(e) => {
                        next = Some(Input::Aborted {
                            reason: e.to_string(),
                        });
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(KnockError::Superseded) = failure {
            return Err(KnockError::Superseded);
        }
        match phase {
            HandshakePhase::Authenticated { profile } => Ok(profile),
            HandshakePhase::Failed { reason } => {
                Err(failure.unwrap_or(KnockError::Handshake { reason }))
            }
            // Every effect chain ends in a terminal phase.
            _ => Err(KnockError::Handshake {
                reason: "handshake stalled".to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        attempt_id: &str,
        effect: Effect,
        subscription: &mut Option<Subscription>,
    ) -> Result<Option<Input>, KnockError> {
        match effect {
            Effect::FetchAuthorizationUrl => {
                let url = self.service.auth_url().await?;
                Ok(Some(Input::AuthorizationUrlReceived { url }))
            }

            Effect::ArmSubscription => {
                let sub = self.channel.subscribe_once(AUTH_SUCCESS_EVENT);
                let mut guard = self.active.lock().await;
                match guard.as_mut() {
                    Some(active) if active.attempt_id == attempt_id => {
                        active.canceller = Some(sub.canceller());
                        *subscription = Some(sub);
                        Ok(None)
                    }
                    // A newer attempt started while this one fetched its URL.
                    _ => Err(KnockError::Superseded),
                }
            }

            Effect::OpenBrowser { url } => {
                self.browser.open(&url).await?;
                Ok(Some(Input::BrowserOpened))
            }

            Effect::AwaitCompletion => {
                let Some(sub) = subscription.take() else {
                    return Err(KnockError::Channel(ChannelError::Cancelled));
                };
                let payload = match sub.recv().await {
                    Ok(payload) => payload,
                    Err(ChannelError::Cancelled) => return Err(KnockError::Superseded),
                    Err(e) => return Err(e.into()),
                };
                if !self.is_current(attempt_id).await {
                    return Err(KnockError::Superseded);
                }
                let completion: AuthCompletion =
                    serde_json::from_value(payload).map_err(ChannelError::from)?;
                info!(
                    component = "auth",
                    event = "auth.completion_received",
                    attempt_id = %attempt_id,
                    ok = completion.ok,
                    "Received handshake completion"
                );
                Ok(Some(Input::Completion(completion.into_result())))
            }

            Effect::PersistCredentials { token, user_id } => {
                let _current = self.lock_current(attempt_id).await?;
                store::save_credentials(self.store.as_ref(), &token, &user_id).await?;
                Ok(None)
            }

            Effect::LookupProfile { token, user_id } => {
                let profile = self.service.user_profile(&token, &user_id).await?;
                Ok(Some(Input::ProfileLoaded(profile)))
            }

            Effect::PersistProfile(profile) => {
                let _current = self.lock_current(attempt_id).await?;
                store::save_profile(self.store.as_ref(), &profile).await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use knock_protocol::{KnockBody, RealtimeFrame, Session};
    use serde_json::{json, Value};

    use super::*;
    use crate::error::ServiceError;
    use crate::store::MemorySessionStore;

    /// Scripted service double.
    #[derive(Default)]
    pub(crate) struct FakeService {
        pub auth_url_fails: bool,
        pub profile_fails: bool,
        /// Profile lookups for this user id take five seconds.
        pub slow_profile_user: Option<&'static str>,
        pub probe_fails: bool,
        pub knock_fails: bool,
        pub auth_url_calls: AtomicUsize,
        pub profile_calls: AtomicUsize,
        pub knocks: StdMutex<Vec<KnockBody>>,
    }

    fn status_error(operation: &'static str) -> ServiceError {
        ServiceError::Status {
            operation,
            status: 500,
            body: "boom".to_string(),
        }
    }

    impl RemoteService for FakeService {
        async fn auth_url(&self) -> Result<String, ServiceError> {
            self.auth_url_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_url_fails {
                return Err(status_error("auth-url request"));
            }
            Ok("https://auth.example/authorize?client_id=1".to_string())
        }

        async fn user_profile(&self, token: &str, user_id: &str) -> Result<Profile, ServiceError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if self.slow_profile_user == Some(user_id) {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            if self.profile_fails {
                return Err(status_error("user profile lookup"));
            }
            Ok(Profile {
                display_name: format!("{user_id} via {token}"),
                avatar_url: "https://img/avatar.png".to_string(),
            })
        }

        async fn check_token(&self, _token: &str) -> Result<ValidityResponse, ServiceError> {
            if self.probe_fails {
                return Err(status_error("session validity probe"));
            }
            Ok(ValidityResponse { ok: true })
        }

        async fn knock(&self, body: &KnockBody) -> Result<Value, ServiceError> {
            self.knocks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(body.clone());
            if self.knock_fails {
                return Err(status_error("knock"));
            }
            Ok(json!({"ok": true}))
        }
    }

    /// Records opened URLs; optionally emits a completion from inside
    /// `open`, before the correlator starts awaiting.
    #[derive(Default)]
    pub(crate) struct FakeBrowser {
        pub opened: StdMutex<Vec<String>>,
        pub complete_on_open: Option<(RealtimeChannel, Value)>,
        pub fails: bool,
    }

    impl Browser for FakeBrowser {
        async fn open(&self, url: &str) -> io::Result<()> {
            if self.fails {
                return Err(io::Error::other("no browser"));
            }
            self.opened
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(url.to_string());
            if let Some((channel, payload)) = &self.complete_on_open {
                channel.dispatch(RealtimeFrame::new(AUTH_SUCCESS_EVENT, payload.clone()));
            }
            Ok(())
        }
    }

    fn success_payload(token: &str, user: &str) -> Value {
        json!({
            "ok": true,
            "access_token": token,
            "user_id": user,
            "scope": "identity.basic"
        })
    }

    type TestCorrelator = AuthCorrelator<MemorySessionStore, FakeService, FakeBrowser>;

    fn correlator(
        service: FakeService,
        browser: FakeBrowser,
        channel: &RealtimeChannel,
    ) -> (Arc<TestCorrelator>, Arc<MemorySessionStore>, Arc<FakeService>) {
        let store = Arc::new(MemorySessionStore::new());
        let service = Arc::new(service);
        let correlator = Arc::new(AuthCorrelator::new(
            store.clone(),
            service.clone(),
            Arc::new(browser),
            channel.clone(),
        ));
        (correlator, store, service)
    }

    async fn wait_for_phase(rx: &mut watch::Receiver<HandshakePhase>, want: HandshakePhase) {
        rx.wait_for(|phase| *phase == want).await.unwrap();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn successful_handshake_persists_credentials_and_profile() {
        let channel = RealtimeChannel::new("sock-1");
        let (correlator, store, _service) =
            correlator(FakeService::default(), FakeBrowser::default(), &channel);
        let mut phase = correlator.phase();

        let task = tokio::spawn({
            let correlator = correlator.clone();
            async move { correlator.sign_in().await }
        });
        wait_for_phase(&mut phase, HandshakePhase::AwaitingCompletion).await;
        channel.dispatch(RealtimeFrame::new(
            AUTH_SUCCESS_EVENT,
            success_payload("xoxp-1", "U1"),
        ));

        let profile = task.await.unwrap().unwrap();
        assert_eq!(profile.display_name, "U1 via xoxp-1");

        let session = store::load_session(store.as_ref()).await.unwrap();
        assert_eq!(
            session,
            Session {
                token: Some("xoxp-1".to_string()),
                user_id: Some("U1".to_string()),
                profile: Some(profile.clone()),
            }
        );
        assert_eq!(
            *correlator.phase().borrow(),
            HandshakePhase::Authenticated { profile }
        );
    }

    #[tokio::test]
    async fn opened_url_carries_channel_session_id() {
        let channel = RealtimeChannel::new("sock-42");
        let browser = FakeBrowser {
            complete_on_open: Some((channel.clone(), success_payload("t", "U1"))),
            ..Default::default()
        };
        let store = Arc::new(MemorySessionStore::new());
        let browser = Arc::new(browser);
        let correlator = AuthCorrelator::new(
            store,
            Arc::new(FakeService::default()),
            browser.clone(),
            channel.clone(),
        );

        correlator.sign_in().await.unwrap();

        let opened = browser.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].starts_with("https://auth.example/authorize?client_id=1&state="));
        assert!(opened[0].contains("socketId"));
        assert!(opened[0].contains("sock-42"));
    }

    #[tokio::test]
    async fn completion_during_browser_open_is_not_lost() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            complete_on_open: Some((channel.clone(), success_payload("fast", "U9"))),
            ..Default::default()
        };
        let (correlator, store, _service) =
            correlator(FakeService::default(), browser, &channel);

        let profile = correlator.sign_in().await.unwrap();

        assert_eq!(profile.display_name, "U9 via fast");
        assert_eq!(
            store.get(store::TOKEN_KEY).await.unwrap().as_deref(),
            Some("fast")
        );
    }

    #[tokio::test]
    async fn rejected_completion_fails_and_leaves_store_untouched() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            complete_on_open: Some((
                channel.clone(),
                json!({"ok": false, "error": "access_denied"}),
            )),
            ..Default::default()
        };
        let (correlator, store, service) = correlator(FakeService::default(), browser, &channel);

        let err = correlator.sign_in().await.unwrap_err();

        assert!(matches!(err, KnockError::Handshake { ref reason } if reason == "access_denied"));
        assert_eq!(
            *correlator.phase().borrow(),
            HandshakePhase::Failed {
                reason: "access_denied".to_string()
            }
        );
        assert_eq!(
            store::load_session(store.as_ref()).await.unwrap(),
            Session::default()
        );
        assert_eq!(service.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn profile_lookup_failure_keeps_token_without_profile() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            complete_on_open: Some((channel.clone(), success_payload("xoxp-1", "U1"))),
            ..Default::default()
        };
        let service = FakeService {
            profile_fails: true,
            ..Default::default()
        };
        let (correlator, store, _service) = correlator(service, browser, &channel);

        let err = correlator.sign_in().await.unwrap_err();

        assert!(matches!(err, KnockError::Transport(_)));
        assert!(matches!(
            *correlator.phase().borrow(),
            HandshakePhase::Failed { .. }
        ));
        let session = store::load_session(store.as_ref()).await.unwrap();
        assert_eq!(session.token.as_deref(), Some("xoxp-1"));
        assert_eq!(session.user_id.as_deref(), Some("U1"));
        assert_eq!(session.profile, None);
    }

    #[tokio::test]
    async fn auth_url_failure_is_transport_error() {
        let channel = RealtimeChannel::new("sock-1");
        let service = FakeService {
            auth_url_fails: true,
            ..Default::default()
        };
        let (correlator, store, _service) =
            correlator(service, FakeBrowser::default(), &channel);

        let err = correlator.sign_in().await.unwrap_err();

        assert!(matches!(err, KnockError::Transport(_)));
        assert_eq!(channel.pending(), 0);
        assert_eq!(store.get(store::TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn browser_failure_fails_attempt_and_releases_subscription() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            fails: true,
            ..Default::default()
        };
        let (correlator, _store, _service) =
            correlator(FakeService::default(), browser, &channel);

        let err = correlator.sign_in().await.unwrap_err();

        assert!(matches!(err, KnockError::Browser(_)));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn new_attempt_cancels_pending_attempt() {
        let channel = RealtimeChannel::new("sock-1");
        let (correlator, store, _service) =
            correlator(FakeService::default(), FakeBrowser::default(), &channel);
        let mut phase = correlator.phase();

        let first = tokio::spawn({
            let correlator = correlator.clone();
            async move { correlator.sign_in().await }
        });
        wait_for_phase(&mut phase, HandshakePhase::AwaitingCompletion).await;
        assert_eq!(channel.pending(), 1);

        let second = tokio::spawn({
            let correlator = correlator.clone();
            async move { correlator.sign_in().await }
        });

        // The first attempt resolves as superseded without touching the store.
        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Err(KnockError::Superseded)));
        assert_eq!(store.get(store::TOKEN_KEY).await.unwrap(), None);

        wait_until(|| channel.pending() == 1).await;

        // Exactly one subscription (the second attempt's) sees the event.
        assert_eq!(
            channel.dispatch(RealtimeFrame::new(
                AUTH_SUCCESS_EVENT,
                success_payload("second", "U2"),
            )),
            1
        );
        let profile = second.await.unwrap().unwrap();
        assert_eq!(profile.display_name, "U2 via second");

        // A late duplicate has nowhere to land.
        assert_eq!(
            channel.dispatch(RealtimeFrame::new(
                AUTH_SUCCESS_EVENT,
                success_payload("stale", "U1"),
            )),
            0
        );
        assert_eq!(
            store.get(store::TOKEN_KEY).await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn sign_in_while_authenticated_starts_new_attempt() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            complete_on_open: Some((channel.clone(), success_payload("t", "U1"))),
            ..Default::default()
        };
        let (correlator, _store, service) = correlator(FakeService::default(), browser, &channel);

        correlator.sign_in().await.unwrap();
        correlator.sign_in().await.unwrap();

        assert_eq!(service.auth_url_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_channel_fails_attempt() {
        let channel = RealtimeChannel::new("sock-1");
        channel.close();
        let (correlator, _store, _service) =
            correlator(FakeService::default(), FakeBrowser::default(), &channel);

        let err = correlator.sign_in().await.unwrap_err();
        assert!(matches!(err, KnockError::Channel(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn check_user_with_valid_token_does_not_sign_in() {
        let channel = RealtimeChannel::new("sock-1");
        let (correlator, store, service) =
            correlator(FakeService::default(), FakeBrowser::default(), &channel);
        store::save_credentials(store.as_ref(), "tok", "U1")
            .await
            .unwrap();

        let outcome = correlator.check_user().await.unwrap();

        assert_eq!(outcome, CheckOutcome::Probed { ok: true });
        assert_eq!(service.auth_url_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn check_user_probe_failure_falls_through_to_sign_in() {
        let channel = RealtimeChannel::new("sock-1");
        let browser = FakeBrowser {
            complete_on_open: Some((channel.clone(), success_payload("fresh", "U1"))),
            ..Default::default()
        };
        let service = FakeService {
            probe_fails: true,
            ..Default::default()
        };
        let (correlator, store, _service) = correlator(service, browser, &channel);
        store::save_credentials(store.as_ref(), "stale", "U1")
            .await
            .unwrap();

        let outcome = correlator.check_user().await.unwrap();

        assert!(matches!(outcome, CheckOutcome::Reauthenticated(_)));
        assert_eq!(
            store.get(store::TOKEN_KEY).await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_attempt_cannot_write_after_profile_lookup() {
        let channel = RealtimeChannel::new("sock-1");
        let service = FakeService {
            slow_profile_user: Some("U1"),
            ..Default::default()
        };
        let (correlator, store, service) = correlator(service, FakeBrowser::default(), &channel);

        let first = tokio::spawn({
            let correlator = correlator.clone();
            async move { correlator.sign_in().await }
        });
        wait_until(|| channel.pending() == 1).await;
        channel.dispatch(RealtimeFrame::new(
            AUTH_SUCCESS_EVENT,
            success_payload("tok1", "U1"),
        ));
        // First attempt is now parked in its slow profile lookup.
        wait_until(|| service.profile_calls.load(Ordering::SeqCst) == 1).await;

        let second = tokio::spawn({
            let correlator = correlator.clone();
            async move { correlator.sign_in().await }
        });
        wait_until(|| channel.pending() == 1).await;
        channel.dispatch(RealtimeFrame::new(
            AUTH_SUCCESS_EVENT,
            success_payload("tok2", "U2"),
        ));

        let profile = second.await.unwrap().unwrap();
        assert_eq!(profile.display_name, "U2 via tok2");
        assert!(matches!(
            first.await.unwrap(),
            Err(KnockError::Superseded)
        ));

        let session = store::load_session(store.as_ref()).await.unwrap();
        assert_eq!(session.token.as_deref(), Some("tok2"));
        assert_eq!(session.user_id.as_deref(), Some("U2"));
        assert_eq!(
            session.profile.map(|p| p.display_name).as_deref(),
            Some("U2 via tok2")
        );
    }
}
