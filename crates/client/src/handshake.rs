//! Pure handshake state machine
//!
//! One machine per sign-in attempt: `transition(phase, input) -> (phase, effects)`.
//! No IO, no async. The correlator executes the effects and feeds the
//! resulting inputs back in.

use knock_protocol::{CorrelationState, HandshakeResult, Profile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    AwaitingAuthorizationUrl,
    BrowserOpen,
    AwaitingCompletion,
    Authenticated { profile: Profile },
    Failed { reason: String },
}

impl HandshakePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakePhase::Authenticated { .. } | HandshakePhase::Failed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum Input {
    SignInRequested,
    AuthorizationUrlReceived { url: String },
    BrowserOpened,
    Completion(HandshakeResult),
    ProfileLoaded(Profile),
    /// An effect failed (transport, browser, store) or the attempt was superseded.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchAuthorizationUrl,
    /// Must run before `OpenBrowser` so a fast completion is not missed.
    ArmSubscription,
    OpenBrowser { url: String },
    AwaitCompletion,
    PersistCredentials { token: String, user_id: String },
    LookupProfile { token: String, user_id: String },
    PersistProfile(Profile),
}

/// Advance one attempt. Inputs that do not apply to the current phase leave
/// it unchanged and produce no effects; terminal phases absorb everything.
pub fn transition(
    phase: HandshakePhase,
    input: Input,
    correlation: &CorrelationState,
) -> (HandshakePhase, Vec<Effect>) {
    if phase.is_terminal() {
        return (phase, Vec::new());
    }

    match (phase, input) {
        (_, Input::Aborted { reason }) => (HandshakePhase::Failed { reason }, Vec::new()),

        (HandshakePhase::Idle, Input::SignInRequested) => (
            HandshakePhase::AwaitingAuthorizationUrl,
            vec![Effect::FetchAuthorizationUrl],
        ),

        (HandshakePhase::AwaitingAuthorizationUrl, Input::AuthorizationUrlReceived { url }) => (
            HandshakePhase::BrowserOpen,
            vec![
                Effect::ArmSubscription,
                Effect::OpenBrowser {
                    url: correlation.append_to(&url),
                },
            ],
        ),

        (HandshakePhase::BrowserOpen, Input::BrowserOpened) => (
            HandshakePhase::AwaitingCompletion,
            vec![Effect::AwaitCompletion],
        ),

        // A completion that races ahead of the browser-opened signal is accepted.
        (
            HandshakePhase::BrowserOpen | HandshakePhase::AwaitingCompletion,
            Input::Completion(result),
        ) => match result {
            HandshakeResult::Success { token, user_id, .. } => (
                HandshakePhase::AwaitingCompletion,
                vec![
                    Effect::PersistCredentials {
                        token: token.clone(),
                        user_id: user_id.clone(),
                    },
                    Effect::LookupProfile { token, user_id },
                ],
            ),
            HandshakeResult::Failure { reason } => {
                (HandshakePhase::Failed { reason }, Vec::new())
            }
        },

        (HandshakePhase::AwaitingCompletion, Input::ProfileLoaded(profile)) => (
            HandshakePhase::Authenticated {
                profile: profile.clone(),
            },
            vec![Effect::PersistProfile(profile)],
        ),

        (phase, _) => (phase, Vec::new()),
    }
}
