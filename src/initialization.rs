//! Initialization State Machine Module
//!
//! Tracks overall readiness of the relay gateway and publishes it through a
//! `tokio::sync::watch` channel so UI-facing code can observe transitions.
//!
//! ## Transitions
//!
//! ```text
//! NotInitialized -> SetUp | FatalError | NonFatalError
//! SetUp          -> GatewayBinding | FatalError
//! GatewayBinding -> Initialized | NotInstalled | NonFatalError | FatalError
//! NotInstalled   -> GatewayBinding | FatalError
//! NonFatalError  -> SetUp | GatewayBinding | FatalError
//! Initialized    -> FatalError
//! FatalError     -> (terminal)
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Readiness of the relay gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitializationState {
    NotInitialized,
    SetUp,
    GatewayBinding,
    Initialized,
    /// The relay app is missing or refused to bind; re-probe on resume.
    NotInstalled,
    /// A retryable failure other than a missing relay app.
    NonFatalError,
    /// The encryption library is broken; only a process restart recovers.
    FatalError,
}

impl InitializationState {
    /// Stable integer code of the state.
    pub fn code(&self) -> i32 {
        match self {
            InitializationState::NotInitialized => 0,
            InitializationState::SetUp => 1,
            InitializationState::GatewayBinding => 2,
            InitializationState::Initialized => 3,
            InitializationState::NotInstalled => -1,
            InitializationState::NonFatalError => -2,
            InitializationState::FatalError => -999,
        }
    }

    pub fn can_transition_to(&self, next: InitializationState) -> bool {
        use InitializationState::*;
        matches!(
            (self, next),
            (NotInitialized, SetUp | FatalError | NonFatalError)
                | (SetUp, GatewayBinding | FatalError)
                | (
                    GatewayBinding,
                    Initialized | NotInstalled | NonFatalError | FatalError
                )
                | (NotInstalled, GatewayBinding | FatalError)
                | (NonFatalError, SetUp | GatewayBinding | FatalError)
                | (Initialized, FatalError)
        )
    }

    /// Whether the gateway may be (re-)bound from this state.
    pub fn can_bind(&self) -> bool {
        self.can_transition_to(InitializationState::GatewayBinding)
    }

    pub fn is_terminal(&self) -> bool {
        *self == InitializationState::FatalError
    }
}

/// Shared handle on the current initialization state.
#[derive(Debug, Clone)]
pub struct InitializationStateMachine {
    sender: Arc<watch::Sender<InitializationState>>,
}

impl InitializationStateMachine {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(InitializationState::NotInitialized);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> InitializationState {
        *self.sender.borrow()
    }

    /// Subscribes to state changes. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<InitializationState> {
        self.sender.subscribe()
    }

    /// Moves to `next` if the transition is allowed.
    ///
    /// Returns `false` and leaves the state unchanged otherwise.
    pub fn transition(&self, next: InitializationState) -> bool {
        let mut applied = false;
        let mut previous = next;
        self.sender.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                applied = true;
                true
            } else {
                false
            }
        });

        if applied {
            match next {
                InitializationState::FatalError => {
                    error!("Initialization state {:?} -> {:?}", previous, next)
                }
                InitializationState::NotInstalled | InitializationState::NonFatalError => {
                    warn!("Initialization state {:?} -> {:?}", previous, next)
                }
                _ => info!("Initialization state {:?} -> {:?}", previous, next),
            }
        } else {
            warn!(
                "Rejected initialization state transition {:?} -> {:?}",
                previous, next
            );
        }
        applied
    }
}

impl Default for InitializationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
