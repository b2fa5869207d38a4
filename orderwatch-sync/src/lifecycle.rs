//! Engine activation state machine.
//!
//! Transition table:
//!
//! | from      | Activate | Pause    | Resume   | Teardown |
//! |-----------|----------|----------|----------|----------|
//! | `Stopped` | `Active` | -        | -        | terminal |
//! | `Active`  | -        | `Paused` | -        | terminal |
//! | `Paused`  | -        | -        | `Active` | terminal |
//!
//! `-` is a no-op. Once torn down, every transition is rejected.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Active,
    Paused,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activate,
    Pause,
    Resume,
    Teardown,
}

/// What the owner of the transport has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing changed.
    None,
    /// Start the transport.
    Start,
    /// Stop the transport.
    Stop,
    /// Start the transport and fetch once out of band.
    StartAndRefresh,
    /// Stop the transport and release everything; terminal.
    Release,
    /// The controller was already torn down.
    Rejected,
}

#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: LifecycleState,
    torn_down: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !self.torn_down && self.state == LifecycleState::Active
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn apply(&mut self, transition: Transition) -> Effect {
        if self.torn_down {
            return Effect::Rejected;
        }

        let (next, effect) = match (self.state, transition) {
            (LifecycleState::Stopped, Transition::Activate) => (LifecycleState::Active, Effect::Start),
            (LifecycleState::Active, Transition::Pause) => (LifecycleState::Paused, Effect::Stop),
            (LifecycleState::Paused, Transition::Resume) => {
                (LifecycleState::Active, Effect::StartAndRefresh)
            }
            (_, Transition::Teardown) => {
                self.torn_down = true;
                (LifecycleState::Stopped, Effect::Release)
            }
            (state, _) => (state, Effect::None),
        };

        if next != self.state {
            tracing::debug!("lifecycle {} -> {} ({:?})", self.state, next, transition);
        }
        self.state = next;
        effect
    }
}
