//! Connection state machine.
//!
//! The client tracks two independent axes, the push transport lifecycle and
//! the polling lifecycle, and exposes a single derived state computed from
//! both by priority. This module is pure: it reports what changed and the
//! client decides which side effects to run.

use std::fmt;

/// Push transport lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PushState {
    /// No transport.
    #[default]
    Offline,
    /// Transport opening or reconnecting.
    Connecting,
    /// Transport open.
    Connected,
    /// Transport closing on request.
    Disconnecting,
}

impl PushState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushState::Offline => "offline",
            PushState::Connecting => "connecting",
            PushState::Connected => "connected",
            PushState::Disconnecting => "disconnecting",
        }
    }
}

/// Polling lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PollState {
    /// Not polling.
    #[default]
    Offline,
    /// Waiting for the first room fetch over HTTP.
    Connecting,
    /// Sparse safety-net polling while push is primary.
    Medium,
    /// Polling carries the whole load.
    Full,
}

impl PollState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Offline => "offline",
            PollState::Connecting => "connecting",
            PollState::Medium => "medium",
            PollState::Full => "full",
        }
    }
}

/// The axis a sub-state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    /// A push axis value.
    Push(PushState),
    /// A polling axis value.
    Polling(PollState),
}

/// Both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionStates {
    /// Push axis.
    pub push: PushState,
    /// Polling axis.
    pub polling: PollState,
}

impl ConnectionStates {
    /// Creates a state tuple.
    pub fn new(push: PushState, polling: PollState) -> Self {
        Self { push, polling }
    }

    /// Both axes offline.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Returns true if both axes are offline.
    pub fn is_offline(&self) -> bool {
        self.push == PushState::Offline && self.polling == PollState::Offline
    }

    /// Returns a copy with one axis replaced.
    pub fn with(self, value: SubState) -> Self {
        match value {
            SubState::Push(push) => Self { push, ..self },
            SubState::Polling(polling) => Self { polling, ..self },
        }
    }

    /// Computes the derived state.
    ///
    /// Polling `full`/`connecting` wins over push `connected`/`connecting`,
    /// which wins over `offline`.
    pub fn derived(&self) -> DerivedState {
        match self.polling {
            PollState::Full => return DerivedState::PollingFull,
            PollState::Connecting => return DerivedState::PollingConnecting,
            PollState::Offline | PollState::Medium => {}
        }
        match self.push {
            PushState::Connected => DerivedState::PushConnected,
            PushState::Connecting => DerivedState::PushConnecting,
            PushState::Offline | PushState::Disconnecting => DerivedState::Offline,
        }
    }
}

impl fmt::Display for ConnectionStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push={} polling={}", self.push.as_str(), self.polling.as_str())
    }
}

/// The single state exposed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DerivedState {
    /// Nothing delivers events.
    #[default]
    Offline,
    /// Push transport opening.
    PushConnecting,
    /// Push is primary.
    PushConnected,
    /// Waiting for the first HTTP room fetch.
    PollingConnecting,
    /// Polling carries the whole load.
    PollingFull,
}

impl DerivedState {
    /// Returns the state name, e.g. `push:connected`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedState::Offline => "offline",
            DerivedState::PushConnecting => "push:connecting",
            DerivedState::PushConnected => "push:connected",
            DerivedState::PollingConnecting => "polling:connecting",
            DerivedState::PollingFull => "polling:full",
        }
    }
}

impl fmt::Display for DerivedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an accepted state change altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// States before the change.
    pub previous: ConnectionStates,
    /// States after the change.
    pub current: ConnectionStates,
    /// `(current, previous)` when the derived state changed.
    pub derived_change: Option<(DerivedState, DerivedState)>,
}

impl Transition {
    /// Returns true if the polling axis changed.
    pub fn polling_changed(&self) -> bool {
        self.previous.polling != self.current.polling
    }

    /// Returns true if the push axis changed.
    pub fn push_changed(&self) -> bool {
        self.previous.push != self.current.push
    }
}

/// Holds both axes and the last observed derived state.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    states: ConnectionStates,
    observed: DerivedState,
}

impl ConnectionStateMachine {
    /// Creates a machine with both axes offline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current states.
    pub fn states(&self) -> ConnectionStates {
        self.states
    }

    /// Last observed derived state.
    pub fn state(&self) -> DerivedState {
        self.observed
    }

    /// Replaces one axis.
    pub fn set(&mut self, value: SubState) -> Option<Transition> {
        self.apply(self.states.with(value))
    }

    /// Replaces both axes.
    ///
    /// Returns `None` when the tuple is unchanged; the caller must then run
    /// no side effect at all.
    pub fn apply(&mut self, states: ConnectionStates) -> Option<Transition> {
        if states == self.states {
            return None;
        }
        let previous = std::mem::replace(&mut self.states, states);

        let derived = states.derived();
        let derived_change = (derived != self.observed).then(|| {
            let before = std::mem::replace(&mut self.observed, derived);
            (derived, before)
        });

        Some(Transition {
            previous,
            current: states,
            derived_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_state_priority() {
        use PollState as P;
        use PushState as S;

        let cases = [
            (S::Connected, P::Full, DerivedState::PollingFull),
            (S::Connected, P::Connecting, DerivedState::PollingConnecting),
            (S::Connected, P::Medium, DerivedState::PushConnected),
            (S::Connecting, P::Offline, DerivedState::PushConnecting),
            (S::Disconnecting, P::Medium, DerivedState::Offline),
            (S::Offline, P::Offline, DerivedState::Offline),
        ];
        for (push, polling, expected) in cases {
            assert_eq!(ConnectionStates::new(push, polling).derived(), expected);
        }
    }

    #[test]
    fn same_value_is_not_a_transition() {
        let mut machine = ConnectionStateMachine::new();
        assert!(machine.set(SubState::Push(PushState::Offline)).is_none());

        machine.set(SubState::Push(PushState::Connecting));
        assert!(machine.set(SubState::Push(PushState::Connecting)).is_none());
    }

    #[test]
    fn derived_change_is_edge_triggered() {
        let mut machine = ConnectionStateMachine::new();

        let t = machine
            .apply(ConnectionStates::new(PushState::Connected, PollState::Medium))
            .unwrap();
        assert_eq!(
            t.derived_change,
            Some((DerivedState::PushConnected, DerivedState::Offline))
        );
        assert!(t.push_changed());
        assert!(t.polling_changed());

        // medium -> offline changes the tuple but not the derived state
        let t = machine.set(SubState::Polling(PollState::Offline)).unwrap();
        assert_eq!(t.derived_change, None);
        assert!(t.polling_changed());
        assert!(!t.push_changed());
        assert_eq!(machine.state(), DerivedState::PushConnected);
    }

    #[test]
    fn unsolicited_disconnect_falls_back_to_polling() {
        let mut machine = ConnectionStateMachine::new();
        machine.apply(ConnectionStates::new(PushState::Connected, PollState::Medium));

        let t = machine
            .apply(ConnectionStates::new(PushState::Offline, PollState::Full))
            .unwrap();
        assert_eq!(
            t.derived_change,
            Some((DerivedState::PollingFull, DerivedState::PushConnected))
        );
        assert_eq!(machine.states().to_string(), "push=offline polling=full");
    }
}
