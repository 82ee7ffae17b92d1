//! Session lifecycle states and event codes.

use super::SessionError;
use std::fmt;

/// Primary session states, in the only legal forward order.
///
/// `Definition` is the implicit initial state and is re-enterable from
/// any state to clear the session for a fresh build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SessionState {
    /// Topology being defined; nothing provisioned.
    Definition = 1,
    /// Bulk node/link configuration being received.
    Configuration = 2,
    /// Nodes and links being provisioned.
    Instantiation = 3,
    /// Emulation running in real time.
    Runtime = 4,
    /// Log/state collection against still-live nodes.
    Datacollect = 5,
    /// Links, then nodes, being torn down.
    Shutdown = 6,
}

impl SessionState {
    /// Try to convert from a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SessionState::Definition),
            2 => Some(SessionState::Configuration),
            3 => Some(SessionState::Instantiation),
            4 => Some(SessionState::Runtime),
            5 => Some(SessionState::Datacollect),
            6 => Some(SessionState::Shutdown),
            _ => None,
        }
    }

    /// Convert to a wire code.
    pub fn to_code(self) -> u32 {
        self as u32
    }

    /// The next state in the forward chain, if any.
    pub fn successor(self) -> Option<SessionState> {
        SessionState::from_code(self.to_code() + 1)
    }

    /// Whether a transition from `self` to `target` is legal: the
    /// target must be `Definition` (always reachable), equal to the
    /// current state (re-broadcast no-op), or strictly forward of it.
    pub fn can_transition_to(self, target: SessionState) -> bool {
        target == SessionState::Definition || target >= self
    }

    /// The ordered list of states entered when transitioning to
    /// `target`, walking the forward chain without skipping, or an
    /// error when the target is backward. An equal target yields an
    /// empty plan.
    pub fn transition_plan(self, target: SessionState) -> Result<Vec<SessionState>, SessionError> {
        if target == SessionState::Definition {
            return Ok(vec![SessionState::Definition]);
        }
        if target == self {
            return Ok(Vec::new());
        }
        if target < self {
            return Err(SessionError::IllegalTransition {
                from: self,
                to: target,
            });
        }
        let mut plan = Vec::new();
        let mut state = self;
        while let Some(next) = state.successor() {
            plan.push(next);
            state = next;
            if next == target {
                break;
            }
        }
        Ok(plan)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Definition => "definition",
            SessionState::Configuration => "configuration",
            SessionState::Instantiation => "instantiation",
            SessionState::Runtime => "runtime",
            SessionState::Datacollect => "datacollect",
            SessionState::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// Event codes carried by Event messages: the six primary states plus
/// sub-events in a disjoint range above them. Sub-events are broadcast
/// for hook execution and never change the primary state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    State(SessionState),
    Start,
    Stop,
    Pause,
    Restart,
    FileOpen,
    FileSave,
}

impl EventKind {
    /// Try to convert from a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        if let Some(state) = SessionState::from_code(code) {
            return Some(EventKind::State(state));
        }
        match code {
            7 => Some(EventKind::Start),
            8 => Some(EventKind::Stop),
            9 => Some(EventKind::Pause),
            10 => Some(EventKind::Restart),
            11 => Some(EventKind::FileOpen),
            12 => Some(EventKind::FileSave),
            _ => None,
        }
    }

    /// Convert to a wire code.
    pub fn to_code(self) -> u32 {
        match self {
            EventKind::State(state) => state.to_code(),
            EventKind::Start => 7,
            EventKind::Stop => 8,
            EventKind::Pause => 9,
            EventKind::Restart => 10,
            EventKind::FileOpen => 11,
            EventKind::FileSave => 12,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::State(state) => write!(f, "{}", state),
            EventKind::Start => write!(f, "start"),
            EventKind::Stop => write!(f, "stop"),
            EventKind::Pause => write!(f, "pause"),
            EventKind::Restart => write!(f, "restart"),
            EventKind::FileOpen => write!(f, "file-open"),
            EventKind::FileSave => write!(f, "file-save"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 6] = [
        SessionState::Definition,
        SessionState::Configuration,
        SessionState::Instantiation,
        SessionState::Runtime,
        SessionState::Datacollect,
        SessionState::Shutdown,
    ];

    #[test]
    fn test_state_codes_roundtrip() {
        for state in ALL {
            assert_eq!(SessionState::from_code(state.to_code()), Some(state));
        }
        assert!(SessionState::from_code(0).is_none());
        assert!(SessionState::from_code(7).is_none());
    }

    #[test]
    fn test_transition_matrix() {
        // Legal iff target is Definition or reachable forward from S.
        for s in ALL {
            for t in ALL {
                let expected = t == SessionState::Definition || t >= s;
                assert_eq!(
                    s.can_transition_to(t),
                    expected,
                    "transition {} -> {}",
                    s,
                    t
                );
            }
        }
    }

    #[test]
    fn test_specific_transitions() {
        assert!(!SessionState::Runtime.can_transition_to(SessionState::Configuration));
        assert!(SessionState::Runtime.can_transition_to(SessionState::Definition));
        assert!(SessionState::Configuration.can_transition_to(SessionState::Instantiation));
    }

    #[test]
    fn test_transition_plan_walks_chain() {
        let plan = SessionState::Definition
            .transition_plan(SessionState::Runtime)
            .unwrap();
        assert_eq!(
            plan,
            vec![
                SessionState::Configuration,
                SessionState::Instantiation,
                SessionState::Runtime
            ]
        );
    }

    #[test]
    fn test_transition_plan_equal_is_noop() {
        let plan = SessionState::Runtime
            .transition_plan(SessionState::Runtime)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_transition_plan_backward_rejected() {
        assert!(SessionState::Runtime
            .transition_plan(SessionState::Instantiation)
            .is_err());
    }

    #[test]
    fn test_definition_always_reachable() {
        for s in ALL {
            let plan = s.transition_plan(SessionState::Definition).unwrap();
            assert_eq!(plan, vec![SessionState::Definition]);
        }
    }

    #[test]
    fn test_event_kind_codes() {
        for code in 1..=12u32 {
            let kind = EventKind::from_code(code).unwrap();
            assert_eq!(kind.to_code(), code);
        }
        assert!(EventKind::from_code(0).is_none());
        assert!(EventKind::from_code(13).is_none());
    }

    #[test]
    fn test_sub_events_above_states() {
        // Sub-event codes occupy a disjoint range above the states.
        for kind in [
            EventKind::Start,
            EventKind::Stop,
            EventKind::Pause,
            EventKind::Restart,
        ] {
            assert!(kind.to_code() > SessionState::Shutdown.to_code());
        }
    }
}
