//! The async lifecycle state machine shared by every store and controller.

use std::fmt;

use crate::error::Error;

/// Tag identifying the phase of an [`AsyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    /// No operation has been issued.
    Idle,
    /// An operation is in flight.
    Pending,
    /// A success state undergoing an additional fetch-more operation.
    Fetching,
    /// The operation completed and produced data.
    Success,
    /// The last operation failed.
    Error,
}

/// All five state tags, in declaration order.
pub const STATE_IDS: [StateId; 5] = [
    StateId::Idle,
    StateId::Pending,
    StateId::Fetching,
    StateId::Success,
    StateId::Error,
];

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Transitions the guarded store applies. Anything else is a silent no-op,
/// which keeps a stale async resolution (e.g. a start promise settling after
/// a manual stop) from corrupting state.
const LEGAL_TRANSITIONS: [(StateId, StateId); 9] = [
    (StateId::Idle, StateId::Pending),
    (StateId::Idle, StateId::Success),
    (StateId::Idle, StateId::Error),
    (StateId::Pending, StateId::Idle),
    (StateId::Pending, StateId::Success),
    (StateId::Pending, StateId::Error),
    (StateId::Success, StateId::Idle),
    (StateId::Error, StateId::Idle),
    (StateId::Error, StateId::Pending),
];

/// Whether the guarded store will apply a `from → to` transition.
#[must_use]
pub fn is_legal_transition(from: StateId, to: StateId) -> bool {
    LEGAL_TRANSITIONS.contains(&(from, to))
}

/// Lifecycle of an asynchronous value.
///
/// Exactly one variant is active at a time; data and error presence match
/// the tag exclusively.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AsyncState<T> {
    /// No operation has been issued.
    #[default]
    Idle,
    /// An operation is in flight.
    Pending,
    /// A success state with a fetch-more in flight; prior data is retained.
    Fetching(T),
    /// The operation completed.
    Success(T),
    /// The last operation failed.
    Error(Error),
}

impl<T> AsyncState<T> {
    /// The tag of this state.
    #[must_use]
    pub const fn id(&self) -> StateId {
        match self {
            Self::Idle => StateId::Idle,
            Self::Pending => StateId::Pending,
            Self::Fetching(_) => StateId::Fetching,
            Self::Success(_) => StateId::Success,
            Self::Error(_) => StateId::Error,
        }
    }

    /// Whether this state is [`Idle`](Self::Idle).
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether this state is [`Pending`](Self::Pending).
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether this state is [`Fetching`](Self::Fetching).
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        matches!(self, Self::Fetching(_))
    }

    /// Whether this state is [`Success`](Self::Success).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Whether this state is [`Error`](Self::Error).
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The carried data, present for `Success` and `Fetching`.
    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Fetching(data) | Self::Success(data) => Some(data),
            _ => None,
        }
    }

    /// The preserved error, present for `Error`.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Wire-safe projection: the tag and error survive, the data does not.
    #[must_use]
    pub fn to_wire(&self) -> WireState {
        WireState {
            id: self.id(),
            error: self.error().cloned(),
        }
    }
}

/// The shape of a state as it crosses the bridge: tag plus error, with data
/// payloads stripped. Local consumers of a store see the full
/// [`AsyncState`]; subscribers on the far side of the bridge see this.
#[derive(Debug, Clone, PartialEq)]
pub struct WireState {
    /// The state tag.
    pub id: StateId,
    /// The preserved error, if the tag is [`StateId::Error`].
    pub error: Option<Error>,
}

impl WireState {
    /// Rehydrate into a data-free [`AsyncState`].
    #[must_use]
    pub fn into_state(self) -> AsyncState<()> {
        match self.id {
            StateId::Idle => AsyncState::Idle,
            StateId::Pending => AsyncState::Pending,
            StateId::Fetching => AsyncState::Fetching(()),
            StateId::Success => AsyncState::Success(()),
            StateId::Error => AsyncState::Error(
                self.error
                    .unwrap_or_else(|| Error::Service("unknown error".into())),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listed_transitions_are_legal() {
        let legal = [
            (StateId::Idle, StateId::Pending),
            (StateId::Idle, StateId::Success),
            (StateId::Idle, StateId::Error),
            (StateId::Pending, StateId::Idle),
            (StateId::Pending, StateId::Success),
            (StateId::Pending, StateId::Error),
            (StateId::Success, StateId::Idle),
            (StateId::Error, StateId::Idle),
            (StateId::Error, StateId::Pending),
        ];
        for from in STATE_IDS {
            for to in STATE_IDS {
                assert_eq!(
                    is_legal_transition(from, to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn fetching_is_never_a_guarded_target() {
        for from in STATE_IDS {
            assert!(!is_legal_transition(from, StateId::Fetching));
            assert!(!is_legal_transition(StateId::Fetching, from));
        }
    }

    #[test]
    fn wire_projection_strips_data_and_keeps_error() {
        let ok: AsyncState<Vec<u8>> = AsyncState::Success(vec![1, 2, 3]);
        let wire = ok.to_wire();
        assert_eq!(wire.id, StateId::Success);
        assert!(wire.error.is_none());
        assert_eq!(wire.into_state(), AsyncState::Success(()));

        let err: AsyncState<Vec<u8>> = AsyncState::Error(Error::ClientNotFound);
        let wire = err.to_wire();
        assert_eq!(wire.id, StateId::Error);
        assert_eq!(wire.error, Some(Error::ClientNotFound));
    }
}
