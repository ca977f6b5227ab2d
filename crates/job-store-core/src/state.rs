//! Trigger state machine.
//!
//! A closed enumeration with explicit `parse`/`render` at the database
//! boundary, so the string contract the base job store persists
//! (`WAITING`, `ACQUIRED`, ...) is preserved bit-exactly no matter how the
//! delegate maps Postgres rows onto it.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// `WAITING -> ACQUIRED -> EXECUTING -> (WAITING | COMPLETE | BLOCKED)`,
/// an orthogonal pause axis (`PAUSED <-> PAUSED_BLOCKED`), and an error
/// sink (`ERROR`). No new states are introduced on top of the base store's
/// contract — only new reasons for transitioning into `BLOCKED` /
/// `PAUSED_BLOCKED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerState {
    Waiting,
    Acquired,
    Executing,
    Complete,
    Blocked,
    Paused,
    PausedBlocked,
    Error,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown trigger state literal: {0}")]
pub struct UnknownTriggerState(pub String);

impl TriggerState {
    /// Render exactly as the base store's string contract expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Acquired => "ACQUIRED",
            Self::Executing => "EXECUTING",
            Self::Complete => "COMPLETE",
            Self::Blocked => "BLOCKED",
            Self::Paused => "PAUSED",
            Self::PausedBlocked => "PAUSED_BLOCKED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_paused_family(&self) -> bool {
        matches!(self, Self::Paused | Self::PausedBlocked)
    }

    /// The sibling-sweep counterpart: `BLOCKED -> WAITING`,
    /// `PAUSED_BLOCKED -> PAUSED`, identity otherwise.
    pub fn unblocked(&self) -> Self {
        match self {
            Self::Blocked => Self::Waiting,
            Self::PausedBlocked => Self::Paused,
            other => *other,
        }
    }

    /// The sibling-sweep counterpart going the other way:
    /// `WAITING -> BLOCKED`, `ACQUIRED -> BLOCKED`, `PAUSED -> PAUSED_BLOCKED`.
    pub fn blocked(&self) -> Option<Self> {
        match self {
            Self::Waiting | Self::Acquired => Some(Self::Blocked),
            Self::Paused => Some(Self::PausedBlocked),
            _ => None,
        }
    }
}

impl FromStr for TriggerState {
    type Err = UnknownTriggerState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "ACQUIRED" => Ok(Self::Acquired),
            "EXECUTING" => Ok(Self::Executing),
            "COMPLETE" => Ok(Self::Complete),
            "BLOCKED" => Ok(Self::Blocked),
            "PAUSED" => Ok(Self::Paused),
            "PAUSED_BLOCKED" => Ok(Self::PausedBlocked),
            "ERROR" => Ok(Self::Error),
            other => Err(UnknownTriggerState(other.to_string())),
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_literal() {
        let all = [
            TriggerState::Waiting,
            TriggerState::Acquired,
            TriggerState::Executing,
            TriggerState::Complete,
            TriggerState::Blocked,
            TriggerState::Paused,
            TriggerState::PausedBlocked,
            TriggerState::Error,
        ];
        for state in all {
            let parsed: TriggerState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn rejects_unknown_literal() {
        assert!("SOMETHING_ELSE".parse::<TriggerState>().is_err());
    }

    #[test]
    fn blocked_unblocked_are_inverse_on_pause_axis() {
        assert_eq!(TriggerState::Waiting.blocked(), Some(TriggerState::Blocked));
        assert_eq!(TriggerState::Blocked.unblocked(), TriggerState::Waiting);
        assert_eq!(
            TriggerState::Paused.blocked(),
            Some(TriggerState::PausedBlocked)
        );
        assert_eq!(TriggerState::PausedBlocked.unblocked(), TriggerState::Paused);
    }
}
