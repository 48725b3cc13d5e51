//! Sessions and their state machine.
//!
//! A session is a single live run of a deployment. At most one non-terminal
//! session exists per deployment unless a start was forced. Terminal states
//! are immutable: the status consumer and the catalog both reject any
//! transition out of `stopped` or `crashed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "crashed" => Ok(Self::Crashed),
            other => Err(Error::validation(format!("unknown session status {other:?}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Position in the lifecycle; transitions never decrease it.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Stopped | Self::Crashed => 4,
        }
    }

    /// Monotonic transition rule applied by the status consumer and the
    /// supervisor. A terminal session never moves; equal-rank re-delivery
    /// of the same status is not a transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        // `crashed` is reachable from any live state, including `stopping`.
        if next == Self::Crashed {
            return true;
        }
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: i64,
    pub sgc_id: i64,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl Session {
    /// Deterministic container name: `<env>-<sgc_id>-<session_id>`, or
    /// `<sgc_id>-<session_id>` without an environment.
    pub fn container_name(sgc_id: i64, session_id: i64, environment: Option<&str>) -> String {
        match environment {
            Some(env) if !env.is_empty() => format!("{env}-{sgc_id}-{session_id}"),
            _ => format!("{sgc_id}-{session_id}"),
        }
    }
}

/// Per-host session counts carried in heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: u32,
    pub pending: u32,
    pub starting: u32,
    pub running: u32,
    pub stopping: u32,
    pub stopped: u32,
    pub crashed: u32,
}

impl SessionStats {
    pub fn record(&mut self, status: SessionStatus) {
        self.total += 1;
        match status {
            SessionStatus::Pending => self.pending += 1,
            SessionStatus::Starting => self.starting += 1,
            SessionStatus::Running => self.running += 1,
            SessionStatus::Stopping => self.stopping += 1,
            SessionStatus::Stopped => self.stopped += 1,
            SessionStatus::Crashed => self.crashed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_immutable() {
        for terminal in [SessionStatus::Stopped, SessionStatus::Crashed] {
            for next in [
                SessionStatus::Pending,
                SessionStatus::Starting,
                SessionStatus::Running,
                SessionStatus::Stopping,
                SessionStatus::Stopped,
                SessionStatus::Crashed,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::Starting));
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Running));
        assert!(SessionStatus::Running.can_transition_to(SessionStatus::Stopping));
        assert!(SessionStatus::Stopping.can_transition_to(SessionStatus::Stopped));
        // A stop can be requested before the container ever ran.
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::Stopping));
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(!SessionStatus::Running.can_transition_to(SessionStatus::Starting));
        assert!(!SessionStatus::Stopping.can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Running.can_transition_to(SessionStatus::Running));
    }

    #[test]
    fn crash_reachable_from_any_live_state() {
        for live in [
            SessionStatus::Pending,
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Stopping,
        ] {
            assert!(live.can_transition_to(SessionStatus::Crashed), "{live:?}");
        }
    }

    #[test]
    fn container_name_formats() {
        assert_eq!(Session::container_name(42, 101, Some("dev")), "dev-42-101");
        assert_eq!(Session::container_name(42, 101, None), "42-101");
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = SessionStats::default();
        stats.record(SessionStatus::Running);
        stats.record(SessionStatus::Running);
        stats.record(SessionStatus::Crashed);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 2);
        assert_eq!(stats.crashed, 1);
    }
}
