//! Build, stage and job statuses.

use serde::{Deserialize, Serialize};

/// Status of a build, a stage or a job.
///
/// The wire strings are stable: they appear in the `status` column and in
/// the serialized stage snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Building,
    Success,
    Fail,
    Stopped,
    Skipped,
    Waiting,
    Disabled,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Building => "Building",
            Status::Success => "Success",
            Status::Fail => "Fail",
            Status::Stopped => "Stopped",
            Status::Skipped => "Skipped",
            Status::Waiting => "Waiting",
            Status::Disabled => "Disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "Building" => Some(Status::Building),
            "Success" => Some(Status::Success),
            "Fail" => Some(Status::Fail),
            "Stopped" => Some(Status::Stopped),
            "Skipped" => Some(Status::Skipped),
            "Waiting" => Some(Status::Waiting),
            "Disabled" => Some(Status::Disabled),
            _ => None,
        }
    }

    /// A terminal build never transitions again except through restart.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Success | Status::Fail | Status::Stopped | Status::Skipped | Status::Disabled
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_status() {
        for status in [
            Status::Building,
            Status::Success,
            Status::Fail,
            Status::Stopped,
            Status::Skipped,
            Status::Waiting,
            Status::Disabled,
        ] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse("Pending"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Fail.is_terminal());
        assert!(Status::Stopped.is_terminal());
        assert!(Status::Skipped.is_terminal());
        assert!(Status::Disabled.is_terminal());
        assert!(!Status::Building.is_terminal());
        assert!(!Status::Waiting.is_terminal());
    }
}
