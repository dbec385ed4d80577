use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HpipeError;

/// Lifecycle of a step or job.
///
/// `Done` and `Fail` are terminal within a run. A later run may move a
/// `Fail` or `Todo` job back to `Doing`, but never a `Done` one unless a
/// rerun is forced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Todo,
    Doing,
    Done,
    Fail,
}

impl Status {
    /// The form stored in the status ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "TODO",
            Status::Doing => "DOING",
            Status::Done => "DONE",
            Status::Fail => "FAIL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Fail)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = HpipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(Status::Todo),
            "DOING" => Ok(Status::Doing),
            "DONE" => Ok(Status::Done),
            "FAIL" => Ok(Status::Fail),
            other => Err(HpipeError::Database(format!("unknown status '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_strings() {
        for status in [Status::Todo, Status::Doing, Status::Done, Status::Fail] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn test_terminal() {
        assert!(!Status::Todo.is_terminal());
        assert!(!Status::Doing.is_terminal());
        assert!(Status::Done.is_terminal());
        assert!(Status::Fail.is_terminal());
        assert_eq!(Status::default(), Status::Todo);
    }
}
