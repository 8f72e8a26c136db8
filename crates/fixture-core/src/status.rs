//! Check status values

use serde::{Deserialize, Serialize};

/// Outcome of a single named check
///
/// `NoMessage` is not a failure signal: it means the capture deadline elapsed
/// (or the stream closed) without any line the check's classifier recognises.
/// `Fail` means a recognised line explicitly reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    NoMessage,
    /// Check started but not yet resolved (e.g. waiting on the operator)
    Pending,
}

impl CheckStatus {
    pub fn is_pass(self) -> bool {
        self == CheckStatus::Pass
    }

    /// Whether this status is a final outcome rather than a placeholder
    pub fn is_resolved(self) -> bool {
        self != CheckStatus::Pending
    }

    pub fn from_pass(pass: bool) -> Self {
        if pass {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::NoMessage => "NO_MESSAGE",
            CheckStatus::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
