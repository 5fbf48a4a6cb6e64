use serde::{Deserialize, Serialize};

/// Normalized result of a single job/check execution.
///
/// Every raw status string from any source maps to exactly one variant;
/// unrecognized or absent values fall back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    Aborted,
    Pending,
    Skipped,
    InfraFailure,
}

impl Outcome {
    /// Canonical label for this outcome. Feeding it back through
    /// [`classify`] returns the same variant.
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Aborted => "cancelled",
            Outcome::Pending => "pending",
            Outcome::Skipped => "skipped",
            Outcome::InfraFailure => "infrastructure_fail",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Outcome::Pending
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps a raw status string from any source system to an [`Outcome`].
///
/// Total over all inputs: `None`, empty strings and unknown values all
/// classify as `Pending` rather than erroring.
pub fn classify(raw: Option<&str>) -> Outcome {
    match raw {
        Some("SUCCESS" | "success") => Outcome::Success,
        Some("FAILURE" | "failure" | "error" | "timed_out") => Outcome::Failure,
        Some("ABORTED" | "cancelled") => Outcome::Aborted,
        Some("skipped") => Outcome::Skipped,
        Some("infrastructure_fail") => Outcome::InfraFailure,
        _ => Outcome::Pending,
    }
}
