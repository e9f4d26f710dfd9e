//! Error kinds for the placement engine: a handful of named failure modes
//! rather than one generic error type, each divergence mode carrying the
//! stable numeric code (303-307) the logs report.

use std::fmt;

/// Numeric divergence codes; a stable integer is surfaced alongside the
/// message so logs stay grep-able across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergeKind {
    /// Initial step length stayed NaN/Inf after the bounded retry budget.
    InitStep,
    /// Predicted step length went NaN/Inf mid-loop.
    NumericStep,
    /// Wirelength or density gradient sum went NaN/Inf.
    Gradient,
    /// Overflow grew 20% past its min-seen value while still regressing HPWL.
    Overflow,
}

impl DivergeKind {
    pub fn code(self) -> u32 {
        match self {
            DivergeKind::InitStep => 304,
            DivergeKind::NumericStep => 305,
            DivergeKind::Gradient => 306,
            DivergeKind::Overflow => 307,
        }
    }
}

impl fmt::Display for DivergeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DivergeKind::InitStep => "InitStepDivergence",
            DivergeKind::NumericStep => "NumericDivergence",
            DivergeKind::Gradient => "GradientDivergence",
            DivergeKind::Overflow => "OverflowDivergence",
        };
        write!(f, "{name}({})", self.code())
    }
}

/// Top-level error surfaced across the engine's public API.
#[derive(Debug)]
pub enum PlaceError {
    /// A hard input-data violation: oversized cell, utilization > 100%, core
    /// outside die, etc. Always fatal.
    InputInvariant(String),
    /// A numeric/gradient/overflow divergence detected by the Nesterov loop.
    /// Carries whether a snapshot revert was already attempted before the
    /// failure became fatal.
    Diverged {
        kind: DivergeKind,
        message: String,
        reverted: bool,
    },
    /// Routability could not be satisfied even after reverting the bloat.
    RoutabilityUnsolvable(String),
}

impl PlaceError {
    pub fn input_invariant(message: impl Into<String>) -> Self {
        PlaceError::InputInvariant(message.into())
    }

    pub fn diverged(kind: DivergeKind, message: impl Into<String>, reverted: bool) -> Self {
        PlaceError::Diverged {
            kind,
            message: message.into(),
            reverted,
        }
    }
}

impl fmt::Display for PlaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceError::InputInvariant(msg) => write!(f, "invalid placement input: {msg}"),
            PlaceError::Diverged {
                kind,
                message,
                reverted,
            } => write!(
                f,
                "{kind}: {message} (revert {})",
                if *reverted { "attempted" } else { "not attempted" }
            ),
            PlaceError::RoutabilityUnsolvable(msg) => {
                write!(f, "RoutabilityUnsolvable(303): {msg}")
            }
        }
    }
}

impl std::error::Error for PlaceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_codes_are_stable() {
        assert_eq!(DivergeKind::InitStep.code(), 304);
        assert_eq!(DivergeKind::NumericStep.code(), 305);
        assert_eq!(DivergeKind::Gradient.code(), 306);
        assert_eq!(DivergeKind::Overflow.code(), 307);
    }

    #[test]
    fn display_includes_code() {
        let e = PlaceError::diverged(DivergeKind::Overflow, "overflow regressed", true);
        assert!(e.to_string().contains("307"));
        assert!(e.to_string().contains("attempted"));
    }
}
