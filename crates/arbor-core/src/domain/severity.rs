use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a domain error, ordered by importance:
/// `Temporary < Normal < Critical`.
///
/// The derived `Ord` relies on the variant declaration order, so keep it
/// TEMPORARY, NORMAL, CRITICAL.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Expected transient condition; subscriptions treat it as a control
    /// signal, not a failure.
    Temporary,

    #[default]
    Normal,

    Critical,
}

impl Severity {
    /// True if `self` is strictly more important than `other`.
    pub fn outranks(self, other: Severity) -> bool {
        self > other
    }
}

/// Free-function form used where reading order matters in call sites.
pub fn compare_severity(first: Severity, second: Severity) -> bool {
    first.outranks(second)
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Temporary => "TEMPORARY",
            Severity::Normal => "NORMAL",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}
