use serde::{Deserialize, Serialize};
use std::fmt;

/// Issue criticality, ordered from least to most severe.
///
/// The `NotApplicable*` variants rank below every applicable severity so a
/// direct dependency whose only issues were found unreachable never outranks
/// one with a real finding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    NotApplicableUnknown,
    NotApplicableLow,
    NotApplicableMedium,
    NotApplicableHigh,
    NotApplicableCritical,
    Unknown,
    Information,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::NotApplicableUnknown => "Unknown (Not Applicable)",
            Severity::NotApplicableLow => "Low (Not Applicable)",
            Severity::NotApplicableMedium => "Medium (Not Applicable)",
            Severity::NotApplicableHigh => "High (Not Applicable)",
            Severity::NotApplicableCritical => "Critical (Not Applicable)",
            Severity::Unknown => "Unknown",
            Severity::Information => "Information",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Parses the severity strings the scanning service emits.
    ///
    /// Unrecognized values map to [`Severity::Unknown`].
    pub fn from_service(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            "information" | "info" | "note" => Severity::Information,
            _ => Severity::Unknown,
        }
    }

    /// Returns the not-applicable counterpart used once a reachability scan
    /// proves the issue is not exercised by the source.
    pub fn to_not_applicable(self) -> Self {
        match self {
            Severity::Critical => Severity::NotApplicableCritical,
            Severity::High => Severity::NotApplicableHigh,
            Severity::Medium => Severity::NotApplicableMedium,
            Severity::Low => Severity::NotApplicableLow,
            Severity::Unknown | Severity::Information => Severity::NotApplicableUnknown,
            other => other,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
