//! Check outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad a failed check is
///
/// Low is advisory. Medium fails the scenario. High additionally stops the
/// scenario (cleanup still runs) and Critical stops the whole test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn fails_scenario(self) -> bool {
        self >= Severity::Medium
    }

    pub fn stops_scenario(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

/// Description of a check failure
#[derive(Debug, Clone)]
pub struct Failure {
    pub summary: String,
    pub details: String,
    /// Overrides the severity documented for the check
    pub severity: Option<Severity>,
    pub query_timestamps: Vec<DateTime<Utc>>,
}

impl Failure {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: String::new(),
            severity: None,
            query_timestamps: Vec::new(),
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn queries(mut self, timestamps: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.query_timestamps.extend(timestamps);
        self
    }
}

/// A check that has been opened but not yet evaluated
///
/// Dropping it without recording an outcome leaves the check out of the
/// report, which is how a check that did not apply is expressed.
#[must_use = "a check must be passed or failed to appear in the report"]
#[derive(Debug)]
pub struct PendingCheck {
    pub(super) name: &'static str,
    pub(super) requirements: &'static [&'static str],
    pub(super) severity: Severity,
    pub(super) participants: Vec<String>,
}

impl PendingCheck {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn requirements(&self) -> &[&'static str] {
        self.requirements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_thresholds() {
        assert!(!Severity::Low.fails_scenario());
        assert!(Severity::Medium.fails_scenario());
        assert!(!Severity::Medium.stops_scenario());
        assert!(Severity::High.stops_scenario());
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_failure_builder() {
        let now = Utc::now();
        let f = Failure::new("bad")
            .details("really bad")
            .severity(Severity::Low)
            .queries([now]);
        assert_eq!(f.summary, "bad");
        assert_eq!(f.severity, Some(Severity::Low));
        assert_eq!(f.query_timestamps, vec![now]);
    }
}
