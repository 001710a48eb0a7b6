//! Test run reports
//!
//! The report is the only output of a run: everything a scenario observed
//! (checks, queries, notes) lands here and is written out as JSON.

pub mod summary;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::dss::Query;
use crate::scenario::check::Severity;

/// Participant key used for checks that name no participant
pub const UNATTRIBUTED: &str = "(unattributed)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassedCheck {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub requirements: Vec<String>,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCheck {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub requirements: Vec<String>,
    pub participants: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    pub severity: Severity,
    #[serde(default)]
    pub query_timestamps: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStepReport {
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passed_checks: Vec<PassedCheck>,
    #[serde(default)]
    pub failed_checks: Vec<FailedCheck>,
    #[serde(default)]
    pub queries: Vec<Query>,
}

impl TestStepReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            passed_checks: Vec::new(),
            failed_checks: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn successful(&self) -> bool {
        !self
            .failed_checks
            .iter()
            .any(|c| c.severity.fails_scenario())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseReport {
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<TestStepReport>,
}

impl TestCaseReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Error that stopped a scenario before it completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Error> for ExecutionError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScenarioReport {
    pub name: String,
    pub scenario_type: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cases: Vec<TestCaseReport>,
    #[serde(default)]
    pub cleanup: Option<TestStepReport>,
    #[serde(default)]
    pub notes: BTreeMap<String, Note>,
    #[serde(default)]
    pub execution_error: Option<ExecutionError>,
    pub successful: bool,
}

impl TestScenarioReport {
    pub fn new(name: impl Into<String>, scenario_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenario_type: scenario_type.into(),
            start_time: Utc::now(),
            end_time: None,
            cases: Vec::new(),
            cleanup: None,
            notes: BTreeMap::new(),
            execution_error: None,
            successful: false,
        }
    }

    /// Every step of the scenario including cleanup, in execution order
    pub fn steps(&self) -> impl Iterator<Item = &TestStepReport> {
        self.cases
            .iter()
            .flat_map(|c| c.steps.iter())
            .chain(self.cleanup.iter())
    }

    pub fn passed_checks(&self) -> impl Iterator<Item = &PassedCheck> {
        self.steps().flat_map(|s| s.passed_checks.iter())
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &FailedCheck> {
        self.steps().flat_map(|s| s.failed_checks.iter())
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.steps().flat_map(|s| s.queries.iter())
    }

    /// Find a step by case and step name
    pub fn step(&self, case: &str, step: &str) -> Option<&TestStepReport> {
        self.cases
            .iter()
            .filter(|c| c.name == case)
            .flat_map(|c| c.steps.iter())
            .find(|s| s.name == step)
    }

    /// No execution error and no failed check of Medium severity or above
    pub fn compute_successful(&self) -> bool {
        self.execution_error.is_none() && self.steps().all(TestStepReport::successful)
    }
}

/// Pass/fail counts for one requirement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementTally {
    pub passed: usize,
    pub failed: usize,
}

/// participant -> requirement -> tally
pub type RequirementSummary = BTreeMap<String, BTreeMap<String, RequirementTally>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunReport {
    pub codebase_version: String,
    pub suite: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub scenarios: Vec<TestScenarioReport>,
    pub successful: bool,
    /// A Critical failure stopped the run before every scenario ran
    #[serde(default)]
    pub aborted: bool,
}

impl TestRunReport {
    pub fn failed_scenarios(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.successful).count()
    }

    pub fn requirement_summary(&self) -> RequirementSummary {
        let mut summary = RequirementSummary::new();
        let mut tally = |participants: &[String], requirements: &[String], passed: bool| {
            let unattributed = [UNATTRIBUTED.to_string()];
            let participants = if participants.is_empty() {
                &unattributed[..]
            } else {
                participants
            };
            for participant in participants {
                let by_requirement = summary.entry(participant.clone()).or_default();
                for requirement in requirements {
                    let entry = by_requirement.entry(requirement.clone()).or_default();
                    if passed {
                        entry.passed += 1;
                    } else {
                        entry.failed += 1;
                    }
                }
            }
        };
        for scenario in &self.scenarios {
            for check in scenario.passed_checks() {
                tally(&check.participants, &check.requirements, true);
            }
            for check in scenario.failed_checks() {
                tally(&check.participants, &check.requirements, false);
            }
        }
        summary
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn failed(name: &str, severity: Severity, participants: &[&str]) -> FailedCheck {
        FailedCheck {
            name: name.to_string(),
            timestamp: Utc::now(),
            requirements: vec!["req.X".to_string()],
            participants: participants.iter().map(|p| p.to_string()).collect(),
            summary: "failed".to_string(),
            details: String::new(),
            severity,
            query_timestamps: vec![],
        }
    }

    fn passed(name: &str, participants: &[&str]) -> PassedCheck {
        PassedCheck {
            name: name.to_string(),
            timestamp: Utc::now(),
            requirements: vec!["req.X".to_string(), "req.Y".to_string()],
            participants: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn scenario_with(step: TestStepReport) -> TestScenarioReport {
        let mut scenario = TestScenarioReport::new("S", "test.S");
        let mut case = TestCaseReport::new("C");
        case.steps.push(step);
        scenario.cases.push(case);
        scenario
    }

    #[test]
    fn test_low_severity_is_advisory() {
        let mut step = TestStepReport::new("Step");
        step.failed_checks.push(failed("a", Severity::Low, &["uss1"]));
        assert!(scenario_with(step.clone()).compute_successful());

        step.failed_checks.push(failed("b", Severity::Medium, &["uss1"]));
        assert!(!scenario_with(step).compute_successful());
    }

    #[test]
    fn test_execution_error_fails_scenario() {
        let mut scenario = scenario_with(TestStepReport::new("Step"));
        assert!(scenario.compute_successful());
        scenario.execution_error = Some((&Error::Internal("boom".into())).into());
        assert!(!scenario.compute_successful());
    }

    #[test]
    fn test_requirement_summary_by_participant() {
        let mut step = TestStepReport::new("Step");
        step.passed_checks.push(passed("p", &["uss1", "uss2"]));
        step.failed_checks.push(failed("f", Severity::High, &["uss2"]));
        step.failed_checks.push(failed("g", Severity::Low, &[]));
        let report = TestRunReport {
            codebase_version: "0".into(),
            suite: "suite".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            scenarios: vec![scenario_with(step)],
            successful: false,
            aborted: false,
        };
        let summary = report.requirement_summary();
        assert_eq!(
            summary["uss1"]["req.X"],
            RequirementTally {
                passed: 1,
                failed: 0
            }
        );
        assert_eq!(
            summary["uss2"]["req.X"],
            RequirementTally {
                passed: 1,
                failed: 1
            }
        );
        assert_eq!(summary["uss2"]["req.Y"].passed, 1);
        assert_eq!(summary[UNATTRIBUTED]["req.X"].failed, 1);
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let report = TestRunReport {
            codebase_version: "0".into(),
            suite: "suite".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            scenarios: vec![scenario_with(TestStepReport::new("Step"))],
            successful: true,
            aborted: false,
        };
        report.write(&path).unwrap();
        let loaded = TestRunReport::load(&path).unwrap();
        assert_eq!(loaded.suite, "suite");
        assert_eq!(loaded.scenarios[0].cases[0].steps[0].name, "Step");
    }
}
