//! Scenario execution context
//!
//! Tracks where a scenario is in its lifecycle and collects everything it
//! reports. Test cases, steps and checks must be declared in the scenario's
//! documentation and opened in order; anything else is an error rather than a
//! silently malformed report.

use std::fmt;
use std::time::Duration;

use chrono::Utc;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::dss::Query;
use crate::report::{
    ExecutionError, FailedCheck, Note, PassedCheck, TestCaseReport, TestScenarioReport,
    TestStepReport,
};

use super::check::{Failure, PendingCheck, Severity};
use super::documentation::{ScenarioDocumentation, TestCaseDocumentation, TestStepDocumentation};

/// Lifecycle of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    ReadyForTestCase,
    RunningTestCase,
    RunningTestStep,
    ReadyForCleanup,
    CleaningUp,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "not started",
            Phase::ReadyForTestCase => "ready for a test case",
            Phase::RunningTestCase => "running a test case",
            Phase::RunningTestStep => "running a test step",
            Phase::ReadyForCleanup => "ready for cleanup",
            Phase::CleaningUp => "cleaning up",
            Phase::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

/// Run-wide knobs scenarios read while executing
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Upper bound on concurrent requests in a burst
    pub max_in_flight: usize,
    /// How long to wait for other DSS instances to converge
    pub propagation_timeout: Duration,
    pub propagation_poll: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.concurrency.max_in_flight.max(1),
            propagation_timeout: config.timeouts.propagation(),
            propagation_poll: config.timeouts.propagation_poll(),
        }
    }
}

pub struct ScenarioContext {
    doc: &'static ScenarioDocumentation,
    settings: RunSettings,
    phase: Phase,
    report: TestScenarioReport,
    case: Option<(&'static TestCaseDocumentation, TestCaseReport)>,
    step: Option<(&'static TestStepDocumentation, TestStepReport)>,
}

impl ScenarioContext {
    pub fn new(
        doc: &'static ScenarioDocumentation,
        name: impl Into<String>,
        scenario_type: impl Into<String>,
        settings: RunSettings,
    ) -> Self {
        Self {
            doc,
            settings,
            phase: Phase::NotStarted,
            report: TestScenarioReport::new(name, scenario_type),
            case: None,
            step: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn scenario_name(&self) -> &str {
        &self.report.name
    }

    fn expect_phase(&self, action: &str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::invalid_phase(action, self.phase))
        }
    }

    pub fn begin_scenario(&mut self) -> Result<()> {
        self.expect_phase("begin scenario", &[Phase::NotStarted])?;
        tracing::info!(scenario = %self.report.name, "Starting scenario");
        self.report.start_time = Utc::now();
        self.phase = Phase::ReadyForTestCase;
        Ok(())
    }

    /// Mark the end of the scenario body; cleanup comes next
    pub fn end_scenario(&mut self) -> Result<()> {
        self.expect_phase("end scenario", &[Phase::ReadyForTestCase])?;
        self.phase = Phase::ReadyForCleanup;
        Ok(())
    }

    pub fn begin_test_case(&mut self, name: &str) -> Result<()> {
        self.expect_phase("begin test case", &[Phase::ReadyForTestCase])?;
        let doc = self
            .doc
            .case(name)
            .ok_or_else(|| Error::undocumented(self.doc.name, "test case", name))?;
        tracing::info!(scenario = %self.report.name, case = name, "Test case");
        self.case = Some((doc, TestCaseReport::new(name)));
        self.phase = Phase::RunningTestCase;
        Ok(())
    }

    pub fn end_test_case(&mut self) -> Result<()> {
        self.expect_phase("end test case", &[Phase::RunningTestCase])?;
        self.close_case();
        self.phase = Phase::ReadyForTestCase;
        Ok(())
    }

    pub fn begin_test_step(&mut self, name: &str) -> Result<()> {
        self.expect_phase("begin test step", &[Phase::RunningTestCase])?;
        let case_doc = match &self.case {
            Some((doc, _)) => *doc,
            None => return Err(Error::invalid_phase("begin test step", self.phase)),
        };
        let doc = case_doc
            .step(name)
            .ok_or_else(|| Error::undocumented(self.doc.name, "test step", name))?;
        tracing::info!(case = case_doc.name, step = name, "Test step");
        self.step = Some((doc, TestStepReport::new(name)));
        self.phase = Phase::RunningTestStep;
        Ok(())
    }

    pub fn end_test_step(&mut self) -> Result<()> {
        self.expect_phase("end test step", &[Phase::RunningTestStep])?;
        self.close_step();
        self.phase = Phase::RunningTestCase;
        Ok(())
    }

    /// Close whatever is open and move straight to cleanup
    ///
    /// Used when a scenario stops early; never fails.
    pub fn go_to_cleanup(&mut self) {
        match self.phase {
            Phase::CleaningUp => {
                self.close_cleanup();
                self.phase = Phase::Complete;
            }
            Phase::Complete | Phase::ReadyForCleanup => {}
            _ => {
                self.close_step();
                self.close_case();
                self.phase = Phase::ReadyForCleanup;
            }
        }
    }

    pub fn begin_cleanup(&mut self) -> Result<()> {
        self.expect_phase(
            "begin cleanup",
            &[Phase::ReadyForTestCase, Phase::ReadyForCleanup],
        )?;
        let doc = self
            .doc
            .cleanup
            .as_ref()
            .ok_or_else(|| Error::undocumented(self.doc.name, "cleanup step", "Cleanup"))?;
        tracing::info!(scenario = %self.report.name, "Cleanup");
        self.step = Some((doc, TestStepReport::new(doc.name)));
        self.phase = Phase::CleaningUp;
        Ok(())
    }

    pub fn end_cleanup(&mut self) -> Result<()> {
        self.expect_phase("end cleanup", &[Phase::CleaningUp])?;
        self.close_cleanup();
        self.phase = Phase::Complete;
        Ok(())
    }

    fn close_step(&mut self) {
        if let Some((_, mut step)) = self.step.take() {
            step.end_time = Some(Utc::now());
            match &mut self.case {
                Some((_, case)) => case.steps.push(step),
                None => tracing::warn!(step = %step.name, "Dropping step without a test case"),
            }
        }
    }

    fn close_case(&mut self) {
        if let Some((_, mut case)) = self.case.take() {
            case.end_time = Some(Utc::now());
            self.report.cases.push(case);
        }
    }

    fn close_cleanup(&mut self) {
        if let Some((_, mut step)) = self.step.take() {
            step.end_time = Some(Utc::now());
            self.report.cleanup = Some(step);
        }
    }

    /// Open a documented check of the current step
    pub fn check<S: AsRef<str>>(&self, name: &str, participants: &[S]) -> Result<PendingCheck> {
        self.expect_phase("perform a check", &[Phase::RunningTestStep, Phase::CleaningUp])?;
        let step_doc = match &self.step {
            Some((doc, _)) => *doc,
            None => return Err(Error::invalid_phase("perform a check", self.phase)),
        };
        let doc = step_doc.check(name).ok_or_else(|| {
            Error::undocumented(
                self.doc.name,
                "check",
                &format!("{} (in step '{}')", name, step_doc.name),
            )
        })?;
        Ok(PendingCheck {
            name: doc.name,
            requirements: doc.requirements,
            severity: doc.severity,
            participants: participants.iter().map(|p| p.as_ref().to_string()).collect(),
        })
    }

    fn current_step(&mut self, action: &str) -> Result<&mut TestStepReport> {
        let phase = self.phase;
        match &mut self.step {
            Some((_, step)) => Ok(step),
            None => Err(Error::invalid_phase(action, phase)),
        }
    }

    pub fn pass(&mut self, check: PendingCheck) -> Result<()> {
        let step = self.current_step("record a passed check")?;
        tracing::debug!(check = check.name, "Check passed");
        step.passed_checks.push(PassedCheck {
            name: check.name.to_string(),
            timestamp: Utc::now(),
            requirements: check.requirements.iter().map(|r| r.to_string()).collect(),
            participants: check.participants,
        });
        Ok(())
    }

    /// Record a failure
    ///
    /// Returns an error when the failure is severe enough to stop the
    /// scenario (High) or the whole run (Critical), so the caller can `?` it.
    pub fn fail(&mut self, check: PendingCheck, failure: Failure) -> Result<()> {
        let severity = failure.severity.unwrap_or(check.severity);
        let step = self.current_step("record a failed check")?;
        tracing::warn!(
            check = check.name,
            severity = %severity,
            participants = ?check.participants,
            "Check failed: {}",
            failure.summary
        );
        let message = format!("{}: {}", check.name, failure.summary);
        step.failed_checks.push(FailedCheck {
            name: check.name.to_string(),
            timestamp: Utc::now(),
            requirements: check.requirements.iter().map(|r| r.to_string()).collect(),
            participants: check.participants,
            summary: failure.summary,
            details: failure.details,
            severity,
            query_timestamps: failure.query_timestamps,
        });
        match severity {
            Severity::Critical => Err(Error::TestRunCannotContinue(message)),
            Severity::High => Err(Error::ScenarioCannotContinue(message)),
            Severity::Medium | Severity::Low => Ok(()),
        }
    }

    /// Pass or fail `check` from an evaluated outcome
    pub fn record(
        &mut self,
        check: PendingCheck,
        outcome: std::result::Result<(), Failure>,
    ) -> Result<()> {
        match outcome {
            Ok(()) => self.pass(check),
            Err(failure) => self.fail(check, failure),
        }
    }

    pub fn record_query(&mut self, query: &Query) {
        tracing::debug!(query = %query.describe(), "Query");
        match self.current_step("record a query") {
            Ok(step) => step.queries.push(query.clone()),
            Err(_) => tracing::warn!(
                query = %query.describe(),
                "Query made outside of a test step was not recorded"
            ),
        }
    }

    pub fn record_queries<'a>(&mut self, queries: impl IntoIterator<Item = &'a Query>) {
        for query in queries {
            self.record_query(query);
        }
    }

    pub fn record_note(&mut self, key: impl Into<String>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        tracing::info!(note = %key, "{}", message);
        self.report.notes.insert(
            key,
            Note {
                message,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn record_execution_error(&mut self, error: &Error) {
        tracing::error!(scenario = %self.report.name, "Execution error: {}", error);
        if self.report.execution_error.is_none() {
            self.report.execution_error = Some(ExecutionError::from(error));
        }
    }

    /// Close anything still open and produce the final report
    pub fn finish(mut self) -> TestScenarioReport {
        self.go_to_cleanup();
        if self.phase == Phase::ReadyForCleanup {
            self.phase = Phase::Complete;
        }
        self.report.end_time = Some(Utc::now());
        self.report.successful = self.report.compute_successful();
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::documentation::fixtures::DOC;

    fn context() -> ScenarioContext {
        let mut ctx = ScenarioContext::new(&DOC, "Fixture", "test.Fixture", RunSettings::default());
        ctx.begin_scenario().unwrap();
        ctx
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut ctx = context();
        assert!(matches!(
            ctx.begin_test_step("Step"),
            Err(Error::InvalidPhase { .. })
        ));
        ctx.begin_test_case("Case").unwrap();
        assert!(ctx.end_test_step().is_err());
        ctx.begin_test_step("Step").unwrap();
        assert_eq!(ctx.phase(), Phase::RunningTestStep);
        assert!(ctx.begin_test_case("Case").is_err());
        ctx.end_test_step().unwrap();
        ctx.end_test_case().unwrap();
        ctx.end_scenario().unwrap();
        ctx.begin_cleanup().unwrap();
        ctx.end_cleanup().unwrap();
        let report = ctx.finish();
        assert!(report.successful);
        assert_eq!(report.cases[0].steps[0].name, "Step");
        assert!(report.cleanup.is_some());
    }

    #[test]
    fn test_undocumented_names_rejected() {
        let mut ctx = context();
        assert!(matches!(
            ctx.begin_test_case("Nope"),
            Err(Error::Undocumented { .. })
        ));
        ctx.begin_test_case("Case").unwrap();
        ctx.begin_test_step("Step").unwrap();
        assert!(matches!(
            ctx.check("Nope", &["uss1"]),
            Err(Error::Undocumented { .. })
        ));
    }

    #[test]
    fn test_check_outside_step_rejected() {
        let mut ctx = context();
        ctx.begin_test_case("Case").unwrap();
        assert!(ctx.check("Advisory", &["uss1"]).is_err());
    }

    #[test]
    fn test_severity_drives_control_flow() {
        let mut ctx = context();
        ctx.begin_test_case("Case").unwrap();
        ctx.begin_test_step("Step").unwrap();

        let check = ctx.check("Advisory", &["uss1"]).unwrap();
        assert!(ctx.fail(check, Failure::new("minor")).is_ok());

        let check = ctx.check("Important", &["uss1"]).unwrap();
        assert!(ctx.fail(check, Failure::new("wrong")).is_ok());

        let check = ctx.check("Blocking", &["uss1"]).unwrap();
        assert!(matches!(
            ctx.fail(check, Failure::new("broken")),
            Err(Error::ScenarioCannotContinue(_))
        ));

        let check = ctx.check("Fatal", &["uss1"]).unwrap();
        assert!(matches!(
            ctx.fail(check, Failure::new("dead")),
            Err(Error::TestRunCannotContinue(_))
        ));

        let check = ctx.check("Blocking", &["uss1"]).unwrap();
        assert!(ctx
            .fail(check, Failure::new("downgraded").severity(Severity::Low))
            .is_ok());

        let report = ctx.finish();
        let step = &report.cases[0].steps[0];
        assert_eq!(step.failed_checks.len(), 5);
        assert_eq!(step.failed_checks[1].requirements, vec!["req.B", "req.C"]);
        assert!(!report.successful);
    }

    #[test]
    fn test_low_failures_keep_scenario_successful() {
        let mut ctx = context();
        ctx.begin_test_case("Case").unwrap();
        ctx.begin_test_step("Step").unwrap();
        let check = ctx.check("Advisory", &["uss1"]).unwrap();
        ctx.fail(check, Failure::new("minor")).unwrap();
        let check = ctx.check("Important", &["uss1"]).unwrap();
        ctx.pass(check).unwrap();
        assert!(ctx.finish().successful);
    }

    #[test]
    fn test_go_to_cleanup_closes_open_step() {
        let mut ctx = context();
        ctx.begin_test_case("Case").unwrap();
        ctx.begin_test_step("Step").unwrap();
        ctx.go_to_cleanup();
        assert_eq!(ctx.phase(), Phase::ReadyForCleanup);
        ctx.begin_cleanup().unwrap();
        let check = ctx.check("Removed", &["uss1"]).unwrap();
        ctx.pass(check).unwrap();
        ctx.end_cleanup().unwrap();
        let report = ctx.finish();
        assert_eq!(report.cases.len(), 1);
        assert!(report.cases[0].steps[0].end_time.is_some());
        assert_eq!(report.cleanup.unwrap().passed_checks.len(), 1);
    }

    #[test]
    fn test_notes_and_execution_error() {
        let mut ctx = context();
        ctx.record_note("uss1/report_id", "abc");
        ctx.record_execution_error(&Error::Internal("first".into()));
        ctx.record_execution_error(&Error::Internal("second".into()));
        let report = ctx.finish();
        assert_eq!(report.notes["uss1/report_id"].message, "abc");
        assert!(report
            .execution_error
            .unwrap()
            .message
            .contains("first"));
        assert!(!report.successful);
    }
}
