//! Suite and scenario execution

use std::path::Path;

use chrono::Utc;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::report::{TestRunReport, TestScenarioReport};
use crate::resources::{Bindings, ResourcePool};

use super::context::{RunSettings, ScenarioContext};
use super::registry::{self, ScenarioInfo};
use super::suite::SuiteDefinition;
use super::TestScenario;

/// A scenario with its resources bound, ready to run
pub struct PreparedScenario {
    pub name: String,
    pub info: &'static ScenarioInfo,
    pub scenario: Box<dyn TestScenario>,
}

/// Outcome of a single scenario
pub struct ScenarioOutcome {
    pub report: TestScenarioReport,
    /// A Critical failure means no further scenario may run
    pub aborts_run: bool,
}

/// Build every declared scenario
///
/// Nothing runs unless all scenarios could be built.
pub fn prepare(suite: &SuiteDefinition, pool: &ResourcePool) -> Result<Vec<PreparedScenario>> {
    suite
        .scenarios
        .iter()
        .map(|declaration| {
            let info = registry::get(&declaration.scenario_type)
                .ok_or_else(|| Error::UnknownScenario(declaration.scenario_type.clone()))?;
            let bindings = Bindings::resolve(pool, info.type_name, &declaration.resources)?;
            let parameters = declaration.parameters()?;
            let scenario = (info.build)(&bindings, &parameters)?;
            Ok(PreparedScenario {
                name: declaration
                    .name
                    .clone()
                    .unwrap_or_else(|| info.documentation.name.to_string()),
                info,
                scenario,
            })
        })
        .collect()
}

fn handle_error(ctx: &mut ScenarioContext, error: &Error, aborts_run: &mut bool) {
    match error {
        // The failed check that raised these is already in the report
        Error::ScenarioCannotContinue(reason) => {
            tracing::warn!(scenario = %ctx.scenario_name(), "Stopping scenario: {}", reason);
        }
        Error::TestRunCannotContinue(reason) => {
            tracing::error!(scenario = %ctx.scenario_name(), "Stopping test run: {}", reason);
            *aborts_run = true;
        }
        other => ctx.record_execution_error(other),
    }
}

/// Run one scenario, always followed by its cleanup
pub async fn run_scenario(
    scenario: &mut dyn TestScenario,
    name: &str,
    scenario_type: &str,
    settings: &RunSettings,
) -> ScenarioOutcome {
    let doc = scenario.documentation();
    let mut ctx = ScenarioContext::new(doc, name, scenario_type, settings.clone());
    let mut aborts_run = false;

    match ctx.begin_scenario() {
        Ok(()) => {
            let body = match scenario.run(&mut ctx).await {
                Ok(()) => ctx.end_scenario(),
                Err(e) => Err(e),
            };
            if let Err(e) = body {
                handle_error(&mut ctx, &e, &mut aborts_run);
            }
        }
        Err(e) => ctx.record_execution_error(&e),
    }

    ctx.go_to_cleanup();
    if doc.cleanup.is_some() {
        if let Err(e) = ctx.begin_cleanup() {
            ctx.record_execution_error(&e);
        } else {
            if let Err(e) = scenario.cleanup(&mut ctx).await {
                handle_error(&mut ctx, &e, &mut aborts_run);
            }
            ctx.go_to_cleanup();
        }
    }

    let report = ctx.finish();
    tracing::info!(
        scenario = %report.name,
        successful = report.successful,
        "Scenario complete"
    );
    ScenarioOutcome { report, aborts_run }
}

/// Run prepared scenarios in order
///
/// `observer` sees each scenario report as soon as the scenario completes.
pub async fn run_prepared(
    suite_name: &str,
    scenarios: Vec<PreparedScenario>,
    settings: &RunSettings,
    mut observer: impl FnMut(&TestScenarioReport),
) -> TestRunReport {
    let start_time = Utc::now();
    let mut reports = Vec::new();
    let mut aborted = false;

    for mut prepared in scenarios {
        let outcome = run_scenario(
            prepared.scenario.as_mut(),
            &prepared.name,
            prepared.info.type_name,
            settings,
        )
        .await;
        observer(&outcome.report);
        reports.push(outcome.report);
        if outcome.aborts_run {
            aborted = true;
            break;
        }
    }

    let successful = !aborted && reports.iter().all(|r| r.successful);
    TestRunReport {
        codebase_version: env!("CARGO_PKG_VERSION").to_string(),
        suite: suite_name.to_string(),
        start_time,
        end_time: Utc::now(),
        scenarios: reports,
        successful,
        aborted,
    }
}

/// Build resources and scenarios of `suite`, then run it
pub async fn run_suite(
    suite: &SuiteDefinition,
    pool: &ResourcePool,
    settings: &RunSettings,
    observer: impl FnMut(&TestScenarioReport),
) -> Result<TestRunReport> {
    let scenarios = prepare(suite, pool)?;
    tracing::info!(suite = %suite.name, scenarios = scenarios.len(), "Starting test run");
    Ok(run_prepared(&suite.name, scenarios, settings, observer).await)
}

/// Load a suite file and run it
pub async fn run_suite_file(
    path: &Path,
    config: &Config,
    observer: impl FnMut(&TestScenarioReport),
) -> Result<TestRunReport> {
    let suite = SuiteDefinition::load(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let pool = ResourcePool::create(&suite.resources, config, base_dir)?;
    run_suite(&suite, &pool, &RunSettings::from_config(config), observer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::check::Failure;
    use crate::scenario::documentation::fixtures::DOC;
    use crate::scenario::ScenarioDocumentation;
    use async_trait::async_trait;

    /// Fails the check named `fail_with`, if any, and notes whether cleanup ran
    struct Scripted {
        fail_with: Option<&'static str>,
        error: Option<fn() -> Error>,
        cleaned_up: bool,
    }

    #[async_trait]
    impl TestScenario for Scripted {
        fn documentation(&self) -> &'static ScenarioDocumentation {
            &DOC
        }

        async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
            ctx.begin_test_case("Case")?;
            ctx.begin_test_step("Step")?;
            if let Some(make_error) = self.error {
                return Err(make_error());
            }
            let check = ctx.check("Important", &["uss1"])?;
            ctx.pass(check)?;
            if let Some(name) = self.fail_with {
                let check = ctx.check(name, &["uss1"])?;
                ctx.fail(check, Failure::new("scripted"))?;
            }
            ctx.end_test_step()?;
            ctx.end_test_case()?;
            Ok(())
        }

        async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
            self.cleaned_up = true;
            let check = ctx.check("Removed", &["uss1"])?;
            ctx.pass(check)
        }
    }

    fn scripted(fail_with: Option<&'static str>) -> Scripted {
        Scripted {
            fail_with,
            error: None,
            cleaned_up: false,
        }
    }

    fn connection_reset() -> Error {
        Error::Http("connection reset".into())
    }

    async fn run(scenario: &mut Scripted) -> ScenarioOutcome {
        run_scenario(scenario, "Scripted", "test.Scripted", &RunSettings::default()).await
    }

    #[tokio::test]
    async fn test_clean_run() {
        let mut scenario = scripted(None);
        let outcome = run(&mut scenario).await;
        assert!(outcome.report.successful);
        assert!(!outcome.aborts_run);
        assert!(scenario.cleaned_up);
        assert_eq!(outcome.report.cleanup.unwrap().passed_checks.len(), 1);
    }

    #[tokio::test]
    async fn test_high_failure_still_cleans_up() {
        let mut scenario = scripted(Some("Blocking"));
        let outcome = run(&mut scenario).await;
        assert!(!outcome.report.successful);
        assert!(!outcome.aborts_run);
        assert!(scenario.cleaned_up);
        assert!(outcome.report.execution_error.is_none());
    }

    #[tokio::test]
    async fn test_critical_failure_aborts_run() {
        let mut scenario = scripted(Some("Fatal"));
        let outcome = run(&mut scenario).await;
        assert!(outcome.aborts_run);
        assert!(scenario.cleaned_up);
    }

    #[tokio::test]
    async fn test_execution_error_recorded() {
        let mut scenario = Scripted {
            fail_with: None,
            error: Some(connection_reset as fn() -> Error),
            cleaned_up: false,
        };
        let outcome = run(&mut scenario).await;
        assert!(scenario.cleaned_up);
        let error = outcome.report.execution_error.unwrap();
        assert_eq!(error.code, "HTTP");
        assert_eq!(outcome.report.cases[0].steps.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_after_abort() {
        let scenarios = vec![
            Box::new(scripted(Some("Fatal"))) as Box<dyn TestScenario>,
            Box::new(scripted(None)),
        ]
        .into_iter()
        .map(|scenario| PreparedScenario {
            name: "Scripted".into(),
            info: &registry::all_scenarios()[0],
            scenario,
        })
        .collect();
        let mut seen = 0;
        let report = run_prepared("suite", scenarios, &RunSettings::default(), |_| seen += 1).await;
        assert_eq!(seen, 1);
        assert!(report.aborted);
        assert!(!report.successful);
        assert_eq!(report.scenarios.len(), 1);
    }
}
