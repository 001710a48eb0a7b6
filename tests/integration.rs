//! End-to-end tests for the qualifier
//!
//! These tests run the scenarios of `tests/fixtures/suite.yaml` against an
//! in-memory DSS pool of two instances:
//! 1. A conforming pool, where every scenario must pass
//! 2. Pools with injected faults, where the right checks must fail
//! 3. The CLI binary itself, for validation, listing and full runs

use std::path::{Path, PathBuf};
use std::process::Command;

use dss_qualifier::common::config::Config;
use dss_qualifier::dss::{Fault, MockDeployment};
use dss_qualifier::report::{TestRunReport, TestScenarioReport, TestStepReport};
use dss_qualifier::resources::ResourcePool;
use dss_qualifier::scenario::executor;
use dss_qualifier::scenario::{RunSettings, SuiteDefinition};

/// Name of the in-memory deployment declared by the fixture suite
const DEPLOYMENT: &str = "local";

/// Short timeouts so that propagation failures surface quickly
const FAST_CONFIG: &str = r#"
[timeouts]
propagation_secs = 1
propagation_poll_ms = 50

[concurrency]
max_in_flight = 8
"#;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn suite_path() -> PathBuf {
    fixtures_dir().join("suite.yaml")
}

fn fast_config() -> Config {
    Config::parse(FAST_CONFIG).expect("Failed to parse test config")
}

/// Fixture suite reduced to the scenarios of type `scenario_type`
fn suite_with(scenario_type: &str) -> SuiteDefinition {
    let mut suite = SuiteDefinition::load(&suite_path()).expect("Failed to load fixture suite");
    suite.scenarios.retain(|s| s.scenario_type == scenario_type);
    assert_eq!(suite.scenarios.len(), 1, "fixture lacks {}", scenario_type);
    suite
}

/// Fresh resources for the fixture suite; every call gets its own deployment
fn pool_for(suite: &SuiteDefinition, config: &Config) -> ResourcePool {
    ResourcePool::create(&suite.resources, config, &fixtures_dir())
        .expect("Failed to create resources")
}

fn deployment(pool: &ResourcePool) -> &MockDeployment {
    pool.mock_deployment(DEPLOYMENT)
        .expect("fixture suite declares the local deployment")
}

async fn run(suite: &SuiteDefinition, pool: &ResourcePool, config: &Config) -> TestRunReport {
    executor::run_suite(suite, pool, &RunSettings::from_config(config), |_| {})
        .await
        .expect("Failed to run suite")
}

/// Run a single scenario type, optionally against a faulty pool
async fn run_scenario(scenario_type: &str, faults: &[Fault]) -> (TestScenarioReport, ResourcePool) {
    let config = fast_config();
    let suite = suite_with(scenario_type);
    let pool = pool_for(&suite, &config);
    for fault in faults {
        deployment(&pool).inject_fault(fault.clone());
    }
    let mut report = run(&suite, &pool, &config).await;
    assert_eq!(report.scenarios.len(), 1);
    (report.scenarios.remove(0), pool)
}

/// Failure summaries, for assertion messages
fn failures(report: &TestScenarioReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .failed_checks()
        .map(|c| format!("[{}] {}: {} {}", c.severity, c.name, c.summary, c.details))
        .collect();
    if let Some(error) = &report.execution_error {
        lines.push(format!("execution error {}: {}", error.code, error.message));
    }
    lines
}

fn failed_check_names(report: &TestScenarioReport) -> Vec<&str> {
    report.failed_checks().map(|c| c.name.as_str()).collect()
}

fn assert_failed(report: &TestScenarioReport, check_name: &str) {
    assert!(!report.successful);
    assert!(
        failed_check_names(report).contains(&check_name),
        "{} did not fail; failures:\n{}",
        check_name,
        failures(report).join("\n")
    );
}

/// Step `step` of case `case`, which must have run
fn step<'a>(report: &'a TestScenarioReport, case: &str, step: &str) -> &'a TestStepReport {
    report
        .step(case, step)
        .unwrap_or_else(|| panic!("step '{}' of '{}' did not run", step, case))
}

/// Queries a step sent to `participant`
fn reads_from(step: &TestStepReport, participant: &str) -> usize {
    step.queries
        .iter()
        .filter(|q| q.participant_id.as_deref() == Some(participant))
        .count()
}

fn lagging_secondary(reads: usize) -> Fault {
    Fault::Lagging {
        participant_id: "uss2".to_string(),
        reads,
    }
}

async fn assert_passes(scenario_type: &str) {
    let (report, pool) = run_scenario(scenario_type, &[]).await;
    assert!(
        report.successful,
        "{} failed against a conforming pool:\n{}",
        scenario_type,
        failures(&report).join("\n")
    );
    assert!(report.passed_checks().next().is_some());
    assert!(report.cleanup.is_some(), "cleanup did not run");
    assert_eq!(
        deployment(&pool).entity_count(),
        0,
        "{} left entities behind",
        scenario_type
    );
}

// ============== Conforming pool ==============

#[tokio::test]
async fn test_availability_arbitration_passes() {
    assert_passes("astm.utm.dss.AvailabilityArbitration").await;
}

#[tokio::test]
async fn test_availability_synchronization_passes() {
    assert_passes("astm.utm.dss.AvailabilitySynchronization").await;
}

#[tokio::test]
async fn test_subscription_validation_passes() {
    assert_passes("astm.utm.dss.SubscriptionValidation").await;
}

#[tokio::test]
async fn test_cr_synchronization_passes() {
    assert_passes("astm.utm.dss.CrSynchronization").await;
}

#[tokio::test]
async fn test_oir_notification_index_passes() {
    assert_passes("astm.utm.dss.OirNotificationIndex").await;
}

#[tokio::test]
async fn test_netrid_subscription_simple_passes() {
    assert_passes("astm.netrid.dss.SubscriptionSimple").await;
}

#[tokio::test]
async fn test_netrid_subscription_validation_passes() {
    assert_passes("astm.netrid.dss.SubscriptionValidation").await;
}

#[tokio::test]
async fn test_netrid_isa_subscription_interactions_passes() {
    assert_passes("astm.netrid.dss.IsaSubscriptionInteractions").await;
}

#[tokio::test]
async fn test_netrid_heavy_traffic_passes() {
    assert_passes("astm.netrid.dss.HeavyTrafficConcurrent").await;
}

#[tokio::test]
async fn test_full_suite_report() {
    let config = fast_config();
    let suite = SuiteDefinition::load(&suite_path()).expect("Failed to load fixture suite");
    let pool = pool_for(&suite, &config);

    let mut seen = Vec::new();
    let report = executor::run_suite(&suite, &pool, &RunSettings::from_config(&config), |s| {
        seen.push(s.name.clone())
    })
    .await
    .expect("Failed to run suite");

    assert!(report.successful, "failed scenarios: {}", report.failed_scenarios());
    assert!(!report.aborted);
    assert_eq!(report.scenarios.len(), suite.scenarios.len());
    assert_eq!(seen.len(), suite.scenarios.len());
    assert!(seen.contains(&"Heavy traffic (small)".to_string()));

    let requirements = report.requirement_summary();
    let primary = requirements
        .get("uss1")
        .expect("checks attributed to the primary instance");
    assert!(primary.contains_key("astm.f3548.v21.DSS0015"));
    assert!(primary.values().all(|tally| tally.failed == 0));
    assert!(requirements.contains_key("uss2"));

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("report.json");
    report.write(&path).expect("Failed to write report");
    let loaded = TestRunReport::load(&path).expect("Failed to load report");
    assert_eq!(loaded.suite, "Local DSS pool");
    assert_eq!(loaded.scenarios.len(), report.scenarios.len());
    assert!(loaded.successful);
}

// ============== Faulty pools ==============

#[tokio::test]
async fn test_frozen_notification_index_detected() {
    let (report, _) = run_scenario(
        "astm.utm.dss.OirNotificationIndex",
        &[Fault::FrozenNotificationIndex],
    )
    .await;
    assert!(!report.successful);
    assert!(
        failed_check_names(&report).contains(&"Notification index incremented"),
        "unexpected failures:\n{}",
        failures(&report).join("\n")
    );
}

#[tokio::test]
async fn test_unsynchronized_instance_detected_for_constraints() {
    let (report, _) = run_scenario(
        "astm.utm.dss.CrSynchronization",
        &[Fault::Unsynchronized {
            participant_id: "uss2".to_string(),
        }],
    )
    .await;
    assert!(!report.successful);
    let failed: Vec<_> = report
        .failed_checks()
        .filter(|c| c.name == "Constraint reference can be retrieved from all DSS instances")
        .collect();
    assert!(!failed.is_empty(), "unexpected failures:\n{}", failures(&report).join("\n"));
    assert!(failed
        .iter()
        .all(|c| c.participants.contains(&"uss2".to_string())));
}

#[tokio::test]
async fn test_unsynchronized_instance_detected_for_availability() {
    let (report, _) = run_scenario(
        "astm.utm.dss.AvailabilitySynchronization",
        &[Fault::Unsynchronized {
            participant_id: "uss2".to_string(),
        }],
    )
    .await;
    assert!(!report.successful);
    assert!(report
        .failed_checks()
        .any(|c| c.participants.contains(&"uss2".to_string())));
}

#[tokio::test]
async fn test_lingering_constraint_detected() {
    let (report, _) = run_scenario("astm.utm.dss.CrSynchronization", &[Fault::LingeringDeletes]).await;
    assert!(!report.successful);
    assert!(
        failed_check_names(&report)
            .contains(&"Deleted constraint reference cannot be retrieved from any DSS instance"),
        "unexpected failures:\n{}",
        failures(&report).join("\n")
    );
}

#[tokio::test]
async fn test_lagging_constraint_sync_converges() {
    let (report, pool) = run_scenario("astm.utm.dss.CrSynchronization", &[lagging_secondary(3)]).await;
    assert!(
        report.successful,
        "lagging secondary was not given time to converge:\n{}",
        failures(&report).join("\n")
    );
    let query = step(&report, "CR synchronization", "Query newly created CR");
    assert!(reads_from(query, "uss2") > 1);
    let deleted = step(&report, "CR synchronization", "Query deleted CR");
    assert!(reads_from(deleted, "uss2") > 1);
    assert_eq!(deployment(&pool).entity_count(), 0);
}

#[tokio::test]
async fn test_constraint_sync_gives_up_after_propagation_timeout() {
    let (report, _) =
        run_scenario("astm.utm.dss.CrSynchronization", &[lagging_secondary(100_000)]).await;
    assert_failed(&report, "Constraint reference can be retrieved from all DSS instances");

    let query = step(&report, "CR synchronization", "Query newly created CR");
    let reads = reads_from(query, "uss2");
    // One second of polling every 50ms
    assert!((2..=40).contains(&reads), "{} reads", reads);
    let elapsed = query.end_time.expect("step was closed") - query.start_time;
    assert!(elapsed >= chrono::Duration::milliseconds(950));
}

#[tokio::test]
async fn test_lagging_availability_sync_converges() {
    let (report, _) = run_scenario(
        "astm.utm.dss.AvailabilitySynchronization",
        &[lagging_secondary(3)],
    )
    .await;
    assert!(
        report.successful,
        "lagging secondary was not given time to converge:\n{}",
        failures(&report).join("\n")
    );
    for case in ["Availability update", "Availability restoration"] {
        let synced = step(&report, case, "Availability is synchronized to secondary DSSes");
        assert!(reads_from(synced, "uss2") > 1, "{}", case);
    }
}

#[tokio::test]
async fn test_availability_sync_gives_up_after_propagation_timeout() {
    let (report, _) = run_scenario(
        "astm.utm.dss.AvailabilitySynchronization",
        &[lagging_secondary(100_000)],
    )
    .await;
    assert_failed(&report, "USS Availability is consistent across instances");
    assert!(report
        .failed_checks()
        .filter(|c| c.name == "USS Availability is consistent across instances")
        .all(|c| c.participants.contains(&"uss2".to_string())));
    let synced = step(
        &report,
        "Availability update",
        "Availability is synchronized to secondary DSSes",
    );
    assert!(reads_from(synced, "uss2") > 1);
}

#[tokio::test]
async fn test_frozen_index_detected_by_isa_interactions() {
    let (report, _) = run_scenario(
        "astm.netrid.dss.IsaSubscriptionInteractions",
        &[Fault::FrozenNotificationIndex],
    )
    .await;
    assert_failed(&report, "Response to the mutation of the ISA contains subscription ID");
    assert_failed(&report, "Response to the deletion of the ISA contains subscription ID");
}

#[tokio::test]
async fn test_frozen_index_detected_by_heavy_traffic() {
    let (report, _) = run_scenario(
        "astm.netrid.dss.HeavyTrafficConcurrent",
        &[Fault::FrozenNotificationIndex],
    )
    .await;
    assert_failed(&report, "Notification indices incremented");
}

#[tokio::test]
async fn test_ignored_deletes_detected_by_isa_interactions() {
    let (report, _) = run_scenario(
        "astm.netrid.dss.IsaSubscriptionInteractions",
        &[Fault::IgnoredDeletes],
    )
    .await;
    assert_failed(&report, "Deleted ISA cannot be retrieved");
    assert_failed(&report, "Deleted subscription cannot be retrieved");
}

#[tokio::test]
async fn test_ignored_deletes_detected_by_heavy_traffic() {
    let (report, _) = run_scenario(
        "astm.netrid.dss.HeavyTrafficConcurrent",
        &[Fault::IgnoredDeletes],
    )
    .await;
    assert_failed(&report, "ISAs not found");
    assert_failed(&report, "ISAs not returned by search");
    assert_failed(&report, "Subscriptions not found");
}

#[tokio::test]
async fn test_overlong_scd_subscription_detected_and_removed() {
    let (report, pool) = run_scenario(
        "astm.utm.dss.SubscriptionValidation",
        &[Fault::UnlimitedSubscriptionDuration],
    )
    .await;
    assert_failed(&report, "Don't create a too long subscription");
    assert_failed(&report, "Don't mutate a subscription to be too long");
    assert!(!failed_check_names(&report).contains(&"Accept a subscription of maximal duration"));

    let limits = step(&report, "Subscription Validation", "Subscription duration limitations");
    let removals = limits
        .passed_checks
        .iter()
        .filter(|c| c.name == "Subscription removed")
        .count();
    assert_eq!(removals, 2);
    assert_eq!(deployment(&pool).entity_count(), 0);
}

#[tokio::test]
async fn test_overlong_rid_subscription_detected_and_removed() {
    let (report, pool) = run_scenario(
        "astm.netrid.dss.SubscriptionValidation",
        &[Fault::UnlimitedSubscriptionDuration],
    )
    .await;
    assert_failed(&report, "Don't create a too long subscription");
    assert_failed(&report, "Don't extend a subscription beyond 24 hours");
    assert!(!failed_check_names(&report)
        .contains(&"Accept a subscription within the maximal duration"));

    let limits = step(&report, "Subscription limitations", "Subscription limitations");
    let removals = limits
        .passed_checks
        .iter()
        .filter(|c| c.name == "Removed pre-existing subscription")
        .count();
    assert_eq!(removals, 2);
    assert_eq!(deployment(&pool).entity_count(), 0);
}

#[tokio::test]
async fn test_unavailable_instance_fails_scenario() {
    let (report, _) = run_scenario(
        "astm.netrid.dss.SubscriptionSimple",
        &[Fault::Unavailable {
            participant_id: "uss1".to_string(),
            code: 503,
        }],
    )
    .await;
    assert!(!report.successful);
    assert!(report
        .failed_checks()
        .any(|c| c.participants.contains(&"uss1".to_string())));
    assert!(report.cleanup.is_some(), "cleanup must run after a failed scenario");
}

// ============== CLI ==============

fn qualifier_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dss-qualifier"))
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, FAST_CONFIG).expect("Failed to write config");
    path
}

#[test]
fn test_cli_list() {
    let output = qualifier_bin()
        .arg("list")
        .output()
        .expect("Failed to run qualifier");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for scenario_type in [
        "astm.utm.dss.AvailabilityArbitration",
        "astm.utm.dss.CrSynchronization",
        "astm.netrid.dss.HeavyTrafficConcurrent",
    ] {
        assert!(stdout.contains(scenario_type), "missing {}", scenario_type);
    }
}

#[test]
fn test_cli_validate() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());
    let output = qualifier_bin()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .arg(suite_path())
        .output()
        .expect("Failed to run qualifier");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "validate failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("is valid"));
}

#[test]
fn test_cli_validate_rejects_unknown_scenario() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let suite = dir.path().join("suite.yaml");
    std::fs::write(
        &suite,
        "name: broken\nscenarios:\n  - type: astm.utm.dss.DoesNotExist\n",
    )
    .expect("Failed to write suite");
    let output = qualifier_bin()
        .arg("validate")
        .arg(&suite)
        .output()
        .expect("Failed to run qualifier");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_cli_run_writes_report() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());
    let report_path = dir.path().join("report.json");
    let output = qualifier_bin()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg(suite_path())
        .arg("--report")
        .arg(&report_path)
        .output()
        .expect("Failed to run qualifier");
    assert!(
        output.status.success(),
        "run failed:\n{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let report = TestRunReport::load(&report_path).expect("Failed to load report");
    assert!(report.successful);
    assert_eq!(report.scenarios.len(), 9);

    let output = qualifier_bin()
        .arg("summarize")
        .arg(&report_path)
        .output()
        .expect("Failed to run qualifier");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Local DSS pool"));
}
