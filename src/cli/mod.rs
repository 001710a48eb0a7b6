//! CLI command handling
//!
//! Runs, validates and lists suites and scenarios, and formats output.

use std::path::{Path, PathBuf};

use chrono::Utc;
use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::report::{summary, TestRunReport};
use crate::resources::ResourcePool;
use crate::scenario::executor;
use crate::scenario::registry::{self, ScenarioInfo};
use crate::scenario::{RunSettings, SuiteDefinition};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config, verbose: bool) -> Result<()> {
    match command {
        Commands::Run { suite, report } => run(&suite, report, config, verbose).await,
        Commands::Validate { suite } => validate(&suite, config),
        Commands::List => {
            list(verbose);
            Ok(())
        }
        Commands::Summarize { report } => {
            let report = TestRunReport::load(&report)?;
            summary::print_run(&report, verbose);
            Ok(())
        }
    }
}

async fn run(
    suite_path: &Path,
    report_path: Option<PathBuf>,
    config: &Config,
    verbose: bool,
) -> Result<()> {
    let report = executor::run_suite_file(suite_path, config, |scenario| {
        summary::print_scenario(scenario, verbose)
    })
    .await?;
    summary::print_requirements(&report);
    summary::print_verdict(&report);

    match report_path.or_else(default_report_path) {
        Some(path) => {
            report.write(&path)?;
            println!("Report written to {}", path.display());
        }
        None => tracing::warn!("No report directory available; report not written"),
    }

    if report.successful {
        Ok(())
    } else {
        Err(Error::TestRunFailed {
            failed: report.failed_scenarios(),
            total: report.scenarios.len(),
        })
    }
}

fn default_report_path() -> Option<PathBuf> {
    let name = format!("report-{}.json", Utc::now().format("%Y%m%dT%H%M%SZ"));
    paths::report_dir().map(|dir| dir.join(name))
}

/// Parse the suite, build its resources and every scenario, without running anything
fn validate(suite_path: &Path, config: &Config) -> Result<()> {
    let suite = SuiteDefinition::load(suite_path)?;
    let base_dir = suite_path.parent().unwrap_or_else(|| Path::new("."));
    let pool = ResourcePool::create(&suite.resources, config, base_dir)?;
    let scenarios = executor::prepare(&suite, &pool)?;
    let settings = RunSettings::from_config(config);

    println!(
        "{} {} is valid",
        "✓".green().bold(),
        suite.name.white().bold()
    );
    for prepared in &scenarios {
        println!(
            "  {} {}",
            prepared.name,
            format!("({})", prepared.info.type_name).dimmed()
        );
    }
    println!(
        "{}",
        format!(
            "{} resources, {} scenarios, at most {} requests in flight",
            suite.resources.len(),
            scenarios.len(),
            settings.max_in_flight
        )
        .dimmed()
    );
    Ok(())
}

fn list(verbose: bool) {
    println!("{}", "Available scenarios:".cyan());
    for info in registry::all_scenarios() {
        println!(
            "  {} {}",
            info.type_name.white().bold(),
            format!("[{}]", info.standard).dimmed()
        );
        if verbose {
            print_scenario_details(info);
        }
    }
}

fn print_scenario_details(info: &ScenarioInfo) {
    let doc = info.documentation;
    println!("    {}", doc.description);
    let mut resources: Vec<String> = info.resources.iter().map(|r| r.to_string()).collect();
    resources.extend(info.optional_resources.iter().map(|r| format!("{} (optional)", r)));
    println!("    {} {}", "Resources:".dimmed(), resources.join(", "));
    for case in doc.cases {
        println!("    {}", case.name.cyan());
        for step in case.steps {
            println!("      {}", step.name);
            for check in step.checks {
                println!(
                    "        {} {} {}",
                    "-".dimmed(),
                    check.name,
                    format!("[{}] {}", check.severity, check.requirements.join(", ")).dimmed()
                );
            }
        }
    }
}
