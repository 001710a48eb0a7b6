//! Human-readable report output

use colored::Colorize;

use super::{TestRunReport, TestScenarioReport, TestStepReport};

/// Print the outcome of one scenario as it completes
pub fn print_scenario(report: &TestScenarioReport, verbose: bool) {
    let marker = if report.successful {
        "✓".green()
    } else {
        "✗".red()
    };
    println!(
        "\n{} {} {}",
        marker,
        report.name.white().bold(),
        format!("({})", report.scenario_type).dimmed()
    );

    for case in &report.cases {
        if verbose {
            println!("  {}", case.name.cyan());
        }
        for step in &case.steps {
            print_step(step, verbose);
        }
    }
    if let Some(cleanup) = &report.cleanup {
        if verbose {
            println!("  {}", "Cleanup".cyan());
        }
        print_step(cleanup, verbose);
    }

    if verbose {
        for (key, note) in &report.notes {
            println!("    {} {}: {}", "•".dimmed(), key, note.message.dimmed());
        }
    }

    if let Some(error) = &report.execution_error {
        println!(
            "  {} {} {}",
            "✗".red(),
            error.code.red(),
            error.message
        );
    }
}

fn print_step(step: &TestStepReport, verbose: bool) {
    if verbose {
        for check in &step.passed_checks {
            println!("    {} {}", "✓".green(), check.name.dimmed());
        }
    }
    for check in &step.failed_checks {
        let marker = if check.severity.fails_scenario() {
            "✗".red()
        } else {
            "!".yellow()
        };
        println!(
            "    {} {} [{}] {}",
            marker,
            check.name,
            check.severity.to_string().yellow(),
            check.summary
        );
        if verbose && !check.details.is_empty() {
            for line in check.details.lines() {
                println!("        {}", line.dimmed());
            }
        }
        if !check.requirements.is_empty() {
            println!("        {}", check.requirements.join(", ").dimmed());
        }
    }
}

/// Print the whole run: every scenario, the requirement tally and a verdict
pub fn print_run(report: &TestRunReport, verbose: bool) {
    println!(
        "\n{} {}",
        "Test Run:".blue().bold(),
        report.suite.white().bold()
    );
    for scenario in &report.scenarios {
        print_scenario(scenario, verbose);
    }
    print_requirements(report);
    print_verdict(report);
}

pub fn print_requirements(report: &TestRunReport) {
    let summary = report.requirement_summary();
    if summary.is_empty() {
        return;
    }
    println!("\n{}", "Requirements:".cyan());
    for (participant, requirements) in &summary {
        println!("  {}", participant.white().bold());
        for (requirement, tally) in requirements {
            let marker = if tally.failed == 0 {
                "✓".green()
            } else {
                "✗".red()
            };
            println!(
                "    {} {} {}",
                marker,
                requirement,
                format!("({} passed, {} failed)", tally.passed, tally.failed).dimmed()
            );
        }
    }
}

pub fn print_verdict(report: &TestRunReport) {
    let total = report.scenarios.len();
    let failed = report.failed_scenarios();
    println!();
    if report.successful {
        println!(
            "{} {} ({} scenarios)",
            "✓".green().bold(),
            "Test Run Passed".green().bold(),
            total
        );
    } else {
        println!(
            "{} {} ({} of {} scenarios failed{})",
            "✗".red().bold(),
            "Test Run Failed".red().bold(),
            failed,
            total,
            if report.aborted { ", run aborted" } else { "" }
        );
    }
}
