//! Scenario engine
//!
//! Scenarios are built from a suite definition, then run one after the other.
//! Each scenario reports through a [`ScenarioContext`] and always gets a
//! chance to clean up, however its body ended.

pub mod check;
pub mod context;
pub mod documentation;
pub mod executor;
pub mod registry;
pub mod suite;

use async_trait::async_trait;

use crate::common::Result;

pub use check::{Failure, PendingCheck, Severity};
pub use context::{Phase, RunSettings, ScenarioContext};
pub use documentation::{
    ScenarioDocumentation, TestCaseDocumentation, TestCheckDocumentation, TestStepDocumentation,
};
pub use suite::{ScenarioDeclaration, ScenarioParameters, SuiteDefinition};

/// A runnable test scenario
#[async_trait]
pub trait TestScenario: Send {
    fn documentation(&self) -> &'static ScenarioDocumentation;

    /// Run every test case
    ///
    /// Returning early with an error skips the remaining cases; cleanup still
    /// runs.
    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()>;

    /// Remove whatever the scenario created
    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()>;
}
