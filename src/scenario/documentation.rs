//! Static scenario documentation
//!
//! Every test case, step and check a scenario may report is declared up front
//! together with the requirements it verifies. The scenario context refuses
//! anything not declared here, so reports can always be traced back to
//! requirements.

use super::check::Severity;

#[derive(Debug)]
pub struct TestCheckDocumentation {
    pub name: &'static str,
    pub requirements: &'static [&'static str],
    /// Severity of a failure unless the scenario overrides it
    pub severity: Severity,
}

#[derive(Debug)]
pub struct TestStepDocumentation {
    pub name: &'static str,
    pub checks: &'static [TestCheckDocumentation],
}

#[derive(Debug)]
pub struct TestCaseDocumentation {
    pub name: &'static str,
    pub steps: &'static [TestStepDocumentation],
}

#[derive(Debug)]
pub struct ScenarioDocumentation {
    pub name: &'static str,
    pub description: &'static str,
    pub cases: &'static [TestCaseDocumentation],
    pub cleanup: Option<TestStepDocumentation>,
}

impl TestStepDocumentation {
    pub fn check(&self, name: &str) -> Option<&TestCheckDocumentation> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl TestCaseDocumentation {
    pub fn step(&self, name: &str) -> Option<&TestStepDocumentation> {
        self.steps.iter().find(|s| s.name == name)
    }
}

impl ScenarioDocumentation {
    pub fn case(&self, name: &str) -> Option<&TestCaseDocumentation> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Every requirement any check of this scenario can verify, sorted
    pub fn requirements(&self) -> Vec<&'static str> {
        let mut requirements: Vec<&'static str> = self
            .cases
            .iter()
            .flat_map(|c| c.steps.iter())
            .chain(self.cleanup.iter())
            .flat_map(|s| s.checks.iter())
            .flat_map(|c| c.requirements.iter().copied())
            .collect();
        requirements.sort_unstable();
        requirements.dedup();
        requirements
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub static DOC: ScenarioDocumentation = ScenarioDocumentation {
        name: "Fixture",
        description: "Scenario used by engine tests",
        cases: &[TestCaseDocumentation {
            name: "Case",
            steps: &[TestStepDocumentation {
                name: "Step",
                checks: &[
                    TestCheckDocumentation {
                        name: "Advisory",
                        requirements: &["req.A"],
                        severity: Severity::Low,
                    },
                    TestCheckDocumentation {
                        name: "Important",
                        requirements: &["req.B", "req.C"],
                        severity: Severity::Medium,
                    },
                    TestCheckDocumentation {
                        name: "Blocking",
                        requirements: &["req.B"],
                        severity: Severity::High,
                    },
                    TestCheckDocumentation {
                        name: "Fatal",
                        requirements: &["req.D"],
                        severity: Severity::Critical,
                    },
                ],
            }],
        }],
        cleanup: Some(TestStepDocumentation {
            name: "Cleanup",
            checks: &[TestCheckDocumentation {
                name: "Removed",
                requirements: &["req.E"],
                severity: Severity::Medium,
            }],
        }),
    };
}

#[cfg(test)]
mod tests {
    use super::fixtures::DOC;

    #[test]
    fn test_lookup_by_name() {
        let case = DOC.case("Case").unwrap();
        let step = case.step("Step").unwrap();
        assert_eq!(step.check("Important").unwrap().requirements.len(), 2);
        assert!(DOC.case("Other").is_none());
        assert!(step.check("Nope").is_none());
    }

    #[test]
    fn test_requirements_are_deduplicated() {
        assert_eq!(
            DOC.requirements(),
            vec!["req.A", "req.B", "req.C", "req.D", "req.E"]
        );
    }
}
