//! USS availability synchronization across the DSS instances of a deployment

use async_trait::async_trait;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::dss::types::{UssAvailabilityState, UssAvailabilityStatusResponse};
use crate::dss::{DssInstance, Fetched};
use crate::resources::{Bindings, ResourceType};
use crate::scenario::{
    RunSettings, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};

use super::consistency::{
    check_unknown_availability, compare_availability, record_consistency, record_read,
    AvailabilityReading, Discrepancy, CONSISTENCY_CHECK, READ_CHECK, READ_REQUIREMENT,
    SYNC_REQUIREMENT,
};
use super::{declare_availability, SET_CHECK};

const UNKNOWN_USS: ResourceType = ResourceType::new(383, "USS unknown to every DSS instance");

const READ: TestCheckDocumentation = TestCheckDocumentation {
    name: READ_CHECK,
    requirements: &[READ_REQUIREMENT],
    severity: Severity::Medium,
};

const READ_HIGH: TestCheckDocumentation = TestCheckDocumentation {
    severity: Severity::High,
    ..READ
};

const SET: TestCheckDocumentation = TestCheckDocumentation {
    name: SET_CHECK,
    requirements: &[READ_REQUIREMENT],
    severity: Severity::High,
};

const CONSISTENT: TestCheckDocumentation = TestCheckDocumentation {
    name: CONSISTENCY_CHECK,
    requirements: &[SYNC_REQUIREMENT],
    severity: Severity::Medium,
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM F3548-21 USS availability synchronization",
    description: "Verifies that USS availability is identical on every DSS instance of a deployment",
    cases: &[
        TestCaseDocumentation {
            name: "Unknown USS availability",
            steps: &[TestStepDocumentation {
                name: "Read unknown USS availability from all instances",
                checks: &[READ, CONSISTENT],
            }],
        },
        TestCaseDocumentation {
            name: "Availability update",
            steps: &[
                TestStepDocumentation {
                    name: "Declare USS as Down on primary DSS",
                    checks: &[READ_HIGH, SET],
                },
                TestStepDocumentation {
                    name: "Availability is synchronized to secondary DSSes",
                    checks: &[READ, CONSISTENT],
                },
            ],
        },
        TestCaseDocumentation {
            name: "Availability restoration",
            steps: &[
                TestStepDocumentation {
                    name: "Declare USS as Normal on primary DSS",
                    checks: &[READ_HIGH, SET],
                },
                TestStepDocumentation {
                    name: "Availability is synchronized to secondary DSSes",
                    checks: &[READ, CONSISTENT],
                },
            ],
        },
    ],
    cleanup: Some(TestStepDocumentation {
        name: "Restore USS availability",
        checks: &[READ, TestCheckDocumentation {
            severity: Severity::Medium,
            ..SET
        }],
    }),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let dss = bindings.dss("dss")?;
    let others = bindings.dss_instances("other_instances")?;
    let ids = bindings.id_generator("id_generator")?;
    let uss_id = bindings
        .client_identity("client_identity")?
        .unwrap_or_else(|| dss.subject().to_string());
    Ok(Box::new(AvailabilitySynchronization {
        dss,
        others,
        uss_id,
        unknown_uss_id: ids.make_id(UNKNOWN_USS),
        declared_down: false,
    }))
}

/// Read `uss_id` from `dss` until it agrees with `expected` or propagation times out
///
/// Every read is returned; the last one is the observation to evaluate.
async fn read_until_consistent(
    dss: &DssInstance,
    uss_id: &str,
    expected: &AvailabilityReading,
    settings: &RunSettings,
) -> Vec<Fetched<UssAvailabilityStatusResponse>> {
    let deadline = Instant::now() + settings.propagation_timeout;
    let mut reads = Vec::new();
    loop {
        let fetched = dss.get_uss_availability(uss_id).await;
        let settled = match AvailabilityReading::from_fetched(&dss.participant_id, &fetched) {
            // A failed read is a failure, not a propagation delay
            None => true,
            Some(reading) => compare_availability(expected, &reading).is_empty(),
        };
        reads.push(fetched);
        if settled || Instant::now() >= deadline {
            return reads;
        }
        tokio::time::sleep(settings.propagation_poll).await;
    }
}

pub struct AvailabilitySynchronization {
    dss: DssInstance,
    others: Vec<DssInstance>,
    uss_id: String,
    unknown_uss_id: String,
    declared_down: bool,
}

impl AvailabilitySynchronization {
    async fn unknown_uss_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Unknown USS availability")?;
        ctx.begin_test_step("Read unknown USS availability from all instances")?;

        let primary_fetch = self.dss.get_uss_availability(&self.unknown_uss_id).await;
        let primary = record_read(ctx, &self.dss.participant_id, &primary_fetch)?;
        if let Some(primary) = &primary {
            let discrepancies: Vec<Discrepancy> =
                check_unknown_availability(primary).into_iter().collect();
            record_consistency(
                ctx,
                &[self.dss.participant_id.as_str()],
                &discrepancies,
                &primary_fetch,
            )?;
        }

        for other in &self.others {
            let fetched = other.get_uss_availability(&self.unknown_uss_id).await;
            let Some(reading) = record_read(ctx, &other.participant_id, &fetched)? else {
                continue;
            };
            let mut discrepancies: Vec<Discrepancy> =
                check_unknown_availability(&reading).into_iter().collect();
            if let Some(primary) = &primary {
                discrepancies.extend(compare_availability(primary, &reading));
            }
            record_consistency(
                ctx,
                &[self.dss.participant_id.as_str(), other.participant_id.as_str()],
                &discrepancies,
                &fetched,
            )?;
        }

        ctx.end_test_step()?;
        ctx.end_test_case()
    }

    async fn secondaries_step(
        &mut self,
        ctx: &mut ScenarioContext,
        expected: &AvailabilityReading,
    ) -> Result<()> {
        ctx.begin_test_step("Availability is synchronized to secondary DSSes")?;
        let settings = ctx.settings().clone();
        for other in &self.others {
            let mut reads = read_until_consistent(other, &self.uss_id, expected, &settings).await;
            let Some(last) = reads.pop() else {
                continue;
            };
            ctx.record_queries(reads.iter().map(|f| &f.query));
            let Some(reading) = record_read(ctx, &other.participant_id, &last)? else {
                continue;
            };
            record_consistency(
                ctx,
                &[self.dss.participant_id.as_str(), other.participant_id.as_str()],
                &compare_availability(expected, &reading),
                &last,
            )?;
        }
        ctx.end_test_step()
    }

    async fn update_case(
        &mut self,
        ctx: &mut ScenarioContext,
        case: &str,
        step: &str,
        state: UssAvailabilityState,
    ) -> Result<()> {
        ctx.begin_test_case(case)?;
        ctx.begin_test_step(step)?;
        let (_, declared) = declare_availability(ctx, &self.dss, &self.uss_id, state).await?;
        self.declared_down = state == UssAvailabilityState::Down;
        ctx.end_test_step()?;
        self.secondaries_step(ctx, &declared).await?;
        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for AvailabilitySynchronization {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        if self.others.is_empty() {
            return Err(Error::Config(
                "USS availability synchronization needs at least one other DSS instance"
                    .to_string(),
            ));
        }
        self.unknown_uss_case(ctx).await?;
        self.update_case(
            ctx,
            "Availability update",
            "Declare USS as Down on primary DSS",
            UssAvailabilityState::Down,
        )
        .await?;
        self.update_case(
            ctx,
            "Availability restoration",
            "Declare USS as Normal on primary DSS",
            UssAvailabilityState::Normal,
        )
        .await
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        if self.declared_down {
            declare_availability(ctx, &self.dss, &self.uss_id, UssAvailabilityState::Normal)
                .await?;
            self.declared_down = false;
        }
        Ok(())
    }
}
