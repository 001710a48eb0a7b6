//! DSS report submission and USS availability arbitration on a single DSS

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::Result;
use crate::dss::query::FAILED_QUERY_CODE;
use crate::dss::types::{
    ExchangeProtocol, ExchangeRecord, ExchangeRole, UssAvailabilityState,
};
use crate::dss::DssInstance;
use crate::resources::{Bindings, ResourceType};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_url_safe_token, require_success};

use super::consistency::{
    check_unknown_availability, record_read, READ_CHECK, READ_REQUIREMENT,
};
use super::{declare_availability, SET_CHECK};

const REPORT_REQUIREMENT: &str = "astm.f3548.v21.DSS0100,2";

const UNKNOWN_USS: ResourceType = ResourceType::new(382, "USS that never declared availability");

const REPORT_SUBMITTED: &str = "DSS report successfully submitted";
const REPORT_ID_RETURNED: &str = "DSS returned a valid report ID";
const UNKNOWN_IS_UNKNOWN: &str = "Unknown USS availability is Unknown";
const VERSION_UPDATED: &str = "USS Availability version is updated";
const DECLARED_RETURNED: &str = "Declared USS Availability is returned";

const READ_HIGH: TestCheckDocumentation = TestCheckDocumentation {
    name: READ_CHECK,
    requirements: &[READ_REQUIREMENT],
    severity: Severity::High,
};

const READ_MEDIUM: TestCheckDocumentation = TestCheckDocumentation {
    severity: Severity::Medium,
    ..READ_HIGH
};

const SET_HIGH: TestCheckDocumentation = TestCheckDocumentation {
    name: SET_CHECK,
    requirements: &[READ_REQUIREMENT],
    severity: Severity::High,
};

const SET_MEDIUM: TestCheckDocumentation = TestCheckDocumentation {
    severity: Severity::Medium,
    ..SET_HIGH
};

const VERSION_UPDATED_CHECK: TestCheckDocumentation = TestCheckDocumentation {
    name: VERSION_UPDATED,
    requirements: &[READ_REQUIREMENT],
    severity: Severity::Medium,
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM F3548-21 DSS availability arbitration",
    description: "Submits a DSS report and exercises USS availability declaration on one DSS",
    cases: &[
        TestCaseDocumentation {
            name: "DSS Report",
            steps: &[TestStepDocumentation {
                name: "Make valid DSS report",
                checks: &[
                    TestCheckDocumentation {
                        name: REPORT_SUBMITTED,
                        requirements: &[REPORT_REQUIREMENT],
                        severity: Severity::High,
                    },
                    TestCheckDocumentation {
                        name: REPORT_ID_RETURNED,
                        requirements: &[REPORT_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                ],
            }],
        },
        TestCaseDocumentation {
            name: "USS Availability",
            steps: &[
                TestStepDocumentation {
                    name: "Read unknown USS availability",
                    checks: &[
                        READ_HIGH,
                        TestCheckDocumentation {
                            name: UNKNOWN_IS_UNKNOWN,
                            requirements: &[READ_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Declare USS as Down",
                    checks: &[
                        READ_HIGH,
                        SET_HIGH,
                        VERSION_UPDATED_CHECK,
                    ],
                },
                TestStepDocumentation {
                    name: "Read declared availability",
                    checks: &[
                        READ_HIGH,
                        TestCheckDocumentation {
                            name: DECLARED_RETURNED,
                            requirements: &[READ_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Restore USS availability",
                    checks: &[
                        READ_HIGH,
                        SET_HIGH,
                        VERSION_UPDATED_CHECK,
                    ],
                },
            ],
        },
    ],
    cleanup: Some(TestStepDocumentation {
        name: "Restore USS availability",
        checks: &[READ_MEDIUM, SET_MEDIUM],
    }),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let dss = bindings.dss("dss")?;
    let ids = bindings.id_generator("id_generator")?;
    let uss_id = bindings
        .client_identity("client_identity")?
        .unwrap_or_else(|| dss.subject().to_string());
    Ok(Box::new(AvailabilityArbitration {
        dss,
        uss_id,
        unknown_uss_id: ids.make_id(UNKNOWN_USS),
        declared_down: false,
    }))
}

/// Exchange record describing a request to a USS that never answered
fn dummy_exchange_record(now: DateTime<Utc>) -> ExchangeRecord {
    ExchangeRecord {
        url: "http://dummy.interuss.org/uss/v1/operational_intents/dummy_id".to_string(),
        method: "GET".to_string(),
        headers: Vec::new(),
        recorder_role: ExchangeRole::Client,
        request_time: now.into(),
        request_body: String::new(),
        response_time: None,
        response_body: String::new(),
        response_code: i32::from(FAILED_QUERY_CODE),
        problem: "this is a dummy record created by the USS qualifier".to_string(),
        protocol: ExchangeProtocol::Http,
    }
}

pub struct AvailabilityArbitration {
    dss: DssInstance,
    uss_id: String,
    unknown_uss_id: String,
    declared_down: bool,
}

impl AvailabilityArbitration {
    async fn dss_report_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("DSS Report")?;
        ctx.begin_test_step("Make valid DSS report")?;

        let fetched = self.dss.make_report(&dummy_exchange_record(Utc::now())).await;
        let report = require_success(ctx, REPORT_SUBMITTED, &fetched, "DSS report was not accepted")?;

        let check = ctx.check(REPORT_ID_RETURNED, &[&self.dss.participant_id])?;
        match report.report_id.as_deref().filter(|id| !id.is_empty()) {
            Some(report_id) => {
                ctx.pass(check)?;
                ctx.record_note(format!("{}/report_id", self.dss.participant_id), report_id);
            }
            None => ctx.fail(
                check,
                Failure::new("DSS accepted the report without returning a report ID")
                    .queries(fetched.timestamps()),
            )?,
        }

        ctx.end_test_step()?;
        ctx.end_test_case()
    }

    fn check_version_updated(
        &self,
        ctx: &mut ScenarioContext,
        previous: &str,
        current: &str,
    ) -> Result<()> {
        let check = ctx.check(VERSION_UPDATED, &[&self.dss.participant_id])?;
        let outcome = if previous == current {
            Err(Failure::new("USS availability version did not change")
                .details(format!("version remained '{}'", current)))
        } else {
            expect_url_safe_token("USS availability version", current)
        };
        ctx.record(check, outcome)
    }

    async fn uss_availability_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("USS Availability")?;

        ctx.begin_test_step("Read unknown USS availability")?;
        let fetched = self.dss.get_uss_availability(&self.unknown_uss_id).await;
        if let Some(reading) = record_read(ctx, &self.dss.participant_id, &fetched)? {
            let check = ctx.check(UNKNOWN_IS_UNKNOWN, &[&self.dss.participant_id])?;
            let outcome = match check_unknown_availability(&reading) {
                None => Ok(()),
                Some(discrepancy) => Err(Failure::new(
                    "DSS reported availability for a USS that never declared any",
                )
                .details(discrepancy.to_string())
                .queries(fetched.timestamps())),
            };
            ctx.record(check, outcome)?;
        }
        ctx.end_test_step()?;

        ctx.begin_test_step("Declare USS as Down")?;
        let (previous, declared) =
            declare_availability(ctx, &self.dss, &self.uss_id, UssAvailabilityState::Down).await?;
        self.declared_down = true;
        self.check_version_updated(ctx, &previous, &declared.version)?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Read declared availability")?;
        let fetched = self.dss.get_uss_availability(&self.uss_id).await;
        if let Some(reading) = record_read(ctx, &self.dss.participant_id, &fetched)? {
            let check = ctx.check(DECLARED_RETURNED, &[&self.dss.participant_id])?;
            let outcome = if reading.state == UssAvailabilityState::Down
                && reading.version == declared.version
            {
                Ok(())
            } else {
                Err(Failure::new("DSS did not return the declared USS availability")
                    .details(format!(
                        "expected Down with version '{}' but found {} with version '{}'",
                        declared.version, reading.state, reading.version
                    ))
                    .queries(fetched.timestamps()))
            };
            ctx.record(check, outcome)?;
        }
        ctx.end_test_step()?;

        ctx.begin_test_step("Restore USS availability")?;
        let (previous, restored) =
            declare_availability(ctx, &self.dss, &self.uss_id, UssAvailabilityState::Normal)
                .await?;
        self.declared_down = false;
        self.check_version_updated(ctx, &previous, &restored.version)?;
        ctx.end_test_step()?;

        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for AvailabilityArbitration {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        self.dss_report_case(ctx).await?;
        self.uss_availability_case(ctx).await
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
