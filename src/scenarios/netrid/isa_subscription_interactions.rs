//! Interactions between an ISA and a subscription over the same area

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::common::Result;
use crate::dss::types::SubscriberToNotify;
use crate::dss::DssInstance;
use crate::resources::id_generator::sibling_id;
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_status, require_success};

use super::validators::{content_outcome, isa_problems, notified_index, Expected, VersionExpectation};
use super::{
    delete_isa_if_exists, delete_subscription_if_exists, Window, CLEANUP, CLEAN_WORKSPACE,
    ISA_CONTENT, ISA_CONTENT_CHECK, ISA_DELETE_REQUIREMENT, ISA_WRITE_REQUIREMENT,
    NOTIFICATION_REQUIREMENT, SUBSCRIPTION_DELETE_REQUIREMENT, SUBSCRIPTION_WRITE_REQUIREMENT,
};

const ISA: ResourceType = ResourceType::new(370, "ISA");

const ISA_CREATED: &str = "ISA created";
const SUBSCRIPTION_CREATED: &str = "Subscription created";
const MENTIONS_ISA: &str = "Subscription for the ISA's area mentions the ISA";
const ISA_MUTATED: &str = "ISA mutated";
const MUTATION_NOTIFIES: &str = "Response to the mutation of the ISA contains subscription ID";
const ISA_DELETED: &str = "ISA deleted";
const DELETION_NOTIFIES: &str = "Response to the deletion of the ISA contains subscription ID";
const SUBSCRIPTION_DELETED: &str = "Subscription deleted";
const ISA_GONE: &str = "Deleted ISA cannot be retrieved";
const SUBSCRIPTION_GONE: &str = "Deleted subscription cannot be retrieved";

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM NetRID DSS: ISA Subscription Interactions",
    description: "Verifies that ISA changes notify a subscription covering the ISA",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "ISA Subscription Interactions",
            steps: &[
                TestStepDocumentation {
                    name: "Create an ISA",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISA_CREATED,
                            requirements: &[ISA_WRITE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        ISA_CONTENT,
                    ],
                },
                TestStepDocumentation {
                    name: "Create a subscription within the ISA footprint",
                    checks: &[
                        TestCheckDocumentation {
                            name: SUBSCRIPTION_CREATED,
                            requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: MENTIONS_ISA,
                            requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Mutate the ISA",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISA_MUTATED,
                            requirements: &[ISA_WRITE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        ISA_CONTENT,
                        TestCheckDocumentation {
                            name: MUTATION_NOTIFIES,
                            requirements: &[NOTIFICATION_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Delete the ISA",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISA_DELETED,
                            requirements: &[ISA_DELETE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: DELETION_NOTIFIES,
                            requirements: &[NOTIFICATION_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: ISA_GONE,
                            requirements: &[ISA_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Delete the subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: SUBSCRIPTION_DELETED,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: SUBSCRIPTION_GONE,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
            ],
        },
    ],
    cleanup: Some(CLEANUP),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let ids = bindings.id_generator("id_generator")?;
    let isa_id = ids.make_id(ISA);
    Ok(Box::new(IsaSubscriptionInteractions {
        dss: bindings.dss("dss")?,
        area: bindings.service_area("service_area")?,
        sub_id: sibling_id(&isa_id, '1'),
        isa_id,
    }))
}

/// Outcome of the notification check after an ISA change
///
/// `last_index` is the latest index known for the subscription.
fn notification_outcome(
    subscribers: &[SubscriberToNotify],
    sub_id: &str,
    last_index: i64,
    change: &str,
) -> std::result::Result<i64, Failure> {
    match notified_index(subscribers, sub_id) {
        None => Err(Failure::new(format!(
            "Subscription {} is not among the subscribers to notify of the ISA {}",
            sub_id, change
        ))),
        Some(index) if index <= last_index => Err(Failure::new(format!(
            "Notification index of subscription {} was not incremented by the ISA {}",
            sub_id, change
        ))
        .details(format!("index was {} and is now {}", last_index, index))),
        Some(index) => Ok(index),
    }
}

pub struct IsaSubscriptionInteractions {
    dss: DssInstance,
    area: UssArea,
    isa_id: String,
    sub_id: String,
}

impl IsaSubscriptionInteractions {
    fn record_notification(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        subscribers: &[SubscriberToNotify],
        last_index: i64,
        change: &str,
        timestamps: Vec<chrono::DateTime<Utc>>,
    ) -> Result<i64> {
        let check = ctx.check(check_name, &[&self.dss.participant_id])?;
        match notification_outcome(subscribers, &self.sub_id, last_index, change) {
            Ok(index) => {
                ctx.pass(check)?;
                Ok(index)
            }
            Err(failure) => {
                ctx.fail(check, failure.queries(timestamps))?;
                Ok(last_index)
            }
        }
    }

    async fn interactions_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("ISA Subscription Interactions")?;
        let now = Utc::now();
        let window = Window {
            start: self.area.time_start(now),
            end: self.area.time_end(now),
        };
        let expected = Expected::new(&self.isa_id, &self.area.base_url, window.start, window.end)
            .owned_by(self.dss.subject());

        ctx.begin_test_step("Create an ISA")?;
        let created = self
            .dss
            .put_isa(
                &self.isa_id,
                &self.area.volume(window.start, window.end),
                &self.area.base_url,
                None,
            )
            .await;
        let isa_version = {
            let response = require_success(ctx, ISA_CREATED, &created, "ISA could not be created")?;
            let check = ctx.check(ISA_CONTENT_CHECK, &[&self.dss.participant_id])?;
            let problems = isa_problems(&expected, &response.service_area);
            ctx.record(
                check,
                content_outcome("ISA", &self.isa_id, problems, created.timestamps()),
            )?;
            response.service_area.version.clone()
        };
        ctx.end_test_step()?;

        ctx.begin_test_step("Create a subscription within the ISA footprint")?;
        let subscribed = self
            .dss
            .put_rid_subscription(
                &self.sub_id,
                &self.area.volume(window.start, window.end),
                &self.area.base_url,
                None,
            )
            .await;
        let mut last_index = {
            let response = require_success(
                ctx,
                SUBSCRIPTION_CREATED,
                &subscribed,
                "Subscription could not be created",
            )?;
            let check = ctx.check(MENTIONS_ISA, &[&self.dss.participant_id])?;
            if response.service_areas.iter().any(|a| a.id == self.isa_id) {
                ctx.pass(check)?;
            } else {
                ctx.fail(
                    check,
                    Failure::new(format!(
                        "Subscription creation response does not mention ISA {}",
                        self.isa_id
                    ))
                    .queries(subscribed.timestamps()),
                )?;
            }
            response.subscription.notification_index
        };
        ctx.end_test_step()?;

        ctx.begin_test_step("Mutate the ISA")?;
        let mutated_end = window.end + Duration::minutes(1);
        let mutated = self
            .dss
            .put_isa(
                &self.isa_id,
                &self.area.volume(window.start, mutated_end),
                &self.area.base_url,
                Some(&isa_version),
            )
            .await;
        let isa_version = {
            let response = require_success(ctx, ISA_MUTATED, &mutated, "ISA could not be mutated")?;
            let check = ctx.check(ISA_CONTENT_CHECK, &[&self.dss.participant_id])?;
            let mut expected = expected.clone().version(VersionExpectation::Changed(isa_version));
            expected.time_end = mutated_end;
            let problems = isa_problems(&expected, &response.service_area);
            ctx.record(
                check,
                content_outcome("ISA", &self.isa_id, problems, mutated.timestamps()),
            )?;
            last_index = self.record_notification(
                ctx,
                MUTATION_NOTIFIES,
                &response.subscribers,
                last_index,
                "mutation",
                mutated.timestamps(),
            )?;
            response.service_area.version.clone()
        };
        ctx.end_test_step()?;

        ctx.begin_test_step("Delete the ISA")?;
        let deleted = self.dss.delete_isa(&self.isa_id, &isa_version).await;
        let response = require_success(ctx, ISA_DELETED, &deleted, "ISA could not be deleted")?;
        self.record_notification(
            ctx,
            DELETION_NOTIFIES,
            &response.subscribers,
            last_index,
            "deletion",
            deleted.timestamps(),
        )?;
        let read_back = self.dss.get_isa(&self.isa_id).await;
        expect_status(
            ctx,
            ISA_GONE,
            &read_back.query,
            &[404],
            &format!("Deleted ISA {} is still returned", self.isa_id),
        )?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Delete the subscription")?;
        let current = self.dss.get_rid_subscription(&self.sub_id).await;
        let version = require_success(
            ctx,
            SUBSCRIPTION_DELETED,
            &current,
            "Subscription could not be read before deletion",
        )?
        .subscription
        .version
        .clone();
        let unsubscribed = self.dss.delete_rid_subscription(&self.sub_id, &version).await;
        require_success(
            ctx,
            SUBSCRIPTION_DELETED,
            &unsubscribed,
            "Subscription could not be deleted",
        )?;
        let read_back = self.dss.get_rid_subscription(&self.sub_id).await;
        expect_status(
            ctx,
            SUBSCRIPTION_GONE,
            &read_back.query,
            &[404],
            &format!("Deleted subscription {} is still returned", self.sub_id),
        )?;
        ctx.end_test_step()?;

        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for IsaSubscriptionInteractions {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        delete_isa_if_exists(ctx, &self.dss, &self.isa_id).await?;
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        self.interactions_case(ctx).await
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        delete_isa_if_exists(ctx, &self.dss, &self.isa_id).await?;
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dss::types::SubscriptionState;

    fn subscribers(index: i64) -> Vec<SubscriberToNotify> {
        vec![SubscriberToNotify {
            url: "https://uss.example.com/rid".into(),
            subscriptions: vec![SubscriptionState {
                subscription_id: "sub1".into(),
                notification_index: index,
            }],
        }]
    }

    #[test]
    fn test_incremented_index_passes() {
        assert_eq!(notification_outcome(&subscribers(2), "sub1", 1, "mutation").unwrap(), 2);
    }

    #[test]
    fn test_stale_index_fails() {
        let failure = notification_outcome(&subscribers(1), "sub1", 1, "mutation").unwrap_err();
        assert!(failure.details.contains("index was 1"));
    }

    #[test]
    fn test_missing_subscription_fails() {
        let failure = notification_outcome(&subscribers(5), "sub2", 1, "deletion").unwrap_err();
        assert!(failure.summary.contains("sub2"));
    }
}
