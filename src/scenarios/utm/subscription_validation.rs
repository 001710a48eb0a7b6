//! DSS enforcement of the maximum subscription duration

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::common::Result;
use crate::dss::types::{PutScdSubscriptionResponse, ScdSubscription};
use crate::dss::{DssInstance, Fetched};
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_status, participants_of, query_failure};

use super::fragments::{
    remove_active_subscriptions, remove_subscription, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED,
    SUBSCRIPTION_REMOVED_CHECK,
};
use super::{oir_subscription, SUBSCRIPTION_DURATION_REQUIREMENT};

const SUBSCRIPTION: ResourceType = ResourceType::new(378, "Subscription");

const NOT_CREATED_TOO_LONG: &str = "Don't create a too long subscription";
const MAXIMAL_ACCEPTED: &str = "Accept a subscription of maximal duration";
const NOT_MUTATED_TOO_LONG: &str = "Don't mutate a subscription to be too long";

/// Accepted range of a subscription truncated to 24 hours, bounds excluded
const TRUNCATED_MIN_S: i64 = 23 * 3600 + 59 * 60;
const TRUNCATED_MAX_S: i64 = 24 * 3600 + 1;

const CLEAN_WORKSPACE: TestStepDocumentation = TestStepDocumentation {
    name: "Ensure clean workspace",
    checks: &[SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED],
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM SCD DSS: Subscription Validation",
    description: "Verifies that the DSS rejects or truncates subscriptions longer than 24 hours",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "Subscription Validation",
            steps: &[TestStepDocumentation {
                name: "Subscription duration limitations",
                checks: &[
                    TestCheckDocumentation {
                        name: NOT_CREATED_TOO_LONG,
                        requirements: &[SUBSCRIPTION_DURATION_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    TestCheckDocumentation {
                        name: MAXIMAL_ACCEPTED,
                        requirements: &[SUBSCRIPTION_DURATION_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    TestCheckDocumentation {
                        name: NOT_MUTATED_TOO_LONG,
                        requirements: &[SUBSCRIPTION_DURATION_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    SUBSCRIPTION_REMOVED,
                ],
            }],
        },
    ],
    cleanup: Some(CLEAN_WORKSPACE),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let ids = bindings.id_generator("id_generator")?;
    Ok(Box::new(SubscriptionValidation {
        dss: bindings.dss("dss")?,
        area: bindings.planning_area("planning_area")?,
        sub_id: ids.make_id(SUBSCRIPTION),
    }))
}

/// Whether `subscription` was truncated to 24 hours
fn truncation_problem(subscription: &ScdSubscription) -> Option<String> {
    let (Some(start), Some(end)) = (&subscription.time_start, &subscription.time_end) else {
        return Some("Returned subscription has no time bounds".to_string());
    };
    let seconds = (end.value - start.value).num_seconds();
    if TRUNCATED_MIN_S < seconds && seconds < TRUNCATED_MAX_S {
        None
    } else {
        Some(format!(
            "Returned subscription lasts {}s instead of being rejected or truncated to 24 hours",
            seconds
        ))
    }
}

pub struct SubscriptionValidation {
    dss: DssInstance,
    area: UssArea,
    sub_id: String,
}

impl SubscriptionValidation {
    /// Evaluate a write of a too long subscription: rejection or truncation passes
    ///
    /// A subscription that was nevertheless stored is removed.
    async fn evaluate_too_long(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        attempt: &Fetched<PutScdSubscriptionResponse>,
    ) -> Result<()> {
        ctx.record_query(&attempt.query);
        let check = ctx.check(check_name, &participants_of(&attempt.query))?;
        if attempt.status_code() == 400 {
            return ctx.pass(check);
        }
        let Some(response) = &attempt.value else {
            return ctx.fail(
                check,
                query_failure("DSS neither rejected nor accepted the subscription", attempt),
            );
        };
        let problem = truncation_problem(&response.subscription);
        match problem {
            None => ctx.pass(check)?,
            Some(problem) => ctx.fail(
                check,
                Failure::new("DSS failed to reject or truncate subscription that exceeded 24 hours")
                    .details(problem)
                    .queries(attempt.timestamps()),
            )?,
        }
        let deleted = self
            .dss
            .delete_scd_subscription(&self.sub_id, &response.subscription.version)
            .await;
        expect_status(
            ctx,
            SUBSCRIPTION_REMOVED_CHECK,
            &deleted.query,
            &[200],
            &format!("Could not remove accepted subscription {}", self.sub_id),
        )?;
        Ok(())
    }

    async fn duration_step(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_step("Subscription duration limitations")?;
        let start = Utc::now() - Duration::minutes(1);
        let too_long = Duration::hours(24) + Duration::minutes(10);

        let params = oir_subscription(&self.area, self.area.volume(start, start + too_long));
        let attempt = self.dss.put_scd_subscription(&self.sub_id, &params, None).await;
        self.evaluate_too_long(ctx, NOT_CREATED_TOO_LONG, &attempt)
            .await?;

        let params = oir_subscription(
            &self.area,
            self.area.volume(start, start + Duration::hours(24)),
        );
        let created = self.dss.put_scd_subscription(&self.sub_id, &params, None).await;
        ctx.record_query(&created.query);
        let check = ctx.check(MAXIMAL_ACCEPTED, &participants_of(&created.query))?;
        let version = match &created.value {
            Some(response) if created.status_code() == 200 => {
                ctx.pass(check)?;
                response.subscription.version.clone()
            }
            _ => {
                ctx.fail(
                    check,
                    query_failure(
                        "DSS failed to create a subscription of the maximal duration of 24 hours",
                        &created,
                    ),
                )?;
                return ctx.end_test_step();
            }
        };

        let params = oir_subscription(&self.area, self.area.volume(start, start + too_long));
        let attempt = self
            .dss
            .put_scd_subscription(&self.sub_id, &params, Some(&version))
            .await;
        self.evaluate_too_long(ctx, NOT_MUTATED_TOO_LONG, &attempt)
            .await?;
        ctx.end_test_step()
    }

    async fn clean_workspace(&self, ctx: &mut ScenarioContext) -> Result<()> {
        remove_active_subscriptions(ctx, &self.dss, &self.area.search_volume()).await?;
        remove_subscription(ctx, &self.dss, &self.sub_id).await
    }
}

#[async_trait]
impl TestScenario for SubscriptionValidation {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        self.clean_workspace(ctx).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        ctx.begin_test_case("Subscription Validation")?;
        self.duration_step(ctx).await?;
        ctx.end_test_case()
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        remove_subscription(ctx, &self.dss, &self.sub_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn subscription(duration: Duration) -> ScdSubscription {
        let start = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ScdSubscription {
            id: "sub".into(),
            version: "v1".into(),
            notification_index: 0,
            time_start: Some(start.into()),
            time_end: Some((start + duration).into()),
            uss_base_url: "https://uss.example.com".into(),
            notify_for_operational_intents: true,
            notify_for_constraints: false,
            implicit_subscription: false,
            dependent_operational_intents: vec![],
        }
    }

    #[test]
    fn test_truncated_to_24_hours() {
        assert!(truncation_problem(&subscription(Duration::hours(24))).is_none());
        assert!(truncation_problem(&subscription(
            Duration::hours(23) + Duration::minutes(59) + Duration::seconds(30)
        ))
        .is_none());
    }

    #[test]
    fn test_not_truncated() {
        let problem =
            truncation_problem(&subscription(Duration::hours(24) + Duration::minutes(10)));
        assert!(problem.unwrap().contains("87000s"));
        assert!(truncation_problem(&subscription(Duration::hours(12))).is_some());
    }

    #[test]
    fn test_missing_bounds() {
        let mut sub = subscription(Duration::hours(24));
        sub.time_end = None;
        assert!(truncation_problem(&sub).is_some());
    }
}
