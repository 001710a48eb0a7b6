//! DSS enforcement of the maximum NetRID subscription duration

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::common::Result;
use crate::dss::types::{PutRidSubscriptionResponse, RidSubscription};
use crate::dss::{DssInstance, Fetched};
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_status, participants_of, query_failure};

use super::{
    delete_own_subscriptions_in_area, delete_subscription_if_exists, CLEANUP, CLEAN_WORKSPACE,
    SUBSCRIPTION_REMOVED, SUBSCRIPTION_REMOVED_CHECK, SUBSCRIPTION_WRITE_REQUIREMENT,
};

const SUBSCRIPTION: ResourceType = ResourceType::new(367, "Subscription");

const NOT_CREATED_TOO_LONG: &str = "Don't create a too long subscription";
const WITHIN_LIMIT_ACCEPTED: &str = "Accept a subscription within the maximal duration";
const NOT_EXTENDED_TOO_LONG: &str = "Don't extend a subscription beyond 24 hours";

const TRUNCATED_MIN_S: i64 = 23 * 3600 + 59 * 60;
const TRUNCATED_MAX_S: i64 = 24 * 3600 + 1;

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM NetRID DSS: Subscription Validation",
    description: "Verifies that the DSS rejects or truncates NetRID subscriptions longer than 24 hours",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "Subscription limitations",
            steps: &[TestStepDocumentation {
                name: "Subscription limitations",
                checks: &[
                    TestCheckDocumentation {
                        name: NOT_CREATED_TOO_LONG,
                        requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    TestCheckDocumentation {
                        name: WITHIN_LIMIT_ACCEPTED,
                        requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    TestCheckDocumentation {
                        name: NOT_EXTENDED_TOO_LONG,
                        requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                        severity: Severity::Medium,
                    },
                    SUBSCRIPTION_REMOVED,
                ],
            }],
        },
    ],
    cleanup: Some(CLEANUP),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let ids = bindings.id_generator("id_generator")?;
    Ok(Box::new(SubscriptionValidation {
        dss: bindings.dss("dss")?,
        area: bindings.service_area("service_area")?,
        sub_id: ids.make_id(SUBSCRIPTION),
    }))
}

/// Why `subscription` does not count as truncated to 24 hours, if it doesn't
fn truncation_problem(subscription: &RidSubscription) -> Option<String> {
    let seconds = (subscription.time_end.value - subscription.time_start.value).num_seconds();
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
    async fn put(
        &self,
        start: DateTime<Utc>,
        duration: Duration,
        version: Option<&str>,
    ) -> Fetched<PutRidSubscriptionResponse> {
        self.dss
            .put_rid_subscription(
                &self.sub_id,
                &self.area.volume(start, start + duration),
                &self.area.base_url,
                version,
            )
            .await
    }

    /// Rejection or truncation of a too long subscription passes
    ///
    /// An overlong subscription the DSS stored anyway is removed.
    async fn evaluate_too_long(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        attempt: &Fetched<PutRidSubscriptionResponse>,
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
        let Some(problem) = truncation_problem(&response.subscription) else {
            return ctx.pass(check);
        };
        ctx.fail(
            check,
            Failure::new("Created subscription has not been properly truncated to 24 hours")
                .details(problem)
                .queries(attempt.timestamps()),
        )?;

        let deleted = self
            .dss
            .delete_rid_subscription(&self.sub_id, &response.subscription.version)
            .await;
        expect_status(
            ctx,
            SUBSCRIPTION_REMOVED_CHECK,
            &deleted.query,
            &[200],
            &format!("Could not remove overlong subscription {}", self.sub_id),
        )?;
        Ok(())
    }

    async fn limitations_step(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_step("Subscription limitations")?;
        let too_long = Duration::hours(24) + Duration::minutes(10);

        let attempt = self.put(Utc::now(), too_long, None).await;
        self.evaluate_too_long(ctx, NOT_CREATED_TOO_LONG, &attempt)
            .await?;

        let created = self
            .put(Utc::now(), Duration::hours(23) + Duration::minutes(59), None)
            .await;
        ctx.record_query(&created.query);
        let check = ctx.check(WITHIN_LIMIT_ACCEPTED, &participants_of(&created.query))?;
        let version = match &created.value {
            Some(response) if created.query.success() => {
                ctx.pass(check)?;
                response.subscription.version.clone()
            }
            _ => {
                ctx.fail(
                    check,
                    query_failure(
                        "DSS failed to create a subscription shorter than 24 hours",
                        &created,
                    ),
                )?;
                return ctx.end_test_step();
            }
        };

        let attempt = self.put(Utc::now(), too_long, Some(&version)).await;
        self.evaluate_too_long(ctx, NOT_EXTENDED_TOO_LONG, &attempt)
            .await?;
        ctx.end_test_step()
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
        delete_own_subscriptions_in_area(ctx, &self.dss, &self.area.rect()).await?;
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        ctx.begin_test_case("Subscription limitations")?;
        self.limitations_step(ctx).await?;
        ctx.end_test_case()
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(duration: Duration) -> RidSubscription {
        let start = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        RidSubscription {
            id: "sub".into(),
            uss_base_url: "https://uss.example.com/rid".into(),
            owner: "uss_qualifier".into(),
            notification_index: 0,
            time_start: start.into(),
            time_end: (start + duration).into(),
            version: "v1".into(),
        }
    }

    #[test]
    fn test_truncated_subscription_accepted() {
        assert!(truncation_problem(&subscription(Duration::hours(24))).is_none());
    }

    #[test]
    fn test_overlong_and_short_subscriptions_flagged() {
        let problem = truncation_problem(&subscription(Duration::hours(24) + Duration::minutes(10)));
        assert!(problem.unwrap().contains("87000s"));
        assert!(truncation_problem(&subscription(Duration::hours(1))).is_some());
    }
}
