//! Basic lifecycle of a NetRID subscription

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::common::Result;
use crate::dss::DssInstance;
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_status, require_success};

use super::validators::{content_outcome, subscription_problems, Expected, VersionExpectation};
use super::{
    delete_own_subscriptions_in_area, delete_subscription_if_exists, Window, CLEANUP,
    CLEAN_WORKSPACE, SUBSCRIPTION_CONTENT, SUBSCRIPTION_CONTENT_CHECK,
    SUBSCRIPTION_DELETE_REQUIREMENT, SUBSCRIPTION_QUERY_REQUIREMENT,
    SUBSCRIPTION_WRITE_REQUIREMENT,
};

const SUBSCRIPTION: ResourceType = ResourceType::new(371, "Subscription");

const CREATED: &str = "Create subscription";
const READ: &str = "Get subscription by ID";
const SEARCHED: &str = "Search subscriptions";
const IN_SEARCH: &str = "Created subscription is in search results";
const MUTATED: &str = "Mutate subscription";
const DELETED: &str = "Delete subscription";
const GONE: &str = "Deleted subscription cannot be retrieved";
const NOT_IN_SEARCH: &str = "Deleted subscription is absent from search results";

const SEARCH: TestCheckDocumentation = TestCheckDocumentation {
    name: SEARCHED,
    requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
    severity: Severity::High,
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM NetRID DSS: Subscription Simple",
    description: "Creates, reads, searches, mutates and deletes a single NetRID subscription",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "Subscription Simple",
            steps: &[
                TestStepDocumentation {
                    name: "Create subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: CREATED,
                            requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        SUBSCRIPTION_CONTENT,
                    ],
                },
                TestStepDocumentation {
                    name: "Query existing subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: READ,
                            requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
                            severity: Severity::High,
                        },
                        SUBSCRIPTION_CONTENT,
                        SEARCH,
                        TestCheckDocumentation {
                            name: IN_SEARCH,
                            requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Mutate subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: MUTATED,
                            requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        SUBSCRIPTION_CONTENT,
                    ],
                },
                TestStepDocumentation {
                    name: "Delete subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: DELETED,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::High,
                        },
                        SUBSCRIPTION_CONTENT,
                    ],
                },
                TestStepDocumentation {
                    name: "Query deleted subscription",
                    checks: &[
                        TestCheckDocumentation {
                            name: GONE,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        SEARCH,
                        TestCheckDocumentation {
                            name: NOT_IN_SEARCH,
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
    Ok(Box::new(SubscriptionSimple {
        dss: bindings.dss("dss")?,
        area: bindings.service_area("service_area")?,
        sub_id: ids.make_id(SUBSCRIPTION),
    }))
}

pub struct SubscriptionSimple {
    dss: DssInstance,
    area: UssArea,
    sub_id: String,
}

impl SubscriptionSimple {
    fn expected(&self, window: Window, version: VersionExpectation) -> Expected {
        Expected::new(&self.sub_id, &self.area.base_url, window.start, window.end)
            .owned_by(self.dss.subject())
            .version(version)
    }

    async fn setup_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await?;
        delete_own_subscriptions_in_area(ctx, &self.dss, &self.area.rect()).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()
    }

    /// Search the service area and evaluate whether our subscription is listed
    async fn search_step_checks(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        should_be_listed: bool,
    ) -> Result<()> {
        let fetched = self.dss.search_rid_subscriptions(&self.area.rect()).await;
        let found = require_success(ctx, SEARCHED, &fetched, "Subscription search failed")?;
        let listed = found.subscriptions.iter().any(|s| s.id == self.sub_id);
        let check = ctx.check(check_name, &[&self.dss.participant_id])?;
        if listed == should_be_listed {
            return ctx.pass(check);
        }
        let summary = if should_be_listed {
            format!("Subscription {} is missing from search results", self.sub_id)
        } else {
            format!("Deleted subscription {} is still returned by search", self.sub_id)
        };
        ctx.fail(check, Failure::new(summary).queries(fetched.timestamps()))
    }

    async fn lifecycle_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Subscription Simple")?;
        let now = Utc::now();
        let window = Window {
            start: self.area.time_start(now),
            end: self.area.time_end(now),
        };

        ctx.begin_test_step("Create subscription")?;
        let created = self
            .dss
            .put_rid_subscription(
                &self.sub_id,
                &self.area.volume(window.start, window.end),
                &self.area.base_url,
                None,
            )
            .await;
        let created_version = {
            let response =
                require_success(ctx, CREATED, &created, "Subscription could not be created")?;
            let sub = &response.subscription;
            let check = ctx.check(SUBSCRIPTION_CONTENT_CHECK, &[&self.dss.participant_id])?;
            let problems = subscription_problems(
                &self.expected(window, VersionExpectation::Any),
                sub,
            );
            ctx.record(
                check,
                content_outcome("subscription", &sub.id, problems, created.timestamps()),
            )?;
            sub.version.clone()
        };
        ctx.end_test_step()?;

        ctx.begin_test_step("Query existing subscription")?;
        let read = self.dss.get_rid_subscription(&self.sub_id).await;
        let response = require_success(ctx, READ, &read, "Subscription could not be read")?;
        let check = ctx.check(SUBSCRIPTION_CONTENT_CHECK, &[&self.dss.participant_id])?;
        let problems = subscription_problems(
            &self.expected(window, VersionExpectation::Unchanged(created_version.clone())),
            &response.subscription,
        );
        ctx.record(
            check,
            content_outcome("subscription", &self.sub_id, problems, read.timestamps()),
        )?;
        self.search_step_checks(ctx, IN_SEARCH, true).await?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Mutate subscription")?;
        let mutated_window = Window {
            start: window.start,
            end: window.end + Duration::minutes(1),
        };
        let mutated = self
            .dss
            .put_rid_subscription(
                &self.sub_id,
                &self.area.volume(mutated_window.start, mutated_window.end),
                &self.area.base_url,
                Some(&created_version),
            )
            .await;
        let mutated_version = {
            let response =
                require_success(ctx, MUTATED, &mutated, "Subscription could not be mutated")?;
            let check = ctx.check(SUBSCRIPTION_CONTENT_CHECK, &[&self.dss.participant_id])?;
            let problems = subscription_problems(
                &self.expected(mutated_window, VersionExpectation::Changed(created_version)),
                &response.subscription,
            );
            ctx.record(
                check,
                content_outcome("subscription", &self.sub_id, problems, mutated.timestamps()),
            )?;
            response.subscription.version.clone()
        };
        ctx.end_test_step()?;

        ctx.begin_test_step("Delete subscription")?;
        let deleted = self
            .dss
            .delete_rid_subscription(&self.sub_id, &mutated_version)
            .await;
        let response =
            require_success(ctx, DELETED, &deleted, "Subscription could not be deleted")?;
        let check = ctx.check(SUBSCRIPTION_CONTENT_CHECK, &[&self.dss.participant_id])?;
        let problems = subscription_problems(
            &self.expected(mutated_window, VersionExpectation::Unchanged(mutated_version)),
            &response.subscription,
        );
        ctx.record(
            check,
            content_outcome("subscription", &self.sub_id, problems, deleted.timestamps()),
        )?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Query deleted subscription")?;
        let read = self.dss.get_rid_subscription(&self.sub_id).await;
        expect_status(
            ctx,
            GONE,
            &read.query,
            &[404],
            "Deleted subscription can still be retrieved",
        )?;
        self.search_step_checks(ctx, NOT_IN_SEARCH, false).await?;
        ctx.end_test_step()?;

        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for SubscriptionSimple {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        self.setup_case(ctx).await?;
        self.lifecycle_case(ctx).await
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        delete_subscription_if_exists(ctx, &self.dss, &self.sub_id).await
    }
}
