//! Constraint reference synchronization across the DSS instances of a deployment
//!
//! The constraint reference is written on the primary instance only. Every
//! secondary is re-read until it reflects the write or the propagation
//! timeout elapses, and the last read is evaluated.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::dss::types::{ConstraintReference, PutConstraintReferenceParameters};
use crate::dss::{DssInstance, Fetched};
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, RunSettings, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{
    expect_eq, expect_time_close, expect_url_safe_token, query_failure, require_success,
};

use super::fragments::{
    remove_active_constraint_references, remove_active_subscriptions,
    remove_constraint_reference, CR_QUERY, CR_REMOVED, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED,
};
use super::{CR_REQUIREMENT, CR_SYNC_REQUIREMENT};

const CONSTRAINT: ResourceType =
    ResourceType::new(390, "Constraint reference for synchronization checks");

const CREATED: &str = "Create constraint reference query succeeds";
const CREATED_CONTENT: &str = "Create constraint reference response content is correct";
const RETRIEVED: &str = "Constraint reference can be retrieved from all DSS instances";
const CONSISTENT: &str = "Constraint reference content is consistent across DSS instances";
const SEARCHED: &str = "Constraint reference search succeeds";
const IN_SEARCH: &str = "Constraint reference is returned by area search on all DSS instances";
const DELETED: &str = "Delete constraint reference query succeeds";
const GONE: &str = "Deleted constraint reference cannot be retrieved from any DSS instance";

const CONSISTENT_CHECK: TestCheckDocumentation = TestCheckDocumentation {
    name: CONSISTENT,
    requirements: &[CR_SYNC_REQUIREMENT],
    severity: Severity::Medium,
};

const CLEAN_WORKSPACE: TestStepDocumentation = TestStepDocumentation {
    name: "Ensure clean workspace",
    checks: &[CR_QUERY, CR_REMOVED, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED],
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM SCD DSS: Constraint Reference Synchronization",
    description: "Verifies that a constraint reference written on one DSS instance is visible on all others",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "CR synchronization",
            steps: &[
                TestStepDocumentation {
                    name: "Create CR validation",
                    checks: &[
                        TestCheckDocumentation {
                            name: CREATED,
                            requirements: &[CR_REQUIREMENT],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: CREATED_CONTENT,
                            requirements: &[CR_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Query newly created CR",
                    checks: &[
                        TestCheckDocumentation {
                            name: RETRIEVED,
                            requirements: &[CR_SYNC_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        CONSISTENT_CHECK,
                    ],
                },
                TestStepDocumentation {
                    name: "Search for newly created CR",
                    checks: &[
                        TestCheckDocumentation {
                            name: SEARCHED,
                            requirements: &[CR_SYNC_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: IN_SEARCH,
                            requirements: &[CR_SYNC_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        CONSISTENT_CHECK,
                    ],
                },
                TestStepDocumentation {
                    name: "Delete CR",
                    checks: &[TestCheckDocumentation {
                        name: DELETED,
                        requirements: &[CR_REQUIREMENT],
                        severity: Severity::High,
                    }],
                },
                TestStepDocumentation {
                    name: "Query deleted CR",
                    checks: &[TestCheckDocumentation {
                        name: GONE,
                        requirements: &[CR_SYNC_REQUIREMENT],
                        severity: Severity::Medium,
                    }],
                },
            ],
        },
    ],
    cleanup: Some(CLEAN_WORKSPACE),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let dss = bindings.dss("dss")?;
    let ids = bindings.id_generator("id_generator")?;
    let manager = bindings
        .client_identity("client_identity")?
        .unwrap_or_else(|| dss.subject().to_string());
    Ok(Box::new(CrSynchronization {
        dss,
        others: bindings.dss_instances("other_instances")?,
        area: bindings.planning_area("planning_area")?,
        cr_id: ids.make_id(CONSTRAINT),
        manager,
    }))
}

/// Read until `settled` holds for a result or propagation times out
///
/// Every read is returned; the last one is the observation to evaluate.
async fn read_until<T, F, Fut>(
    settings: &RunSettings,
    mut read: F,
    settled: impl Fn(&Fetched<T>) -> bool,
) -> Vec<Fetched<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Fetched<T>>,
{
    let deadline = Instant::now() + settings.propagation_timeout;
    let mut reads = Vec::new();
    loop {
        let fetched = read().await;
        let done = settled(&fetched);
        reads.push(fetched);
        if done || Instant::now() >= deadline {
            return reads;
        }
        tokio::time::sleep(settings.propagation_poll).await;
    }
}

/// Fields in which `observed` differs from the reference held by the primary
///
/// OVNs are compared only when both instances disclose them.
fn cr_differences(primary: &ConstraintReference, observed: &ConstraintReference) -> Vec<String> {
    let mut differences = Vec::new();
    if observed.id != primary.id {
        differences.push(format!("id: {} vs {}", primary.id, observed.id));
    }
    if observed.manager != primary.manager {
        differences.push(format!("manager: {} vs {}", primary.manager, observed.manager));
    }
    if observed.version != primary.version {
        differences.push(format!("version: {} vs {}", primary.version, observed.version));
    }
    if observed.uss_base_url != primary.uss_base_url {
        differences.push(format!(
            "USS base URL: {} vs {}",
            primary.uss_base_url, observed.uss_base_url
        ));
    }
    if observed.time_start.value != primary.time_start.value {
        differences.push(format!(
            "start time: {} vs {}",
            primary.time_start.value.to_rfc3339(),
            observed.time_start.value.to_rfc3339()
        ));
    }
    if observed.time_end.value != primary.time_end.value {
        differences.push(format!(
            "end time: {} vs {}",
            primary.time_end.value.to_rfc3339(),
            observed.time_end.value.to_rfc3339()
        ));
    }
    if let (Some(a), Some(b)) = (&primary.ovn, &observed.ovn) {
        if a != b {
            differences.push(format!("OVN: {} vs {}", a, b));
        }
    }
    differences
}

pub struct CrSynchronization {
    dss: DssInstance,
    others: Vec<DssInstance>,
    area: UssArea,
    cr_id: String,
    manager: String,
}

impl CrSynchronization {
    async fn clean_workspace(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let area = self.area.search_volume();
        remove_active_constraint_references(ctx, &self.dss, &area, &self.manager).await?;
        remove_constraint_reference(ctx, &self.dss, &self.cr_id).await?;
        remove_active_subscriptions(ctx, &self.dss, &area).await
    }

    fn record_consistency(
        &self,
        ctx: &mut ScenarioContext,
        other: &DssInstance,
        primary: &ConstraintReference,
        observed: &ConstraintReference,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let check = ctx.check(
            CONSISTENT,
            &[self.dss.participant_id.as_str(), other.participant_id.as_str()],
        )?;
        let differences = cr_differences(primary, observed);
        if differences.is_empty() {
            return ctx.pass(check);
        }
        ctx.fail(
            check,
            Failure::new(format!(
                "{} returned a constraint reference different from {}",
                other.participant_id, self.dss.participant_id
            ))
            .details(differences.join("\n"))
            .queries([timestamp]),
        )
    }

    async fn create_step(
        &self,
        ctx: &mut ScenarioContext,
    ) -> Result<ConstraintReference> {
        ctx.begin_test_step("Create CR validation")?;
        let now = Utc::now();
        let (start, end) = (self.area.time_start(now), self.area.time_end(now));
        let params = PutConstraintReferenceParameters {
            extents: vec![self.area.volume(start, end)],
            uss_base_url: self.area.base_url.clone(),
        };
        let created = self.dss.put_cr(&self.cr_id, &params, None).await;
        let response = require_success(
            ctx,
            CREATED,
            &created,
            "Constraint reference could not be created",
        )?;
        let cr = response.constraint_reference.clone();

        let check = ctx.check(CREATED_CONTENT, &[&self.dss.participant_id])?;
        let outcomes = [
            expect_eq("ID", &cr.id, &self.cr_id),
            expect_eq("manager", &cr.manager, &self.manager),
            expect_eq("USS base URL", &cr.uss_base_url, &self.area.base_url),
            expect_time_close("start time", cr.time_start.value, start),
            expect_time_close("end time", cr.time_end.value, end),
            expect_url_safe_token("OVN", cr.ovn.as_deref().unwrap_or_default()),
        ];
        let problems: Vec<String> = outcomes
            .into_iter()
            .filter_map(|o| o.err())
            .map(|f| format!("{}: {}", f.summary, f.details))
            .collect();
        if problems.is_empty() {
            ctx.pass(check)?;
        } else {
            ctx.fail(
                check,
                Failure::new("Created constraint reference has unexpected content")
                    .details(problems.join("\n"))
                    .queries(created.timestamps()),
            )?;
        }
        ctx.end_test_step()?;
        Ok(cr)
    }

    async fn query_step(
        &self,
        ctx: &mut ScenarioContext,
        primary: &ConstraintReference,
    ) -> Result<()> {
        ctx.begin_test_step("Query newly created CR")?;
        let settings = ctx.settings().clone();
        for other in &self.others {
            let reads = read_until(
                &settings,
                || other.get_cr(&self.cr_id),
                |f| match &f.value {
                    Some(r) => cr_differences(primary, &r.constraint_reference).is_empty(),
                    None => f.status_code() != 404,
                },
            )
            .await;
            ctx.record_queries(reads.iter().map(|f| &f.query));
            let Some(last) = reads.last() else {
                continue;
            };
            let check = ctx.check(RETRIEVED, &[&other.participant_id])?;
            let Some(response) = &last.value else {
                ctx.fail(
                    check,
                    query_failure(
                        format!(
                            "Constraint reference {} could not be retrieved from {}",
                            self.cr_id, other.participant_id
                        ),
                        last,
                    ),
                )?;
                continue;
            };
            ctx.pass(check)?;
            self.record_consistency(
                ctx,
                other,
                primary,
                &response.constraint_reference,
                last.query.timestamp(),
            )?;
        }
        ctx.end_test_step()
    }

    async fn search_step(
        &self,
        ctx: &mut ScenarioContext,
        primary: &ConstraintReference,
    ) -> Result<()> {
        ctx.begin_test_step("Search for newly created CR")?;
        let settings = ctx.settings().clone();
        let area = self.area.search_volume();
        for other in &self.others {
            let reads = read_until(
                &settings,
                || other.query_crs(&area),
                |f| match &f.value {
                    Some(r) => r
                        .constraint_references
                        .iter()
                        .any(|cr| cr.id == self.cr_id && cr_differences(primary, cr).is_empty()),
                    None => true,
                },
            )
            .await;
            ctx.record_queries(reads.iter().map(|f| &f.query));
            let Some(last) = reads.last() else {
                continue;
            };
            let check = ctx.check(SEARCHED, &[&other.participant_id])?;
            let Some(response) = &last.value else {
                ctx.fail(
                    check,
                    query_failure(
                        format!("Area search failed on {}", other.participant_id),
                        last,
                    ),
                )?;
                continue;
            };
            ctx.pass(check)?;

            let check = ctx.check(IN_SEARCH, &[&other.participant_id])?;
            let Some(found) = response
                .constraint_references
                .iter()
                .find(|cr| cr.id == self.cr_id)
            else {
                ctx.fail(
                    check,
                    Failure::new(format!(
                        "Constraint reference {} is missing from the area search on {}",
                        self.cr_id, other.participant_id
                    ))
                    .queries([last.query.timestamp()]),
                )?;
                continue;
            };
            ctx.pass(check)?;
            self.record_consistency(ctx, other, primary, found, last.query.timestamp())?;
        }
        ctx.end_test_step()
    }

    async fn delete_step(
        &self,
        ctx: &mut ScenarioContext,
        primary: &ConstraintReference,
    ) -> Result<()> {
        ctx.begin_test_step("Delete CR")?;
        let ovn = primary.ovn.clone().unwrap_or_default();
        let deleted = self.dss.delete_cr(&self.cr_id, &ovn).await;
        require_success(
            ctx,
            DELETED,
            &deleted,
            "Constraint reference could not be deleted",
        )?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Query deleted CR")?;
        let settings = ctx.settings().clone();
        for other in &self.others {
            let reads = read_until(
                &settings,
                || other.get_cr(&self.cr_id),
                |f| f.status_code() != 200,
            )
            .await;
            ctx.record_queries(reads.iter().map(|f| &f.query));
            let Some(last) = reads.last() else {
                continue;
            };
            let check = ctx.check(GONE, &[&other.participant_id])?;
            if last.status_code() == 404 {
                ctx.pass(check)?;
                continue;
            }
            ctx.fail(
                check,
                query_failure(
                    format!(
                        "{} did not report deleted constraint reference {} as absent",
                        other.participant_id, self.cr_id
                    ),
                    last,
                ),
            )?;
        }
        ctx.end_test_step()
    }
}

#[async_trait]
impl TestScenario for CrSynchronization {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        if self.others.is_empty() {
            return Err(Error::Config(
                "CR synchronization needs at least one other DSS instance".to_string(),
            ));
        }

        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        self.clean_workspace(ctx).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        ctx.begin_test_case("CR synchronization")?;
        let primary = self.create_step(ctx).await?;
        self.query_step(ctx, &primary).await?;
        self.search_step(ctx, &primary).await?;
        self.delete_step(ctx, &primary).await?;
        ctx.end_test_case()
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        self.clean_workspace(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn cr() -> ConstraintReference {
        let start = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ConstraintReference {
            id: "cr1".into(),
            manager: "uss_qualifier".into(),
            version: 1,
            ovn: Some("ovn1".into()),
            time_start: start.into(),
            time_end: (start + Duration::minutes(15)).into(),
            uss_base_url: "https://uss.example.com/utm".into(),
        }
    }

    #[test]
    fn test_identical_references() {
        assert!(cr_differences(&cr(), &cr()).is_empty());
    }

    #[test]
    fn test_hidden_ovn_is_not_a_difference() {
        let mut observed = cr();
        observed.ovn = None;
        assert!(cr_differences(&cr(), &observed).is_empty());
        observed.ovn = Some("ovn2".into());
        assert_eq!(cr_differences(&cr(), &observed).len(), 1);
    }

    #[test]
    fn test_differences_listed() {
        let mut observed = cr();
        observed.version = 2;
        observed.time_end.value += Duration::seconds(1);
        let differences = cr_differences(&cr(), &observed);
        assert_eq!(differences.len(), 2);
        assert!(differences[0].starts_with("version"));
        assert!(differences[1].starts_with("end time"));
    }
}
