//! Notification index growth of a subscription as an operational intent changes
//!
//! The operational intent reference names the subscription, so every write to
//! it must be reflected in the subscription's notification index.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::common::{Error, Result};
use crate::dss::geo::{time_bounds, union_bounding_box, volume4d};
use crate::dss::types::{OperationalIntentState, PutOperationalIntentReferenceParameters, Volume4D};
use crate::dss::DssInstance;
use crate::resources::{Bindings, FlightIntents, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::{expect_status, require_success};

use super::fragments::{
    remove_active_operational_intents, remove_active_subscriptions, remove_operational_intent,
    remove_subscription, OIR_QUERY, OIR_REMOVED, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED,
};
use super::{oir_subscription, OIR_REQUIREMENT, SUBSCRIPTION_REQUIREMENT};

const OPERATIONAL_INTENT: ResourceType = ResourceType::new(379, "Operational intent reference");
const SUBSCRIPTION: ResourceType = ResourceType::new(380, "Subscription");

const SUB_CREATED: &str = "Subscription created";
const AREA_QUERIED: &str = "Operational intents in the area can be queried";
const OIR_CREATED: &str = "Operational intent reference created";
const OIR_MUTATED: &str = "Operational intent reference mutated";
const OIR_DELETED: &str = "Operational intent reference deleted";
const OIR_GONE: &str = "Deleted operational intent reference cannot be retrieved";
const SUB_READ: &str = "Subscription can be read";
const INDEX_INCREMENTED: &str = "Notification index incremented";
const SUB_DELETED: &str = "Subscription deleted";
const LAST_INDEX: &str = "Deleted subscription reports last notification index";
const SUB_GONE: &str = "Deleted subscription cannot be retrieved";

/// Subscriptions outlast the operational intent by this much
const SUBSCRIPTION_MARGIN_MINUTES: i64 = 5;

const AREA_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: AREA_QUERIED,
    requirements: &[OIR_REQUIREMENT],
    severity: Severity::High,
};

const READ: TestCheckDocumentation = TestCheckDocumentation {
    name: SUB_READ,
    requirements: &[SUBSCRIPTION_REQUIREMENT],
    severity: Severity::High,
};

const INDEX: TestCheckDocumentation = TestCheckDocumentation {
    name: INDEX_INCREMENTED,
    requirements: &[OIR_REQUIREMENT, SUBSCRIPTION_REQUIREMENT],
    severity: Severity::Medium,
};

const CLEAN_WORKSPACE: TestStepDocumentation = TestStepDocumentation {
    name: "Ensure clean workspace",
    checks: &[OIR_QUERY, OIR_REMOVED, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED],
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM SCD DSS: Operational Intent Notification Index",
    description: "Verifies that operational intent changes increment the notification index of an overlapping subscription",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "Notification index",
            steps: &[
                TestStepDocumentation {
                    name: "Create subscription",
                    checks: &[TestCheckDocumentation {
                        name: SUB_CREATED,
                        requirements: &[SUBSCRIPTION_REQUIREMENT],
                        severity: Severity::High,
                    }],
                },
                TestStepDocumentation {
                    name: "Create operational intent reference",
                    checks: &[
                        AREA_QUERY,
                        TestCheckDocumentation {
                            name: OIR_CREATED,
                            requirements: &[OIR_REQUIREMENT],
                            severity: Severity::High,
                        },
                        READ,
                        INDEX,
                    ],
                },
                TestStepDocumentation {
                    name: "Mutate operational intent reference",
                    checks: &[
                        AREA_QUERY,
                        TestCheckDocumentation {
                            name: OIR_MUTATED,
                            requirements: &[OIR_REQUIREMENT],
                            severity: Severity::High,
                        },
                        READ,
                        INDEX,
                    ],
                },
                TestStepDocumentation {
                    name: "Delete operational intent reference",
                    checks: &[
                        TestCheckDocumentation {
                            name: OIR_DELETED,
                            requirements: &[OIR_REQUIREMENT],
                            severity: Severity::High,
                        },
                        READ,
                        INDEX,
                        TestCheckDocumentation {
                            name: OIR_GONE,
                            requirements: &[OIR_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Delete subscription",
                    checks: &[
                        READ,
                        TestCheckDocumentation {
                            name: SUB_DELETED,
                            requirements: &[SUBSCRIPTION_REQUIREMENT],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: LAST_INDEX,
                            requirements: &[SUBSCRIPTION_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: SUB_GONE,
                            requirements: &[SUBSCRIPTION_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
            ],
        },
    ],
    cleanup: Some(CLEAN_WORKSPACE),
};

pub fn build(bindings: &Bindings, _parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let ids = bindings.id_generator("id_generator")?;
    Ok(Box::new(OirNotificationIndex {
        dss: bindings.dss("dss")?,
        area: bindings.planning_area("planning_area")?,
        flight_intents: bindings.flight_intents("flight_intents")?,
        oir_id: ids.make_id(OPERATIONAL_INTENT),
        sub_id: ids.make_id(SUBSCRIPTION),
    }))
}

/// Same volumes ending `by` later
fn extended(extents: &[Volume4D], by: Duration) -> Vec<Volume4D> {
    extents
        .iter()
        .cloned()
        .map(|mut v| {
            if let Some(end) = v.time_end.as_mut() {
                end.value += by;
            }
            v
        })
        .collect()
}

/// Volume enclosing every volume of `extents`, lasting `margin` longer
///
/// Altitudes span at least those of `area`.
fn covering_volume(area: &UssArea, extents: &[Volume4D], margin: Duration) -> Option<Volume4D> {
    let bbox = union_bounding_box(extents)?;
    let (start, end) = time_bounds(extents)?;
    let lower = extents
        .iter()
        .filter_map(|v| v.volume.altitude_lower.as_ref())
        .map(|a| a.value)
        .fold(area.altitude_min, f64::min);
    let upper = extents
        .iter()
        .filter_map(|v| v.volume.altitude_upper.as_ref())
        .map(|a| a.value)
        .fold(area.altitude_max, f64::max);
    Some(volume4d(&bbox.corners(), lower, upper, start, end + margin))
}

pub struct OirNotificationIndex {
    dss: DssInstance,
    area: UssArea,
    flight_intents: Option<FlightIntents>,
    oir_id: String,
    sub_id: String,
}

impl OirNotificationIndex {
    /// State and volumes of the operational intent to declare
    ///
    /// The first flight intent is used when intents are provided, otherwise
    /// the whole planning area for its default lifetime.
    fn intent(&self) -> (OperationalIntentState, Vec<Volume4D>) {
        self.flight_intents
            .as_ref()
            .and_then(|intents| intents.ids().next().and_then(|id| intents.resolve(id)))
            .unwrap_or_else(|| {
                (
                    OperationalIntentState::Accepted,
                    vec![self.area.default_volume(Utc::now())],
                )
            })
    }

    async fn clean_workspace(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let area = self.area.search_volume();
        remove_active_operational_intents(ctx, &self.dss, &area, self.dss.subject()).await?;
        remove_operational_intent(ctx, &self.dss, &self.oir_id).await?;
        remove_active_subscriptions(ctx, &self.dss, &area).await?;
        remove_subscription(ctx, &self.dss, &self.sub_id).await
    }

    /// OVNs of the other operational intents in `area`, for the key of a write
    async fn key_for(&self, ctx: &mut ScenarioContext, area: &Volume4D) -> Result<Vec<String>> {
        let fetched = self.dss.query_oirs(area).await;
        let found = require_success(
            ctx,
            AREA_QUERIED,
            &fetched,
            "Could not query operational intents in the area",
        )?;
        Ok(found
            .operational_intent_references
            .iter()
            .filter(|oir| oir.id != self.oir_id)
            .filter_map(|oir| oir.ovn.clone())
            .collect())
    }

    /// Read the subscription and check its index grew past `last`, which is updated
    async fn expect_index_incremented(
        &self,
        ctx: &mut ScenarioContext,
        last: &mut i64,
        event: &str,
    ) -> Result<()> {
        let fetched = self.dss.get_scd_subscription(&self.sub_id).await;
        let response = require_success(ctx, SUB_READ, &fetched, "Subscription could not be read")?;
        let index = response.subscription.notification_index;
        let check = ctx.check(INDEX_INCREMENTED, &[&self.dss.participant_id])?;
        let outcome = if index > *last {
            Ok(())
        } else {
            Err(Failure::new(format!(
                "Notification index did not increase after {}",
                event
            ))
            .details(format!("index went from {} to {}", last, index))
            .queries(fetched.timestamps()))
        };
        *last = (*last).max(index);
        ctx.record(check, outcome)
    }

    async fn notification_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Notification index")?;
        let (state, extents) = self.intent();
        let mutated_extents = extended(&extents, Duration::minutes(1));
        let Some(covering) = covering_volume(
            &self.area,
            &mutated_extents,
            Duration::minutes(SUBSCRIPTION_MARGIN_MINUTES),
        ) else {
            return Err(Error::Config(
                "Operational intent volumes need an outline and time bounds".to_string(),
            ));
        };

        ctx.begin_test_step("Create subscription")?;
        let params = oir_subscription(&self.area, covering.clone());
        let created = self.dss.put_scd_subscription(&self.sub_id, &params, None).await;
        let response =
            require_success(ctx, SUB_CREATED, &created, "Subscription could not be created")?;
        let mut last_index = response.subscription.notification_index;
        ctx.end_test_step()?;

        ctx.begin_test_step("Create operational intent reference")?;
        let key = self.key_for(ctx, &covering).await?;
        let params = PutOperationalIntentReferenceParameters {
            extents,
            key,
            state,
            uss_base_url: self.area.base_url.clone(),
            subscription_id: Some(self.sub_id.clone()),
            new_subscription: None,
        };
        let created = self.dss.put_oir(&self.oir_id, &params, None).await;
        let response = require_success(
            ctx,
            OIR_CREATED,
            &created,
            "Operational intent reference could not be created",
        )?;
        let ovn = response
            .operational_intent_reference
            .ovn
            .clone()
            .unwrap_or_default();
        self.expect_index_incremented(ctx, &mut last_index, "creation")
            .await?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Mutate operational intent reference")?;
        let key = self.key_for(ctx, &covering).await?;
        let params = PutOperationalIntentReferenceParameters {
            extents: mutated_extents,
            key,
            ..params
        };
        let mutated = self.dss.put_oir(&self.oir_id, &params, Some(&ovn)).await;
        let response = require_success(
            ctx,
            OIR_MUTATED,
            &mutated,
            "Operational intent reference could not be mutated",
        )?;
        let ovn = response
            .operational_intent_reference
            .ovn
            .clone()
            .unwrap_or_default();
        self.expect_index_incremented(ctx, &mut last_index, "mutation")
            .await?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Delete operational intent reference")?;
        let deleted = self.dss.delete_oir(&self.oir_id, &ovn).await;
        require_success(
            ctx,
            OIR_DELETED,
            &deleted,
            "Operational intent reference could not be deleted",
        )?;
        self.expect_index_incremented(ctx, &mut last_index, "deletion")
            .await?;
        let read = self.dss.get_oir(&self.oir_id).await;
        expect_status(
            ctx,
            OIR_GONE,
            &read.query,
            &[404],
            "Deleted operational intent reference can still be retrieved",
        )?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Delete subscription")?;
        let current = self.dss.get_scd_subscription(&self.sub_id).await;
        let version = require_success(ctx, SUB_READ, &current, "Subscription could not be read")?
            .subscription
            .version
            .clone();
        let deleted = self.dss.delete_scd_subscription(&self.sub_id, &version).await;
        let response =
            require_success(ctx, SUB_DELETED, &deleted, "Subscription could not be deleted")?;
        let reported = response.subscription.notification_index;
        let check = ctx.check(LAST_INDEX, &[&self.dss.participant_id])?;
        if reported == last_index {
            ctx.pass(check)?;
        } else {
            ctx.fail(
                check,
                Failure::new("Deleted subscription reports a stale notification index")
                    .details(format!("expected {} but found {}", last_index, reported))
                    .queries(deleted.timestamps()),
            )?;
        }
        let read = self.dss.get_scd_subscription(&self.sub_id).await;
        expect_status(
            ctx,
            SUB_GONE,
            &read.query,
            &[404],
            "Deleted subscription can still be retrieved",
        )?;
        ctx.end_test_step()?;

        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for OirNotificationIndex {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        self.clean_workspace(ctx).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        self.notification_case(ctx).await
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        self.clean_workspace(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn area() -> UssArea {
        serde_yaml::from_str(
            r#"
base_url: https://uss.example.com/utm
footprint:
  - {lat: 37.1, lng: -118.9}
  - {lat: 37.2, lng: -118.9}
  - {lat: 37.2, lng: -118.8}
altitude_min: 100
altitude_max: 200
"#,
        )
        .unwrap()
    }

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_extended_moves_end_only() {
        let area = area();
        let v = area.volume(t("2026-05-01T10:00:00Z"), t("2026-05-01T10:15:00Z"));
        let out = extended(&[v], Duration::minutes(1));
        assert_eq!(out[0].start(), Some(t("2026-05-01T10:00:00Z")));
        assert_eq!(out[0].end(), Some(t("2026-05-01T10:16:00Z")));
    }

    #[test]
    fn test_covering_volume_spans_all_extents() {
        let area = area();
        let a = volume4d(
            &area.footprint,
            50.0,
            150.0,
            t("2026-05-01T10:00:00Z"),
            t("2026-05-01T10:10:00Z"),
        );
        let far = vec![
            crate::dss::types::LatLngPoint { lat: 37.3, lng: -118.7 },
            crate::dss::types::LatLngPoint { lat: 37.4, lng: -118.7 },
            crate::dss::types::LatLngPoint { lat: 37.4, lng: -118.6 },
        ];
        let b = volume4d(&far, 120.0, 400.0, t("2026-05-01T10:05:00Z"), t("2026-05-01T10:20:00Z"));
        let cover = covering_volume(&area, &[a.clone(), b.clone()], Duration::minutes(5)).unwrap();
        assert!(cover.intersects(&a) && cover.intersects(&b));
        assert_eq!(cover.start(), Some(t("2026-05-01T10:00:00Z")));
        assert_eq!(cover.end(), Some(t("2026-05-01T10:25:00Z")));
        assert_eq!(cover.volume.altitude_lower.map(|a| a.value), Some(50.0));
        assert_eq!(cover.volume.altitude_upper.map(|a| a.value), Some(400.0));
    }

    #[test]
    fn test_covering_volume_needs_outline() {
        assert!(covering_volume(&area(), &[], Duration::minutes(5)).is_none());
    }
}
