//! F3411-22a NetRID DSS scenarios

pub mod heavy_traffic_concurrent;
pub mod isa_subscription_interactions;
pub mod subscription_simple;
pub mod subscription_validation;
pub mod validators;

use chrono::{DateTime, Utc};

use crate::common::Result;
use crate::dss::types::LatLngPoint;
use crate::dss::DssInstance;
use crate::scenario::{ScenarioContext, Severity, TestCheckDocumentation, TestStepDocumentation};

use super::{expect_status, query_failure};

pub const ISA_WRITE_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,a";
pub const ISA_DELETE_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,b";
pub const SUBSCRIPTION_WRITE_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,c";
pub const SUBSCRIPTION_DELETE_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,d";
pub const SUBSCRIPTION_QUERY_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,e";
pub const NOTIFICATION_REQUIREMENT: &str = "astm.f3411.v22a.DSS0030,f";
pub const ISA_QUERY_REQUIREMENT: &str = "astm.f3411.v22a.DSS0050";
pub const CONCURRENCY_REQUIREMENT: &str = "astm.f3411.v22a.DSS0060";

pub const ISA_QUERY_CHECK: &str = "Successful ISA query";
pub const ISA_REMOVED_CHECK: &str = "Removed pre-existing ISA";
pub const SUBSCRIPTION_QUERY_CHECK: &str = "Successful subscription query";
pub const SUBSCRIPTION_SEARCH_CHECK: &str = "Successful subscription search";
pub const SUBSCRIPTION_REMOVED_CHECK: &str = "Removed pre-existing subscription";
pub const ISA_CONTENT_CHECK: &str = "ISA content matches";
pub const SUBSCRIPTION_CONTENT_CHECK: &str = "Subscription content matches";

const ISA_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: ISA_QUERY_CHECK,
    requirements: &[ISA_QUERY_REQUIREMENT],
    severity: Severity::Medium,
};

const ISA_REMOVED: TestCheckDocumentation = TestCheckDocumentation {
    name: ISA_REMOVED_CHECK,
    requirements: &[ISA_DELETE_REQUIREMENT],
    severity: Severity::Medium,
};

const SUBSCRIPTION_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_QUERY_CHECK,
    requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
    severity: Severity::Medium,
};

const SUBSCRIPTION_SEARCH: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_SEARCH_CHECK,
    requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
    severity: Severity::Medium,
};

const SUBSCRIPTION_REMOVED: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_REMOVED_CHECK,
    requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const ISA_CONTENT: TestCheckDocumentation = TestCheckDocumentation {
    name: ISA_CONTENT_CHECK,
    requirements: &[ISA_WRITE_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const SUBSCRIPTION_CONTENT: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_CONTENT_CHECK,
    requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
    severity: Severity::Medium,
};

/// Removes entities left behind by an earlier, interrupted run
pub(crate) const CLEAN_WORKSPACE: TestStepDocumentation = TestStepDocumentation {
    name: "Ensure clean workspace",
    checks: &[
        ISA_QUERY,
        ISA_REMOVED,
        SUBSCRIPTION_QUERY,
        SUBSCRIPTION_SEARCH,
        SUBSCRIPTION_REMOVED,
    ],
};

pub(crate) const CLEANUP: TestStepDocumentation = TestStepDocumentation {
    name: "Remove test entities",
    checks: &[ISA_QUERY, ISA_REMOVED, SUBSCRIPTION_QUERY, SUBSCRIPTION_REMOVED],
};

/// Start and end of the entities a scenario creates
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Delete ISA `id` if it exists
pub(crate) async fn delete_isa_if_exists(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    id: &str,
) -> Result<()> {
    let fetched = dss.get_isa(id).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(ISA_QUERY_CHECK, &[&dss.participant_id])?;
    let version = match (fetched.status_code(), &fetched.value) {
        (404, _) => return ctx.pass(check),
        (200, Some(response)) => {
            ctx.pass(check)?;
            response.service_area.version.clone()
        }
        _ => {
            return ctx.fail(
                check,
                query_failure(format!("Could not query ISA {}", id), &fetched),
            )
        }
    };
    tracing::info!(isa = id, "Removing pre-existing ISA");
    let deleted = dss.delete_isa(id, &version).await;
    expect_status(
        ctx,
        ISA_REMOVED_CHECK,
        &deleted.query,
        &[200],
        &format!("Could not remove pre-existing ISA {}", id),
    )?;
    Ok(())
}

/// Delete subscription `id` if it exists
pub(crate) async fn delete_subscription_if_exists(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    id: &str,
) -> Result<()> {
    let fetched = dss.get_rid_subscription(id).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(SUBSCRIPTION_QUERY_CHECK, &[&dss.participant_id])?;
    let version = match (fetched.status_code(), &fetched.value) {
        (404, _) => return ctx.pass(check),
        (200, Some(response)) => {
            ctx.pass(check)?;
            response.subscription.version.clone()
        }
        _ => {
            return ctx.fail(
                check,
                query_failure(format!("Could not query subscription {}", id), &fetched),
            )
        }
    };
    tracing::info!(subscription = id, "Removing pre-existing subscription");
    let deleted = dss.delete_rid_subscription(id, &version).await;
    expect_status(
        ctx,
        SUBSCRIPTION_REMOVED_CHECK,
        &deleted.query,
        &[200],
        &format!("Could not remove pre-existing subscription {}", id),
    )?;
    Ok(())
}

/// Delete every subscription of ours over `area`
///
/// The DSS caps subscriptions per USS and area, so leftovers from other
/// scenarios can make subscription creation fail.
pub(crate) async fn delete_own_subscriptions_in_area(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    area: &[LatLngPoint],
) -> Result<()> {
    let fetched = dss.search_rid_subscriptions(area).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(SUBSCRIPTION_SEARCH_CHECK, &[&dss.participant_id])?;
    let Some(found) = &fetched.value else {
        return ctx.fail(
            check,
            query_failure("Could not search subscriptions in the service area", &fetched),
        );
    };
    ctx.pass(check)?;
    for subscription in found
        .subscriptions
        .iter()
        .filter(|s| s.owner == dss.subject())
    {
        tracing::info!(subscription = %subscription.id, "Removing subscription in service area");
        let deleted = dss
            .delete_rid_subscription(&subscription.id, &subscription.version)
            .await;
        expect_status(
            ctx,
            SUBSCRIPTION_REMOVED_CHECK,
            &deleted.query,
            &[200],
            &format!("Could not remove subscription {}", subscription.id),
        )?;
    }
    Ok(())
}
