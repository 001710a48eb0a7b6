//! Workspace cleanup shared by the strategic coordination scenarios
//!
//! Entities are removed in dependency order: operational intents first, since
//! a subscription with dependent operational intents cannot be deleted.

use crate::common::Result;
use crate::dss::types::Volume4D;
use crate::dss::{DssInstance, Fetched};
use crate::scenario::{ScenarioContext, Severity, TestCheckDocumentation};
use crate::scenarios::{expect_status, query_failure};

use super::{CR_REQUIREMENT, OIR_REQUIREMENT, SUBSCRIPTION_REQUIREMENT};

pub const SUBSCRIPTION_QUERY_CHECK: &str = "Successful subscription query";
pub const SUBSCRIPTION_REMOVED_CHECK: &str = "Subscription removed";
pub const OIR_QUERY_CHECK: &str = "Successful operational intent reference query";
pub const OIR_REMOVED_CHECK: &str = "Operational intent reference removed";
pub const CR_QUERY_CHECK: &str = "Successful constraint reference query";
pub const CR_REMOVED_CHECK: &str = "Constraint reference removed";

pub(crate) const SUBSCRIPTION_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_QUERY_CHECK,
    requirements: &[SUBSCRIPTION_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const SUBSCRIPTION_REMOVED: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBSCRIPTION_REMOVED_CHECK,
    requirements: &[SUBSCRIPTION_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const OIR_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: OIR_QUERY_CHECK,
    requirements: &[OIR_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const OIR_REMOVED: TestCheckDocumentation = TestCheckDocumentation {
    name: OIR_REMOVED_CHECK,
    requirements: &[OIR_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const CR_QUERY: TestCheckDocumentation = TestCheckDocumentation {
    name: CR_QUERY_CHECK,
    requirements: &[CR_REQUIREMENT],
    severity: Severity::Medium,
};

pub(crate) const CR_REMOVED: TestCheckDocumentation = TestCheckDocumentation {
    name: CR_REMOVED_CHECK,
    requirements: &[CR_REQUIREMENT],
    severity: Severity::Medium,
};

/// Record a lookup by ID and evaluate `check`
///
/// A 404 passes with nothing to remove. Any other failure is recorded and
/// also yields nothing to remove.
fn lookup<'a, T>(
    ctx: &mut ScenarioContext,
    check: &str,
    dss: &DssInstance,
    fetched: &'a Fetched<T>,
    what: &str,
) -> Result<Option<&'a T>> {
    ctx.record_query(&fetched.query);
    let pending = ctx.check(check, &[&dss.participant_id])?;
    match (fetched.status_code(), &fetched.value) {
        (404, _) => {
            ctx.pass(pending)?;
            Ok(None)
        }
        (200, Some(value)) => {
            ctx.pass(pending)?;
            Ok(Some(value))
        }
        _ => {
            ctx.fail(pending, query_failure(format!("Could not query {}", what), fetched))?;
            Ok(None)
        }
    }
}

/// Delete subscription `id` if it exists
pub(crate) async fn remove_subscription(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    id: &str,
) -> Result<()> {
    let fetched = dss.get_scd_subscription(id).await;
    let what = format!("subscription {}", id);
    let Some(found) = lookup(ctx, SUBSCRIPTION_QUERY_CHECK, dss, &fetched, &what)? else {
        return Ok(());
    };
    tracing::info!(subscription = id, "Removing pre-existing subscription");
    let deleted = dss
        .delete_scd_subscription(id, &found.subscription.version)
        .await;
    expect_status(
        ctx,
        SUBSCRIPTION_REMOVED_CHECK,
        &deleted.query,
        &[200],
        &format!("Could not remove {}", what),
    )?;
    Ok(())
}

/// Delete every subscription of ours intersecting `area`
pub(crate) async fn remove_active_subscriptions(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    area: &Volume4D,
) -> Result<()> {
    let fetched = dss.query_scd_subscriptions(area).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(SUBSCRIPTION_QUERY_CHECK, &[&dss.participant_id])?;
    let Some(found) = &fetched.value else {
        return ctx.fail(
            check,
            query_failure("Could not query subscriptions in the area", &fetched),
        );
    };
    ctx.pass(check)?;
    for subscription in &found.subscriptions {
        tracing::info!(subscription = %subscription.id, "Removing active subscription");
        let deleted = dss
            .delete_scd_subscription(&subscription.id, &subscription.version)
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

/// Delete operational intent reference `id` if it exists
pub(crate) async fn remove_operational_intent(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    id: &str,
) -> Result<()> {
    let fetched = dss.get_oir(id).await;
    let what = format!("operational intent reference {}", id);
    let Some(found) = lookup(ctx, OIR_QUERY_CHECK, dss, &fetched, &what)? else {
        return Ok(());
    };
    let Some(ovn) = found.operational_intent_reference.ovn.clone() else {
        tracing::warn!(oir = id, "Operational intent reference is managed by another USS");
        return Ok(());
    };
    tracing::info!(oir = id, "Removing pre-existing operational intent reference");
    let deleted = dss.delete_oir(id, &ovn).await;
    expect_status(
        ctx,
        OIR_REMOVED_CHECK,
        &deleted.query,
        &[200],
        &format!("Could not remove {}", what),
    )?;
    Ok(())
}

/// Delete every operational intent reference managed by `manager` in `area`
pub(crate) async fn remove_active_operational_intents(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    area: &Volume4D,
    manager: &str,
) -> Result<()> {
    let fetched = dss.query_oirs(area).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(OIR_QUERY_CHECK, &[&dss.participant_id])?;
    let Some(found) = &fetched.value else {
        return ctx.fail(
            check,
            query_failure(
                "Could not query operational intent references in the area",
                &fetched,
            ),
        );
    };
    ctx.pass(check)?;
    for oir in &found.operational_intent_references {
        let Some(ovn) = oir.ovn.as_deref().filter(|_| oir.manager == manager) else {
            continue;
        };
        tracing::info!(oir = %oir.id, "Removing active operational intent reference");
        let deleted = dss.delete_oir(&oir.id, ovn).await;
        expect_status(
            ctx,
            OIR_REMOVED_CHECK,
            &deleted.query,
            &[200],
            &format!("Could not remove operational intent reference {}", oir.id),
        )?;
    }
    Ok(())
}

/// Delete constraint reference `id` if it exists
pub(crate) async fn remove_constraint_reference(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    id: &str,
) -> Result<()> {
    let fetched = dss.get_cr(id).await;
    let what = format!("constraint reference {}", id);
    let Some(found) = lookup(ctx, CR_QUERY_CHECK, dss, &fetched, &what)? else {
        return Ok(());
    };
    let Some(ovn) = found.constraint_reference.ovn.clone() else {
        tracing::warn!(cr = id, "Constraint reference is managed by another USS");
        return Ok(());
    };
    tracing::info!(cr = id, "Removing pre-existing constraint reference");
    let deleted = dss.delete_cr(id, &ovn).await;
    expect_status(
        ctx,
        CR_REMOVED_CHECK,
        &deleted.query,
        &[200],
        &format!("Could not remove {}", what),
    )?;
    Ok(())
}

/// Delete every constraint reference managed by `manager` in `area`
pub(crate) async fn remove_active_constraint_references(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    area: &Volume4D,
    manager: &str,
) -> Result<()> {
    let fetched = dss.query_crs(area).await;
    ctx.record_query(&fetched.query);
    let check = ctx.check(CR_QUERY_CHECK, &[&dss.participant_id])?;
    let Some(found) = &fetched.value else {
        return ctx.fail(
            check,
            query_failure("Could not query constraint references in the area", &fetched),
        );
    };
    ctx.pass(check)?;
    for cr in &found.constraint_references {
        let Some(ovn) = cr.ovn.as_deref().filter(|_| cr.manager == manager) else {
            continue;
        };
        tracing::info!(cr = %cr.id, "Removing active constraint reference");
        let deleted = dss.delete_cr(&cr.id, ovn).await;
        expect_status(
            ctx,
            CR_REMOVED_CHECK,
            &deleted.query,
            &[200],
            &format!("Could not remove constraint reference {}", cr.id),
        )?;
    }
    Ok(())
}
