//! F3548-21 USS availability arbitration scenarios

pub mod arbitration;
pub mod consistency;
pub mod synchronization;

use crate::common::Result;
use crate::dss::types::UssAvailabilityState;
use crate::dss::DssInstance;
use crate::scenario::ScenarioContext;

use super::require_success;
use consistency::{AvailabilityReading, READ_CHECK};

pub const SET_CHECK: &str = "USS Availability can be set";

/// Declare `state` for `uss_id` on `dss`, using the current version as `old_version`
///
/// Returns the version in effect before the change and the new reading.
pub(crate) async fn declare_availability(
    ctx: &mut ScenarioContext,
    dss: &DssInstance,
    uss_id: &str,
    state: UssAvailabilityState,
) -> Result<(String, AvailabilityReading)> {
    let current = dss.get_uss_availability(uss_id).await;
    let current = require_success(
        ctx,
        READ_CHECK,
        &current,
        "Could not read current USS availability",
    )?;
    let previous_version = current.version.clone();

    let set = dss
        .set_uss_availability(uss_id, &previous_version, state)
        .await;
    let updated = require_success(
        ctx,
        SET_CHECK,
        &set,
        &format!("Could not declare USS {} as {}", uss_id, state),
    )?;
    Ok((
        previous_version,
        AvailabilityReading {
            participant_id: dss.participant_id.clone(),
            state: updated.status.availability,
            version: updated.version.clone(),
        },
    ))
}
