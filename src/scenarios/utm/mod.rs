//! F3548-21 strategic coordination DSS scenarios

pub mod cr_synchronization;
pub mod fragments;
pub mod oir_notification_index;
pub mod subscription_validation;

use crate::dss::types::{PutScdSubscriptionParameters, Volume4D};
use crate::resources::UssArea;

pub const OIR_REQUIREMENT: &str = "astm.f3548.v21.DSS0005,1";
pub const CR_REQUIREMENT: &str = "astm.f3548.v21.DSS0005,2";
pub const SUBSCRIPTION_REQUIREMENT: &str = "astm.f3548.v21.DSS0005,5";
pub const SUBSCRIPTION_DURATION_REQUIREMENT: &str = "astm.f3548.v21.DSS0015";
pub const CR_SYNC_REQUIREMENT: &str = "astm.f3548.v21.DSS0210,A2-7-2,2";

/// Subscription to operational intent changes over `extents`
pub(crate) fn oir_subscription(area: &UssArea, extents: Volume4D) -> PutScdSubscriptionParameters {
    PutScdSubscriptionParameters {
        extents,
        uss_base_url: area.base_url.clone(),
        notify_for_operational_intents: true,
        notify_for_constraints: false,
    }
}
