//! Scenario registry
//!
//! Maps the type names used in suite files to scenario builders.

use std::fmt;

use crate::common::Result;
use crate::resources::Bindings;
use crate::scenarios::{availability, netrid, utm};

use super::documentation::ScenarioDocumentation;
use super::suite::ScenarioParameters;
use super::TestScenario;

/// Standard a scenario checks conformance to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standard {
    F3548,
    F3411,
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Standard::F3548 => write!(f, "ASTM F3548-21"),
            Standard::F3411 => write!(f, "ASTM F3411-22a"),
        }
    }
}

pub type ScenarioBuilder = fn(&Bindings, &ScenarioParameters) -> Result<Box<dyn TestScenario>>;

/// Information about a registered scenario
pub struct ScenarioInfo {
    /// Type name used in suite files
    pub type_name: &'static str,
    pub standard: Standard,
    /// Resource roles that must be bound
    pub resources: &'static [&'static str],
    /// Resource roles that may be bound
    pub optional_resources: &'static [&'static str],
    pub documentation: &'static ScenarioDocumentation,
    pub build: ScenarioBuilder,
}

impl fmt::Debug for ScenarioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioInfo")
            .field("type_name", &self.type_name)
            .field("standard", &self.standard)
            .finish()
    }
}

static SCENARIOS: &[ScenarioInfo] = &[
    ScenarioInfo {
        type_name: "astm.utm.dss.AvailabilityArbitration",
        standard: Standard::F3548,
        resources: &["dss", "id_generator"],
        optional_resources: &["client_identity"],
        documentation: &availability::arbitration::DOCUMENTATION,
        build: availability::arbitration::build,
    },
    ScenarioInfo {
        type_name: "astm.utm.dss.AvailabilitySynchronization",
        standard: Standard::F3548,
        resources: &["dss", "other_instances", "id_generator"],
        optional_resources: &["client_identity"],
        documentation: &availability::synchronization::DOCUMENTATION,
        build: availability::synchronization::build,
    },
    ScenarioInfo {
        type_name: "astm.utm.dss.SubscriptionValidation",
        standard: Standard::F3548,
        resources: &["dss", "id_generator", "planning_area"],
        optional_resources: &[],
        documentation: &utm::subscription_validation::DOCUMENTATION,
        build: utm::subscription_validation::build,
    },
    ScenarioInfo {
        type_name: "astm.utm.dss.CrSynchronization",
        standard: Standard::F3548,
        resources: &["dss", "other_instances", "id_generator", "planning_area"],
        optional_resources: &["client_identity"],
        documentation: &utm::cr_synchronization::DOCUMENTATION,
        build: utm::cr_synchronization::build,
    },
    ScenarioInfo {
        type_name: "astm.utm.dss.OirNotificationIndex",
        standard: Standard::F3548,
        resources: &["dss", "id_generator", "planning_area"],
        optional_resources: &["flight_intents"],
        documentation: &utm::oir_notification_index::DOCUMENTATION,
        build: utm::oir_notification_index::build,
    },
    ScenarioInfo {
        type_name: "astm.netrid.dss.SubscriptionSimple",
        standard: Standard::F3411,
        resources: &["dss", "id_generator", "service_area"],
        optional_resources: &[],
        documentation: &netrid::subscription_simple::DOCUMENTATION,
        build: netrid::subscription_simple::build,
    },
    ScenarioInfo {
        type_name: "astm.netrid.dss.SubscriptionValidation",
        standard: Standard::F3411,
        resources: &["dss", "id_generator", "service_area"],
        optional_resources: &[],
        documentation: &netrid::subscription_validation::DOCUMENTATION,
        build: netrid::subscription_validation::build,
    },
    ScenarioInfo {
        type_name: "astm.netrid.dss.IsaSubscriptionInteractions",
        standard: Standard::F3411,
        resources: &["dss", "id_generator", "service_area"],
        optional_resources: &[],
        documentation: &netrid::isa_subscription_interactions::DOCUMENTATION,
        build: netrid::isa_subscription_interactions::build,
    },
    ScenarioInfo {
        type_name: "astm.netrid.dss.HeavyTrafficConcurrent",
        standard: Standard::F3411,
        resources: &["dss", "id_generator", "service_area"],
        optional_resources: &[],
        documentation: &netrid::heavy_traffic_concurrent::DOCUMENTATION,
        build: netrid::heavy_traffic_concurrent::build,
    },
];

/// Get all registered scenarios
pub fn all_scenarios() -> &'static [ScenarioInfo] {
    SCENARIOS
}

/// Get a scenario by type name
pub fn get(type_name: &str) -> Option<&'static ScenarioInfo> {
    SCENARIOS.iter().find(|s| s.type_name == type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_unique() {
        let mut names: Vec<_> = SCENARIOS.iter().map(|s| s.type_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCENARIOS.len());
    }

    #[test]
    fn test_every_scenario_documents_cleanup() {
        for info in all_scenarios() {
            assert!(
                info.documentation.cleanup.is_some(),
                "{} has no cleanup step",
                info.type_name
            );
            assert!(!info.documentation.requirements().is_empty());
        }
    }

    #[test]
    fn test_lookup() {
        assert!(get("astm.netrid.dss.SubscriptionSimple").is_some());
        assert!(get("astm.netrid.dss.Nope").is_none());
    }
}
