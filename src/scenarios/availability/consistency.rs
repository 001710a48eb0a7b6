//! Availability consistency between DSS instances of one deployment
//!
//! Pure comparison of availability readings. Scenarios turn the returned
//! discrepancies into check outcomes.

use std::fmt;

use crate::common::Result;
use crate::dss::types::{UssAvailabilityState, UssAvailabilityStatusResponse};
use crate::dss::Fetched;
use crate::scenario::{Failure, ScenarioContext};
use crate::scenarios::query_failure;

pub const READ_REQUIREMENT: &str = "astm.f3548.v21.DSS0100,1";
pub const SYNC_REQUIREMENT: &str = "astm.f3548.v21.DSS0210,A2-7-2,7";

pub const READ_CHECK: &str = "USS Availability can be requested";
pub const CONSISTENCY_CHECK: &str = "USS Availability is consistent across instances";

/// Availability of one USS as reported by one DSS instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReading {
    pub participant_id: String,
    pub state: UssAvailabilityState,
    pub version: String,
}

impl AvailabilityReading {
    /// Extract a reading from a fetch; `None` when the read failed
    pub fn from_fetched(
        participant_id: &str,
        fetched: &Fetched<UssAvailabilityStatusResponse>,
    ) -> Option<Self> {
        match (&fetched.value, fetched.query.status_code()) {
            (Some(response), 200) => Some(Self {
                participant_id: participant_id.to_string(),
                state: response.status.availability,
                version: response.version.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    StateMismatch {
        participant_id: String,
        expected: UssAvailabilityState,
        observed: UssAvailabilityState,
    },
    VersionMismatch {
        participant_id: String,
        expected: String,
        observed: String,
    },
    /// An unknown USS was reported with a state or version
    NotUnknown {
        participant_id: String,
        state: UssAvailabilityState,
        version: String,
    },
}

impl Discrepancy {
    pub fn participant_id(&self) -> &str {
        match self {
            Discrepancy::StateMismatch { participant_id, .. }
            | Discrepancy::VersionMismatch { participant_id, .. }
            | Discrepancy::NotUnknown { participant_id, .. } => participant_id,
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::StateMismatch {
                participant_id,
                expected,
                observed,
            } => write!(
                f,
                "{} reports availability {} instead of {}",
                participant_id, observed, expected
            ),
            Discrepancy::VersionMismatch {
                participant_id,
                expected,
                observed,
            } => write!(
                f,
                "{} reports version '{}' instead of '{}'",
                participant_id, observed, expected
            ),
            Discrepancy::NotUnknown {
                participant_id,
                state,
                version,
            } => write!(
                f,
                "{} reports availability {} with version '{}' for a USS it cannot know",
                participant_id, state, version
            ),
        }
    }
}

/// Differences between a secondary's reading and the primary's
pub fn compare_availability(
    primary: &AvailabilityReading,
    secondary: &AvailabilityReading,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();
    if secondary.state != primary.state {
        discrepancies.push(Discrepancy::StateMismatch {
            participant_id: secondary.participant_id.clone(),
            expected: primary.state,
            observed: secondary.state,
        });
    }
    if secondary.version != primary.version {
        discrepancies.push(Discrepancy::VersionMismatch {
            participant_id: secondary.participant_id.clone(),
            expected: primary.version.clone(),
            observed: secondary.version.clone(),
        });
    }
    discrepancies
}

/// A USS nobody declared must read as Unknown with an empty version
pub fn check_unknown_availability(reading: &AvailabilityReading) -> Option<Discrepancy> {
    if reading.state == UssAvailabilityState::Unknown && reading.version.is_empty() {
        None
    } else {
        Some(Discrepancy::NotUnknown {
            participant_id: reading.participant_id.clone(),
            state: reading.state,
            version: reading.version.clone(),
        })
    }
}

/// Record a read and evaluate the read check on it
pub fn record_read(
    ctx: &mut ScenarioContext,
    participant_id: &str,
    fetched: &Fetched<UssAvailabilityStatusResponse>,
) -> Result<Option<AvailabilityReading>> {
    ctx.record_query(&fetched.query);
    let check = ctx.check(READ_CHECK, &[participant_id])?;
    match AvailabilityReading::from_fetched(participant_id, fetched) {
        Some(reading) => {
            ctx.pass(check)?;
            Ok(Some(reading))
        }
        None => {
            ctx.fail(
                check,
                query_failure(
                    format!("Could not read USS availability from {}", participant_id),
                    fetched,
                ),
            )?;
            Ok(None)
        }
    }
}

/// Evaluate the consistency check for one instance's discrepancies
pub fn record_consistency(
    ctx: &mut ScenarioContext,
    participants: &[&str],
    discrepancies: &[Discrepancy],
    fetched: &Fetched<UssAvailabilityStatusResponse>,
) -> Result<()> {
    let check = ctx.check(CONSISTENCY_CHECK, participants)?;
    if discrepancies.is_empty() {
        return ctx.pass(check);
    }
    let details = discrepancies
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    ctx.fail(
        check,
        Failure::new(format!(
            "USS availability reported by {} is inconsistent",
            discrepancies[0].participant_id()
        ))
        .details(details)
        .queries(fetched.timestamps()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(pid: &str, state: UssAvailabilityState, version: &str) -> AvailabilityReading {
        AvailabilityReading {
            participant_id: pid.to_string(),
            state,
            version: version.to_string(),
        }
    }

    #[test]
    fn test_identical_readings_agree() {
        let primary = reading("uss1", UssAvailabilityState::Down, "v1");
        let secondary = reading("uss2", UssAvailabilityState::Down, "v1");
        assert!(compare_availability(&primary, &secondary).is_empty());
    }

    #[test]
    fn test_mismatches_are_attributed_to_secondary() {
        let primary = reading("uss1", UssAvailabilityState::Down, "v2");
        let secondary = reading("uss2", UssAvailabilityState::Normal, "v1");
        let discrepancies = compare_availability(&primary, &secondary);
        assert_eq!(discrepancies.len(), 2);
        assert!(discrepancies.iter().all(|d| d.participant_id() == "uss2"));
        assert!(matches!(
            discrepancies[0],
            Discrepancy::StateMismatch {
                observed: UssAvailabilityState::Normal,
                ..
            }
        ));
    }

    #[test]
    fn test_version_only_mismatch() {
        let primary = reading("uss1", UssAvailabilityState::Normal, "v2");
        let secondary = reading("uss2", UssAvailabilityState::Normal, "v1");
        assert_eq!(
            compare_availability(&primary, &secondary),
            vec![Discrepancy::VersionMismatch {
                participant_id: "uss2".into(),
                expected: "v2".into(),
                observed: "v1".into(),
            }]
        );
    }

    #[test]
    fn test_unknown_uss() {
        assert!(check_unknown_availability(&reading("uss1", UssAvailabilityState::Unknown, ""))
            .is_none());
        assert!(check_unknown_availability(&reading("uss1", UssAvailabilityState::Unknown, "v1"))
            .is_some());
        let d = check_unknown_availability(&reading("uss1", UssAvailabilityState::Normal, ""))
            .unwrap();
        assert!(d.to_string().contains("cannot know"));
    }
}
