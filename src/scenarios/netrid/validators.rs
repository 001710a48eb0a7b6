//! Content validation of ISAs and subscriptions returned by a NetRID DSS
//!
//! Validators collect every mismatch instead of stopping at the first one,
//! so a single check failure describes everything wrong with an entity.

use chrono::{DateTime, Utc};

use crate::dss::types::{IdentificationServiceArea, RidSubscription, SubscriberToNotify};
use crate::scenario::Failure;
use crate::scenarios::{expect_eq, expect_time_close, expect_url_safe_token};

/// What the version of a returned entity should look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionExpectation {
    /// Freshly created: any well-formed version
    Any,
    /// Written since `previous` was observed
    Changed(String),
    /// Not written since it was observed
    Unchanged(String),
}

/// Fields the DSS must echo back for an entity we wrote
#[derive(Debug, Clone)]
pub struct Expected {
    pub id: String,
    pub uss_base_url: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub owner: Option<String>,
    pub version: VersionExpectation,
}

impl Expected {
    pub fn new(
        id: impl Into<String>,
        uss_base_url: impl Into<String>,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            uss_base_url: uss_base_url.into(),
            time_start,
            time_end,
            owner: None,
            version: VersionExpectation::Any,
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn version(mut self, version: VersionExpectation) -> Self {
        self.version = version;
        self
    }
}

struct Observed<'a> {
    id: &'a str,
    uss_base_url: &'a str,
    time_start: DateTime<Utc>,
    time_end: DateTime<Utc>,
    owner: &'a str,
    version: &'a str,
}

fn describe(failure: Failure) -> String {
    if failure.details.is_empty() {
        failure.summary
    } else {
        format!("{}: {}", failure.summary, failure.details)
    }
}

fn problems(expected: &Expected, observed: Observed<'_>) -> Vec<String> {
    let mut outcomes = vec![
        expect_eq("ID", &observed.id, &expected.id.as_str()),
        expect_eq("URL", &observed.uss_base_url, &expected.uss_base_url.as_str()),
        expect_time_close("start time", observed.time_start, expected.time_start),
        expect_time_close("end time", observed.time_end, expected.time_end),
        expect_url_safe_token("version", observed.version),
    ];
    if let Some(owner) = &expected.owner {
        outcomes.push(expect_eq("owner", &observed.owner, &owner.as_str()));
    }
    match &expected.version {
        VersionExpectation::Any => {}
        VersionExpectation::Changed(previous) if observed.version == previous => {
            outcomes.push(Err(Failure::new("Version was not updated")
                .details(format!("version remained '{}'", previous))));
        }
        VersionExpectation::Unchanged(previous) if observed.version != previous => {
            outcomes.push(Err(Failure::new("Version changed without a write").details(
                format!("expected '{}' but found '{}'", previous, observed.version),
            )));
        }
        _ => {}
    }
    outcomes
        .into_iter()
        .filter_map(|o| o.err())
        .map(describe)
        .collect()
}

pub fn isa_problems(expected: &Expected, isa: &IdentificationServiceArea) -> Vec<String> {
    problems(
        expected,
        Observed {
            id: &isa.id,
            uss_base_url: &isa.uss_base_url,
            time_start: isa.time_start.value,
            time_end: isa.time_end.value,
            owner: &isa.owner,
            version: &isa.version,
        },
    )
}

pub fn subscription_problems(expected: &Expected, subscription: &RidSubscription) -> Vec<String> {
    problems(
        expected,
        Observed {
            id: &subscription.id,
            uss_base_url: &subscription.uss_base_url,
            time_start: subscription.time_start.value,
            time_end: subscription.time_end.value,
            owner: &subscription.owner,
            version: &subscription.version,
        },
    )
}

/// Notification index reported for `subscription_id`, if it was notified
pub fn notified_index(subscribers: &[SubscriberToNotify], subscription_id: &str) -> Option<i64> {
    subscribers
        .iter()
        .flat_map(|s| s.subscriptions.iter())
        .find(|s| s.subscription_id == subscription_id)
        .map(|s| s.notification_index)
}

/// Check outcome for an entity with the given problems
pub fn content_outcome(
    entity: &str,
    id: &str,
    problems: Vec<String>,
    timestamps: Vec<DateTime<Utc>>,
) -> std::result::Result<(), Failure> {
    if problems.is_empty() {
        return Ok(());
    }
    Err(
        Failure::new(format!("DSS returned {} {} with unexpected content", entity, id))
            .details(problems.join("\n"))
            .queries(timestamps),
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::dss::types::SubscriptionState;

    fn isa(version: &str) -> IdentificationServiceArea {
        let start = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        IdentificationServiceArea {
            id: "isa1".into(),
            owner: "uss_qualifier".into(),
            time_start: start.into(),
            time_end: (start + Duration::minutes(15)).into(),
            uss_base_url: "https://uss.example.com/rid".into(),
            version: version.into(),
        }
    }

    fn expected() -> Expected {
        let observed = isa("v1");
        Expected::new(
            "isa1",
            "https://uss.example.com/rid",
            observed.time_start.value,
            observed.time_end.value,
        )
    }

    #[test]
    fn test_matching_isa_has_no_problems() {
        assert!(isa_problems(&expected().owned_by("uss_qualifier"), &isa("v1")).is_empty());
    }

    #[test]
    fn test_every_mismatch_is_reported() {
        let mut observed = isa("a/b");
        observed.uss_base_url = "https://elsewhere".into();
        observed.time_end.value += Duration::minutes(5);
        let problems = isa_problems(&expected().owned_by("someone"), &observed);
        assert_eq!(problems.len(), 4);
        assert!(problems.iter().any(|p| p.contains("URL")));
        assert!(problems.iter().any(|p| p.contains("end time")));
        assert!(problems.iter().any(|p| p.contains("URL-safe")));
        assert!(problems.iter().any(|p| p.contains("owner")));
    }

    #[test]
    fn test_version_expectations() {
        let changed = expected().version(VersionExpectation::Changed("v1".into()));
        assert_eq!(isa_problems(&changed, &isa("v1")).len(), 1);
        assert!(isa_problems(&changed, &isa("v2")).is_empty());

        let unchanged = expected().version(VersionExpectation::Unchanged("v1".into()));
        assert!(isa_problems(&unchanged, &isa("v1")).is_empty());
        assert_eq!(isa_problems(&unchanged, &isa("v2")).len(), 1);
    }

    #[test]
    fn test_notified_index() {
        let subscribers = vec![SubscriberToNotify {
            url: "https://uss.example.com".into(),
            subscriptions: vec![
                SubscriptionState {
                    subscription_id: "sub1".into(),
                    notification_index: 3,
                },
                SubscriptionState {
                    subscription_id: "sub2".into(),
                    notification_index: 7,
                },
            ],
        }];
        assert_eq!(notified_index(&subscribers, "sub2"), Some(7));
        assert_eq!(notified_index(&subscribers, "sub3"), None);
    }

    #[test]
    fn test_content_outcome() {
        assert!(content_outcome("ISA", "isa1", vec![], vec![]).is_ok());
        let failure = content_outcome("ISA", "isa1", vec!["bad URL".into()], vec![]).unwrap_err();
        assert!(failure.summary.contains("isa1"));
        assert_eq!(failure.details, "bad URL");
    }
}
