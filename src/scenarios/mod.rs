//! Conformance scenarios
//!
//! Each scenario module exposes its static `DOCUMENTATION` and a `build`
//! function registered in [`crate::scenario::registry`].

pub mod availability;
pub mod netrid;
pub mod utm;

use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};

use crate::common::{is_url_safe_token, Error, Result};
use crate::dss::{Fetched, Query};
use crate::scenario::{Failure, ScenarioContext};

/// Allowed difference between requested and returned timestamps
pub(crate) fn time_tolerance() -> Duration {
    Duration::seconds(1)
}

pub(crate) fn participants_of(query: &Query) -> Vec<String> {
    query.participant_id.iter().cloned().collect()
}

/// Failure describing why `fetched` did not produce a usable response
pub(crate) fn query_failure<T>(summary: impl Into<String>, fetched: &Fetched<T>) -> Failure {
    let mut details = vec![fetched.query.describe()];
    details.extend(fetched.errors());
    Failure::new(summary)
        .details(details.join("\n"))
        .queries(fetched.timestamps())
}

/// Record `fetched` and evaluate `check` on whether it succeeded
///
/// The scenario cannot go on without the response, so a failure stops the
/// scenario even when the check itself is not High severity.
pub(crate) fn require_success<'a, T>(
    ctx: &mut ScenarioContext,
    check: &str,
    fetched: &'a Fetched<T>,
    summary: &str,
) -> Result<&'a T> {
    ctx.record_query(&fetched.query);
    let pending = ctx.check(check, &participants_of(&fetched.query))?;
    match &fetched.value {
        Some(value) if fetched.query.success() => {
            ctx.pass(pending)?;
            Ok(value)
        }
        _ => {
            ctx.fail(pending, query_failure(summary, fetched))?;
            Err(Error::ScenarioCannotContinue(format!("{}: {}", check, summary)))
        }
    }
}

/// Record `query` and evaluate `check` on whether its status is one of `expected`
///
/// Returns whether the check passed.
pub(crate) fn expect_status(
    ctx: &mut ScenarioContext,
    check: &str,
    query: &Query,
    expected: &[u16],
    summary: &str,
) -> Result<bool> {
    ctx.record_query(query);
    let pending = ctx.check(check, &participants_of(query))?;
    if expected.contains(&query.status_code()) {
        ctx.pass(pending)?;
        return Ok(true);
    }
    let mut details = vec![
        query.describe(),
        format!("expected one of {:?}", expected),
    ];
    details.extend(query.errors());
    ctx.fail(
        pending,
        Failure::new(summary)
            .details(details.join("\n"))
            .queries([query.timestamp()]),
    )?;
    Ok(false)
}

/// Compare an observed field with its expected value
pub(crate) fn expect_eq<T: PartialEq + Debug>(
    field: &str,
    observed: &T,
    expected: &T,
) -> std::result::Result<(), Failure> {
    if observed == expected {
        Ok(())
    } else {
        Err(Failure::new(format!("Unexpected {}", field)).details(format!(
            "expected {:?} but found {:?}",
            expected, observed
        )))
    }
}

pub(crate) fn expect_time_close(
    field: &str,
    observed: DateTime<Utc>,
    expected: DateTime<Utc>,
) -> std::result::Result<(), Failure> {
    if (observed - expected).abs() <= time_tolerance() {
        Ok(())
    } else {
        Err(Failure::new(format!("Unexpected {}", field)).details(format!(
            "expected {} but found {}",
            expected.to_rfc3339(),
            observed.to_rfc3339()
        )))
    }
}

/// A DSS-issued version or OVN must be non-empty and usable in a URL path
pub(crate) fn expect_url_safe_token(field: &str, token: &str) -> std::result::Result<(), Failure> {
    if token.is_empty() {
        Err(Failure::new(format!("Empty {}", field)))
    } else if !is_url_safe_token(token) {
        Err(Failure::new(format!("{} is not URL-safe", field))
            .details(format!("'{}' contains reserved characters", token)))
    } else {
        Ok(())
    }
}
