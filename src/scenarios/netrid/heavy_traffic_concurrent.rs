//! Many ISAs and subscriptions handled concurrently by one DSS
//!
//! Entities are created in two halves, each half sending its ISA and
//! subscription requests side by side. The second half checks that the DSS
//! reports entities of the first half as overlapping. Queries issued inside a
//! burst are recorded once the burst completes.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

use crate::common::{Error, Result};
use crate::dss::{DssInstance, Fetched};
use crate::resources::id_generator::sequential_ids;
use crate::resources::{Bindings, ResourceType, UssArea};
use crate::scenario::{
    Failure, ScenarioContext, ScenarioDocumentation, ScenarioParameters, Severity,
    TestCaseDocumentation, TestCheckDocumentation, TestScenario, TestStepDocumentation,
};
use crate::scenarios::require_success;

use super::validators::{
    content_outcome, isa_problems, notified_index, subscription_problems, Expected,
    VersionExpectation,
};
use super::{
    delete_own_subscriptions_in_area, Window, CLEANUP, CLEAN_WORKSPACE, CONCURRENCY_REQUIREMENT,
    ISA_CONTENT, ISA_CONTENT_CHECK, ISA_DELETE_REQUIREMENT, ISA_QUERY_CHECK,
    ISA_QUERY_REQUIREMENT, ISA_REMOVED_CHECK, ISA_WRITE_REQUIREMENT, NOTIFICATION_REQUIREMENT,
    SUBSCRIPTION_CONTENT, SUBSCRIPTION_CONTENT_CHECK, SUBSCRIPTION_DELETE_REQUIREMENT,
    SUBSCRIPTION_QUERY_CHECK, SUBSCRIPTION_QUERY_REQUIREMENT, SUBSCRIPTION_REMOVED_CHECK,
    SUBSCRIPTION_WRITE_REQUIREMENT,
};

const ISA: ResourceType = ResourceType::new(373, "ISA");
const SUBSCRIPTION: ResourceType = ResourceType::new(374, "Subscription");

pub const DEFAULT_ISA_COUNT: usize = 100;
/// The DSS accepts at most 10 subscriptions per USS over one area
pub const DEFAULT_SUBSCRIPTION_COUNT: usize = 10;
/// Generated IDs vary only in their last three digits
const MAX_ENTITIES: usize = 1000;

const ISAS_CREATED: &str = "Concurrent ISAs creation";
const SUBS_CREATED: &str = "Concurrent subscriptions creation";
const ISAS_MENTION_SUBS: &str = "Created ISAs mention subscriptions known to exist";
const SUBS_MENTION_ISAS: &str = "Created subscriptions mention ISAs known to exist";
const ISAS_READ: &str = "Successful concurrent ISA queries";
const SUBS_READ: &str = "Successful concurrent subscription queries";
const INDICES_INCREMENTED: &str = "Notification indices incremented";
const ISAS_SEARCHED: &str = "Successful ISAs search";
const ISAS_IN_SEARCH: &str = "Correct ISAs returned by search";
const SUBS_SEARCHED: &str = "Successful subscriptions search";
const SUBS_IN_SEARCH: &str = "Correct subscriptions returned by search";
const ISAS_DELETED: &str = "ISAs deletion query success";
const SUBS_DELETED: &str = "Subscriptions deletion query success";
const ISAS_GONE: &str = "ISAs not found";
const SUBS_GONE: &str = "Subscriptions not found";
const ISAS_NOT_IN_SEARCH: &str = "ISAs not returned by search";
const SUBS_NOT_IN_SEARCH: &str = "Subscriptions not returned by search";

const INDICES: TestCheckDocumentation = TestCheckDocumentation {
    name: INDICES_INCREMENTED,
    requirements: &[NOTIFICATION_REQUIREMENT],
    severity: Severity::Medium,
};

const ISA_SEARCH: TestCheckDocumentation = TestCheckDocumentation {
    name: ISAS_SEARCHED,
    requirements: &[ISA_QUERY_REQUIREMENT],
    severity: Severity::High,
};

const SUB_SEARCH: TestCheckDocumentation = TestCheckDocumentation {
    name: SUBS_SEARCHED,
    requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
    severity: Severity::High,
};

pub static DOCUMENTATION: ScenarioDocumentation = ScenarioDocumentation {
    name: "ASTM NetRID DSS: Concurrent Requests",
    description: "Creates, reads, searches and deletes many ISAs and subscriptions concurrently",
    cases: &[
        TestCaseDocumentation {
            name: "Setup",
            steps: &[CLEAN_WORKSPACE],
        },
        TestCaseDocumentation {
            name: "Concurrent requests",
            steps: &[
                TestStepDocumentation {
                    name: "Create ISAs and subscriptions concurrently",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISAS_CREATED,
                            requirements: &[ISA_WRITE_REQUIREMENT, CONCURRENCY_REQUIREMENT],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: SUBS_CREATED,
                            requirements: &[
                                SUBSCRIPTION_WRITE_REQUIREMENT,
                                CONCURRENCY_REQUIREMENT,
                            ],
                            severity: Severity::High,
                        },
                        TestCheckDocumentation {
                            name: ISAS_MENTION_SUBS,
                            requirements: &[NOTIFICATION_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: SUBS_MENTION_ISAS,
                            requirements: &[SUBSCRIPTION_WRITE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Get ISAs concurrently",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISAS_READ,
                            requirements: &[ISA_QUERY_REQUIREMENT, CONCURRENCY_REQUIREMENT],
                            severity: Severity::High,
                        },
                        ISA_CONTENT,
                    ],
                },
                TestStepDocumentation {
                    name: "Get subscriptions concurrently",
                    checks: &[
                        TestCheckDocumentation {
                            name: SUBS_READ,
                            requirements: &[
                                SUBSCRIPTION_QUERY_REQUIREMENT,
                                CONCURRENCY_REQUIREMENT,
                            ],
                            severity: Severity::High,
                        },
                        SUBSCRIPTION_CONTENT,
                        INDICES,
                    ],
                },
                TestStepDocumentation {
                    name: "Search available ISAs",
                    checks: &[
                        ISA_SEARCH,
                        TestCheckDocumentation {
                            name: ISAS_IN_SEARCH,
                            requirements: &[ISA_QUERY_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Search subscriptions",
                    checks: &[
                        SUB_SEARCH,
                        TestCheckDocumentation {
                            name: SUBS_IN_SEARCH,
                            requirements: &[SUBSCRIPTION_QUERY_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Delete ISAs concurrently",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISAS_DELETED,
                            requirements: &[ISA_DELETE_REQUIREMENT, CONCURRENCY_REQUIREMENT],
                            severity: Severity::High,
                        },
                        INDICES,
                    ],
                },
                TestStepDocumentation {
                    name: "Delete subscriptions concurrently",
                    checks: &[TestCheckDocumentation {
                        name: SUBS_DELETED,
                        requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT, CONCURRENCY_REQUIREMENT],
                        severity: Severity::High,
                    }],
                },
                TestStepDocumentation {
                    name: "Access deleted entities",
                    checks: &[
                        TestCheckDocumentation {
                            name: ISAS_GONE,
                            requirements: &[ISA_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        TestCheckDocumentation {
                            name: SUBS_GONE,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
                TestStepDocumentation {
                    name: "Search for deleted entities",
                    checks: &[
                        ISA_SEARCH,
                        TestCheckDocumentation {
                            name: ISAS_NOT_IN_SEARCH,
                            requirements: &[ISA_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                        SUB_SEARCH,
                        TestCheckDocumentation {
                            name: SUBS_NOT_IN_SEARCH,
                            requirements: &[SUBSCRIPTION_DELETE_REQUIREMENT],
                            severity: Severity::Medium,
                        },
                    ],
                },
            ],
        },
    ],
    cleanup: Some(CLEANUP),
};

fn entity_count(parameters: &ScenarioParameters, name: &str, default: usize) -> Result<usize> {
    let count = parameters.parse_or(name, default)?;
    if count == 0 || count > MAX_ENTITIES {
        return Err(Error::invalid_parameter(
            DOCUMENTATION.name,
            name,
            format!("must be between 1 and {}", MAX_ENTITIES),
        ));
    }
    Ok(count)
}

pub fn build(bindings: &Bindings, parameters: &ScenarioParameters) -> Result<Box<dyn TestScenario>> {
    let isa_count = entity_count(parameters, "isa_count", DEFAULT_ISA_COUNT)?;
    let subscription_count =
        entity_count(parameters, "subscription_count", DEFAULT_SUBSCRIPTION_COUNT)?;
    let ids = bindings.id_generator("id_generator")?;
    Ok(Box::new(HeavyTrafficConcurrent {
        dss: bindings.dss("dss")?,
        area: bindings.service_area("service_area")?,
        isa_ids: sequential_ids(&ids.make_id(ISA), isa_count),
        sub_ids: sequential_ids(&ids.make_id(SUBSCRIPTION), subscription_count),
        isa_versions: BTreeMap::new(),
        sub_versions: BTreeMap::new(),
        sub_indices: BTreeMap::new(),
    }))
}

/// Await `futures` with at most `limit` of them in flight
async fn bounded<I, Fut, T>(futures: I, limit: usize) -> Vec<T>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = T>,
{
    stream::iter(futures)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

/// In-flight budgets of two bursts running side by side
fn split_limit(limit: usize) -> (usize, usize) {
    let first = limit.div_ceil(2).max(1);
    let second = (limit / 2).max(1);
    (first, second)
}

fn sorted<T>(mut results: Vec<(String, Fetched<T>)>) -> Vec<(String, Fetched<T>)> {
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

fn acceptable<T>(fetched: &Fetched<T>, expected: &[u16]) -> bool {
    expected.contains(&fetched.status_code()) && (!fetched.query.success() || fetched.value.is_some())
}

/// IDs among `ids` whose presence in `listed` differs from `should_be_listed`
fn membership_offenders<'a>(
    ids: &'a [String],
    listed: &BTreeSet<&str>,
    should_be_listed: bool,
) -> Vec<&'a str> {
    ids.iter()
        .map(|id| id.as_str())
        .filter(|id| listed.contains(id) != should_be_listed)
        .collect()
}

/// Subscriptions whose notified index did not grow past the last known one
fn stale_indices(
    known: &BTreeMap<String, i64>,
    notified: &BTreeMap<String, i64>,
    subscriptions: &[String],
) -> Vec<String> {
    subscriptions
        .iter()
        .filter_map(|id| {
            let before = known.get(id).copied().unwrap_or(0);
            match notified.get(id) {
                None => Some(format!("{}: not notified", id)),
                Some(&after) if after <= before => {
                    Some(format!("{}: index went from {} to {}", id, before, after))
                }
                Some(_) => None,
            }
        })
        .collect()
}

pub struct HeavyTrafficConcurrent {
    dss: DssInstance,
    area: UssArea,
    isa_ids: Vec<String>,
    sub_ids: Vec<String>,
    isa_versions: BTreeMap<String, String>,
    sub_versions: BTreeMap<String, String>,
    sub_indices: BTreeMap<String, i64>,
}

impl HeavyTrafficConcurrent {
    fn participants(&self) -> [&str; 1] {
        [self.dss.participant_id.as_str()]
    }

    /// Record every query of a burst and evaluate `check_name` over all of them
    fn record_burst<T>(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        results: &[(String, Fetched<T>)],
        expected: &[u16],
        summary: &str,
    ) -> Result<()> {
        ctx.record_queries(results.iter().map(|(_, f)| &f.query));
        let check = ctx.check(check_name, &self.participants())?;
        let failed: Vec<&(String, Fetched<T>)> = results
            .iter()
            .filter(|(_, f)| !acceptable(f, expected))
            .collect();
        if failed.is_empty() {
            return ctx.pass(check);
        }
        let details = failed
            .iter()
            .map(|(id, f)| {
                let mut line = format!("{}: {}", id, f.query.describe());
                let errors = f.errors();
                if !errors.is_empty() {
                    line.push_str(&format!(" ({})", errors.join("; ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        ctx.fail(
            check,
            Failure::new(format!(
                "{} of {} requests: {}",
                failed.len(),
                results.len(),
                summary
            ))
            .details(details)
            .queries(failed.iter().map(|(_, f)| f.query.timestamp())),
        )
    }

    fn record_list_check(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        problems: Vec<String>,
        summary: &str,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Result<()> {
        let check = ctx.check(check_name, &self.participants())?;
        if problems.is_empty() {
            return ctx.pass(check);
        }
        ctx.fail(
            check,
            Failure::new(summary)
                .details(problems.join("\n"))
                .queries(timestamps),
        )
    }

    /// Delete any of our ISAs and subscriptions that still exist
    async fn remove_leftovers(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let dss = &self.dss;
        let (isa_limit, sub_limit) = split_limit(ctx.settings().max_in_flight);
        let (isas, subs) = tokio::join!(
            bounded(
                self.isa_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_isa(&id).await;
                    (id, fetched)
                }),
                isa_limit,
            ),
            bounded(
                self.sub_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_rid_subscription(&id).await;
                    (id, fetched)
                }),
                sub_limit,
            ),
        );
        let (isas, subs) = (sorted(isas), sorted(subs));
        self.record_burst(ctx, ISA_QUERY_CHECK, &isas, &[200, 404], "ISA query failed")?;
        self.record_burst(
            ctx,
            SUBSCRIPTION_QUERY_CHECK,
            &subs,
            &[200, 404],
            "subscription query failed",
        )?;

        let stale_isas: Vec<(String, String)> = isas
            .iter()
            .filter_map(|(id, f)| {
                f.value
                    .as_ref()
                    .map(|v| (id.clone(), v.service_area.version.clone()))
            })
            .collect();
        let stale_subs: Vec<(String, String)> = subs
            .iter()
            .filter_map(|(id, f)| {
                f.value
                    .as_ref()
                    .map(|v| (id.clone(), v.subscription.version.clone()))
            })
            .collect();
        if stale_isas.is_empty() && stale_subs.is_empty() {
            return Ok(());
        }
        tracing::info!(
            isas = stale_isas.len(),
            subscriptions = stale_subs.len(),
            "Removing pre-existing entities"
        );
        let (isas, subs) = tokio::join!(
            bounded(
                stale_isas.into_iter().map(move |(id, version)| async move {
                    let fetched = dss.delete_isa(&id, &version).await;
                    (id, fetched)
                }),
                isa_limit,
            ),
            bounded(
                stale_subs.into_iter().map(move |(id, version)| async move {
                    let fetched = dss.delete_rid_subscription(&id, &version).await;
                    (id, fetched)
                }),
                sub_limit,
            ),
        );
        self.record_burst(
            ctx,
            ISA_REMOVED_CHECK,
            &sorted(isas),
            &[200],
            "pre-existing ISA could not be removed",
        )?;
        self.record_burst(
            ctx,
            SUBSCRIPTION_REMOVED_CHECK,
            &sorted(subs),
            &[200],
            "pre-existing subscription could not be removed",
        )
    }

    /// Create one half of the ISAs and subscriptions side by side
    ///
    /// Returns the IDs of the created ISAs and subscriptions each response
    /// reported as overlapping.
    async fn create_half(
        &mut self,
        ctx: &mut ScenarioContext,
        window: Window,
        isa_ids: &[String],
        sub_ids: &[String],
    ) -> Result<(BTreeMap<String, BTreeSet<String>>, BTreeMap<String, BTreeSet<String>>)> {
        let dss = &self.dss;
        let extents = &self.area.volume(window.start, window.end);
        let url = self.area.base_url.as_str();
        let (isa_limit, sub_limit) = split_limit(ctx.settings().max_in_flight);
        let (isas, subs) = tokio::join!(
            bounded(
                isa_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.put_isa(&id, extents, url, None).await;
                    (id, fetched)
                }),
                isa_limit,
            ),
            bounded(
                sub_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.put_rid_subscription(&id, extents, url, None).await;
                    (id, fetched)
                }),
                sub_limit,
            ),
        );
        let (isas, subs) = (sorted(isas), sorted(subs));
        self.record_burst(ctx, ISAS_CREATED, &isas, &[200], "ISA creation failed")?;
        self.record_burst(ctx, SUBS_CREATED, &subs, &[200], "subscription creation failed")?;

        let mut notified = BTreeMap::new();
        for (id, fetched) in &isas {
            if let Some(response) = &fetched.value {
                self.isa_versions
                    .insert(id.clone(), response.service_area.version.clone());
                let subscriptions = response
                    .subscribers
                    .iter()
                    .flat_map(|s| s.subscriptions.iter())
                    .map(|s| s.subscription_id.clone())
                    .collect();
                notified.insert(id.clone(), subscriptions);
            }
        }
        let mut mentioned = BTreeMap::new();
        for (id, fetched) in &subs {
            if let Some(response) = &fetched.value {
                let sub = &response.subscription;
                self.sub_versions.insert(id.clone(), sub.version.clone());
                self.sub_indices.insert(id.clone(), sub.notification_index);
                let areas = response.service_areas.iter().map(|a| a.id.clone()).collect();
                mentioned.insert(id.clone(), areas);
            }
        }
        Ok((notified, mentioned))
    }

    async fn create_step(&mut self, ctx: &mut ScenarioContext, window: Window) -> Result<()> {
        ctx.begin_test_step("Create ISAs and subscriptions concurrently")?;
        let (first_isas, second_isas) = self.isa_ids.split_at(self.isa_ids.len() / 2);
        let (first_subs, second_subs) = self.sub_ids.split_at(self.sub_ids.len() / 2);
        let (first_isas, second_isas) = (first_isas.to_vec(), second_isas.to_vec());
        let (first_subs, second_subs) = (first_subs.to_vec(), second_subs.to_vec());

        self.create_half(ctx, window, &first_isas, &first_subs).await?;
        let started = Utc::now();
        let (notified, mentioned) = self
            .create_half(ctx, window, &second_isas, &second_subs)
            .await?;

        let missing_subs: Vec<String> = notified
            .iter()
            .flat_map(|(isa, subscriptions)| {
                first_subs
                    .iter()
                    .filter(|s| !subscriptions.contains(*s))
                    .map(move |s| format!("ISA {} does not mention subscription {}", isa, s))
            })
            .collect();
        self.record_list_check(
            ctx,
            ISAS_MENTION_SUBS,
            missing_subs,
            "ISA creation responses omit existing subscriptions",
            vec![started],
        )?;

        let missing_isas: Vec<String> = mentioned
            .iter()
            .flat_map(|(sub, areas)| {
                first_isas
                    .iter()
                    .filter(|i| !areas.contains(*i))
                    .map(move |i| format!("Subscription {} does not mention ISA {}", sub, i))
            })
            .collect();
        self.record_list_check(
            ctx,
            SUBS_MENTION_ISAS,
            missing_isas,
            "Subscription creation responses omit existing ISAs",
            vec![started],
        )?;
        ctx.end_test_step()
    }

    async fn get_isas_step(&mut self, ctx: &mut ScenarioContext, window: Window) -> Result<()> {
        ctx.begin_test_step("Get ISAs concurrently")?;
        let dss = &self.dss;
        let isas = sorted(
            bounded(
                self.isa_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_isa(&id).await;
                    (id, fetched)
                }),
                ctx.settings().max_in_flight,
            )
            .await,
        );
        self.record_burst(ctx, ISAS_READ, &isas, &[200], "ISA query failed")?;

        let mut problems = Vec::new();
        for (id, fetched) in &isas {
            let Some(response) = &fetched.value else {
                continue;
            };
            let version = self.isa_versions.get(id).cloned().unwrap_or_default();
            let expected = Expected::new(id, &self.area.base_url, window.start, window.end)
                .owned_by(self.dss.subject())
                .version(VersionExpectation::Unchanged(version));
            problems.extend(
                isa_problems(&expected, &response.service_area)
                    .into_iter()
                    .map(|p| format!("{}: {}", id, p)),
            );
        }
        let check = ctx.check(ISA_CONTENT_CHECK, &self.participants())?;
        ctx.record(
            check,
            content_outcome(
                "ISAs",
                &format!("({} queried)", isas.len()),
                problems,
                isas.iter().map(|(_, f)| f.query.timestamp()).collect(),
            ),
        )?;
        ctx.end_test_step()
    }

    async fn get_subscriptions_step(
        &mut self,
        ctx: &mut ScenarioContext,
        window: Window,
    ) -> Result<()> {
        ctx.begin_test_step("Get subscriptions concurrently")?;
        let dss = &self.dss;
        let subs = sorted(
            bounded(
                self.sub_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_rid_subscription(&id).await;
                    (id, fetched)
                }),
                ctx.settings().max_in_flight,
            )
            .await,
        );
        self.record_burst(ctx, SUBS_READ, &subs, &[200], "subscription query failed")?;

        let mut problems = Vec::new();
        let mut current = BTreeMap::new();
        for (id, fetched) in &subs {
            let Some(response) = &fetched.value else {
                continue;
            };
            let sub = &response.subscription;
            let version = self.sub_versions.get(id).cloned().unwrap_or_default();
            let expected = Expected::new(id, &self.area.base_url, window.start, window.end)
                .owned_by(self.dss.subject())
                .version(VersionExpectation::Unchanged(version));
            problems.extend(
                subscription_problems(&expected, sub)
                    .into_iter()
                    .map(|p| format!("{}: {}", id, p)),
            );
            current.insert(id.clone(), sub.notification_index);
        }
        let timestamps: Vec<DateTime<Utc>> =
            subs.iter().map(|(_, f)| f.query.timestamp()).collect();
        let check = ctx.check(SUBSCRIPTION_CONTENT_CHECK, &self.participants())?;
        ctx.record(
            check,
            content_outcome(
                "subscriptions",
                &format!("({} queried)", subs.len()),
                problems,
                timestamps.clone(),
            ),
        )?;

        // Every ISA of the second half was created after the first-half subscriptions
        let first_half = &self.sub_ids[..self.sub_ids.len() / 2];
        let stale = stale_indices(&self.sub_indices, &current, first_half);
        self.record_list_check(
            ctx,
            INDICES_INCREMENTED,
            stale,
            "ISA creations did not increment notification indices",
            timestamps,
        )?;
        self.sub_indices.extend(current);
        ctx.end_test_step()
    }

    /// Search the service area for our ISAs and evaluate their presence
    async fn search_isas(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        should_be_listed: bool,
    ) -> Result<()> {
        let fetched = self.dss.search_isas(&self.area.rect(), None, None).await;
        let found = require_success(ctx, ISAS_SEARCHED, &fetched, "ISA search failed")?;
        let listed: BTreeSet<&str> = found.service_areas.iter().map(|a| a.id.as_str()).collect();
        let offenders = membership_offenders(&self.isa_ids, &listed, should_be_listed);
        let summary = if should_be_listed {
            "ISAs missing from search results"
        } else {
            "Deleted ISAs returned by search"
        };
        self.record_list_check(
            ctx,
            check_name,
            offenders.into_iter().map(String::from).collect(),
            summary,
            fetched.timestamps(),
        )
    }

    async fn search_subscriptions(
        &self,
        ctx: &mut ScenarioContext,
        check_name: &str,
        should_be_listed: bool,
    ) -> Result<()> {
        let fetched = self.dss.search_rid_subscriptions(&self.area.rect()).await;
        let found = require_success(ctx, SUBS_SEARCHED, &fetched, "Subscription search failed")?;
        let listed: BTreeSet<&str> = found.subscriptions.iter().map(|s| s.id.as_str()).collect();
        let offenders = membership_offenders(&self.sub_ids, &listed, should_be_listed);
        let summary = if should_be_listed {
            "Subscriptions missing from search results"
        } else {
            "Deleted subscriptions returned by search"
        };
        self.record_list_check(
            ctx,
            check_name,
            offenders.into_iter().map(String::from).collect(),
            summary,
            fetched.timestamps(),
        )
    }

    async fn delete_isas_step(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_step("Delete ISAs concurrently")?;
        let dss = &self.dss;
        let targets: Vec<(String, String)> = self
            .isa_versions
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        let deleted = sorted(
            bounded(
                targets.into_iter().map(move |(id, version)| async move {
                    let fetched = dss.delete_isa(&id, &version).await;
                    (id, fetched)
                }),
                ctx.settings().max_in_flight,
            )
            .await,
        );
        self.record_burst(ctx, ISAS_DELETED, &deleted, &[200], "ISA deletion failed")?;

        let mut notified: BTreeMap<String, i64> = BTreeMap::new();
        for (_, fetched) in &deleted {
            let Some(response) = &fetched.value else {
                continue;
            };
            for sub_id in &self.sub_ids {
                if let Some(index) = notified_index(&response.subscribers, sub_id) {
                    let highest = notified.entry(sub_id.clone()).or_insert(index);
                    *highest = (*highest).max(index);
                }
            }
        }
        let stale = stale_indices(&self.sub_indices, &notified, &self.sub_ids);
        self.record_list_check(
            ctx,
            INDICES_INCREMENTED,
            stale,
            "ISA deletions did not increment notification indices",
            deleted.iter().map(|(_, f)| f.query.timestamp()).collect(),
        )?;
        self.isa_versions.clear();
        ctx.end_test_step()
    }

    async fn delete_subscriptions_step(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_step("Delete subscriptions concurrently")?;
        let dss = &self.dss;
        let targets: Vec<(String, String)> = self
            .sub_versions
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        let deleted = sorted(
            bounded(
                targets.into_iter().map(move |(id, version)| async move {
                    let fetched = dss.delete_rid_subscription(&id, &version).await;
                    (id, fetched)
                }),
                ctx.settings().max_in_flight,
            )
            .await,
        );
        self.record_burst(ctx, SUBS_DELETED, &deleted, &[200], "subscription deletion failed")?;
        self.sub_versions.clear();
        ctx.end_test_step()
    }

    async fn access_deleted_step(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_step("Access deleted entities")?;
        let dss = &self.dss;
        let (isa_limit, sub_limit) = split_limit(ctx.settings().max_in_flight);
        let (isas, subs) = tokio::join!(
            bounded(
                self.isa_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_isa(&id).await;
                    (id, fetched)
                }),
                isa_limit,
            ),
            bounded(
                self.sub_ids.iter().cloned().map(move |id| async move {
                    let fetched = dss.get_rid_subscription(&id).await;
                    (id, fetched)
                }),
                sub_limit,
            ),
        );
        self.record_burst(
            ctx,
            ISAS_GONE,
            &sorted(isas),
            &[404],
            "deleted ISA is still returned",
        )?;
        self.record_burst(
            ctx,
            SUBS_GONE,
            &sorted(subs),
            &[404],
            "deleted subscription is still returned",
        )?;
        ctx.end_test_step()
    }

    async fn concurrent_case(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Concurrent requests")?;
        let now = Utc::now();
        let window = Window {
            start: self.area.time_start(now),
            end: self.area.time_end(now),
        };

        self.create_step(ctx, window).await?;
        self.get_isas_step(ctx, window).await?;
        self.get_subscriptions_step(ctx, window).await?;

        ctx.begin_test_step("Search available ISAs")?;
        self.search_isas(ctx, ISAS_IN_SEARCH, true).await?;
        ctx.end_test_step()?;

        ctx.begin_test_step("Search subscriptions")?;
        self.search_subscriptions(ctx, SUBS_IN_SEARCH, true).await?;
        ctx.end_test_step()?;

        self.delete_isas_step(ctx).await?;
        self.delete_subscriptions_step(ctx).await?;
        self.access_deleted_step(ctx).await?;

        ctx.begin_test_step("Search for deleted entities")?;
        self.search_isas(ctx, ISAS_NOT_IN_SEARCH, false).await?;
        self.search_subscriptions(ctx, SUBS_NOT_IN_SEARCH, false)
            .await?;
        ctx.end_test_step()?;

        ctx.end_test_case()
    }
}

#[async_trait]
impl TestScenario for HeavyTrafficConcurrent {
    fn documentation(&self) -> &'static ScenarioDocumentation {
        &DOCUMENTATION
    }

    async fn run(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.begin_test_case("Setup")?;
        ctx.begin_test_step(CLEAN_WORKSPACE.name)?;
        self.remove_leftovers(ctx).await?;
        delete_own_subscriptions_in_area(ctx, &self.dss, &self.area.rect()).await?;
        ctx.end_test_step()?;
        ctx.end_test_case()?;

        self.concurrent_case(ctx).await
    }

    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        self.remove_leftovers(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_limit_never_starves() {
        assert_eq!(split_limit(20), (10, 10));
        assert_eq!(split_limit(5), (3, 2));
        assert_eq!(split_limit(1), (1, 1));
    }

    #[test]
    fn test_membership_offenders() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let listed: BTreeSet<&str> = ["a", "c", "z"].into_iter().collect();
        assert_eq!(membership_offenders(&ids, &listed, true), vec!["b"]);
        assert_eq!(membership_offenders(&ids, &listed, false), vec!["a", "c"]);
    }

    #[test]
    fn test_stale_indices() {
        let known: BTreeMap<String, i64> =
            [("s1".to_string(), 2), ("s2".to_string(), 2)].into_iter().collect();
        let notified: BTreeMap<String, i64> =
            [("s1".to_string(), 3), ("s2".to_string(), 2)].into_iter().collect();
        let ids = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let stale = stale_indices(&known, &notified, &ids);
        assert_eq!(stale.len(), 2);
        assert!(stale[0].starts_with("s2"));
        assert!(stale[1].contains("not notified"));
    }

    #[test]
    fn test_entity_count_bounds() {
        let parameters = ScenarioParameters::new("HeavyTrafficConcurrent")
            .with("isa_count", "0")
            .with("subscription_count", "4");
        assert!(entity_count(&parameters, "isa_count", DEFAULT_ISA_COUNT).is_err());
        assert_eq!(
            entity_count(&parameters, "subscription_count", DEFAULT_SUBSCRIPTION_COUNT).unwrap(),
            4
        );
        assert_eq!(entity_count(&parameters, "absent", 7).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bounded_runs_everything() {
        let mut results = bounded((0..10).map(|i| async move { i * 2 }), 3).await;
        results.sort();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }
}
