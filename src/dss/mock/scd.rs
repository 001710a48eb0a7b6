//! F3548-21 strategic coordination endpoints of the in-memory DSS

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{
    error, insert_record, max_subscription_duration, remove_record, reply, time_window, Call,
    Reply, State,
};
use crate::dss::geo::time_bounds;
use crate::dss::transport::Method;
use crate::dss::types::*;

#[derive(Debug, Clone)]
pub(super) struct OirEntry {
    pub oir: OperationalIntentReference,
    pub extents: Vec<Volume4D>,
}

#[derive(Debug, Clone)]
pub(super) struct CrEntry {
    pub cr: ConstraintReference,
    pub extents: Vec<Volume4D>,
}

#[derive(Debug, Clone)]
pub(super) struct SubscriptionEntry {
    pub subscription: ScdSubscription,
    pub extents: Volume4D,
    pub owner: String,
}

/// Which subscriptions an entity change concerns
#[derive(Clone, Copy)]
enum Relevance {
    OperationalIntents,
    Constraints,
}

pub(super) fn route(state: &mut State, call: &Call) -> Reply {
    let rest = call.segments.get(2..).unwrap_or(&[]);
    match (call.method, rest) {
        (Method::Post, ["operational_intent_references", "query"]) => query_oirs(state, call),
        (Method::Put, ["operational_intent_references", id]) => put_oir(state, call, id, None),
        (Method::Put, ["operational_intent_references", id, ovn]) => {
            put_oir(state, call, id, Some(*ovn))
        }
        (Method::Get, ["operational_intent_references", id]) => get_oir(state, call, id),
        (Method::Delete, ["operational_intent_references", id, ovn]) => {
            delete_oir(state, call, id, ovn)
        }
        (Method::Post, ["constraint_references", "query"]) => query_crs(state, call),
        (Method::Put, ["constraint_references", id]) => put_cr(state, call, id, None),
        (Method::Put, ["constraint_references", id, ovn]) => put_cr(state, call, id, Some(*ovn)),
        (Method::Get, ["constraint_references", id]) => get_cr(state, call, id),
        (Method::Delete, ["constraint_references", id, ovn]) => delete_cr(state, call, id, ovn),
        (Method::Post, ["subscriptions", "query"]) => query_subscriptions(state, call),
        (Method::Put, ["subscriptions", id]) => put_subscription(state, call, id, None),
        (Method::Put, ["subscriptions", id, version]) => {
            put_subscription(state, call, id, Some(*version))
        }
        (Method::Get, ["subscriptions", id]) => get_subscription(state, call, id),
        (Method::Delete, ["subscriptions", id, version]) => {
            delete_subscription(state, call, id, version)
        }
        _ => error(404, "No such strategic coordination endpoint"),
    }
}

fn validate_extents(
    extents: &[Volume4D],
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Reply> {
    if extents.is_empty() {
        return Err(error(400, "At least one volume is required"));
    }
    for volume in extents {
        time_window(volume, now)?;
    }
    time_bounds(extents).ok_or_else(|| error(400, "Volumes must specify time bounds"))
}

fn overlaps(a: &[Volume4D], b: &Volume4D) -> bool {
    a.iter().any(|v| v.intersects(b))
}

/// Increment subscriptions concerned by a change in `extents`
fn notify_subscribers(
    state: &mut State,
    partition: &Option<String>,
    extents: &[Volume4D],
    relevance: Relevance,
    now: DateTime<Utc>,
) -> Vec<ScdSubscriberToNotify> {
    let frozen = state.notifications_frozen();
    let mut by_url: BTreeMap<String, Vec<SubscriptionState>> = BTreeMap::new();
    for record in state.scd_subscriptions.values_mut() {
        if !record.live(partition) {
            continue;
        }
        let sub = &mut record.value.subscription;
        let concerned = match relevance {
            Relevance::OperationalIntents => sub.notify_for_operational_intents,
            Relevance::Constraints => sub.notify_for_constraints,
        };
        let expired = sub.time_end.is_some_and(|t| t.value < now);
        if !concerned || expired || !overlaps(extents, &record.value.extents) {
            continue;
        }
        if !frozen {
            sub.notification_index += 1;
        }
        by_url
            .entry(sub.uss_base_url.clone())
            .or_default()
            .push(SubscriptionState {
                subscription_id: sub.id.clone(),
                notification_index: sub.notification_index,
            });
    }
    by_url
        .into_iter()
        .map(|(uss_base_url, subscriptions)| ScdSubscriberToNotify {
            uss_base_url,
            subscriptions,
        })
        .collect()
}

/// OVNs are only disclosed to the managing USS
fn redact_oir(mut oir: OperationalIntentReference, subject: &str) -> OperationalIntentReference {
    if oir.manager != subject {
        oir.ovn = None;
    }
    oir
}

fn redact_cr(mut cr: ConstraintReference, subject: &str) -> ConstraintReference {
    if cr.manager != subject {
        cr.ovn = None;
    }
    cr
}

fn availability_of(state: &State, partition: &Option<String>, uss: &str) -> UssAvailabilityState {
    state
        .availability
        .get(&(partition.clone(), uss.to_string()))
        .map(|(a, _)| *a)
        .unwrap_or(UssAvailabilityState::Unknown)
}

/// Status to return when a write with `requested` targets an entity
fn check_write(
    existing: Option<(Option<&str>, &str)>,
    requested: Option<&str>,
    subject: &str,
    kind: &str,
) -> Option<Reply> {
    match (existing, requested) {
        (Some(_), None) => Some(error(409, format!("{} already exists", kind))),
        (None, Some(_)) => Some(error(404, format!("{} not found", kind))),
        (Some((current, _)), Some(requested)) if current != Some(requested) => Some(error(
            409,
            format!("{} version {} is not current", kind, requested),
        )),
        (Some((_, owner)), Some(_)) if owner != subject => {
            Some(error(403, format!("{} is managed by {}", kind, owner)))
        }
        _ => None,
    }
}

/// Drop `oir_id` from the dependents of `sub_id`
///
/// Implicit subscriptions go away with their last dependent.
fn detach_dependent(state: &mut State, sub_id: &str, oir_id: &str) {
    let orphaned = match state.scd_subscriptions.get_mut(sub_id) {
        Some(record) => {
            let sub = &mut record.value.subscription;
            sub.dependent_operational_intents.retain(|d| d != oir_id);
            sub.implicit_subscription && sub.dependent_operational_intents.is_empty()
        }
        None => false,
    };
    if orphaned {
        state.scd_subscriptions.remove(sub_id);
    }
}

fn put_oir(state: &mut State, call: &Call, id: &str, ovn: Option<&str>) -> Reply {
    let params: PutOperationalIntentReferenceParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (start, end) = match validate_extents(&params.extents, call.now) {
        Ok(w) => w,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);

    let existing = state.oirs.get(id).filter(|r| r.live(&partition));
    let previous_version = existing.map(|r| r.value.oir.version).unwrap_or(0);
    let previous_subscription = existing.and_then(|r| r.value.oir.subscription_id.clone());
    let existing = existing.map(|r| (r.value.oir.ovn.as_deref(), r.value.oir.manager.as_str()));
    if let Some(reply) = check_write(existing, ovn, call.subject, "Operational intent") {
        return reply;
    }

    // Every other overlapping operational intent must be acknowledged in the key
    let missing: Vec<OperationalIntentReference> = state
        .oirs
        .iter()
        .filter(|(other_id, r)| other_id.as_str() != id && r.live(&partition))
        .map(|(_, r)| &r.value)
        .filter(|e| e.oir.time_end.value >= call.now)
        .filter(|e| e.extents.iter().any(|v| overlaps(&params.extents, v)))
        .filter(|e| {
            e.oir
                .ovn
                .as_ref()
                .map_or(true, |o| !params.key.contains(o))
        })
        .map(|e| redact_oir(e.oir.clone(), call.subject))
        .collect();
    if !missing.is_empty() {
        return reply(
            409,
            &AirspaceConflictResponse {
                message: "Key does not contain all relevant OVNs".to_string(),
                missing_operational_intents: missing,
                missing_constraints: Vec::new(),
            },
        );
    }

    let subscription_id = match (&params.subscription_id, &params.new_subscription) {
        (Some(sub_id), _) => {
            let known = state
                .scd_subscriptions
                .get(sub_id)
                .is_some_and(|r| r.live(&partition));
            if !known {
                return error(400, format!("Subscription {} does not exist", sub_id));
            }
            Some(sub_id.clone())
        }
        (None, Some(implicit)) => match previous_subscription.clone() {
            Some(sub_id) => Some(sub_id),
            None => {
                let sub_id = uuid::Uuid::new_v4().to_string();
                let extents = crate::dss::geo::union_bounding_box(&params.extents)
                    .map(|b| {
                        crate::dss::geo::volume4d(&b.corners(), f64::MIN, f64::MAX, start, end)
                    })
                    .unwrap_or_else(|| params.extents[0].clone());
                let subscription = ScdSubscription {
                    id: sub_id.clone(),
                    version: state.next_token(),
                    notification_index: 0,
                    time_start: Some(start.into()),
                    time_end: Some(end.into()),
                    uss_base_url: implicit.uss_base_url.clone(),
                    notify_for_operational_intents: true,
                    notify_for_constraints: implicit.notify_for_constraints,
                    implicit_subscription: true,
                    dependent_operational_intents: Vec::new(),
                };
                insert_record(
                    &mut state.scd_subscriptions,
                    &sub_id,
                    SubscriptionEntry {
                        subscription,
                        extents,
                        owner: call.subject.to_string(),
                    },
                    partition.clone(),
                );
                Some(sub_id)
            }
        },
        (None, None) => previous_subscription.clone(),
    };
    if let Some(previous) = previous_subscription {
        if subscription_id.as_deref() != Some(previous.as_str()) {
            detach_dependent(state, &previous, id);
        }
    }
    if let Some(sub_id) = &subscription_id {
        if let Some(record) = state.scd_subscriptions.get_mut(sub_id) {
            let dependents = &mut record.value.subscription.dependent_operational_intents;
            if !dependents.iter().any(|d| d == id) {
                dependents.push(id.to_string());
            }
        }
    }

    let oir = OperationalIntentReference {
        id: id.to_string(),
        manager: call.subject.to_string(),
        uss_availability: availability_of(state, &partition, call.subject),
        version: previous_version + 1,
        state: params.state,
        ovn: Some(state.next_token()),
        time_start: start.into(),
        time_end: end.into(),
        uss_base_url: params.uss_base_url,
        subscription_id,
    };
    let subscribers = notify_subscribers(
        state,
        &partition,
        &params.extents,
        Relevance::OperationalIntents,
        call.now,
    );
    insert_record(
        &mut state.oirs,
        id,
        OirEntry {
            oir: oir.clone(),
            extents: params.extents,
        },
        partition,
    );
    reply(
        201,
        &ChangeOperationalIntentReferenceResponse {
            subscribers,
            operational_intent_reference: oir,
        },
    )
}

fn get_oir(state: &mut State, call: &Call, id: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    match state
        .oirs
        .get(id)
        .filter(|r| r.visible(&partition, call.participant))
    {
        Some(record) => {
            let mut oir = redact_oir(record.value.oir.clone(), call.subject);
            oir.uss_availability = availability_of(state, &partition, &oir.manager);
            reply(
                200,
                &GetOperationalIntentReferenceResponse {
                    operational_intent_reference: oir,
                },
            )
        }
        None => error(404, format!("Operational intent {} not found", id)),
    }
}

fn delete_oir(state: &mut State, call: &Call, id: &str, ovn: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    let existing = state
        .oirs
        .get(id)
        .filter(|r| r.live(&partition))
        .map(|r| (r.value.oir.ovn.as_deref(), r.value.oir.manager.as_str()));
    if existing.is_none() {
        return error(404, format!("Operational intent {} not found", id));
    }
    if let Some(reply) = check_write(existing, Some(ovn), call.subject, "Operational intent") {
        return reply;
    }

    let mode = state.delete_mode();
    let Some(entry) = remove_record(&mut state.oirs, id, mode, call.participant) else {
        return error(404, format!("Operational intent {} not found", id));
    };

    if let Some(sub_id) = &entry.oir.subscription_id {
        detach_dependent(state, sub_id, id);
    }

    let subscribers = notify_subscribers(
        state,
        &partition,
        &entry.extents,
        Relevance::OperationalIntents,
        call.now,
    );
    reply(
        200,
        &ChangeOperationalIntentReferenceResponse {
            subscribers,
            operational_intent_reference: entry.oir,
        },
    )
}

fn query_oirs(state: &mut State, call: &Call) -> Reply {
    let params: QueryParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);
    let mut found: Vec<OperationalIntentReference> = state
        .oirs
        .values()
        .filter(|r| r.visible(&partition, call.participant))
        .map(|r| &r.value)
        .filter(|e| e.oir.time_end.value >= call.now)
        .filter(|e| overlaps(&e.extents, &params.area_of_interest))
        .map(|e| redact_oir(e.oir.clone(), call.subject))
        .collect();
    for oir in &mut found {
        oir.uss_availability = availability_of(state, &partition, &oir.manager);
    }
    found.sort_by(|a, b| a.id.cmp(&b.id));
    reply(
        200,
        &QueryOperationalIntentReferenceResponse {
            operational_intent_references: found,
        },
    )
}

fn put_cr(state: &mut State, call: &Call, id: &str, ovn: Option<&str>) -> Reply {
    let params: PutConstraintReferenceParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (start, end) = match validate_extents(&params.extents, call.now) {
        Ok(w) => w,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);

    let existing = state.crs.get(id).filter(|r| r.live(&partition));
    let previous_version = existing.map(|r| r.value.cr.version).unwrap_or(0);
    let existing = existing.map(|r| (r.value.cr.ovn.as_deref(), r.value.cr.manager.as_str()));
    if let Some(reply) = check_write(existing, ovn, call.subject, "Constraint") {
        return reply;
    }

    let cr = ConstraintReference {
        id: id.to_string(),
        manager: call.subject.to_string(),
        version: previous_version + 1,
        ovn: Some(state.next_token()),
        time_start: start.into(),
        time_end: end.into(),
        uss_base_url: params.uss_base_url,
    };
    let subscribers = notify_subscribers(
        state,
        &partition,
        &params.extents,
        Relevance::Constraints,
        call.now,
    );
    insert_record(
        &mut state.crs,
        id,
        CrEntry {
            cr: cr.clone(),
            extents: params.extents,
        },
        partition,
    );
    reply(
        201,
        &ChangeConstraintReferenceResponse {
            subscribers,
            constraint_reference: cr,
        },
    )
}

fn get_cr(state: &mut State, call: &Call, id: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    match state
        .crs
        .get(id)
        .filter(|r| r.visible(&partition, call.participant))
    {
        Some(record) => reply(
            200,
            &GetConstraintReferenceResponse {
                constraint_reference: redact_cr(record.value.cr.clone(), call.subject),
            },
        ),
        None => error(404, format!("Constraint {} not found", id)),
    }
}

fn delete_cr(state: &mut State, call: &Call, id: &str, ovn: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    let existing = state
        .crs
        .get(id)
        .filter(|r| r.live(&partition))
        .map(|r| (r.value.cr.ovn.as_deref(), r.value.cr.manager.as_str()));
    if existing.is_none() {
        return error(404, format!("Constraint {} not found", id));
    }
    if let Some(reply) = check_write(existing, Some(ovn), call.subject, "Constraint") {
        return reply;
    }

    let mode = state.delete_mode();
    let Some(entry) = remove_record(&mut state.crs, id, mode, call.participant) else {
        return error(404, format!("Constraint {} not found", id));
    };
    let subscribers = notify_subscribers(
        state,
        &partition,
        &entry.extents,
        Relevance::Constraints,
        call.now,
    );
    reply(
        200,
        &ChangeConstraintReferenceResponse {
            subscribers,
            constraint_reference: entry.cr,
        },
    )
}

fn query_crs(state: &mut State, call: &Call) -> Reply {
    let params: QueryParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);
    let mut found: Vec<ConstraintReference> = state
        .crs
        .values()
        .filter(|r| r.visible(&partition, call.participant))
        .map(|r| &r.value)
        .filter(|e| e.cr.time_end.value >= call.now)
        .filter(|e| overlaps(&e.extents, &params.area_of_interest))
        .map(|e| redact_cr(e.cr.clone(), call.subject))
        .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    reply(
        200,
        &QueryConstraintReferencesResponse {
            constraint_references: found,
        },
    )
}

fn put_subscription(state: &mut State, call: &Call, id: &str, version: Option<&str>) -> Reply {
    let params: PutScdSubscriptionParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    if !params.notify_for_operational_intents && !params.notify_for_constraints {
        return error(
            400,
            "A subscription must notify for operational intents or constraints",
        );
    }
    let mut extents = params.extents;
    let start = extents.start().unwrap_or(call.now);
    if extents.time_end.is_none() {
        extents.time_end = Some((start + max_subscription_duration()).into());
    }
    let (start, end) = match time_window(&extents, call.now) {
        Ok(w) => w,
        Err(reply) => return reply,
    };
    if state.subscription_too_long(start, end) {
        return error(400, "Subscription duration exceeds 24 hours");
    }
    extents.time_start = Some(start.into());
    let partition = state.partition_of(call.participant);

    let existing = state.scd_subscriptions.get(id).filter(|r| r.live(&partition));
    let carried = existing.map(|r| {
        (
            r.value.subscription.notification_index,
            r.value.subscription.implicit_subscription,
            r.value.subscription.dependent_operational_intents.clone(),
        )
    });
    let existing = existing.map(|r| {
        (
            Some(r.value.subscription.version.as_str()),
            r.value.owner.as_str(),
        )
    });
    if let Some(reply) = check_write(existing, version, call.subject, "Subscription") {
        return reply;
    }
    let (notification_index, implicit_subscription, dependent_operational_intents) =
        carried.unwrap_or((0, false, Vec::new()));

    let subscription = ScdSubscription {
        id: id.to_string(),
        version: state.next_token(),
        notification_index,
        time_start: Some(start.into()),
        time_end: Some(end.into()),
        uss_base_url: params.uss_base_url,
        notify_for_operational_intents: params.notify_for_operational_intents,
        notify_for_constraints: params.notify_for_constraints,
        implicit_subscription,
        dependent_operational_intents,
    };

    let operational_intent_references = if subscription.notify_for_operational_intents {
        state
            .oirs
            .values()
            .filter(|r| r.live(&partition))
            .map(|r| &r.value)
            .filter(|e| e.oir.time_end.value >= call.now && overlaps(&e.extents, &extents))
            .map(|e| redact_oir(e.oir.clone(), call.subject))
            .collect()
    } else {
        Vec::new()
    };
    let constraint_references = if subscription.notify_for_constraints {
        state
            .crs
            .values()
            .filter(|r| r.live(&partition))
            .map(|r| &r.value)
            .filter(|e| e.cr.time_end.value >= call.now && overlaps(&e.extents, &extents))
            .map(|e| redact_cr(e.cr.clone(), call.subject))
            .collect()
    } else {
        Vec::new()
    };

    insert_record(
        &mut state.scd_subscriptions,
        id,
        SubscriptionEntry {
            subscription: subscription.clone(),
            extents,
            owner: call.subject.to_string(),
        },
        partition,
    );
    reply(
        200,
        &PutScdSubscriptionResponse {
            subscription,
            operational_intent_references,
            constraint_references,
        },
    )
}

fn get_subscription(state: &mut State, call: &Call, id: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    match state
        .scd_subscriptions
        .get(id)
        .filter(|r| r.visible(&partition, call.participant))
    {
        Some(record) if record.value.owner != call.subject => {
            error(403, format!("Subscription {} is owned by another USS", id))
        }
        Some(record) => reply(
            200,
            &GetScdSubscriptionResponse {
                subscription: record.value.subscription.clone(),
            },
        ),
        None => error(404, format!("Subscription {} not found", id)),
    }
}

fn delete_subscription(state: &mut State, call: &Call, id: &str, version: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    let existing = state.scd_subscriptions.get(id).filter(|r| r.live(&partition));
    let has_dependents = existing
        .is_some_and(|r| !r.value.subscription.dependent_operational_intents.is_empty());
    let existing = existing.map(|r| {
        (
            Some(r.value.subscription.version.as_str()),
            r.value.owner.as_str(),
        )
    });
    if existing.is_none() {
        return error(404, format!("Subscription {} not found", id));
    }
    if let Some(reply) = check_write(existing, Some(version), call.subject, "Subscription") {
        return reply;
    }
    if has_dependents {
        return error(
            400,
            format!("Subscription {} still has dependent operational intents", id),
        );
    }

    let mode = state.delete_mode();
    match remove_record(&mut state.scd_subscriptions, id, mode, call.participant) {
        Some(entry) => reply(
            200,
            &GetScdSubscriptionResponse {
                subscription: entry.subscription,
            },
        ),
        None => error(404, format!("Subscription {} not found", id)),
    }
}

fn query_subscriptions(state: &mut State, call: &Call) -> Reply {
    let params: QueryParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);
    let mut subscriptions: Vec<ScdSubscription> = state
        .scd_subscriptions
        .values()
        .filter(|r| r.visible(&partition, call.participant))
        .map(|r| &r.value)
        .filter(|e| e.owner == call.subject)
        .filter(|e| e.extents.intersects(&params.area_of_interest))
        .map(|e| e.subscription.clone())
        .collect();
    subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
    reply(200, &serde_json::json!({ "subscriptions": subscriptions }))
}

#[cfg(test)]
mod tests {
    use super::super::{Fault, MockDeployment};
    use crate::dss::geo::volume4d;
    use crate::dss::transport::Method;
    use crate::dss::types::LatLngPoint;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    fn extents(hours: i64) -> Value {
        let now = Utc::now();
        let footprint = vec![
            LatLngPoint { lat: 46.0, lng: 7.0 },
            LatLngPoint { lat: 46.0, lng: 7.1 },
            LatLngPoint { lat: 46.1, lng: 7.1 },
        ];
        serde_json::to_value(volume4d(&footprint, 0.0, 100.0, now, now + Duration::hours(hours)))
            .unwrap()
    }

    fn call(dss: &MockDeployment, method: Method, path: &str, body: Option<Value>) -> (u16, Value) {
        dss.handle("dss1", "uss1", method, path, body.as_ref())
    }

    fn subscription_body(hours: i64) -> Value {
        json!({
            "extents": extents(hours),
            "uss_base_url": "https://uss1.example.com",
            "notify_for_operational_intents": true,
            "notify_for_constraints": true,
        })
    }

    fn oir_body(key: Vec<String>, subscription_id: &str) -> Value {
        json!({
            "extents": [extents(1)],
            "key": key,
            "state": "Accepted",
            "uss_base_url": "https://uss1.example.com",
            "subscription_id": subscription_id,
        })
    }

    #[test]
    fn test_subscription_duration_limit() {
        let dss = MockDeployment::new();
        let (code, _) = call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(25)));
        assert_eq!(code, 400);
        let (code, _) = call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(24)));
        assert_eq!(code, 200);
    }

    #[test]
    fn test_oir_lifecycle_bumps_notification_index() {
        let dss = MockDeployment::new();
        call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(2)));

        let (code, created) = call(
            &dss,
            Method::Put,
            "/dss/v1/operational_intent_references/o1",
            Some(oir_body(vec![], "s1")),
        );
        assert_eq!(code, 201);
        assert_eq!(created["subscribers"][0]["subscriptions"][0]["notification_index"], 1);
        let ovn = created["operational_intent_reference"]["ovn"].as_str().unwrap().to_string();

        let (code, mutated) = call(
            &dss,
            Method::Put,
            &format!("/dss/v1/operational_intent_references/o1/{}", ovn),
            Some(oir_body(vec![], "s1")),
        );
        assert_eq!(code, 201);
        assert_eq!(mutated["operational_intent_reference"]["version"], 2);
        let ovn2 = mutated["operational_intent_reference"]["ovn"].as_str().unwrap().to_string();
        assert!(ovn2 > ovn);

        // Subscription with a dependent cannot be deleted
        let (_, sub) = call(&dss, Method::Get, "/dss/v1/subscriptions/s1", None);
        let version = sub["subscription"]["version"].as_str().unwrap().to_string();
        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/dss/v1/subscriptions/s1/{}", version),
            None,
        );
        assert_eq!(code, 400);

        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/dss/v1/operational_intent_references/o1/{}", ovn2),
            None,
        );
        assert_eq!(code, 200);
        let (code, _) = call(&dss, Method::Get, "/dss/v1/operational_intent_references/o1", None);
        assert_eq!(code, 404);

        let (_, sub) = call(&dss, Method::Get, "/dss/v1/subscriptions/s1", None);
        assert_eq!(sub["subscription"]["notification_index"], 3);
    }

    #[test]
    fn test_key_must_contain_overlapping_ovns() {
        let dss = MockDeployment::new();
        call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(2)));
        let (_, first) = call(
            &dss,
            Method::Put,
            "/dss/v1/operational_intent_references/o1",
            Some(oir_body(vec![], "s1")),
        );
        let (code, conflict) = call(
            &dss,
            Method::Put,
            "/dss/v1/operational_intent_references/o2",
            Some(oir_body(vec![], "s1")),
        );
        assert_eq!(code, 409);
        assert_eq!(conflict["missing_operational_intents"][0]["id"], "o1");

        let ovn = first["operational_intent_reference"]["ovn"].as_str().unwrap().to_string();
        let (code, _) = call(
            &dss,
            Method::Put,
            "/dss/v1/operational_intent_references/o2",
            Some(oir_body(vec![ovn], "s1")),
        );
        assert_eq!(code, 201);
    }

    #[test]
    fn test_ovn_hidden_from_other_managers() {
        let dss = MockDeployment::new();
        let body = json!({"extents": [extents(1)], "uss_base_url": "https://uss1.example.com"});
        let (code, _) = call(&dss, Method::Put, "/dss/v1/constraint_references/c1", Some(body));
        assert_eq!(code, 201);
        let (_, own) = call(&dss, Method::Get, "/dss/v1/constraint_references/c1", None);
        assert!(own["constraint_reference"]["ovn"].is_string());
        let (_, other) = dss.handle("dss1", "uss2", Method::Get, "/dss/v1/constraint_references/c1", None);
        assert!(other["constraint_reference"].get("ovn").is_none());
    }

    #[test]
    fn test_frozen_notification_index() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::FrozenNotificationIndex);
        call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(2)));
        let body = json!({"extents": [extents(1)], "uss_base_url": "https://uss1.example.com"});
        let (_, created) = call(&dss, Method::Put, "/dss/v1/constraint_references/c1", Some(body));
        assert_eq!(created["subscribers"][0]["subscriptions"][0]["notification_index"], 0);
    }

    #[test]
    fn test_moving_oir_releases_previous_subscription() {
        let dss = MockDeployment::new();
        call(&dss, Method::Put, "/dss/v1/subscriptions/s1", Some(subscription_body(2)));
        call(&dss, Method::Put, "/dss/v1/subscriptions/s2", Some(subscription_body(2)));
        let (_, created) = call(
            &dss,
            Method::Put,
            "/dss/v1/operational_intent_references/o1",
            Some(oir_body(vec![], "s1")),
        );
        let ovn = created["operational_intent_reference"]["ovn"].as_str().unwrap().to_string();
        let (code, moved) = call(
            &dss,
            Method::Put,
            &format!("/dss/v1/operational_intent_references/o1/{}", ovn),
            Some(oir_body(vec![], "s2")),
        );
        assert_eq!(code, 201);
        assert_eq!(moved["operational_intent_reference"]["subscription_id"], "s2");

        let (_, s1) = call(&dss, Method::Get, "/dss/v1/subscriptions/s1", None);
        assert!(s1["subscription"]["dependent_operational_intents"]
            .as_array()
            .unwrap()
            .is_empty());
        let version = s1["subscription"]["version"].as_str().unwrap().to_string();
        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/dss/v1/subscriptions/s1/{}", version),
            None,
        );
        assert_eq!(code, 200);

        let (_, s2) = call(&dss, Method::Get, "/dss/v1/subscriptions/s2", None);
        assert_eq!(s2["subscription"]["dependent_operational_intents"][0], "o1");
    }

    #[test]
    fn test_implicit_subscription_removed_with_oir() {
        let dss = MockDeployment::new();
        let body = json!({
            "extents": [extents(1)],
            "key": [],
            "state": "Accepted",
            "uss_base_url": "https://uss1.example.com",
            "new_subscription": {"uss_base_url": "https://uss1.example.com"},
        });
        let (code, created) = call(&dss, Method::Put, "/dss/v1/operational_intent_references/o1", Some(body));
        assert_eq!(code, 201);
        let oir = &created["operational_intent_reference"];
        let sub_id = oir["subscription_id"].as_str().unwrap().to_string();
        let (_, sub) = call(&dss, Method::Get, &format!("/dss/v1/subscriptions/{}", sub_id), None);
        assert_eq!(sub["subscription"]["implicit_subscription"], true);

        let ovn = oir["ovn"].as_str().unwrap();
        call(
            &dss,
            Method::Delete,
            &format!("/dss/v1/operational_intent_references/o1/{}", ovn),
            None,
        );
        let (code, _) = call(&dss, Method::Get, &format!("/dss/v1/subscriptions/{}", sub_id), None);
        assert_eq!(code, 404);
    }
}
