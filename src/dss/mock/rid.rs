//! F3411-22a NetRID endpoints of the in-memory DSS

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{
    error, insert_record, remove_record, reply, time_window, Call,
    Reply, State,
};
use crate::dss::geo::BoundingBox;
use crate::dss::transport::Method;
use crate::dss::types::*;

/// Subscriptions one owner may hold over any given area
const MAX_SUBSCRIPTIONS_PER_AREA: usize = 10;

#[derive(Debug, Clone)]
pub(super) struct IsaEntry {
    pub isa: IdentificationServiceArea,
    pub extents: Volume4D,
}

#[derive(Debug, Clone)]
pub(super) struct SubscriptionEntry {
    pub subscription: RidSubscription,
    pub extents: Volume4D,
}

pub(super) fn route(state: &mut State, call: &Call) -> Reply {
    let rest = call.segments.get(3..).unwrap_or(&[]);
    match (call.method, rest) {
        (Method::Get, ["identification_service_areas"]) => search_isas(state, call),
        (Method::Put, ["identification_service_areas", id]) => put_isa(state, call, id, None),
        (Method::Put, ["identification_service_areas", id, version]) => {
            put_isa(state, call, id, Some(*version))
        }
        (Method::Get, ["identification_service_areas", id]) => get_isa(state, call, id),
        (Method::Delete, ["identification_service_areas", id, version]) => {
            delete_isa(state, call, id, version)
        }
        (Method::Get, ["subscriptions"]) => search_subscriptions(state, call),
        (Method::Put, ["subscriptions", id]) => put_subscription(state, call, id, None),
        (Method::Put, ["subscriptions", id, version]) => {
            put_subscription(state, call, id, Some(*version))
        }
        (Method::Get, ["subscriptions", id]) => get_subscription(state, call, id),
        (Method::Delete, ["subscriptions", id, version]) => {
            delete_subscription(state, call, id, version)
        }
        _ => error(404, "No such NetRID endpoint"),
    }
}

/// Parse the `area` query parameter (`lat,lng,lat,lng,...`)
fn parse_area(call: &Call) -> Result<BoundingBox, Reply> {
    let raw = call
        .params
        .get("area")
        .ok_or_else(|| error(400, "Missing required area parameter"))?;
    let numbers: Vec<f64> = raw
        .split(',')
        .map(|n| n.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| error(400, format!("Invalid area '{}'", raw)))?;
    if numbers.len() < 6 || numbers.len() % 2 != 0 {
        return Err(error(400, "Area must contain at least 3 lat,lng pairs"));
    }
    let points: Vec<LatLngPoint> = numbers
        .chunks(2)
        .map(|c| LatLngPoint {
            lat: c[0],
            lng: c[1],
        })
        .collect();
    BoundingBox::of(&points).ok_or_else(|| error(400, "Empty area"))
}

fn parse_time_param(call: &Call, name: &str) -> Result<Option<DateTime<Utc>>, Reply> {
    match call.params.get(name) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| error(400, format!("Invalid {} '{}'", name, raw))),
    }
}

/// Increment the subscriptions overlapping `extents`, grouped by USS
fn notify_subscribers(
    state: &mut State,
    partition: &Option<String>,
    extents: &Volume4D,
    now: DateTime<Utc>,
) -> Vec<SubscriberToNotify> {
    let frozen = state.notifications_frozen();
    let mut by_url: BTreeMap<String, Vec<SubscriptionState>> = BTreeMap::new();
    for record in state.rid_subscriptions.values_mut() {
        if !record.live(partition) {
            continue;
        }
        let entry = &mut record.value;
        if entry.subscription.time_end.value < now || !entry.extents.intersects(extents) {
            continue;
        }
        if !frozen {
            entry.subscription.notification_index += 1;
        }
        by_url
            .entry(entry.subscription.uss_base_url.clone())
            .or_default()
            .push(SubscriptionState {
                subscription_id: entry.subscription.id.clone(),
                notification_index: entry.subscription.notification_index,
            });
    }
    by_url
        .into_iter()
        .map(|(url, subscriptions)| SubscriberToNotify { url, subscriptions })
        .collect()
}

/// Status to return when a versioned write targets `existing`
fn check_write(
    existing: Option<(&str, &str)>,
    requested_version: Option<&str>,
    subject: &str,
    kind: &str,
) -> Option<Reply> {
    match (existing, requested_version) {
        (Some(_), None) => Some(error(409, format!("{} already exists", kind))),
        (None, Some(_)) => Some(error(404, format!("{} not found", kind))),
        (Some((version, _)), Some(requested)) if version != requested => Some(error(
            409,
            format!("{} version {} does not match {}", kind, version, requested),
        )),
        (Some((_, owner)), Some(_)) if owner != subject => {
            Some(error(403, format!("{} is owned by {}", kind, owner)))
        }
        _ => None,
    }
}

fn put_isa(state: &mut State, call: &Call, id: &str, version: Option<&str>) -> Reply {
    let params: PutIsaParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (start, end) = match time_window(&params.extents, call.now) {
        Ok(w) => w,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);

    let existing = state
        .isas
        .get(id)
        .filter(|r| r.live(&partition))
        .map(|r| (r.value.isa.version.as_str(), r.value.isa.owner.as_str()));
    if let Some(reply) = check_write(existing, version, call.subject, "ISA") {
        return reply;
    }

    let mut extents = params.extents;
    extents.time_start = Some(start.into());
    let isa = IdentificationServiceArea {
        id: id.to_string(),
        owner: call.subject.to_string(),
        time_start: start.into(),
        time_end: end.into(),
        uss_base_url: params.uss_base_url,
        version: state.next_token(),
    };
    let subscribers = notify_subscribers(state, &partition, &extents, call.now);
    insert_record(
        &mut state.isas,
        id,
        IsaEntry {
            isa: isa.clone(),
            extents,
        },
        partition,
    );
    reply(
        200,
        &PutIsaResponse {
            service_area: isa,
            subscribers,
        },
    )
}

fn get_isa(state: &mut State, call: &Call, id: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    match state
        .isas
        .get(id)
        .filter(|r| r.visible(&partition, call.participant))
    {
        Some(record) => reply(
            200,
            &GetIsaResponse {
                service_area: record.value.isa.clone(),
                subscribers: Vec::new(),
            },
        ),
        None => error(404, format!("ISA {} not found", id)),
    }
}

fn delete_isa(state: &mut State, call: &Call, id: &str, version: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    let existing = state
        .isas
        .get(id)
        .filter(|r| r.live(&partition))
        .map(|r| (r.value.isa.version.as_str(), r.value.isa.owner.as_str()));
    if existing.is_none() {
        return error(404, format!("ISA {} not found", id));
    }
    if let Some(reply) = check_write(existing, Some(version), call.subject, "ISA") {
        return reply;
    }

    let mode = state.delete_mode();
    let Some(entry) = remove_record(&mut state.isas, id, mode, call.participant) else {
        return error(404, format!("ISA {} not found", id));
    };
    let subscribers = notify_subscribers(state, &partition, &entry.extents, call.now);
    reply(
        200,
        &GetIsaResponse {
            service_area: entry.isa,
            subscribers,
        },
    )
}

fn search_isas(state: &mut State, call: &Call) -> Reply {
    let area = match parse_area(call) {
        Ok(a) => a,
        Err(reply) => return reply,
    };
    let (earliest, latest) = match (
        parse_time_param(call, "earliest_time"),
        parse_time_param(call, "latest_time"),
    ) {
        (Ok(e), Ok(l)) => (e, l),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let earliest = earliest.unwrap_or(call.now).max(call.now);
    let partition = state.partition_of(call.participant);

    let mut service_areas: Vec<IdentificationServiceArea> = state
        .isas
        .values()
        .filter(|r| r.visible(&partition, call.participant))
        .map(|r| &r.value)
        .filter(|e| e.isa.time_end.value >= earliest)
        .filter(|e| latest.map_or(true, |l| e.isa.time_start.value <= l))
        .filter(|e| e.extents.bounding_box().is_some_and(|b| b.intersects(&area)))
        .map(|e| e.isa.clone())
        .collect();
    service_areas.sort_by(|a, b| a.id.cmp(&b.id));
    reply(200, &SearchIsasResponse { service_areas })
}

fn put_subscription(state: &mut State, call: &Call, id: &str, version: Option<&str>) -> Reply {
    let params: PutRidSubscriptionParameters = match call.parse_body() {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (start, end) = match time_window(&params.extents, call.now) {
        Ok(w) => w,
        Err(reply) => return reply,
    };
    if state.subscription_too_long(start, end) {
        return error(400, "Subscription duration exceeds 24 hours");
    }
    let partition = state.partition_of(call.participant);

    let existing = state.rid_subscriptions.get(id).filter(|r| r.live(&partition));
    let notification_index = existing
        .map(|r| r.value.subscription.notification_index)
        .unwrap_or(0);
    let existing = existing.map(|r| {
        (
            r.value.subscription.version.as_str(),
            r.value.subscription.owner.as_str(),
        )
    });
    if let Some(reply) = check_write(existing, version, call.subject, "Subscription") {
        return reply;
    }

    let mut extents = params.extents;
    extents.time_start = Some(start.into());

    if version.is_none() {
        let owned_in_area = state
            .rid_subscriptions
            .values()
            .filter(|r| r.live(&partition))
            .filter(|r| r.value.subscription.owner == call.subject)
            .filter(|r| r.value.subscription.time_end.value >= call.now)
            .filter(|r| r.value.extents.intersects(&extents))
            .count();
        if owned_in_area >= MAX_SUBSCRIPTIONS_PER_AREA {
            return error(
                429,
                format!(
                    "Too many existing subscriptions in this area ({})",
                    owned_in_area
                ),
            );
        }
    }

    let subscription = RidSubscription {
        id: id.to_string(),
        uss_base_url: params.uss_base_url,
        owner: call.subject.to_string(),
        notification_index,
        time_start: start.into(),
        time_end: end.into(),
        version: state.next_token(),
    };
    let mut service_areas: Vec<IdentificationServiceArea> = state
        .isas
        .values()
        .filter(|r| r.live(&partition))
        .map(|r| &r.value)
        .filter(|e| e.isa.time_end.value >= call.now && e.extents.intersects(&extents))
        .map(|e| e.isa.clone())
        .collect();
    service_areas.sort_by(|a, b| a.id.cmp(&b.id));

    insert_record(
        &mut state.rid_subscriptions,
        id,
        SubscriptionEntry {
            subscription: subscription.clone(),
            extents,
        },
        partition,
    );
    reply(
        200,
        &PutRidSubscriptionResponse {
            subscription,
            service_areas,
        },
    )
}

fn get_subscription(state: &mut State, call: &Call, id: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    match state
        .rid_subscriptions
        .get(id)
        .filter(|r| r.visible(&partition, call.participant))
    {
        Some(record) => reply(
            200,
            &GetRidSubscriptionResponse {
                subscription: record.value.subscription.clone(),
            },
        ),
        None => error(404, format!("Subscription {} not found", id)),
    }
}

fn delete_subscription(state: &mut State, call: &Call, id: &str, version: &str) -> Reply {
    let partition = state.partition_of(call.participant);
    let existing = state
        .rid_subscriptions
        .get(id)
        .filter(|r| r.live(&partition))
        .map(|r| {
            (
                r.value.subscription.version.as_str(),
                r.value.subscription.owner.as_str(),
            )
        });
    if existing.is_none() {
        return error(404, format!("Subscription {} not found", id));
    }
    if let Some(reply) = check_write(existing, Some(version), call.subject, "Subscription") {
        return reply;
    }

    let mode = state.delete_mode();
    match remove_record(&mut state.rid_subscriptions, id, mode, call.participant) {
        Some(entry) => reply(
            200,
            &GetRidSubscriptionResponse {
                subscription: entry.subscription,
            },
        ),
        None => error(404, format!("Subscription {} not found", id)),
    }
}

fn search_subscriptions(state: &mut State, call: &Call) -> Reply {
    let area = match parse_area(call) {
        Ok(a) => a,
        Err(reply) => return reply,
    };
    let partition = state.partition_of(call.participant);
    let mut subscriptions: Vec<RidSubscription> = state
        .rid_subscriptions
        .values()
        .filter(|r| r.visible(&partition, call.participant))
        .map(|r| &r.value)
        .filter(|e| e.subscription.owner == call.subject)
        .filter(|e| e.subscription.time_end.value >= call.now)
        .filter(|e| e.extents.bounding_box().is_some_and(|b| b.intersects(&area)))
        .map(|e| e.subscription.clone())
        .collect();
    subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
    reply(200, &SearchRidSubscriptionsResponse { subscriptions })
}

#[cfg(test)]
mod tests {
    use super::super::{Fault, MockDeployment};
    use crate::dss::geo::volume4d;
    use crate::dss::transport::Method;
    use crate::dss::types::LatLngPoint;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    fn extents(minutes: i64) -> Value {
        let now = Utc::now();
        let footprint = vec![
            LatLngPoint { lat: 46.0, lng: 7.0 },
            LatLngPoint { lat: 46.0, lng: 7.1 },
            LatLngPoint { lat: 46.1, lng: 7.1 },
        ];
        serde_json::to_value(volume4d(
            &footprint,
            0.0,
            100.0,
            now,
            now + Duration::minutes(minutes),
        ))
        .unwrap()
    }

    fn call(dss: &MockDeployment, method: Method, path: &str, body: Option<Value>) -> (u16, Value) {
        dss.handle("dss1", "uss1", method, path, body.as_ref())
    }

    const AREA: &str = "area=46.0,7.0,46.0,7.1,46.1,7.1";

    #[test]
    fn test_isa_change_notifies_overlapping_subscription() {
        let dss = MockDeployment::new();
        let body = json!({"extents": extents(30), "uss_base_url": "https://uss1.example.com/rid"});
        let (code, sub) = call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s1", Some(body.clone()));
        assert_eq!(code, 200);
        assert_eq!(sub["subscription"]["notification_index"], 0);

        let (code, isa) = call(
            &dss,
            Method::Put,
            "/rid/v2/dss/identification_service_areas/i1",
            Some(body),
        );
        assert_eq!(code, 200);
        let subscribers = isa["subscribers"].as_array().unwrap();
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0]["subscriptions"][0]["subscription_id"], "s1");
        assert_eq!(subscribers[0]["subscriptions"][0]["notification_index"], 1);

        let version = isa["service_area"]["version"].as_str().unwrap();
        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/rid/v2/dss/identification_service_areas/i1/{}", version),
            None,
        );
        assert_eq!(code, 200);
        let (code, _) = call(&dss, Method::Get, "/rid/v2/dss/identification_service_areas/i1", None);
        assert_eq!(code, 404);

        let (_, sub) = call(&dss, Method::Get, "/rid/v2/dss/subscriptions/s1", None);
        assert_eq!(sub["subscription"]["notification_index"], 2);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let dss = MockDeployment::new();
        let body = json!({"extents": extents(30), "uss_base_url": "https://uss1.example.com/rid"});
        call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s1", Some(body.clone()));
        let (code, _) = call(
            &dss,
            Method::Put,
            "/rid/v2/dss/subscriptions/s1/v_stale",
            Some(body.clone()),
        );
        assert_eq!(code, 409);
        let (code, _) = call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s1", Some(body));
        assert_eq!(code, 409);
    }

    #[test]
    fn test_subscription_limit_per_area() {
        let dss = MockDeployment::new();
        let body = json!({"extents": extents(30), "uss_base_url": "https://uss1.example.com/rid"});
        for i in 0..10 {
            let (code, _) = call(
                &dss,
                Method::Put,
                &format!("/rid/v2/dss/subscriptions/s{}", i),
                Some(body.clone()),
            );
            assert_eq!(code, 200);
        }
        let (code, _) = call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s10", Some(body));
        assert_eq!(code, 429);
    }

    #[test]
    fn test_overlong_subscription_rejected() {
        let dss = MockDeployment::new();
        let body = json!({"extents": extents(25 * 60), "uss_base_url": "https://uss1.example.com/rid"});
        let (code, _) = call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s1", Some(body));
        assert_eq!(code, 400);
    }

    #[test]
    fn test_search_requires_area() {
        let dss = MockDeployment::new();
        let (code, _) = call(&dss, Method::Get, "/rid/v2/dss/subscriptions", None);
        assert_eq!(code, 400);
        let (code, body) = call(
            &dss,
            Method::Get,
            &format!("/rid/v2/dss/identification_service_areas?{}", AREA),
            None,
        );
        assert_eq!(code, 200);
        assert!(body["service_areas"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_lingering_delete_visible_elsewhere() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::LingeringDeletes);
        let body = json!({"extents": extents(30), "uss_base_url": "https://uss1.example.com/rid"});
        let (_, sub) = call(&dss, Method::Put, "/rid/v2/dss/subscriptions/s1", Some(body));
        let version = sub["subscription"]["version"].as_str().unwrap();
        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/rid/v2/dss/subscriptions/s1/{}", version),
            None,
        );
        assert_eq!(code, 200);
        assert_eq!(call(&dss, Method::Get, "/rid/v2/dss/subscriptions/s1", None).0, 404);
        let (code, _) = dss.handle("dss2", "uss1", Method::Get, "/rid/v2/dss/subscriptions/s1", None);
        assert_eq!(code, 200);
    }

    #[test]
    fn test_ignored_delete_keeps_isa_searchable() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::IgnoredDeletes);
        let body = json!({"extents": extents(30), "uss_base_url": "https://uss1.example.com/rid"});
        let (_, isa) = call(
            &dss,
            Method::Put,
            "/rid/v2/dss/identification_service_areas/i1",
            Some(body),
        );
        let version = isa["service_area"]["version"].as_str().unwrap();
        let (code, _) = call(
            &dss,
            Method::Delete,
            &format!("/rid/v2/dss/identification_service_areas/i1/{}", version),
            None,
        );
        assert_eq!(code, 200);
        let (code, _) = call(&dss, Method::Get, "/rid/v2/dss/identification_service_areas/i1", None);
        assert_eq!(code, 200);
        let (_, found) = call(
            &dss,
            Method::Get,
            "/rid/v2/dss/identification_service_areas?area=46.0%2C7.0%2C46.0%2C7.1%2C46.1%2C7.1",
            None,
        );
        assert_eq!(found["service_areas"][0]["id"], "i1");
        assert_eq!(dss.entity_count(), 1);
    }
}
