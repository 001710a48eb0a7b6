//! In-memory DSS deployment
//!
//! Serves the F3411-22a and F3548-21 DSS endpoints from shared in-process
//! state. Every instance handed out by one [`MockDeployment`] sees the same
//! data, the way the DSS instances of a real pool share a database. Faults
//! can be injected to make a deployment misbehave in specific ways.

mod rid;
mod scd;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::auth::Scope;
use super::query::{Query, RequestDescription, ResponseDescription};
use super::transport::{Method, Transport};
use super::types::{ErrorReport, UssAvailabilityState, Volume4D};

/// Deliberate misbehavior of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The instance neither sees writes made elsewhere nor shares its own
    Unsynchronized { participant_id: String },
    /// Notification indices never increase
    FrozenNotificationIndex,
    /// Deleted entities stay readable on the other instances
    LingeringDeletes,
    /// Deletions are acknowledged but nothing is removed
    IgnoredDeletes,
    /// Subscriptions of any duration are accepted as requested
    UnlimitedSubscriptionDuration,
    /// Writes made elsewhere reach the instance only after it has served
    /// `reads` more reads from its stale copy
    Lagging { participant_id: String, reads: usize },
    /// Every request to the instance fails with `code`
    Unavailable { participant_id: String, code: u16 },
}

/// Stored entity plus replication bookkeeping
#[derive(Clone)]
struct Record<T> {
    pub value: T,
    /// Set when the entity was written through an unsynchronized instance
    pub partition: Option<String>,
    /// Participant through which a lingering entity was deleted
    pub deleted_via: Option<String>,
}

impl<T> Record<T> {
    fn new(value: T, partition: Option<String>) -> Self {
        Self {
            value,
            partition,
            deleted_via: None,
        }
    }

    /// Readable by `caller`
    pub fn visible(&self, partition: &Option<String>, caller: &str) -> bool {
        self.partition == *partition && self.deleted_via.as_deref() != Some(caller)
    }

    /// Can be mutated or deleted
    pub fn live(&self, partition: &Option<String>) -> bool {
        self.partition == *partition && self.deleted_via.is_none()
    }
}

/// What a successful delete does to the stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    Remove,
    Linger,
    Ignore,
}

/// Stale copy served to a lagging instance
#[derive(Clone)]
struct Lag {
    view: Box<State>,
    remaining: usize,
}

#[derive(Clone, Default)]
struct State {
    counter: u64,
    pub isas: HashMap<String, Record<rid::IsaEntry>>,
    pub rid_subscriptions: HashMap<String, Record<rid::SubscriptionEntry>>,
    pub oirs: HashMap<String, Record<scd::OirEntry>>,
    pub crs: HashMap<String, Record<scd::CrEntry>>,
    pub scd_subscriptions: HashMap<String, Record<scd::SubscriptionEntry>>,
    pub availability: HashMap<(Option<String>, String), (UssAvailabilityState, String)>,
    pub reports: Vec<ErrorReport>,
    faults: Vec<Fault>,
    lag: Option<Lag>,
}

impl State {
    /// Fresh URL-safe token, strictly greater than every earlier one
    pub fn next_token(&mut self) -> String {
        self.counter += 1;
        format!("v{:016x}", self.counter)
    }

    pub fn partition_of(&self, participant: &str) -> Option<String> {
        self.faults.iter().find_map(|f| match f {
            Fault::Unsynchronized { participant_id } if participant_id == participant => {
                Some(participant_id.clone())
            }
            _ => None,
        })
    }

    pub fn notifications_frozen(&self) -> bool {
        self.faults.contains(&Fault::FrozenNotificationIndex)
    }

    /// Whether a subscription window exceeds what the deployment accepts
    pub fn subscription_too_long(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        end - start > max_subscription_duration()
            && !self.faults.contains(&Fault::UnlimitedSubscriptionDuration)
    }

    pub fn delete_mode(&self) -> DeleteMode {
        if self.faults.contains(&Fault::IgnoredDeletes) {
            DeleteMode::Ignore
        } else if self.faults.contains(&Fault::LingeringDeletes) {
            DeleteMode::Linger
        } else {
            DeleteMode::Remove
        }
    }

    /// Lagging instance and the number of stale reads it serves per write
    fn lagging(&self) -> Option<(&str, usize)> {
        self.faults.iter().find_map(|f| match f {
            Fault::Lagging {
                participant_id,
                reads,
            } => Some((participant_id.as_str(), *reads)),
            _ => None,
        })
    }

    /// Freeze the current state for the lagging instance ahead of a write
    ///
    /// A lag that is still being served keeps its older copy.
    fn hold_back(&mut self, reads: usize) {
        if let Some(lag) = self.lag.as_mut().filter(|l| l.remaining > 0) {
            lag.remaining = reads;
            return;
        }
        let mut view = self.clone();
        view.lag = None;
        self.lag = Some(Lag {
            view: Box::new(view),
            remaining: reads,
        });
    }

    fn unavailable(&self, participant: &str) -> Option<u16> {
        self.faults.iter().find_map(|f| match f {
            Fault::Unavailable {
                participant_id,
                code,
            } if participant_id == participant => Some(*code),
            _ => None,
        })
    }
}

/// Delete `id` from `map` the way `mode` says
fn remove_record<T>(
    map: &mut HashMap<String, Record<T>>,
    id: &str,
    mode: DeleteMode,
    caller: &str,
) -> Option<T>
where
    T: Clone,
{
    match mode {
        DeleteMode::Remove => map.remove(id).map(|r| r.value),
        DeleteMode::Linger => {
            let record = map.get_mut(id)?;
            record.deleted_via = Some(caller.to_string());
            Some(record.value.clone())
        }
        DeleteMode::Ignore => map.get(id).map(|r| r.value.clone()),
    }
}

fn insert_record<T>(
    map: &mut HashMap<String, Record<T>>,
    id: &str,
    value: T,
    partition: Option<String>,
) {
    map.insert(id.to_string(), Record::new(value, partition));
}

/// Status code and JSON body of a handled request
pub type Reply = (u16, Value);

fn reply<T: Serialize>(code: u16, body: &T) -> Reply {
    (code, serde_json::to_value(body).unwrap_or(Value::Null))
}

fn error(code: u16, message: impl Into<String>) -> Reply {
    (code, json!({ "message": message.into() }))
}

/// Longest time window a subscription may cover
fn max_subscription_duration() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Validate the outline and time window of a volume
///
/// A missing start defaults to `now`. The window must end after it starts
/// and must not lie entirely in the past.
fn time_window(
    extents: &Volume4D,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Reply> {
    let vertices = extents
        .volume
        .outline_polygon
        .as_ref()
        .map(|p| p.vertices.len())
        .unwrap_or(0);
    if vertices < 3 {
        return Err(error(400, "Extents must have an outline polygon of at least 3 vertices"));
    }
    let start = extents.start().unwrap_or(now);
    let end = extents
        .end()
        .ok_or_else(|| error(400, "Extents must specify time_end"))?;
    if end <= start {
        return Err(error(400, "time_end must be after time_start"));
    }
    if end < now {
        return Err(error(400, "time_end is in the past"));
    }
    Ok((start, end))
}

/// A request as seen by the handlers
struct Call<'a> {
    pub method: Method,
    pub segments: Vec<&'a str>,
    pub params: HashMap<String, String>,
    pub body: Option<&'a Value>,
    pub participant: &'a str,
    pub subject: &'a str,
    pub now: DateTime<Utc>,
}

impl Call<'_> {
    /// Deserialize the request body or produce a 400 reply
    pub fn parse_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, Reply> {
        let body = self
            .body
            .ok_or_else(|| error(400, "Missing request body"))?;
        serde_json::from_value(body.clone())
            .map_err(|e| error(400, format!("Invalid request body: {}", e)))
    }

    /// Whether the call leaves the state untouched
    pub fn is_read(&self) -> bool {
        match self.method {
            Method::Get => true,
            Method::Post => self.segments.last() == Some(&"query"),
            _ => false,
        }
    }
}

fn split_path(path: &str) -> (&str, HashMap<String, String>) {
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let params = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    (path, params)
}

fn route(state: &mut State, call: &Call) -> Reply {
    match call.segments.as_slice() {
        ["rid", "v2", "dss", ..] => rid::route(state, call),
        ["dss", "v1", "uss_availability", ..] => availability(state, call),
        ["dss", "v1", "reports"] => report(state, call),
        ["dss", "v1", ..] => scd::route(state, call),
        _ => error(404, format!("No such endpoint: /{}", call.segments.join("/"))),
    }
}

/// Shared in-memory DSS state
#[derive(Clone, Default)]
pub struct MockDeployment {
    state: Arc<Mutex<State>>,
}

impl MockDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking handler leaves the maps consistent enough for tests
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inject_fault(&self, fault: Fault) {
        tracing::debug!(?fault, "Injecting DSS fault");
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Reports received through `POST /dss/v1/reports`
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.lock().reports.clone()
    }

    /// Number of live entities of every kind
    pub fn entity_count(&self) -> usize {
        let state = self.lock();
        let live = |deleted: Option<&String>| deleted.is_none();
        state
            .isas
            .values()
            .filter(|r| live(r.deleted_via.as_ref()))
            .count()
            + state
                .rid_subscriptions
                .values()
                .filter(|r| live(r.deleted_via.as_ref()))
                .count()
            + state.oirs.values().filter(|r| live(r.deleted_via.as_ref())).count()
            + state.crs.values().filter(|r| live(r.deleted_via.as_ref())).count()
            + state
                .scd_subscriptions
                .values()
                .filter(|r| live(r.deleted_via.as_ref()))
                .count()
    }

    /// Transport for one instance of this deployment
    pub fn transport(
        &self,
        participant_id: &str,
        base_url: &str,
        subject: &str,
    ) -> Arc<dyn Transport> {
        Arc::new(MockTransport {
            deployment: self.clone(),
            participant_id: participant_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            subject: subject.to_string(),
        })
    }

    /// Handle one request; the lock is held only for the duration of the call
    pub fn handle(
        &self,
        participant: &str,
        subject: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Reply {
        let mut state = self.lock();
        if let Some(code) = state.unavailable(participant) {
            return error(code, "DSS instance unavailable");
        }

        let (path, params) = split_path(path);
        let call = Call {
            method,
            segments: path.split('/').filter(|s| !s.is_empty()).collect(),
            params,
            body,
            participant,
            subject,
            now: Utc::now(),
        };

        let Some((lagging, reads)) = state.lagging().map(|(p, r)| (p.to_string(), r)) else {
            return route(&mut state, &call);
        };
        if participant != lagging {
            if !call.is_read() {
                state.hold_back(reads);
            }
            return route(&mut state, &call);
        }
        if !call.is_read() {
            // The lagging instance sees its own writes
            state.lag = None;
            return route(&mut state, &call);
        }
        match state.lag.as_mut().filter(|l| l.remaining > 0) {
            Some(lag) => {
                lag.remaining -= 1;
                route(&mut lag.view, &call)
            }
            None => route(&mut state, &call),
        }
    }
}

fn availability(state: &mut State, call: &Call) -> Reply {
    let uss = match call.segments.as_slice() {
        [_, _, _, uss] => uss.to_string(),
        _ => return error(404, "No such endpoint"),
    };
    let key = (state.partition_of(call.participant), uss.clone());

    match call.method {
        Method::Get => {
            let (availability, version) = state
                .availability
                .get(&key)
                .cloned()
                .unwrap_or((UssAvailabilityState::Unknown, String::new()));
            (
                200,
                json!({
                    "status": { "uss": uss, "availability": availability },
                    "version": version,
                }),
            )
        }
        Method::Put => {
            let params: super::types::SetUssAvailabilityStatusParameters =
                match call.parse_body() {
                    Ok(p) => p,
                    Err(reply) => return reply,
                };
            let current = state
                .availability
                .get(&key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            if current != params.old_version {
                return error(
                    409,
                    format!(
                        "Current version is '{}' but '{}' was provided",
                        current, params.old_version
                    ),
                );
            }
            let version = state.next_token();
            state
                .availability
                .insert(key, (params.availability, version.clone()));
            (
                200,
                json!({
                    "status": { "uss": uss, "availability": params.availability },
                    "version": version,
                }),
            )
        }
        _ => error(405, "Method not allowed"),
    }
}

fn report(state: &mut State, call: &Call) -> Reply {
    if call.method != Method::Post {
        return error(405, "Method not allowed");
    }
    let mut report: ErrorReport = match call.parse_body() {
        Ok(r) => r,
        Err(reply) => return reply,
    };
    report.report_id = Some(uuid::Uuid::new_v4().to_string());
    state.reports.push(report.clone());
    reply(201, &report)
}

struct MockTransport {
    deployment: MockDeployment,
    participant_id: String,
    base_url: String,
    subject: String,
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        _scope: Scope,
    ) -> Query {
        let timestamp = Utc::now();
        let (code, response) = self.deployment.handle(
            &self.participant_id,
            &self.subject,
            method,
            path,
            body.as_ref(),
        );
        // Let concurrent bursts interleave like they would over the network
        tokio::task::yield_now().await;
        Query {
            request: RequestDescription {
                method: method.to_string(),
                url: format!("{}{}", self.base_url, path),
                timestamp,
                body,
            },
            response: ResponseDescription {
                code,
                elapsed_s: (Utc::now() - timestamp)
                    .to_std()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
                body: Some(response),
                failure: None,
            },
            participant_id: None,
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(deployment: &MockDeployment, participant: &str, path: &str) -> Reply {
        deployment.handle(participant, "uss1", Method::Get, path, None)
    }

    fn put(deployment: &MockDeployment, participant: &str, path: &str, body: Value) -> Reply {
        deployment.handle(participant, "uss1", Method::Put, path, Some(&body))
    }

    #[test]
    fn test_unknown_uss_is_unknown_everywhere() {
        let dss = MockDeployment::new();
        for participant in ["dss1", "dss2"] {
            let (code, body) = get(&dss, participant, "/dss/v1/uss_availability/nobody");
            assert_eq!(code, 200);
            assert_eq!(body["status"]["availability"], "Unknown");
            assert_eq!(body["version"], "");
        }
    }

    #[test]
    fn test_availability_versioning() {
        let dss = MockDeployment::new();
        let (code, body) = put(
            &dss,
            "dss1",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": "", "availability": "Down"}),
        );
        assert_eq!(code, 200);
        let version = body["version"].as_str().unwrap().to_string();
        assert!(!version.is_empty());

        // Stale version is rejected
        let (code, _) = put(
            &dss,
            "dss2",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": "", "availability": "Normal"}),
        );
        assert_eq!(code, 409);

        let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Down");
        assert_eq!(body["version"], version.as_str());
    }

    #[test]
    fn test_unsynchronized_instance_keeps_its_own_state() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::Unsynchronized {
            participant_id: "dss2".into(),
        });
        put(
            &dss,
            "dss1",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": "", "availability": "Down"}),
        );
        let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Unknown");
    }

    #[test]
    fn test_unavailable_instance() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::Unavailable {
            participant_id: "dss1".into(),
            code: 503,
        });
        assert_eq!(get(&dss, "dss1", "/dss/v1/uss_availability/x").0, 503);
        assert_eq!(get(&dss, "dss2", "/dss/v1/uss_availability/x").0, 200);
        dss.clear_faults();
        assert_eq!(get(&dss, "dss1", "/dss/v1/uss_availability/x").0, 200);
    }

    #[test]
    fn test_tokens_are_monotonic_and_url_safe() {
        let mut state = State::default();
        let a = state.next_token();
        let b = state.next_token();
        assert!(b > a);
        assert!(crate::common::is_url_safe_token(&a));
    }

    #[test]
    fn test_query_string_decoding() {
        let (path, params) =
            split_path("/rid/v2/dss/subscriptions?area=1,2,3,4&earliest_time=2026-01-01T00%3A00%3A00%2B00:00");
        assert_eq!(path, "/rid/v2/dss/subscriptions");
        assert_eq!(params["area"], "1,2,3,4");
        assert_eq!(params["earliest_time"], "2026-01-01T00:00:00+00:00");

        let (_, params) = split_path("/x?area=46.0%2C7.0%2C46.1%2C7.1&note=a%20b+c");
        assert_eq!(params["area"], "46.0,7.0,46.1,7.1");
        assert_eq!(params["note"], "a b c");
    }

    #[test]
    fn test_lagging_instance_catches_up() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::Lagging {
            participant_id: "dss2".into(),
            reads: 2,
        });
        put(
            &dss,
            "dss1",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": "", "availability": "Down"}),
        );
        for _ in 0..2 {
            let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
            assert_eq!(body["status"]["availability"], "Unknown");
        }
        let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Down");
        let (_, body) = get(&dss, "dss1", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Down");
    }

    #[test]
    fn test_lag_keeps_oldest_copy_across_writes() {
        let dss = MockDeployment::new();
        dss.inject_fault(Fault::Lagging {
            participant_id: "dss2".into(),
            reads: 1,
        });
        let (_, body) = put(
            &dss,
            "dss1",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": "", "availability": "Down"}),
        );
        let version = body["version"].as_str().unwrap().to_string();
        put(
            &dss,
            "dss1",
            "/dss/v1/uss_availability/uss1",
            json!({"old_version": version, "availability": "Normal"}),
        );
        let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Unknown");
        let (_, body) = get(&dss, "dss2", "/dss/v1/uss_availability/uss1");
        assert_eq!(body["status"]["availability"], "Normal");
    }

    #[test]
    fn test_report_gets_an_id() {
        let dss = MockDeployment::new();
        let body = json!({
            "exchange": {
                "url": "http://dummy.interuss.org/uss/v1/operational_intents/dummy_id",
                "method": "GET",
                "recorder_role": "Client",
                "request_time": {"value": "2026-01-01T00:00:00Z", "format": "RFC3339"},
                "protocol": "HTTP",
                "problem": "dummy"
            }
        });
        let (code, response) =
            dss.handle("dss1", "uss1", Method::Post, "/dss/v1/reports", Some(&body));
        assert_eq!(code, 201);
        assert!(!response["report_id"].as_str().unwrap().is_empty());
        assert_eq!(dss.reports().len(), 1);
    }
}
