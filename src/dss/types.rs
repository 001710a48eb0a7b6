//! DSS wire types
//!
//! JSON bodies of the F3411-22a NetRID DSS API (`/rid/v2/dss`) and the
//! F3548-21 strategic coordination DSS API (`/dss/v1`). Field names follow
//! the published OpenAPI definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// === Geometry and time ===

/// Timestamp wrapper used by both APIs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Time {
    pub value: DateTime<Utc>,
    #[serde(default = "default_time_format")]
    pub format: TimeFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    RFC3339,
}

fn default_time_format() -> TimeFormat {
    TimeFormat::RFC3339
}

impl From<DateTime<Utc>> for Time {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            value,
            format: TimeFormat::RFC3339,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Altitude {
    pub value: f64,
    #[serde(default = "default_altitude_reference")]
    pub reference: String,
    #[serde(default = "default_altitude_units")]
    pub units: String,
}

fn default_altitude_reference() -> String {
    "W84".to_string()
}

fn default_altitude_units() -> String {
    "M".to_string()
}

impl Altitude {
    /// Altitude in meters above the WGS84 ellipsoid
    pub fn w84m(value: f64) -> Self {
        Self {
            value,
            reference: default_altitude_reference(),
            units: default_altitude_units(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatLngPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Polygon {
    pub vertices: Vec<LatLngPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume3D {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_polygon: Option<Polygon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_lower: Option<Altitude>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_upper: Option<Altitude>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume4D {
    pub volume: Volume3D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<Time>,
}

/// Error body returned by both DSS APIs
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
}

// === F3411-22a NetRID ===

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentificationServiceArea {
    pub id: String,
    pub owner: String,
    pub time_start: Time,
    pub time_end: Time,
    pub uss_base_url: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionState {
    pub subscription_id: String,
    pub notification_index: i64,
}

/// Subscriptions a USS must notify after an ISA change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriberToNotify {
    pub url: String,
    pub subscriptions: Vec<SubscriptionState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RidSubscription {
    pub id: String,
    pub uss_base_url: String,
    pub owner: String,
    #[serde(default)]
    pub notification_index: i64,
    pub time_start: Time,
    pub time_end: Time,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutIsaParameters {
    pub extents: Volume4D,
    pub uss_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutIsaResponse {
    pub service_area: IdentificationServiceArea,
    #[serde(default)]
    pub subscribers: Vec<SubscriberToNotify>,
}

/// Body of ISA get and delete responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetIsaResponse {
    pub service_area: IdentificationServiceArea,
    #[serde(default)]
    pub subscribers: Vec<SubscriberToNotify>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIsasResponse {
    #[serde(default)]
    pub service_areas: Vec<IdentificationServiceArea>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRidSubscriptionParameters {
    pub extents: Volume4D,
    pub uss_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRidSubscriptionResponse {
    pub subscription: RidSubscription,
    #[serde(default)]
    pub service_areas: Vec<IdentificationServiceArea>,
}

/// Body of RID subscription get and delete responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRidSubscriptionResponse {
    pub subscription: RidSubscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRidSubscriptionsResponse {
    #[serde(default)]
    pub subscriptions: Vec<RidSubscription>,
}

// === F3548-21 strategic coordination ===

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationalIntentState {
    Accepted,
    Activated,
    Nonconforming,
    Contingent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UssAvailabilityState {
    #[default]
    Unknown,
    Normal,
    Down,
}

impl std::fmt::Display for UssAvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UssAvailabilityState::Unknown => write!(f, "Unknown"),
            UssAvailabilityState::Normal => write!(f, "Normal"),
            UssAvailabilityState::Down => write!(f, "Down"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationalIntentReference {
    pub id: String,
    pub manager: String,
    #[serde(default)]
    pub uss_availability: UssAvailabilityState,
    pub version: i32,
    pub state: OperationalIntentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovn: Option<String>,
    pub time_start: Time,
    pub time_end: Time,
    pub uss_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

/// Request for an implicit subscription created alongside an OIR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitSubscriptionParameters {
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutOperationalIntentReferenceParameters {
    pub extents: Vec<Volume4D>,
    #[serde(default)]
    pub key: Vec<String>,
    pub state: OperationalIntentState,
    pub uss_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_subscription: Option<ImplicitSubscriptionParameters>,
}

/// Subscriber the USS must notify after an OIR or CR change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScdSubscriberToNotify {
    pub uss_base_url: String,
    pub subscriptions: Vec<SubscriptionState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOperationalIntentReferenceResponse {
    #[serde(default)]
    pub subscribers: Vec<ScdSubscriberToNotify>,
    pub operational_intent_reference: OperationalIntentReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOperationalIntentReferenceResponse {
    pub operational_intent_reference: OperationalIntentReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOperationalIntentReferenceResponse {
    #[serde(default)]
    pub operational_intent_references: Vec<OperationalIntentReference>,
}

/// Body of a 409 on OIR creation or mutation when the key is incomplete
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AirspaceConflictResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub missing_operational_intents: Vec<OperationalIntentReference>,
    #[serde(default)]
    pub missing_constraints: Vec<ConstraintReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintReference {
    pub id: String,
    pub manager: String,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovn: Option<String>,
    pub time_start: Time,
    pub time_end: Time,
    pub uss_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutConstraintReferenceParameters {
    pub extents: Vec<Volume4D>,
    pub uss_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeConstraintReferenceResponse {
    #[serde(default)]
    pub subscribers: Vec<ScdSubscriberToNotify>,
    pub constraint_reference: ConstraintReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConstraintReferenceResponse {
    pub constraint_reference: ConstraintReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConstraintReferencesResponse {
    #[serde(default)]
    pub constraint_references: Vec<ConstraintReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScdSubscription {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub notification_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<Time>,
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_operational_intents: bool,
    #[serde(default)]
    pub notify_for_constraints: bool,
    #[serde(default)]
    pub implicit_subscription: bool,
    #[serde(default)]
    pub dependent_operational_intents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutScdSubscriptionParameters {
    pub extents: Volume4D,
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_operational_intents: bool,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutScdSubscriptionResponse {
    pub subscription: ScdSubscription,
    #[serde(default)]
    pub operational_intent_references: Vec<OperationalIntentReference>,
    #[serde(default)]
    pub constraint_references: Vec<ConstraintReference>,
}

/// Body of SCD subscription get and delete responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetScdSubscriptionResponse {
    pub subscription: ScdSubscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryScdSubscriptionsResponse {
    #[serde(default)]
    pub subscriptions: Vec<ScdSubscription>,
}

/// Area of interest for OIR, CR and subscription queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParameters {
    pub area_of_interest: Volume4D,
}

// === Availability and reports ===

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UssAvailabilityStatus {
    pub uss: String,
    pub availability: UssAvailabilityState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UssAvailabilityStatusResponse {
    pub status: UssAvailabilityStatus,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetUssAvailabilityStatusParameters {
    #[serde(default)]
    pub old_version: String,
    pub availability: UssAvailabilityState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExchangeProtocol {
    #[serde(rename = "HTTP")]
    Http,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExchangeRole {
    Client,
    Server,
}

/// Record of an interaction a USS wants to report to the DSS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<String>,
    pub recorder_role: ExchangeRole,
    pub request_time: Time,
    #[serde(default)]
    pub request_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<Time>,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub response_code: i32,
    #[serde(default)]
    pub problem: String,
    pub protocol: ExchangeProtocol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub exchange: ExchangeRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_serializes_with_format() {
        let t: Time = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc)
            .into();
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["format"], "RFC3339");
        assert_eq!(json["value"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn test_unknown_availability_parses_without_version() {
        let body = r#"{"status": {"uss": "uss1", "availability": "Unknown"}}"#;
        let parsed: UssAvailabilityStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status.availability, UssAvailabilityState::Unknown);
        assert!(parsed.version.is_empty());
    }

    #[test]
    fn test_oir_without_ovn() {
        let body = r#"{
            "id": "oir1", "manager": "uss1", "version": 1, "state": "Accepted",
            "time_start": {"value": "2026-01-01T00:00:00Z", "format": "RFC3339"},
            "time_end": {"value": "2026-01-01T01:00:00Z", "format": "RFC3339"},
            "uss_base_url": "https://uss1.example.com"
        }"#;
        let oir: OperationalIntentReference = serde_json::from_str(body).unwrap();
        assert!(oir.ovn.is_none());
        assert_eq!(oir.uss_availability, UssAvailabilityState::Unknown);
        assert_eq!(oir.state, OperationalIntentState::Accepted);
    }
}
