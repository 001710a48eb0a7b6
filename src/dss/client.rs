//! Typed DSS client
//!
//! [`DssInstance`] maps each DSS operation to its HTTP request and returns
//! the recorded query together with the parsed body. Status handling is left
//! to the caller: scenarios decide which codes are acceptable.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::auth::Scope;
use super::query::{Fetched, Query};
use super::transport::{Method, Transport};
use super::types::*;

const RID_BASE: &str = "/rid/v2/dss";
const SCD_BASE: &str = "/dss/v1";

/// Handle to one DSS instance of a deployment
#[derive(Clone)]
pub struct DssInstance {
    pub participant_id: String,
    /// Whether the base URL is reachable only from a private network
    pub has_private_address: bool,
    subject: String,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for DssInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DssInstance")
            .field("participant_id", &self.participant_id)
            .field("base_url", &self.base_url())
            .finish()
    }
}

fn to_body<T: Serialize>(value: &T) -> Option<Value> {
    // Request types contain only strings, numbers and timestamps
    serde_json::to_value(value).ok()
}

fn with_version(path: String, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{}/{}", path, v),
        None => path,
    }
}

/// Append `pairs` to `path` as a form-encoded query string
fn with_query(path: String, pairs: &[(&str, String)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
        .finish();
    format!("{}?{}", path, query)
}

/// `lat,lng,lat,lng,...` as used by the F3411 `area` query parameter
fn rid_area_param(area: &[LatLngPoint]) -> String {
    area.iter()
        .map(|p| format!("{},{}", p.lat, p.lng))
        .collect::<Vec<_>>()
        .join(",")
}

impl DssInstance {
    pub fn new(
        participant_id: impl Into<String>,
        subject: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            has_private_address: false,
            subject: subject.into(),
            transport,
        }
    }

    pub fn with_private_address(mut self, private: bool) -> Self {
        self.has_private_address = private;
        self
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Identity entities created through this handle are attributed to
    pub fn subject(&self) -> &str {
        &self.subject
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        scope: Scope,
    ) -> Query {
        let mut query = self.transport.request(method, path, body, scope).await;
        query.participant_id = Some(self.participant_id.clone());
        tracing::debug!(participant = %self.participant_id, "{}", query.describe());
        query
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        scope: Scope,
    ) -> Fetched<T> {
        Fetched::from_query(self.request(method, path, body, scope).await)
    }

    // === F3411-22a identification service areas ===

    pub async fn put_isa(
        &self,
        id: &str,
        extents: &Volume4D,
        uss_base_url: &str,
        version: Option<&str>,
    ) -> Fetched<PutIsaResponse> {
        let params = PutIsaParameters {
            extents: extents.clone(),
            uss_base_url: uss_base_url.to_string(),
        };
        let path = with_version(
            format!("{}/identification_service_areas/{}", RID_BASE, id),
            version,
        );
        self.fetch(Method::Put, &path, to_body(&params), Scope::RidServiceProvider)
            .await
    }

    pub async fn get_isa(&self, id: &str) -> Fetched<GetIsaResponse> {
        let path = format!("{}/identification_service_areas/{}", RID_BASE, id);
        self.fetch(Method::Get, &path, None, Scope::RidDisplayProvider)
            .await
    }

    pub async fn delete_isa(&self, id: &str, version: &str) -> Fetched<GetIsaResponse> {
        let path = format!(
            "{}/identification_service_areas/{}/{}",
            RID_BASE, id, version
        );
        self.fetch(Method::Delete, &path, None, Scope::RidServiceProvider)
            .await
    }

    pub async fn search_isas(
        &self,
        area: &[LatLngPoint],
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Fetched<SearchIsasResponse> {
        let mut pairs = vec![("area", rid_area_param(area))];
        if let Some(t) = earliest {
            pairs.push(("earliest_time", t.to_rfc3339()));
        }
        if let Some(t) = latest {
            pairs.push(("latest_time", t.to_rfc3339()));
        }
        let path = with_query(format!("{}/identification_service_areas", RID_BASE), &pairs);
        self.fetch(Method::Get, &path, None, Scope::RidDisplayProvider)
            .await
    }

    // === F3411-22a subscriptions ===

    pub async fn put_rid_subscription(
        &self,
        id: &str,
        extents: &Volume4D,
        uss_base_url: &str,
        version: Option<&str>,
    ) -> Fetched<PutRidSubscriptionResponse> {
        let params = PutRidSubscriptionParameters {
            extents: extents.clone(),
            uss_base_url: uss_base_url.to_string(),
        };
        let path = with_version(format!("{}/subscriptions/{}", RID_BASE, id), version);
        self.fetch(Method::Put, &path, to_body(&params), Scope::RidDisplayProvider)
            .await
    }

    pub async fn get_rid_subscription(&self, id: &str) -> Fetched<GetRidSubscriptionResponse> {
        let path = format!("{}/subscriptions/{}", RID_BASE, id);
        self.fetch(Method::Get, &path, None, Scope::RidDisplayProvider)
            .await
    }

    pub async fn delete_rid_subscription(
        &self,
        id: &str,
        version: &str,
    ) -> Fetched<GetRidSubscriptionResponse> {
        let path = format!("{}/subscriptions/{}/{}", RID_BASE, id, version);
        self.fetch(Method::Delete, &path, None, Scope::RidDisplayProvider)
            .await
    }

    pub async fn search_rid_subscriptions(
        &self,
        area: &[LatLngPoint],
    ) -> Fetched<SearchRidSubscriptionsResponse> {
        let path = with_query(
            format!("{}/subscriptions", RID_BASE),
            &[("area", rid_area_param(area))],
        );
        self.fetch(Method::Get, &path, None, Scope::RidDisplayProvider)
            .await
    }

    // === F3548-21 operational intent references ===

    pub async fn put_oir(
        &self,
        id: &str,
        params: &PutOperationalIntentReferenceParameters,
        ovn: Option<&str>,
    ) -> Fetched<ChangeOperationalIntentReferenceResponse> {
        let path = with_version(
            format!("{}/operational_intent_references/{}", SCD_BASE, id),
            ovn,
        );
        self.fetch(
            Method::Put,
            &path,
            to_body(params),
            Scope::StrategicCoordination,
        )
        .await
    }

    pub async fn get_oir(&self, id: &str) -> Fetched<GetOperationalIntentReferenceResponse> {
        let path = format!("{}/operational_intent_references/{}", SCD_BASE, id);
        self.fetch(Method::Get, &path, None, Scope::StrategicCoordination)
            .await
    }

    pub async fn delete_oir(
        &self,
        id: &str,
        ovn: &str,
    ) -> Fetched<ChangeOperationalIntentReferenceResponse> {
        let path = format!("{}/operational_intent_references/{}/{}", SCD_BASE, id, ovn);
        self.fetch(Method::Delete, &path, None, Scope::StrategicCoordination)
            .await
    }

    pub async fn query_oirs(
        &self,
        area: &Volume4D,
    ) -> Fetched<QueryOperationalIntentReferenceResponse> {
        let params = QueryParameters {
            area_of_interest: area.clone(),
        };
        let path = format!("{}/operational_intent_references/query", SCD_BASE);
        self.fetch(
            Method::Post,
            &path,
            to_body(&params),
            Scope::StrategicCoordination,
        )
        .await
    }

    // === F3548-21 constraint references ===

    pub async fn put_cr(
        &self,
        id: &str,
        params: &PutConstraintReferenceParameters,
        ovn: Option<&str>,
    ) -> Fetched<ChangeConstraintReferenceResponse> {
        let path = with_version(format!("{}/constraint_references/{}", SCD_BASE, id), ovn);
        self.fetch(
            Method::Put,
            &path,
            to_body(params),
            Scope::ConstraintManagement,
        )
        .await
    }

    pub async fn get_cr(&self, id: &str) -> Fetched<GetConstraintReferenceResponse> {
        let path = format!("{}/constraint_references/{}", SCD_BASE, id);
        self.fetch(Method::Get, &path, None, Scope::ConstraintManagement)
            .await
    }

    pub async fn delete_cr(&self, id: &str, ovn: &str) -> Fetched<ChangeConstraintReferenceResponse> {
        let path = format!("{}/constraint_references/{}/{}", SCD_BASE, id, ovn);
        self.fetch(Method::Delete, &path, None, Scope::ConstraintManagement)
            .await
    }

    pub async fn query_crs(&self, area: &Volume4D) -> Fetched<QueryConstraintReferencesResponse> {
        let params = QueryParameters {
            area_of_interest: area.clone(),
        };
        let path = format!("{}/constraint_references/query", SCD_BASE);
        self.fetch(
            Method::Post,
            &path,
            to_body(&params),
            Scope::ConstraintManagement,
        )
        .await
    }

    // === F3548-21 subscriptions ===

    pub async fn put_scd_subscription(
        &self,
        id: &str,
        params: &PutScdSubscriptionParameters,
        version: Option<&str>,
    ) -> Fetched<PutScdSubscriptionResponse> {
        let path = with_version(format!("{}/subscriptions/{}", SCD_BASE, id), version);
        self.fetch(
            Method::Put,
            &path,
            to_body(params),
            Scope::StrategicCoordination,
        )
        .await
    }

    pub async fn get_scd_subscription(&self, id: &str) -> Fetched<GetScdSubscriptionResponse> {
        let path = format!("{}/subscriptions/{}", SCD_BASE, id);
        self.fetch(Method::Get, &path, None, Scope::StrategicCoordination)
            .await
    }

    pub async fn delete_scd_subscription(
        &self,
        id: &str,
        version: &str,
    ) -> Fetched<GetScdSubscriptionResponse> {
        let path = format!("{}/subscriptions/{}/{}", SCD_BASE, id, version);
        self.fetch(Method::Delete, &path, None, Scope::StrategicCoordination)
            .await
    }

    pub async fn query_scd_subscriptions(
        &self,
        area: &Volume4D,
    ) -> Fetched<QueryScdSubscriptionsResponse> {
        let params = QueryParameters {
            area_of_interest: area.clone(),
        };
        let path = format!("{}/subscriptions/query", SCD_BASE);
        self.fetch(
            Method::Post,
            &path,
            to_body(&params),
            Scope::StrategicCoordination,
        )
        .await
    }

    // === F3548-21 availability arbitration ===

    pub async fn get_uss_availability(
        &self,
        uss_id: &str,
    ) -> Fetched<UssAvailabilityStatusResponse> {
        let path = format!("{}/uss_availability/{}", SCD_BASE, uss_id);
        self.fetch(Method::Get, &path, None, Scope::AvailabilityArbitration)
            .await
    }

    pub async fn set_uss_availability(
        &self,
        uss_id: &str,
        old_version: &str,
        availability: UssAvailabilityState,
    ) -> Fetched<UssAvailabilityStatusResponse> {
        let params = SetUssAvailabilityStatusParameters {
            old_version: old_version.to_string(),
            availability,
        };
        let path = format!("{}/uss_availability/{}", SCD_BASE, uss_id);
        self.fetch(
            Method::Put,
            &path,
            to_body(&params),
            Scope::AvailabilityArbitration,
        )
        .await
    }

    pub async fn make_report(&self, exchange: &ExchangeRecord) -> Fetched<ErrorReport> {
        let report = ErrorReport {
            report_id: None,
            exchange: exchange.clone(),
        };
        let path = format!("{}/reports", SCD_BASE);
        self.fetch(
            Method::Post,
            &path,
            to_body(&report),
            Scope::AvailabilityArbitration,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_area_param() {
        let area = vec![
            LatLngPoint { lat: 1.5, lng: 2.0 },
            LatLngPoint { lat: -3.0, lng: 4.25 },
        ];
        assert_eq!(rid_area_param(&area), "1.5,2,-3,4.25");
    }

    #[test]
    fn test_query_is_form_encoded() {
        let path = with_query(
            "/rid/v2/dss/identification_service_areas".into(),
            &[
                ("area", "1.5,2".to_string()),
                ("earliest_time", "2026-01-01T00:00:00+00:00".to_string()),
            ],
        );
        assert_eq!(
            path,
            "/rid/v2/dss/identification_service_areas?area=1.5%2C2&earliest_time=2026-01-01T00%3A00%3A00%2B00%3A00"
        );
    }

    #[test]
    fn test_versioned_paths() {
        assert_eq!(with_version("/a/b".into(), Some("v1")), "/a/b/v1");
        assert_eq!(with_version("/a/b".into(), None), "/a/b");
    }
}
