//! Recorded HTTP interactions
//!
//! Every DSS call produces a [`Query`], whether it succeeded, returned an
//! error status or never reached the server. Queries are what scenarios hand
//! to the report, and what checks point at through their timestamps.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code recorded when no HTTP response was received
pub const FAILED_QUERY_CODE: u16 = 999;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescription {
    pub method: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDescription {
    pub code: u16,
    pub elapsed_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Transport-level failure, set together with [`FAILED_QUERY_CODE`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// One request/response exchange with a DSS instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub request: RequestDescription,
    pub response: ResponseDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

impl Query {
    pub fn status_code(&self) -> u16 {
        self.response.code
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.request.timestamp
    }

    pub fn success(&self) -> bool {
        (200..300).contains(&self.response.code)
    }

    /// Human-readable reasons this query did not succeed
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(failure) = &self.response.failure {
            errors.push(failure.clone());
        }
        if !self.success() && self.response.failure.is_none() {
            let message = self
                .response
                .body
                .as_ref()
                .and_then(|b| b.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("no error message");
            errors.push(format!("HTTP {}: {}", self.response.code, message));
        }
        errors
    }

    /// Deserialize the response body
    pub fn parse_json<T: DeserializeOwned>(&self) -> std::result::Result<T, String> {
        let body = self
            .response
            .body
            .as_ref()
            .ok_or_else(|| "response has no JSON body".to_string())?;
        serde_json::from_value(body.clone()).map_err(|e| e.to_string())
    }

    /// One-line description used in logs and check details
    pub fn describe(&self) -> String {
        format!(
            "{} {} -> {}",
            self.request.method, self.request.url, self.response.code
        )
    }
}

/// A query together with its parsed response body
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub query: Query,
    /// Parsed body when the query succeeded and the body was well-formed
    pub value: Option<T>,
    /// Why a successful response body could not be parsed
    pub parse_error: Option<String>,
}

impl<T: DeserializeOwned> Fetched<T> {
    pub fn from_query(query: Query) -> Self {
        if !query.success() {
            return Self {
                query,
                value: None,
                parse_error: None,
            };
        }
        match query.parse_json::<T>() {
            Ok(value) => Self {
                query,
                value: Some(value),
                parse_error: None,
            },
            Err(e) => Self {
                query,
                value: None,
                parse_error: Some(e),
            },
        }
    }
}

impl<T> Fetched<T> {
    pub fn status_code(&self) -> u16 {
        self.query.status_code()
    }

    pub fn success(&self) -> bool {
        self.query.success() && self.value.is_some()
    }

    /// Reasons the fetch did not yield a value
    pub fn errors(&self) -> Vec<String> {
        let mut errors = self.query.errors();
        if let Some(e) = &self.parse_error {
            errors.push(format!("invalid response body: {e}"));
        }
        errors
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        vec![self.query.timestamp()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(code: u16, body: Option<Value>) -> Query {
        Query {
            request: RequestDescription {
                method: "GET".into(),
                url: "http://dss/rid/v2/dss/subscriptions/abc".into(),
                timestamp: Utc::now(),
                body: None,
            },
            response: ResponseDescription {
                code,
                elapsed_s: 0.01,
                body,
                failure: None,
            },
            participant_id: Some("uss1".into()),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Thing {
        id: String,
    }

    #[test]
    fn test_fetched_parses_successful_body() {
        let f: Fetched<Thing> = Fetched::from_query(query(200, Some(json!({"id": "x"}))));
        assert!(f.success());
        assert_eq!(f.value.unwrap().id, "x");
    }

    #[test]
    fn test_fetched_reports_malformed_body() {
        let f: Fetched<Thing> = Fetched::from_query(query(200, Some(json!({"nope": 1}))));
        assert!(!f.success());
        assert!(f.errors().iter().any(|e| e.contains("invalid response body")));
    }

    #[test]
    fn test_error_status_uses_message() {
        let f: Fetched<Thing> =
            Fetched::from_query(query(404, Some(json!({"message": "not found"}))));
        assert!(!f.success());
        assert!(f.parse_error.is_none());
        assert_eq!(f.errors(), vec!["HTTP 404: not found".to_string()]);
    }
}
