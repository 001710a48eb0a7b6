//! Transport seam between DSS clients and DSS servers
//!
//! [`HttpTransport`] talks to a real deployment over reqwest. The in-memory
//! deployment in [`super::mock`] implements the same trait so scenarios run
//! unchanged against either.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::auth::{AuthAdapter, Scope};
use super::query::{Query, RequestDescription, ResponseDescription, FAILED_QUERY_CODE};
use crate::common::config::HttpConfig;
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carries one request to a DSS instance
///
/// Never fails: transport problems are recorded in the returned [`Query`]
/// with status [`FAILED_QUERY_CODE`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `method` on `path` (which may include a query string)
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        scope: Scope,
    ) -> Query;

    fn base_url(&self) -> &str;
}

/// Build a query record for a request that never produced a response
pub fn failed_query(
    method: Method,
    url: String,
    body: Option<Value>,
    started: chrono::DateTime<Utc>,
    elapsed: Duration,
    failure: String,
) -> Query {
    Query {
        request: RequestDescription {
            method: method.to_string(),
            url,
            timestamp: started,
            body,
        },
        response: ResponseDescription {
            code: FAILED_QUERY_CODE,
            elapsed_s: elapsed.as_secs_f64(),
            body: None,
            failure: Some(failure),
        },
        participant_id: None,
    }
}

/// reqwest-backed transport to a DSS instance
pub struct HttpTransport {
    base_url: String,
    audience: String,
    client: reqwest::Client,
    auth: Arc<dyn AuthAdapter>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        audience: Option<&str>,
        http: &HttpConfig,
        auth: Arc<dyn AuthAdapter>,
    ) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid DSS base URL '{}': {}", base_url, e)))?;
        let audience = match audience {
            Some(a) => a.to_string(),
            None => parsed
                .host_str()
                .ok_or_else(|| Error::Config(format!("DSS base URL '{}' has no host", base_url)))?
                .to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            audience,
            client,
            auth,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        scope: Scope,
    ) -> std::result::Result<(u16, Option<Value>), String> {
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Put => self.client.put(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(token) = self
            .auth
            .token(scope, &self.audience)
            .await
            .map_err(|e| e.to_string())?
        {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };
        Ok((status, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        scope: Scope,
    ) -> Query {
        let url = format!("{}{}", self.base_url, path);
        let timestamp = Utc::now();
        let started = Instant::now();

        match self.send(method, &url, body.as_ref(), scope).await {
            Ok((code, response_body)) => Query {
                request: RequestDescription {
                    method: method.to_string(),
                    url,
                    timestamp,
                    body,
                },
                response: ResponseDescription {
                    code,
                    elapsed_s: started.elapsed().as_secs_f64(),
                    body: response_body,
                    failure: None,
                },
                participant_id: None,
            },
            Err(failure) => {
                tracing::debug!(%method, %url, %failure, "DSS request failed");
                failed_query(method, url, body, timestamp, started.elapsed(), failure)
            }
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dss::auth::NoAuth;

    #[test]
    fn test_audience_defaults_to_host() {
        let transport = HttpTransport::new(
            "http://dss.example.com:8082/",
            None,
            &HttpConfig::default(),
            Arc::new(NoAuth::new("uss_qualifier")),
        )
        .unwrap();
        assert_eq!(transport.audience, "dss.example.com");
        assert_eq!(transport.base_url(), "http://dss.example.com:8082");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpTransport::new(
            "not a url",
            None,
            &HttpConfig::default(),
            Arc::new(NoAuth::new("uss_qualifier")),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_recorded() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9",
            None,
            &HttpConfig {
                timeout_secs: 2,
                ..HttpConfig::default()
            },
            Arc::new(NoAuth::new("uss_qualifier")),
        )
        .unwrap();
        let query = transport
            .request(Method::Get, "/dss/v1/reports", None, Scope::AvailabilityArbitration)
            .await;
        assert_eq!(query.status_code(), FAILED_QUERY_CODE);
        assert!(query.response.failure.is_some());
    }
}
