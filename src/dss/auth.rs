//! Access tokens for DSS requests
//!
//! Each DSS endpoint requires a bearer token carrying one OAuth scope. The
//! [`AuthAdapter`] trait hides where tokens come from: nowhere (unsecured
//! test deployments), a fixed string, or an InterUSS dummy OAuth server.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::common::config::{AuthConfig, AuthKind};
use crate::common::{Error, Result};

/// OAuth scopes defined by F3411-22a and F3548-21
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    RidDisplayProvider,
    RidServiceProvider,
    StrategicCoordination,
    ConstraintManagement,
    AvailabilityArbitration,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::RidDisplayProvider => "rid.display_provider",
            Scope::RidServiceProvider => "rid.service_provider",
            Scope::StrategicCoordination => "utm.strategic_coordination",
            Scope::ConstraintManagement => "utm.constraint_management",
            Scope::AvailabilityArbitration => "utm.availability_arbitration",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of bearer tokens
#[async_trait]
pub trait AuthAdapter: Send + Sync {
    /// Token for `scope` intended for `audience`; `None` sends no header
    async fn token(&self, scope: Scope, audience: &str) -> Result<Option<String>>;

    /// Identity the DSS will attribute created entities to
    fn subject(&self) -> &str;
}

/// Sends requests without an Authorization header
pub struct NoAuth {
    subject: String,
}

impl NoAuth {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl AuthAdapter for NoAuth {
    async fn token(&self, _scope: Scope, _audience: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

/// Uses one pre-issued token for every scope
pub struct StaticToken {
    token: String,
    subject: String,
}

#[async_trait]
impl AuthAdapter for StaticToken {
    async fn token(&self, _scope: Scope, _audience: &str) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client of the InterUSS dummy OAuth server
///
/// Tokens are cached per scope and audience for the lifetime of the run.
pub struct DummyOAuth {
    endpoint: String,
    subject: String,
    client: reqwest::Client,
    cache: Mutex<HashMap<(Scope, String), String>>,
}

impl DummyOAuth {
    pub fn new(endpoint: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subject: subject.into(),
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, scope: Scope, audience: &str) -> Result<String> {
        let auth_error = |message: String| Error::Auth {
            scope: scope.to_string(),
            message,
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("grant_type", "client_credentials"),
                ("scope", scope.as_str()),
                ("intended_audience", audience),
                ("issuer", "dummy"),
                ("sub", self.subject.as_str()),
            ])
            .send()
            .await
            .map_err(|e| auth_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(auth_error(format!(
                "token endpoint returned status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(format!("invalid token response: {}", e)))?;
        Ok(body.access_token)
    }
}

#[async_trait]
impl AuthAdapter for DummyOAuth {
    async fn token(&self, scope: Scope, audience: &str) -> Result<Option<String>> {
        let key = (scope, audience.to_string());
        if let Some(token) = self.cache.lock().await.get(&key) {
            return Ok(Some(token.clone()));
        }

        tracing::debug!(%scope, audience, "Requesting access token");
        let token = self.fetch(scope, audience).await?;
        self.cache.lock().await.insert(key, token.clone());
        Ok(Some(token))
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

/// Build the adapter selected by the `[auth]` configuration section
pub fn from_config(config: &AuthConfig) -> Result<Arc<dyn AuthAdapter>> {
    let subject = config.subject.clone();
    match config.kind {
        AuthKind::None => Ok(Arc::new(NoAuth::new(subject))),
        AuthKind::StaticToken => {
            let token = config.token.clone().ok_or_else(|| {
                Error::Config("auth.kind = \"static_token\" requires auth.token".to_string())
            })?;
            Ok(Arc::new(StaticToken { token, subject }))
        }
        AuthKind::DummyOauth => {
            let endpoint = config.token_endpoint.clone().ok_or_else(|| {
                Error::Config(
                    "auth.kind = \"dummy_oauth\" requires auth.token_endpoint".to_string(),
                )
            })?;
            Ok(Arc::new(DummyOAuth::new(endpoint, subject)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_for_every_scope() {
        let config = AuthConfig {
            kind: AuthKind::StaticToken,
            token: Some("abc".into()),
            ..AuthConfig::default()
        };
        let auth = from_config(&config).unwrap();
        assert_eq!(
            auth.token(Scope::RidDisplayProvider, "dss").await.unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(auth.subject(), "uss_qualifier");
    }

    #[tokio::test]
    async fn test_no_auth_sends_nothing() {
        let auth = from_config(&AuthConfig::default()).unwrap();
        assert!(auth
            .token(Scope::AvailabilityArbitration, "dss")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(
            Scope::AvailabilityArbitration.to_string(),
            "utm.availability_arbitration"
        );
        assert_eq!(Scope::RidServiceProvider.as_str(), "rid.service_provider");
    }
}
