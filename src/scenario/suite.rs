//! Suite definition files
//!
//! A suite names its resources once and then lists scenarios in the order
//! they run:
//!
//! ```yaml
//! name: DSS basics
//! resources:
//!   dss:
//!     type: dss_instance
//!     participant_id: uss1
//!     base_url: http://localhost:8082
//!   ids:
//!     type: id_generator
//!     whoami: uss_qualifier
//! scenarios:
//!   - type: astm.utm.dss.AvailabilityArbitration
//!     resources:
//!       dss: dss
//!       id_generator: ids
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::resources::ResourceSpec;

use super::registry;

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
    pub scenarios: Vec<ScenarioDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDeclaration {
    #[serde(rename = "type")]
    pub scenario_type: String,
    /// Display name; defaults to the scenario's documented name
    #[serde(default)]
    pub name: Option<String>,
    /// role -> resource name
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
}

impl SuiteDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let suite: SuiteDefinition =
            serde_yaml::from_str(content).map_err(|e| Error::SuiteParse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;
        suite.validate().map_err(|e| Error::SuiteParse {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        Ok(suite)
    }

    /// Check scenario types and resource references without building anything
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(Error::Config("suite declares no scenarios".to_string()));
        }
        for declaration in &self.scenarios {
            if registry::get(&declaration.scenario_type).is_none() {
                return Err(Error::UnknownScenario(declaration.scenario_type.clone()));
            }
            for name in declaration.resources.values() {
                if !self.resources.contains_key(name) {
                    return Err(Error::ResourceNotFound(name.clone()));
                }
            }
            declaration.parameters()?;
        }
        Ok(())
    }
}

impl ScenarioDeclaration {
    /// Parameters as strings; only scalar YAML values are accepted
    pub fn parameters(&self) -> Result<ScenarioParameters> {
        let mut values = BTreeMap::new();
        for (name, value) in &self.parameters {
            let text = match value {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(Error::invalid_parameter(
                        &self.scenario_type,
                        name,
                        "must be a string, number or boolean",
                    ))
                }
            };
            values.insert(name.clone(), text);
        }
        Ok(ScenarioParameters {
            scenario: self.scenario_type.clone(),
            values,
        })
    }
}

/// String parameters of one scenario declaration
#[derive(Debug, Clone, Default)]
pub struct ScenarioParameters {
    scenario: String,
    values: BTreeMap<String, String>,
}

impl ScenarioParameters {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    /// Parse parameter `name`, falling back to `default` when absent
    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.values.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::invalid_parameter(&self.scenario, name, format!("{}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
name: Basic
resources:
  dss:
    type: dss_instance
    participant_id: uss1
    base_url: http://dss.local
    mock_deployment: local
  ids:
    type: id_generator
    whoami: uss_qualifier
scenarios:
  - type: astm.netrid.dss.HeavyTrafficConcurrent
    resources:
      dss: dss
      id_generator: ids
    parameters:
      isa_count: 10
      subscription_count: "4"
"#;

    #[test]
    fn test_parse_suite() {
        let suite = SuiteDefinition::parse(SUITE, "suite.yaml").unwrap();
        assert_eq!(suite.name, "Basic");
        assert_eq!(suite.resources.len(), 2);
        let params = suite.scenarios[0].parameters().unwrap();
        assert_eq!(params.parse_or("isa_count", 100usize).unwrap(), 10);
        assert_eq!(params.parse_or("subscription_count", 10usize).unwrap(), 4);
        assert_eq!(params.parse_or("missing", 7usize).unwrap(), 7);
    }

    #[test]
    fn test_unknown_scenario_type() {
        let text = SUITE.replace("astm.netrid.dss.HeavyTrafficConcurrent", "nope.Nope");
        let err = SuiteDefinition::parse(&text, "suite.yaml").unwrap_err();
        assert!(err.to_string().contains("nope.Nope"));
    }

    #[test]
    fn test_undeclared_resource() {
        let text = SUITE.replace("id_generator: ids", "id_generator: idz");
        let err = SuiteDefinition::parse(&text, "suite.yaml").unwrap_err();
        assert!(err.to_string().contains("idz"));
    }

    #[test]
    fn test_bad_parameter_value() {
        let params = ScenarioParameters::new("X").with("isa_count", "many");
        assert!(matches!(
            params.parse_or("isa_count", 1usize),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
