//! Resource resolution
//!
//! A suite declares named resources once; each scenario declaration then
//! binds the roles its scenario needs (`dss`, `id_generator`, ...) to those
//! names. Resources are built before any scenario runs so that configuration
//! mistakes surface up front.

pub mod area;
pub mod flight_intents;
pub mod id_generator;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::dss::auth::{self, AuthAdapter};
use crate::dss::transport::{HttpTransport, Transport};
use crate::dss::{DssInstance, MockDeployment};

pub use area::UssArea;
pub use flight_intents::{FlightIntent, FlightIntents};
pub use id_generator::{IdGenerator, ResourceType};

/// How to reach one DSS instance
#[derive(Debug, Clone, Deserialize)]
pub struct DssInstanceSpec {
    pub participant_id: String,
    pub base_url: String,
    /// Serve this instance from the named in-memory deployment
    #[serde(default)]
    pub mock_deployment: Option<String>,
    #[serde(default)]
    pub has_private_address: bool,
}

/// Resource declaration as written in a suite file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSpec {
    DssInstance(DssInstanceSpec),
    DssInstances {
        instances: Vec<DssInstanceSpec>,
    },
    IdGenerator {
        whoami: String,
    },
    ServiceArea(UssArea),
    PlanningArea(UssArea),
    FlightIntents {
        /// YAML file, relative to the suite file
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        intents: Option<BTreeMap<String, FlightIntent>>,
        #[serde(default)]
        planning_time_s: i64,
    },
    ClientIdentity {
        subject: String,
    },
}

/// A constructed resource
#[derive(Debug, Clone)]
pub enum Resource {
    DssInstance(DssInstance),
    DssInstances(Vec<DssInstance>),
    IdGenerator(IdGenerator),
    ServiceArea(UssArea),
    PlanningArea(UssArea),
    FlightIntents(FlightIntents),
    ClientIdentity(String),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::DssInstance(_) => "dss_instance",
            Resource::DssInstances(_) => "dss_instances",
            Resource::IdGenerator(_) => "id_generator",
            Resource::ServiceArea(_) => "service_area",
            Resource::PlanningArea(_) => "planning_area",
            Resource::FlightIntents(_) => "flight_intents",
            Resource::ClientIdentity(_) => "client_identity",
        }
    }
}

/// All resources of a suite, by name
#[derive(Default)]
pub struct ResourcePool {
    resources: BTreeMap<String, Resource>,
    deployments: HashMap<String, MockDeployment>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every declared resource
    ///
    /// Relative file references are resolved against `base_dir`.
    pub fn create(
        specs: &BTreeMap<String, ResourceSpec>,
        config: &Config,
        base_dir: &Path,
    ) -> Result<Self> {
        let auth = auth::from_config(&config.auth)?;
        let mut pool = Self::new();
        for (name, spec) in specs {
            tracing::debug!(resource = %name, "Creating resource");
            let resource = pool.build(name, spec, config, &auth, base_dir)?;
            pool.resources.insert(name.clone(), resource);
        }
        Ok(pool)
    }

    fn build(
        &mut self,
        name: &str,
        spec: &ResourceSpec,
        config: &Config,
        auth: &Arc<dyn AuthAdapter>,
        base_dir: &Path,
    ) -> Result<Resource> {
        Ok(match spec {
            ResourceSpec::DssInstance(instance) => {
                Resource::DssInstance(self.dss_instance(instance, config, auth)?)
            }
            ResourceSpec::DssInstances { instances } => Resource::DssInstances(
                instances
                    .iter()
                    .map(|i| self.dss_instance(i, config, auth))
                    .collect::<Result<_>>()?,
            ),
            ResourceSpec::IdGenerator { whoami } => {
                Resource::IdGenerator(IdGenerator::new(whoami.clone()))
            }
            ResourceSpec::ServiceArea(area) => {
                area.validate(name)?;
                Resource::ServiceArea(area.clone())
            }
            ResourceSpec::PlanningArea(area) => {
                area.validate(name)?;
                Resource::PlanningArea(area.clone())
            }
            ResourceSpec::FlightIntents {
                file,
                intents,
                planning_time_s,
            } => match (file, intents) {
                (Some(file), None) => Resource::FlightIntents(FlightIntents::load(
                    &base_dir.join(file),
                    *planning_time_s,
                )?),
                (None, Some(intents)) => Resource::FlightIntents(FlightIntents::new(
                    intents.clone(),
                    *planning_time_s,
                )?),
                _ => {
                    return Err(Error::Config(format!(
                        "Resource '{}' needs exactly one of 'file' or 'intents'",
                        name
                    )))
                }
            },
            ResourceSpec::ClientIdentity { subject } => Resource::ClientIdentity(subject.clone()),
        })
    }

    fn dss_instance(
        &mut self,
        spec: &DssInstanceSpec,
        config: &Config,
        auth: &Arc<dyn AuthAdapter>,
    ) -> Result<DssInstance> {
        let transport: Arc<dyn Transport> = match &spec.mock_deployment {
            Some(deployment) => self
                .deployments
                .entry(deployment.clone())
                .or_default()
                .transport(&spec.participant_id, &spec.base_url, auth.subject()),
            None => Arc::new(HttpTransport::new(
                &spec.base_url,
                config.auth.audience.as_deref(),
                &config.http,
                auth.clone(),
            )?),
        };
        Ok(
            DssInstance::new(spec.participant_id.clone(), auth.subject(), transport)
                .with_private_address(spec.has_private_address),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, resource: Resource) {
        self.resources.insert(name.into(), resource);
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(|k| k.as_str())
    }

    /// In-memory deployment created for `mock_deployment: <name>`
    pub fn mock_deployment(&self, name: &str) -> Option<&MockDeployment> {
        self.deployments.get(name)
    }
}

/// Resources bound to the roles of one scenario
#[derive(Debug, Clone)]
pub struct Bindings {
    scenario: String,
    roles: BTreeMap<String, (String, Resource)>,
}

impl Bindings {
    /// Look up every `role -> resource name` pair in `pool`
    pub fn resolve(
        pool: &ResourcePool,
        scenario: &str,
        mapping: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut roles = BTreeMap::new();
        for (role, name) in mapping {
            let resource = pool
                .get(name)
                .ok_or_else(|| Error::ResourceNotFound(name.clone()))?;
            roles.insert(role.clone(), (name.clone(), resource.clone()));
        }
        Ok(Self {
            scenario: scenario.to_string(),
            roles,
        })
    }

    fn lookup(&self, role: &str) -> Option<&(String, Resource)> {
        self.roles.get(role)
    }

    fn require(&self, role: &str) -> Result<&(String, Resource)> {
        self.lookup(role)
            .ok_or_else(|| Error::missing_resource(&self.scenario, role))
    }

    pub fn dss(&self, role: &str) -> Result<DssInstance> {
        match self.require(role)? {
            (_, Resource::DssInstance(dss)) => Ok(dss.clone()),
            (name, other) => Err(Error::resource_kind(name, "dss_instance", other.kind())),
        }
    }

    pub fn dss_instances(&self, role: &str) -> Result<Vec<DssInstance>> {
        match self.require(role)? {
            (_, Resource::DssInstances(instances)) => Ok(instances.clone()),
            (name, other) => Err(Error::resource_kind(name, "dss_instances", other.kind())),
        }
    }

    pub fn id_generator(&self, role: &str) -> Result<IdGenerator> {
        match self.require(role)? {
            (_, Resource::IdGenerator(ids)) => Ok(ids.clone()),
            (name, other) => Err(Error::resource_kind(name, "id_generator", other.kind())),
        }
    }

    pub fn service_area(&self, role: &str) -> Result<UssArea> {
        match self.require(role)? {
            (_, Resource::ServiceArea(area)) => Ok(area.clone()),
            (name, other) => Err(Error::resource_kind(name, "service_area", other.kind())),
        }
    }

    pub fn planning_area(&self, role: &str) -> Result<UssArea> {
        match self.require(role)? {
            (_, Resource::PlanningArea(area)) => Ok(area.clone()),
            (name, other) => Err(Error::resource_kind(name, "planning_area", other.kind())),
        }
    }

    pub fn flight_intents(&self, role: &str) -> Result<Option<FlightIntents>> {
        match self.lookup(role) {
            None => Ok(None),
            Some((_, Resource::FlightIntents(intents))) => Ok(Some(intents.clone())),
            Some((name, other)) => {
                Err(Error::resource_kind(name, "flight_intents", other.kind()))
            }
        }
    }

    pub fn client_identity(&self, role: &str) -> Result<Option<String>> {
        match self.lookup(role) {
            None => Ok(None),
            Some((_, Resource::ClientIdentity(subject))) => Ok(Some(subject.clone())),
            Some((name, other)) => {
                Err(Error::resource_kind(name, "client_identity", other.kind()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCES: &str = r#"
dss:
  type: dss_instance
  participant_id: uss1
  base_url: http://dss1.local
  mock_deployment: pool
others:
  type: dss_instances
  instances:
    - participant_id: uss2
      base_url: http://dss2.local
      mock_deployment: pool
ids:
  type: id_generator
  whoami: uss_qualifier
"#;

    fn pool() -> ResourcePool {
        let specs: BTreeMap<String, ResourceSpec> = serde_yaml::from_str(RESOURCES).unwrap();
        ResourcePool::create(&specs, &Config::default(), Path::new(".")).unwrap()
    }

    #[test]
    fn test_instances_share_mock_deployment() {
        let pool = pool();
        assert!(pool.mock_deployment("pool").is_some());
        assert_eq!(pool.names().count(), 3);
    }

    #[test]
    fn test_bindings_check_kind() {
        let pool = pool();
        let mut mapping = BTreeMap::new();
        mapping.insert("dss".to_string(), "others".to_string());
        let bindings = Bindings::resolve(&pool, "Test", &mapping).unwrap();
        let err = bindings.dss("dss").unwrap_err();
        assert!(matches!(err, Error::ResourceKind { .. }));
        assert!(matches!(
            bindings.id_generator("id_generator").unwrap_err(),
            Error::MissingResource { .. }
        ));
        assert!(bindings.client_identity("client_identity").unwrap().is_none());
    }

    #[test]
    fn test_unknown_resource_name() {
        let pool = pool();
        let mut mapping = BTreeMap::new();
        mapping.insert("dss".to_string(), "nope".to_string());
        assert!(matches!(
            Bindings::resolve(&pool, "Test", &mapping),
            Err(Error::ResourceNotFound(_))
        ));
    }
}
