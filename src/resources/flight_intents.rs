//! Flight intent fixtures
//!
//! Intents are written relative to the moment they are resolved so that the
//! same fixture file produces valid, future operational intents on every run.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::common::{Error, Result};
use crate::dss::geo::volume4d;
use crate::dss::types::{LatLngPoint, OperationalIntentState, Volume4D};

#[derive(Debug, Clone, Deserialize)]
pub struct IntentVolume {
    pub footprint: Vec<LatLngPoint>,
    #[serde(default)]
    pub altitude_min: f64,
    pub altitude_max: f64,
    /// Seconds after resolution time
    #[serde(default)]
    pub start_offset_s: i64,
    pub duration_s: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightIntent {
    #[serde(default = "default_state")]
    pub state: OperationalIntentState,
    #[serde(default)]
    pub priority: i32,
    pub volumes: Vec<IntentVolume>,
}

fn default_state() -> OperationalIntentState {
    OperationalIntentState::Accepted
}

impl FlightIntent {
    /// Volumes with absolute times, shifted to start after `t0`
    pub fn resolve(&self, t0: DateTime<Utc>) -> Vec<Volume4D> {
        self.volumes
            .iter()
            .map(|v| {
                let start = t0 + Duration::seconds(v.start_offset_s);
                volume4d(
                    &v.footprint,
                    v.altitude_min,
                    v.altitude_max,
                    start,
                    start + Duration::seconds(v.duration_s),
                )
            })
            .collect()
    }
}

/// On-disk layout of a flight intents file
#[derive(Debug, Clone, Deserialize)]
pub struct FlightIntentCollection {
    pub intents: BTreeMap<String, FlightIntent>,
}

#[derive(Debug, Clone)]
pub struct FlightIntents {
    intents: BTreeMap<String, FlightIntent>,
    planning_time: Duration,
}

impl FlightIntents {
    pub fn new(intents: BTreeMap<String, FlightIntent>, planning_time_s: i64) -> Result<Self> {
        for (id, intent) in &intents {
            if intent.volumes.is_empty() {
                return Err(Error::Config(format!("Flight intent '{}' has no volumes", id)));
            }
            if let Some(v) = intent
                .volumes
                .iter()
                .find(|v| v.footprint.len() < 3 || v.duration_s <= 0)
            {
                return Err(Error::Config(format!(
                    "Flight intent '{}' has an invalid volume (footprint of {} vertices, duration {}s)",
                    id,
                    v.footprint.len(),
                    v.duration_s
                )));
            }
        }
        Ok(Self {
            intents,
            planning_time: Duration::seconds(planning_time_s),
        })
    }

    /// Load intents from a YAML file
    pub fn load(path: &Path, planning_time_s: i64) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let collection: FlightIntentCollection =
            serde_yaml::from_str(&content).map_err(|e| Error::SuiteParse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::new(collection.intents, planning_time_s)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.intents.keys().map(|k| k.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&FlightIntent> {
        self.intents.get(id)
    }

    /// Intent `id` with its volumes resolved against the current time
    pub fn resolve(&self, id: &str) -> Option<(OperationalIntentState, Vec<Volume4D>)> {
        let t0 = Utc::now() + self.planning_time;
        self.intents.get(id).map(|i| (i.state, i.resolve(t0)))
    }
}
