//! Service and planning areas

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::common::{Error, Result};
use crate::dss::geo::{make_latlng_rect, volume4d};
use crate::dss::types::{LatLngPoint, Volume4D};

/// Region and USS base URL used when creating test entities
#[derive(Debug, Clone, Deserialize)]
pub struct UssArea {
    /// Base URL advertised for created entities; need not resolve
    pub base_url: String,

    /// 2D outline of the area
    pub footprint: Vec<LatLngPoint>,

    /// Meters above the WGS84 ellipsoid
    #[serde(default)]
    pub altitude_min: f64,

    #[serde(default = "default_altitude_max")]
    pub altitude_max: f64,

    /// Delay between scenario start and the start of created entities
    #[serde(default)]
    pub time_start_offset_s: i64,

    /// Lifetime of created entities
    #[serde(default = "default_duration")]
    pub duration_s: i64,
}

fn default_altitude_max() -> f64 {
    3048.0
}

fn default_duration() -> i64 {
    15 * 60
}

impl UssArea {
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| Error::Config(format!("Area '{}': {}", name, reason));
        if self.footprint.len() < 3 {
            return Err(invalid("footprint needs at least 3 vertices"));
        }
        if self.altitude_min >= self.altitude_max {
            return Err(invalid("altitude_min must be below altitude_max"));
        }
        if self.duration_s <= 0 {
            return Err(invalid("duration_s must be positive"));
        }
        Ok(())
    }

    pub fn time_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.time_start_offset_s)
    }

    pub fn time_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.time_start(now) + Duration::seconds(self.duration_s)
    }

    /// Volume over the whole area between `start` and `end`
    pub fn volume(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Volume4D {
        volume4d(
            &self.footprint,
            self.altitude_min,
            self.altitude_max,
            start,
            end,
        )
    }

    /// Volume over the whole area for the default lifetime starting at `now`
    pub fn default_volume(&self, now: DateTime<Utc>) -> Volume4D {
        self.volume(self.time_start(now), self.time_end(now))
    }

    /// Volume over the whole area with no time bounds, for queries of active entities
    pub fn search_volume(&self) -> Volume4D {
        let now = Utc::now();
        Volume4D {
            time_start: None,
            time_end: None,
            ..self.volume(now, now)
        }
    }

    /// Rectangle enclosing the footprint, for area searches
    pub fn rect(&self) -> Vec<LatLngPoint> {
        make_latlng_rect(&self.footprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> UssArea {
        serde_yaml::from_str(
            r#"
base_url: https://testdummy.interuss.org/rid
footprint:
  - {lat: 37.1, lng: -118.9}
  - {lat: 37.2, lng: -118.9}
  - {lat: 37.2, lng: -118.8}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let area = area();
        assert_eq!(area.altitude_max, 3048.0);
        assert_eq!(area.duration_s, 900);
        assert!(area.validate("service_area").is_ok());
    }

    #[test]
    fn test_volume_times() {
        let mut area = area();
        area.time_start_offset_s = 60;
        let now = Utc::now();
        let v = area.default_volume(now);
        assert_eq!(v.start(), Some(now + Duration::seconds(60)));
        assert_eq!(v.end(), Some(now + Duration::seconds(960)));
    }

    #[test]
    fn test_search_volume_is_untimed() {
        let v = area().search_volume();
        assert!(v.start().is_none() && v.end().is_none());
        assert!(v.bounding_box().is_some());
    }

    #[test]
    fn test_degenerate_area_rejected() {
        let mut area = area();
        area.footprint.truncate(2);
        assert!(area.validate("service_area").is_err());
    }
}
