//! Geometry helpers for DSS volumes
//!
//! Areas are compared by their latitude/longitude bounding boxes. This is what
//! both the in-memory deployment and the scenario validators need: an entity
//! "overlaps" a subscription when the boxes, the altitude ranges and the time
//! windows all intersect.

use chrono::{DateTime, Utc};

use super::types::{Altitude, LatLngPoint, Polygon, Time, Volume3D, Volume4D};

/// Axis-aligned latitude/longitude box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl BoundingBox {
    /// Box enclosing all the given points, `None` when there are none
    pub fn of(points: &[LatLngPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            lat_min: first.lat,
            lat_max: first.lat,
            lng_min: first.lng,
            lng_max: first.lng,
        };
        for p in &points[1..] {
            bbox.lat_min = bbox.lat_min.min(p.lat);
            bbox.lat_max = bbox.lat_max.max(p.lat);
            bbox.lng_min = bbox.lng_min.min(p.lng);
            bbox.lng_max = bbox.lng_max.max(p.lng);
        }
        Some(bbox)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.lat_min <= other.lat_max
            && other.lat_min <= self.lat_max
            && self.lng_min <= other.lng_max
            && other.lng_min <= self.lng_max
    }

    /// Four corners, counter-clockwise from the south-west one
    pub fn corners(&self) -> Vec<LatLngPoint> {
        vec![
            LatLngPoint {
                lat: self.lat_min,
                lng: self.lng_min,
            },
            LatLngPoint {
                lat: self.lat_min,
                lng: self.lng_max,
            },
            LatLngPoint {
                lat: self.lat_max,
                lng: self.lng_max,
            },
            LatLngPoint {
                lat: self.lat_max,
                lng: self.lng_min,
            },
        ]
    }
}

/// Rectangle polygon enclosing the footprint
pub fn make_latlng_rect(footprint: &[LatLngPoint]) -> Vec<LatLngPoint> {
    BoundingBox::of(footprint)
        .map(|b| b.corners())
        .unwrap_or_default()
}

/// Build a 4D volume from a footprint, altitude bounds and a time window
pub fn volume4d(
    footprint: &[LatLngPoint],
    altitude_min: f64,
    altitude_max: f64,
    time_start: DateTime<Utc>,
    time_end: DateTime<Utc>,
) -> Volume4D {
    Volume4D {
        volume: Volume3D {
            outline_polygon: Some(Polygon {
                vertices: footprint.to_vec(),
            }),
            altitude_lower: Some(Altitude::w84m(altitude_min)),
            altitude_upper: Some(Altitude::w84m(altitude_max)),
        },
        time_start: Some(Time::from(time_start)),
        time_end: Some(Time::from(time_end)),
    }
}

impl Volume4D {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.volume
            .outline_polygon
            .as_ref()
            .and_then(|p| BoundingBox::of(&p.vertices))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.time_start.map(|t| t.value)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.time_end.map(|t| t.value)
    }

    /// Whether the two volumes share some point in space and time
    ///
    /// Missing altitude or time bounds are treated as unbounded. A volume
    /// without an outline intersects nothing.
    pub fn intersects(&self, other: &Volume4D) -> bool {
        let (Some(a), Some(b)) = (self.bounding_box(), other.bounding_box()) else {
            return false;
        };
        a.intersects(&b)
            && ranges_overlap(
                self.volume.altitude_lower.as_ref().map(|a| a.value),
                self.volume.altitude_upper.as_ref().map(|a| a.value),
                other.volume.altitude_lower.as_ref().map(|a| a.value),
                other.volume.altitude_upper.as_ref().map(|a| a.value),
            )
            && ranges_overlap(self.start(), self.end(), other.start(), other.end())
    }
}

/// Overlap of two closed ranges whose bounds may be open-ended
fn ranges_overlap<T: PartialOrd>(
    a_lo: Option<T>,
    a_hi: Option<T>,
    b_lo: Option<T>,
    b_hi: Option<T>,
) -> bool {
    let a_before_b = matches!((&a_hi, &b_lo), (Some(hi), Some(lo)) if hi < lo);
    let b_before_a = matches!((&b_hi, &a_lo), (Some(hi), Some(lo)) if hi < lo);
    !a_before_b && !b_before_a
}

/// Bounding box enclosing all the given volumes
pub fn union_bounding_box(volumes: &[Volume4D]) -> Option<BoundingBox> {
    let corners: Vec<LatLngPoint> = volumes
        .iter()
        .filter_map(|v| v.bounding_box())
        .flat_map(|b| b.corners())
        .collect();
    BoundingBox::of(&corners)
}

/// Earliest start and latest end across the given volumes
pub fn time_bounds(volumes: &[Volume4D]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = volumes.iter().filter_map(|v| v.start()).min()?;
    let end = volumes.iter().filter_map(|v| v.end()).max()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn square(lat: f64, lng: f64, size: f64) -> Vec<LatLngPoint> {
        vec![
            LatLngPoint { lat, lng },
            LatLngPoint {
                lat,
                lng: lng + size,
            },
            LatLngPoint {
                lat: lat + size,
                lng: lng + size,
            },
            LatLngPoint {
                lat: lat + size,
                lng,
            },
        ]
    }

    #[test]
    fn test_overlap_requires_space_altitude_and_time() {
        let now = Utc::now();
        let hour = Duration::hours(1);
        let a = volume4d(&square(46.0, 7.0, 0.1), 0.0, 100.0, now, now + hour);

        let same = volume4d(&square(46.05, 7.05, 0.1), 50.0, 150.0, now, now + hour);
        assert!(a.intersects(&same));

        let far = volume4d(&square(47.0, 7.0, 0.1), 0.0, 100.0, now, now + hour);
        assert!(!a.intersects(&far));

        let above = volume4d(&square(46.0, 7.0, 0.1), 200.0, 300.0, now, now + hour);
        assert!(!a.intersects(&above));

        let later = volume4d(
            &square(46.0, 7.0, 0.1),
            0.0,
            100.0,
            now + hour * 2,
            now + hour * 3,
        );
        assert!(!a.intersects(&later));
    }

    #[test]
    fn test_open_ended_time_overlaps_everything() {
        let now = Utc::now();
        let a = volume4d(&square(46.0, 7.0, 0.1), 0.0, 100.0, now, now);
        let mut b = a.clone();
        b.time_start = None;
        b.time_end = None;
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_rect_encloses_footprint() {
        let triangle = vec![
            LatLngPoint { lat: 1.0, lng: 1.0 },
            LatLngPoint { lat: 3.0, lng: 2.0 },
            LatLngPoint { lat: 2.0, lng: 4.0 },
        ];
        let rect = make_latlng_rect(&triangle);
        assert_eq!(rect.len(), 4);
        assert_eq!(rect[0], LatLngPoint { lat: 1.0, lng: 1.0 });
        assert_eq!(rect[2], LatLngPoint { lat: 3.0, lng: 4.0 });
        assert!(make_latlng_rect(&[]).is_empty());
    }

    #[test]
    fn test_time_bounds_across_volumes() {
        let now = Utc::now();
        let a = volume4d(&square(0.0, 0.0, 1.0), 0.0, 1.0, now, now + Duration::minutes(5));
        let b = volume4d(
            &square(0.0, 0.0, 1.0),
            0.0,
            1.0,
            now - Duration::minutes(1),
            now + Duration::minutes(2),
        );
        let (start, end) = time_bounds(&[a, b]).unwrap();
        assert_eq!(start, now - Duration::minutes(1));
        assert_eq!(end, now + Duration::minutes(5));
    }
}
