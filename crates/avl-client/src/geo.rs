// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Geographic primitives shared by the protocol and surface layers.

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS 84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<(f64, f64)> for LatLon {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

/// Axis-aligned lat/lon rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: LatLon,
    pub north_east: LatLon,
}

impl Bounds {
    /// Smallest bounds containing every point, or `None` for an empty input.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLon>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            south_west: first,
            north_east: first,
        };
        for point in iter {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lon = bounds.south_west.lon.min(point.lon);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lon = bounds.north_east.lon.max(point.lon);
        }
        Some(bounds)
    }

    #[must_use]
    pub fn center(&self) -> LatLon {
        LatLon {
            lat: (self.south_west.lat + self.north_east.lat) / 2.0,
            lon: (self.south_west.lon + self.north_east.lon) / 2.0,
        }
    }
}

/// Great-circle distance between two points using the Haversine formula (in meters).
#[must_use]
pub fn haversine_distance_m(from: LatLon, to: LatLon) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        // Tehran to Isfahan is roughly 340 km
        let distance = haversine_distance_m(LatLon::new(35.6892, 51.3890), LatLon::new(32.6539, 51.6660));
        assert!((distance - 338_000.0).abs() < 5_000.0);
    }

    #[test]
    fn test_bounds_from_points() {
        let bounds = Bounds::from_points([
            LatLon::new(35.72, 51.39),
            LatLon::new(35.70, 51.41),
            LatLon::new(35.71, 51.38),
        ])
        .unwrap();
        assert_eq!(bounds.south_west, LatLon::new(35.70, 51.38));
        assert_eq!(bounds.north_east, LatLon::new(35.72, 51.41));
        let center = bounds.center();
        assert!((center.lat - 35.71).abs() < 1e-9);
        assert!((center.lon - 51.395).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_empty() {
        assert!(Bounds::from_points(std::iter::empty()).is_none());
    }
}
