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

//! Backend wire format and the domain types derived from it.
//!
//! The AVL backend exposes two read endpoints: a roster of location records
//! (one per device, most recently updated first) and a per-device path
//! history. Wire records live in [`wire`]; this module holds the types the
//! rest of the crate works with.

mod wire;

pub use wire::{LocationRecord, PathPointRecord, PathResponse};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{haversine_distance_m, LatLon};

/// Opaque, unique identifier of a tracked device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Latest roster entry for a physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub model: String,
    /// Battery level, 0-100.
    pub battery_percent: u8,
}

impl Device {
    /// Dropdown label, e.g. `Pixel 7 (abc123) - 80%`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({}) - {}%", self.model, self.id, self.battery_percent)
    }
}

impl From<&LocationRecord> for Device {
    fn from(record: &LocationRecord) -> Self {
        Self {
            id: record.device_id.clone(),
            model: record.model.clone(),
            battery_percent: record.battery,
        }
    }
}

/// Most recent known fix for a device.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub device_id: DeviceId,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_percent: u8,
    pub model: String,
}

impl LocationSample {
    #[must_use]
    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }

    /// Multi-line marker label: device, battery and coordinates.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Device: {} ({})\nBattery: {}%\nLat: {}\nLon: {}",
            self.model, self.device_id, self.battery_percent, self.latitude, self.longitude
        )
    }
}

impl From<LocationRecord> for LocationSample {
    fn from(record: LocationRecord) -> Self {
        Self {
            device_id: record.device_id,
            latitude: record.latitude,
            longitude: record.longitude,
            battery_percent: record.battery,
            model: record.model,
        }
    }
}

/// A single recorded point of a device's path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PathPoint {
    #[must_use]
    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }
}

/// Recent movement history of one device, oldest point first.
///
/// Paths are never patched; every fetch replaces the previous one wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub points: Vec<PathPoint>,
    /// Speed reported by the backend, if any.
    pub reported_speed_kmh: Option<f64>,
}

impl Path {
    /// A single point cannot form a line.
    #[must_use]
    pub fn is_drawable(&self) -> bool {
        self.points.len() >= 2
    }

    #[must_use]
    pub fn positions(&self) -> Vec<LatLon> {
        self.points.iter().map(PathPoint::position).collect()
    }

    /// Current speed in km/h.
    ///
    /// Prefers the backend's figure and otherwise estimates it from the last
    /// two timestamped points.
    #[must_use]
    pub fn speed_kmh(&self) -> Option<f64> {
        self.reported_speed_kmh.or_else(|| self.estimated_speed_kmh())
    }

    fn estimated_speed_kmh(&self) -> Option<f64> {
        let [.., previous, last] = self.points.as_slice() else {
            return None;
        };
        let elapsed = (last.timestamp? - previous.timestamp?).num_milliseconds();
        if elapsed <= 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss, reason = "path segments span far less than 2^52 ms")]
        let seconds = elapsed as f64 / 1000.0;
        let meters = haversine_distance_m(previous.position(), last.position());
        Some((meters / seconds * 3.6 * 100.0).round() / 100.0)
    }
}
