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

//! JSON records as served by the backend.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::{DeviceId, Path, PathPoint};

/// One roster entry from `GET /api/locations/`.
///
/// The location fields are unused by the roster view but carry the current
/// fix when the record is used as a device's location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationRecord {
    pub device_id: DeviceId,
    pub model: String,
    #[serde(deserialize_with = "deserialize_battery")]
    pub battery: u8,
    pub latitude: f64,
    pub longitude: f64,
}

/// One point from `GET /api/path/{device_id}/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PathPointRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Path endpoint payload.
///
/// Older servers answer with a bare array of points; newer ones wrap the
/// points together with a speed estimate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathResponse {
    Points(Vec<PathPointRecord>),
    Detailed {
        points: Vec<PathPointRecord>,
        #[serde(default)]
        speed_kmh: Option<f64>,
    },
}

impl From<PathResponse> for Path {
    fn from(response: PathResponse) -> Self {
        let (points, reported_speed_kmh) = match response {
            PathResponse::Detailed { points, speed_kmh } => (points, speed_kmh),
            PathResponse::Points(points) => (points, None),
        };
        Self {
            points: points
                .into_iter()
                .map(|p| PathPoint {
                    latitude: p.latitude,
                    longitude: p.longitude,
                    timestamp: p.timestamp,
                })
                .collect(),
            reported_speed_kmh,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBattery {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Accepts integer, float or numeric-string battery levels, truncated and
/// clamped to 0-100.
#[allow(clippy::cast_possible_truncation, reason = "floats are clamped to 0-100 before the cast")]
fn deserialize_battery<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match RawBattery::deserialize(deserializer)? {
        RawBattery::Integer(v) => v,
        RawBattery::Float(v) => v.trunc().clamp(0.0, 100.0) as i64,
        RawBattery::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(serde::de::Error::custom)?
            .trunc()
            .clamp(0.0, 100.0) as i64,
    };
    Ok(u8::try_from(value.clamp(0, 100)).unwrap_or(100))
}

/// Accepts RFC 3339 timestamps as well as naive ISO-8601 ones (taken as UTC).
/// Unparseable values are dropped rather than failing the whole record.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
