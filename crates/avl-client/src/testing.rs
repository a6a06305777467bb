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

//! Scripted data source for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::protocol::{DeviceId, LocationRecord, Path, PathPoint};
use crate::source::{DataSource, FetchError};

pub(crate) fn record(id: &str, lat: f64, lon: f64, battery: u8) -> LocationRecord {
    LocationRecord {
        device_id: DeviceId::from(id),
        model: format!("Model-{id}"),
        battery,
        latitude: lat,
        longitude: lon,
    }
}

/// In-memory backend whose answers can be changed, failed or held back.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSource {
    roster: Mutex<Vec<LocationRecord>>,
    roster_fails: AtomicBool,
    paths: Mutex<HashMap<DeviceId, Vec<(f64, f64)>>>,
    location_gates: Mutex<HashMap<DeviceId, Arc<Semaphore>>>,
}

impl ScriptedSource {
    pub(crate) fn new(roster: Vec<LocationRecord>) -> Self {
        let source = Self::default();
        source.set_roster(roster);
        source
    }

    pub(crate) fn set_roster(&self, roster: Vec<LocationRecord>) {
        *self.roster.lock().unwrap() = roster;
    }

    pub(crate) fn fail_roster(&self, fail: bool) {
        self.roster_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_path(&self, id: &str, points: &[(f64, f64)]) {
        self.paths
            .lock()
            .unwrap()
            .insert(DeviceId::from(id), points.to_vec());
    }

    /// Hold back location answers for `id` until a permit is added to the
    /// returned semaphore.
    pub(crate) fn gate_location(&self, id: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.location_gates
            .lock()
            .unwrap()
            .insert(DeviceId::from(id), Arc::clone(&gate));
        gate
    }
}

impl DataSource for ScriptedSource {
    async fn fetch_roster(&self) -> Result<Vec<LocationRecord>, FetchError> {
        if self.roster_fails.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                url: "scripted:/api/locations/".to_string(),
                status: 503,
            });
        }
        Ok(self.roster.lock().unwrap().clone())
    }

    async fn fetch_location(&self, device_id: &DeviceId) -> Result<Option<LocationRecord>, FetchError> {
        let gate = self.location_gates.lock().unwrap().get(device_id).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let roster = self.roster.lock().unwrap().clone();
        Ok(roster.into_iter().find(|r| &r.device_id == device_id))
    }

    async fn fetch_path(&self, device_id: &DeviceId) -> Result<Path, FetchError> {
        let points = self
            .paths
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_default();
        Ok(Path {
            points: points
                .into_iter()
                .map(|(latitude, longitude)| PathPoint {
                    latitude,
                    longitude,
                    timestamp: None,
                })
                .collect(),
            reported_speed_kmh: None,
        })
    }
}
