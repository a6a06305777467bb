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

//! HTTP implementation of [`DataSource`](super::DataSource).

use std::time::Duration;

use log::debug;
use reqwest::Url;
use serde::de::DeserializeOwned;

use super::{DataSource, FetchError};
use crate::protocol::{DeviceId, LocationRecord, Path, PathResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shapefile components the backend can export for a device.
pub const EXPORT_FORMATS: [&str; 4] = ["shp", "shx", "dbf", "prj"];

/// Reads the backend's `/api/locations/` and `/api/path/{id}/` endpoints.
///
/// No overall request timeout is set: a hung request only delays the cycle
/// that issued it.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSource {
    /// Create a source for the backend at `base_url`, e.g. `http://localhost:8000`.
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("avl-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, base_url)
    }

    /// Create a source reusing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        let invalid = |reason: String| FetchError::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base".to_owned()));
        }
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Roster endpoint URL.
    #[must_use]
    pub fn locations_url(&self) -> Url {
        self.endpoint(&["api", "locations"])
    }

    /// Path endpoint URL for one device. The id is percent-encoded as a single segment.
    #[must_use]
    pub fn path_url(&self, device_id: &DeviceId) -> Url {
        self.endpoint(&["api", "path", device_id.as_str()])
    }

    /// Download link for one exported shapefile component, e.g. `shp`.
    ///
    /// The backend produces the file; this only builds the address.
    #[must_use]
    pub fn export_url(&self, format: &str, device_id: &DeviceId) -> Url {
        let endpoint = format!("export_{format}");
        self.endpoint(&["api", endpoint.as_str(), device_id.as_str()])
    }

    /// Appends `segments` plus a trailing slash to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl DataSource for HttpSource {
    async fn fetch_roster(&self) -> Result<Vec<LocationRecord>, FetchError> {
        self.get_json(self.locations_url()).await
    }

    async fn fetch_location(&self, device_id: &DeviceId) -> Result<Option<LocationRecord>, FetchError> {
        let roster = self.fetch_roster().await?;
        Ok(roster.into_iter().find(|r| &r.device_id == device_id))
    }

    async fn fetch_path(&self, device_id: &DeviceId) -> Result<Path, FetchError> {
        let response: PathResponse = self.get_json(self.path_url(device_id)).await?;
        Ok(response.into())
    }
}
