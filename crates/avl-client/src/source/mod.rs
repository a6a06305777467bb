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

//! Data source adapter.
//!
//! [`DataSource`] is the read-only view of the backend the rest of the crate
//! depends on; [`HttpSource`] implements it over the backend's JSON API.

mod http;

pub use http::{HttpSource, EXPORT_FORMATS};

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::{DeviceId, LocationRecord, Path};

/// Errors that can occur while reading from the backend.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read access to device rosters, current locations and path histories.
///
/// Implementations are shared between concurrently running fetch tasks.
pub trait DataSource: Send + Sync + 'static {
    /// Every known device with its latest fix, in server order.
    fn fetch_roster(&self) -> impl Future<Output = Result<Vec<LocationRecord>, FetchError>> + Send;

    /// Current fix for one device, `None` if the backend does not know it.
    fn fetch_location(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<Option<LocationRecord>, FetchError>> + Send;

    /// Recent path of one device, oldest point first.
    fn fetch_path(&self, device_id: &DeviceId) -> impl Future<Output = Result<Path, FetchError>> + Send;
}

impl<T: DataSource> DataSource for Arc<T> {
    fn fetch_roster(&self) -> impl Future<Output = Result<Vec<LocationRecord>, FetchError>> + Send {
        (**self).fetch_roster()
    }

    fn fetch_location(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<Option<LocationRecord>, FetchError>> + Send {
        (**self).fetch_location(device_id)
    }

    fn fetch_path(&self, device_id: &DeviceId) -> impl Future<Output = Result<Path, FetchError>> + Send {
        (**self).fetch_path(device_id)
    }
}
