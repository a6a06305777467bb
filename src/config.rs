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

//! Application configuration management.
//!
//! Settings are persisted in TOML format through `confy`. Only settings live
//! here; device rosters and paths are always fetched fresh from the server.

use std::time::Duration;

use avl_client::{BaseLayer, ClientConfig, LatLon, RenderSettings};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "avl-desktop";
const CONFIG_NAME: &str = "config";

/// Default tracking server.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the tracking server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Seconds between device list refreshes
    #[serde(default = "default_roster_interval_secs")]
    pub roster_interval_secs: u64,

    /// Seconds between marker and path refreshes
    #[serde(default = "default_render_interval_secs")]
    pub render_interval_secs: u64,

    /// Background layer shown at startup
    #[serde(default)]
    pub base_layer: BaseLayer,

    /// Map center at startup as (latitude, longitude)
    #[serde(default = "default_initial_center")]
    pub initial_center: (f64, f64),

    /// Map zoom at startup
    #[serde(default = "default_initial_zoom")]
    pub initial_zoom: u8,

    /// Show shapefile download links for the selected device
    #[serde(default)]
    pub show_downloads: bool,
}

// Default value functions for serde
fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_roster_interval_secs() -> u64 {
    10
}

fn default_render_interval_secs() -> u64 {
    5
}

fn default_initial_center() -> (f64, f64) {
    (35.7246, 51.3876)
}

fn default_initial_zoom() -> u8 {
    18
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            roster_interval_secs: default_roster_interval_secs(),
            render_interval_secs: default_render_interval_secs(),
            base_layer: BaseLayer::default(),
            initial_center: default_initial_center(),
            initial_zoom: default_initial_zoom(),
            show_downloads: false,
        }
    }
}

/// Command line overrides that apply to a single run and are never saved.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub base_layer: Option<BaseLayer>,
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Copy of this configuration with `overrides` applied.
    #[must_use]
    pub fn with_overrides(&self, overrides: &Overrides) -> Self {
        let mut effective = self.clone();
        if let Some(server_url) = &overrides.server_url {
            effective.server_url.clone_from(server_url);
        }
        if let Some(base_layer) = overrides.base_layer {
            effective.base_layer = base_layer;
        }
        effective
    }

    #[must_use]
    pub fn initial_center(&self) -> LatLon {
        LatLon::from(self.initial_center)
    }

    /// Scheduler settings derived from this configuration.
    ///
    /// Zero intervals are raised to one second.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            roster_interval: Duration::from_secs(self.roster_interval_secs.max(1)),
            render_interval: Duration::from_secs(self.render_interval_secs.max(1)),
            render: RenderSettings::default(),
            initial_base_layer: self.base_layer,
            ..ClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"server_url": "http://avl.local:9000"}"#).unwrap();
        assert_eq!(config.server_url, "http://avl.local:9000");
        assert_eq!(config.roster_interval_secs, 10);
        assert_eq!(config.render_interval_secs, 5);
        assert_eq!(config.base_layer, BaseLayer::Osm);
        assert_eq!(config.initial_zoom, 18);
        assert!(!config.show_downloads);
    }

    #[test]
    fn test_base_layer_is_stored_lowercase() {
        let config = AppConfig {
            base_layer: BaseLayer::Satellite,
            ..AppConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["base_layer"], "satellite");
    }

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let stored = AppConfig::default();
        let effective = stored.with_overrides(&Overrides {
            server_url: None,
            base_layer: Some(BaseLayer::Satellite),
        });
        assert_eq!(effective.server_url, DEFAULT_SERVER_URL);
        assert_eq!(effective.base_layer, BaseLayer::Satellite);

        let effective = stored.with_overrides(&Overrides {
            server_url: Some("http://10.0.0.5:8000".to_string()),
            base_layer: None,
        });
        assert_eq!(effective.server_url, "http://10.0.0.5:8000");
        assert_eq!(effective.base_layer, BaseLayer::Osm);
    }

    #[test]
    fn test_client_config() {
        let config = AppConfig {
            roster_interval_secs: 30,
            render_interval_secs: 0,
            base_layer: BaseLayer::Satellite,
            ..AppConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.roster_interval, Duration::from_secs(30));
        assert_eq!(client.render_interval, Duration::from_secs(1));
        assert_eq!(client.initial_base_layer, BaseLayer::Satellite);
        assert_eq!(client.render.focus_zoom, 18);
    }
}
