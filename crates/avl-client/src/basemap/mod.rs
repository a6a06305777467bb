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

//! Background tile layers and the switcher that keeps exactly one attached.

use std::fmt;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::surface::DrawingSurface;

/// Available background layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseLayer {
    /// OpenStreetMap standard tiles.
    #[default]
    Osm,
    /// Esri World Imagery.
    Satellite,
}

impl BaseLayer {
    pub const ALL: [Self; 2] = [Self::Osm, Self::Satellite];

    /// Name used in configuration and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Osm => "osm",
            Self::Satellite => "satellite",
        }
    }

    /// Human-readable name for the layer selector.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Osm => "OpenStreetMap",
            Self::Satellite => "Satellite",
        }
    }

    /// Tile URL for the given slippy-map tile.
    #[must_use]
    pub fn tile_url(&self, x: u32, y: u32, zoom: u8) -> String {
        match self {
            Self::Osm => {
                // Subdomain load balancing (a, b, c) based on tile coordinates
                let subdomain = ['a', 'b', 'c'][((x + y) % 3) as usize];
                format!("https://{subdomain}.tile.openstreetmap.org/{zoom}/{x}/{y}.png")
            }
            Self::Satellite => format!(
                "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{zoom}/{y}/{x}"
            ),
        }
    }

    #[must_use]
    pub fn attribution(&self) -> &'static str {
        match self {
            Self::Osm => "© OpenStreetMap contributors",
            Self::Satellite => {
                "© Esri, i-cubed, USDA, USGS, AEX, GeoEye, Getmapping, Aerogrid, IGN, IGP, UPR-EGP, and the GIS User Community"
            }
        }
    }

    #[must_use]
    pub fn max_zoom(&self) -> u8 {
        19
    }
}

impl fmt::Display for BaseLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown base layer '{0}' (expected 'osm' or 'satellite')")]
pub struct ParseBaseLayerError(String);

impl FromStr for BaseLayer {
    type Err = ParseBaseLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "osm" => Ok(Self::Osm),
            "satellite" => Ok(Self::Satellite),
            _ => Err(ParseBaseLayerError(s.to_owned())),
        }
    }
}

/// Owns the choice of background layer.
#[derive(Debug)]
pub struct BaseLayerSwitcher {
    active: BaseLayer,
}

impl BaseLayerSwitcher {
    /// Attach `initial` to the surface, replacing whatever was attached.
    pub fn new<D: DrawingSurface + ?Sized>(surface: &mut D, initial: BaseLayer) -> Self {
        let mut switcher = Self { active: initial };
        switcher.switch(surface, initial);
        switcher
    }

    #[must_use]
    pub fn active(&self) -> BaseLayer {
        self.active
    }

    /// Detach every attached background layer, then attach `layer`.
    ///
    /// Requesting the active layer again re-attaches it, which is harmless.
    pub fn switch<D: DrawingSurface + ?Sized>(&mut self, surface: &mut D, layer: BaseLayer) {
        for attached in surface.attached_base_layers() {
            surface.detach_base_layer(attached);
        }
        surface.attach_base_layer(layer);
        if self.active != layer {
            info!("Base layer switched from {} to {}", self.active, layer);
        }
        self.active = layer;
    }
}
