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

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use avl_client::{BaseLayer, Client, DeviceId, FetchError, HttpSource, MemorySurface, EXPORT_FORMATS};
use eframe::egui;
use log::{info, warn};
use thiserror::Error;

use crate::config::{AppConfig, Overrides};
use crate::map::{MapView, TileManager};

const CONTROLS_WIDTH: f32 = 300.0;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("cannot use tracking server: {0}")]
    Server(#[from] FetchError),

    #[error("failed to create tile client: {0}")]
    Tiles(#[from] reqwest::Error),
}

/// Desktop front end: device controls on the left, map on the right.
///
/// The client's scheduler runs on an owned tokio runtime and draws into the
/// shared surface; the UI only reads the surface and sends commands.
pub struct AvlApp {
    // Dropped before the runtime so the scheduler is cancelled first.
    client: Client,
    surface: Arc<Mutex<MemorySurface>>,
    source: Arc<HttpSource>,
    map: MapView,
    stored_config: AppConfig,
    _runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for AvlApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvlApp")
            .field("client", &self.client)
            .field("server", &self.source.base_url().as_str())
            .finish_non_exhaustive()
    }
}

impl AvlApp {
    pub fn new(stored_config: AppConfig, overrides: &Overrides) -> Result<Self, StartupError> {
        let config = stored_config.with_overrides(overrides);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("avl-worker")
            .enable_all()
            .build()?;

        let source = Arc::new(HttpSource::new(&config.server_url)?);
        let surface = Arc::new(Mutex::new(MemorySurface::new()));
        let client = {
            let _guard = runtime.enter();
            Client::spawn(config.client_config(), Arc::clone(&source), Arc::clone(&surface))
        };
        info!("Following devices from {}", source.base_url());

        let map = MapView::new(TileManager::new()?, config.initial_center(), config.initial_zoom);

        Ok(Self {
            client,
            surface,
            source,
            map,
            stored_config,
            _runtime: runtime,
        })
    }

    fn save_config(&self) {
        if let Err(e) = self.stored_config.save() {
            warn!("Failed to save configuration: {}", e);
        }
    }

    fn draw_controls(&mut self, ui: &mut egui::Ui) {
        let roster = self.client.roster();

        ui.heading("Device");
        ui.add_space(4.0);
        let mut selection = roster.selection.clone();
        egui::ComboBox::from_id_salt("device_select")
            .selected_text(roster.selected_label())
            .width(ui.available_width())
            .show_ui(ui, |ui| {
                for entry in &roster.entries {
                    ui.selectable_value(&mut selection, entry.device_id.clone(), &entry.label);
                }
            });
        if selection != roster.selection {
            self.client.select_device(selection);
        }
        ui.label(format!("{} devices reporting", roster.entries.len().saturating_sub(1)));

        ui.separator();
        ui.heading("Map");
        ui.add_space(4.0);
        let active = self.client.base_layer();
        let mut layer = active;
        egui::ComboBox::from_id_salt("base_layer_select")
            .selected_text(layer.display_name())
            .width(ui.available_width())
            .show_ui(ui, |ui| {
                for option in BaseLayer::ALL {
                    ui.selectable_value(&mut layer, option, option.display_name());
                }
            });
        if layer != active {
            self.client.switch_base_layer(layer);
            self.stored_config.base_layer = layer;
            self.save_config();
        }

        ui.separator();
        if ui
            .checkbox(&mut self.stored_config.show_downloads, "Show downloads")
            .changed()
        {
            self.save_config();
        }
        if self.stored_config.show_downloads {
            match &roster.selection {
                Some(device_id) => self.draw_downloads(ui, device_id),
                None => {
                    ui.weak("Select a device to download its path.");
                }
            }
        }

        ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
            ui.small(format!("Server: {}", self.source.base_url()));
        });
    }

    fn draw_downloads(&self, ui: &mut egui::Ui, device_id: &DeviceId) {
        ui.horizontal_wrapped(|ui| {
            for format in EXPORT_FORMATS {
                if ui.button(format!("Download .{format}")).clicked() {
                    let url = self.source.export_url(format, device_id);
                    info!("Opening {}", url);
                    if let Err(e) = webbrowser::open(url.as_str()) {
                        warn!("Failed to open browser for {}: {}", url, e);
                    }
                }
            }
        });
    }
}

impl eframe::App for AvlApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Overlays change on the scheduler's own cadence
        ctx.request_repaint_after(Duration::from_millis(500));

        egui::SidePanel::left("controls")
            .resizable(false)
            .exact_width(CONTROLS_WIDTH)
            .show(ctx, |ui| self.draw_controls(ui));

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
                self.map.show(ui, &surface);
            });
    }
}
