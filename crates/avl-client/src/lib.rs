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

//! Client library for AVL (automatic vehicle location) device maps.
//!
//! This library keeps a map in step with a tracking backend that reports the
//! latest fix and recent path of every registered device. It is split into
//! layers that can be used on their own or composed through [`Client`]:
//!
//! - **Source layer**: Typed access to the backend's JSON API ([`source`])
//! - **Roster layer**: Device list reconciliation that preserves the user's
//!   selection across refreshes ([`roster`])
//! - **Render layer**: Marker and path overlays for the selected device, with
//!   stale responses discarded ([`render`])
//! - **Surface layer**: The drawing abstraction overlays are placed on
//!   ([`surface`]) and the base layer switcher ([`basemap`])
//! - **Scheduler**: Two fixed-interval refresh cycles plus user commands,
//!   serialized on a single task ([`scheduler`])
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! use avl_client::{Client, ClientConfig, HttpSource, MemorySurface};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let source = HttpSource::new("http://localhost:8000").expect("valid URL");
//!     let surface = Arc::new(Mutex::new(MemorySurface::new()));
//!     let client = Client::spawn(ClientConfig::default(), source, Arc::clone(&surface));
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     let roster = client.roster();
//!     if let Some(first) = roster.entries.iter().find_map(|e| e.device_id.clone()) {
//!         client.select_device(Some(first));
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Roster Layer Only
//!
//! ```
//! use avl_client::protocol::{Device, DeviceId};
//! use avl_client::roster::RosterReconciler;
//!
//! let mut roster = RosterReconciler::new();
//! roster.reconcile(&[Device {
//!     id: DeviceId::from("abc123"),
//!     model: "Pixel 7".to_string(),
//!     battery_percent: 80,
//! }]);
//! roster.select(Some(DeviceId::from("abc123"))).unwrap();
//!
//! assert_eq!(roster.snapshot().selected_label(), "Pixel 7 (abc123) - 80%");
//! ```

pub mod basemap;
pub mod geo;
pub mod protocol;
pub mod render;
pub mod roster;
pub mod scheduler;
pub mod source;
pub mod surface;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub use basemap::{BaseLayer, BaseLayerSwitcher, ParseBaseLayerError};
pub use geo::{Bounds, LatLon};
pub use protocol::{Device, DeviceId, LocationSample, Path, PathPoint};
pub use render::{PositionRenderer, RenderSettings};
pub use roster::{RosterEntry, RosterReconciler, RosterSnapshot, SelectError};
pub use scheduler::{Command, Scheduler};
pub use source::{DataSource, FetchError, HttpSource, EXPORT_FORMATS};
pub use surface::{DrawingSurface, MemorySurface, Overlay, OverlayId, ViewChange};

/// Configuration for the full-stack client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Period of the roster refresh cycle.
    pub roster_interval: Duration,
    /// Period of the marker and path refresh cycle.
    pub render_interval: Duration,
    /// Zoom and padding used when placing overlays.
    pub render: RenderSettings,
    /// Base layer attached at startup.
    pub initial_base_layer: BaseLayer,
    /// Buffer size of the command and completion channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            roster_interval: Duration::from_secs(10),
            render_interval: Duration::from_secs(5),
            render: RenderSettings::default(),
            initial_base_layer: BaseLayer::default(),
            channel_capacity: 64,
        }
    }
}

/// Full-stack client that wires all layers together.
///
/// Owns the handles of a background [`Scheduler`]. Dropping the client stops
/// the scheduler; overlays already drawn stay on the surface.
pub struct Client {
    commands: mpsc::Sender<Command>,
    roster: watch::Receiver<RosterSnapshot>,
    base_layer: watch::Receiver<BaseLayer>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Spawn the scheduler on the current tokio runtime.
    ///
    /// The initial base layer is attached to `surface` right away; the first
    /// roster and render cycles run as soon as the runtime polls the task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    #[must_use]
    pub fn spawn<S, D>(config: ClientConfig, source: S, surface: D) -> Self
    where
        S: DataSource,
        D: DrawingSurface + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let (scheduler, handles) =
            Scheduler::new(&config, Arc::new(source), surface, cancel_token.clone());
        tokio::spawn(scheduler.run());

        Self {
            commands: handles.commands,
            roster: handles.roster,
            base_layer: handles.base_layer,
            cancel_token,
        }
    }

    /// Ask the scheduler to display `device_id`, or nothing for `None`.
    ///
    /// Unknown ids are rejected by the scheduler and leave the selection as is.
    pub fn select_device(&self, device_id: Option<DeviceId>) {
        self.send(Command::Select(device_id));
    }

    /// Ask the scheduler to swap the background layer.
    pub fn switch_base_layer(&self, layer: BaseLayer) {
        self.send(Command::SwitchBaseLayer(layer));
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.try_send(command) {
            warn!("Dropping command: {}", e);
        }
    }

    /// Latest published roster.
    #[must_use]
    pub fn roster(&self) -> RosterSnapshot {
        self.roster.borrow().clone()
    }

    /// Currently selected device.
    #[must_use]
    pub fn selection(&self) -> Option<DeviceId> {
        self.roster.borrow().selection.clone()
    }

    /// Currently attached base layer.
    #[must_use]
    pub fn base_layer(&self) -> BaseLayer {
        *self.base_layer.borrow()
    }

    /// Receiver that is notified whenever the roster or selection changes.
    #[must_use]
    pub fn subscribe_roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster.clone()
    }

    /// Stop the scheduler.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
