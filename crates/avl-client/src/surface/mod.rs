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

//! Drawing surface abstraction.
//!
//! The map widget is an external collaborator: the core only needs to add and
//! remove overlays, open a marker's label, move the view and swap background
//! layers. [`MemorySurface`] records all of that in memory; the desktop app
//! paints from it and the tests assert against it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::basemap::BaseLayer;
use crate::geo::{Bounds, LatLon};

/// Handle to an overlay added to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

/// Something drawn on top of the base layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    /// Point marker with a popup label.
    Marker { position: LatLon, label: String },
    /// Connected line through `points`, in order.
    Polyline {
        points: Vec<LatLon>,
        color: [u8; 3],
        label: Option<String>,
    },
}

impl Overlay {
    #[must_use]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker { .. })
    }

    #[must_use]
    pub fn is_polyline(&self) -> bool {
        matches!(self, Self::Polyline { .. })
    }
}

/// Requested change of the visible map area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewChange {
    /// Center on a point at a fixed zoom level.
    Center { center: LatLon, zoom: u8 },
    /// Fit the bounds inside the viewport, keeping `padding` pixels free on every side.
    Fit { bounds: Bounds, padding: f32 },
}

/// Operations the core performs on the map.
pub trait DrawingSurface {
    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId;

    /// Removing an unknown overlay is a no-op.
    fn remove_overlay(&mut self, id: OverlayId);

    /// Show the label of a marker immediately.
    fn open_label(&mut self, id: OverlayId);

    /// Swap `old` for `overlay` in a single update, opening the new
    /// overlay's label if asked. Shared surfaces never expose the state in
    /// between.
    fn replace_overlay(&mut self, old: Option<OverlayId>, overlay: Overlay, open_label: bool) -> OverlayId {
        if let Some(old) = old {
            self.remove_overlay(old);
        }
        let id = self.add_overlay(overlay);
        if open_label {
            self.open_label(id);
        }
        id
    }

    fn set_view(&mut self, center: LatLon, zoom: u8);

    fn fit_bounds(&mut self, bounds: Bounds, padding: f32);

    fn attached_base_layers(&self) -> Vec<BaseLayer>;

    fn attach_base_layer(&mut self, layer: BaseLayer);

    fn detach_base_layer(&mut self, layer: BaseLayer);
}

/// In-memory surface that records overlays, view requests and base layers.
#[derive(Debug, Default)]
pub struct MemorySurface {
    overlays: BTreeMap<OverlayId, Overlay>,
    open_label: Option<OverlayId>,
    base_layers: Vec<BaseLayer>,
    view: Option<ViewChange>,
    view_revision: u64,
    next_id: u64,
}

impl MemorySurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All overlays, oldest first.
    pub fn overlays(&self) -> impl Iterator<Item = (OverlayId, &Overlay)> {
        self.overlays.iter().map(|(id, overlay)| (*id, overlay))
    }

    #[must_use]
    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.overlays.values().filter(|o| o.is_marker()).count()
    }

    #[must_use]
    pub fn polyline_count(&self) -> usize {
        self.overlays.values().filter(|o| o.is_polyline()).count()
    }

    /// Label of the first marker, if any.
    #[must_use]
    pub fn marker_label(&self) -> Option<&str> {
        self.overlays.values().find_map(|o| match o {
            Overlay::Marker { label, .. } => Some(label.as_str()),
            Overlay::Polyline { .. } => None,
        })
    }

    #[must_use]
    pub fn open_label_id(&self) -> Option<OverlayId> {
        self.open_label
    }

    /// Last requested view change.
    #[must_use]
    pub fn view(&self) -> Option<ViewChange> {
        self.view
    }

    /// Incremented on every view request, so renderers can detect new ones.
    #[must_use]
    pub fn view_revision(&self) -> u64 {
        self.view_revision
    }

    fn request_view(&mut self, change: ViewChange) {
        self.view = Some(change);
        self.view_revision += 1;
    }
}

impl DrawingSurface for MemorySurface {
    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
        self.next_id += 1;
        let id = OverlayId(self.next_id);
        self.overlays.insert(id, overlay);
        id
    }

    fn remove_overlay(&mut self, id: OverlayId) {
        self.overlays.remove(&id);
        if self.open_label == Some(id) {
            self.open_label = None;
        }
    }

    fn open_label(&mut self, id: OverlayId) {
        if self.overlays.contains_key(&id) {
            self.open_label = Some(id);
        }
    }

    fn set_view(&mut self, center: LatLon, zoom: u8) {
        self.request_view(ViewChange::Center { center, zoom });
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: f32) {
        self.request_view(ViewChange::Fit { bounds, padding });
    }

    fn attached_base_layers(&self) -> Vec<BaseLayer> {
        self.base_layers.clone()
    }

    fn attach_base_layer(&mut self, layer: BaseLayer) {
        if !self.base_layers.contains(&layer) {
            self.base_layers.push(layer);
        }
    }

    fn detach_base_layer(&mut self, layer: BaseLayer) {
        self.base_layers.retain(|l| *l != layer);
    }
}

/// Shares a surface between the scheduler and whoever paints it.
///
/// Every call takes the lock for its own duration only, so an overlay swap
/// goes through [`DrawingSurface::replace_overlay`] under a single guard. A
/// poisoned lock is recovered.
impl<T: DrawingSurface> DrawingSurface for Arc<Mutex<T>> {
    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
        self.lock().unwrap_or_else(PoisonError::into_inner).add_overlay(overlay)
    }

    fn remove_overlay(&mut self, id: OverlayId) {
        self.lock().unwrap_or_else(PoisonError::into_inner).remove_overlay(id);
    }

    fn open_label(&mut self, id: OverlayId) {
        self.lock().unwrap_or_else(PoisonError::into_inner).open_label(id);
    }

    fn replace_overlay(&mut self, old: Option<OverlayId>, overlay: Overlay, open_label: bool) -> OverlayId {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_overlay(old, overlay, open_label)
    }

    fn set_view(&mut self, center: LatLon, zoom: u8) {
        self.lock().unwrap_or_else(PoisonError::into_inner).set_view(center, zoom);
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: f32) {
        self.lock().unwrap_or_else(PoisonError::into_inner).fit_bounds(bounds, padding);
    }

    fn attached_base_layers(&self) -> Vec<BaseLayer> {
        self.lock().unwrap_or_else(PoisonError::into_inner).attached_base_layers()
    }

    fn attach_base_layer(&mut self, layer: BaseLayer) {
        self.lock().unwrap_or_else(PoisonError::into_inner).attach_base_layer(layer);
    }

    fn detach_base_layer(&mut self, layer: BaseLayer) {
        self.lock().unwrap_or_else(PoisonError::into_inner).detach_base_layer(layer);
    }
}
