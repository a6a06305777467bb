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

//! Position and path rendering for the selected device.
//!
//! A refresh issues two independent fetches (current location and path
//! history) as background tasks. Each completion carries the device it was
//! requested for and is applied through [`PositionRenderer::apply`], which
//! discards it if the selection has moved on in the meantime. That check is
//! the only thing standing between a slow response and a stale overlay; there
//! is no cancellation of in-flight requests.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::geo::Bounds;
use crate::protocol::{DeviceId, LocationSample, Path};
use crate::source::{DataSource, FetchError};
use crate::surface::{DrawingSurface, Overlay, OverlayId};

/// Path stroke colour.
pub const PATH_COLOR: [u8; 3] = [0, 0, 255];

/// View parameters used when drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Zoom level used when centering on a newly placed marker.
    pub focus_zoom: u8,
    /// Pixels kept free around a fitted path.
    pub fit_padding: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            focus_zoom: 18,
            fit_padding: 50.0,
        }
    }
}

/// Result of a background fetch, tagged with the device it was issued for.
#[derive(Debug)]
pub enum FetchCompletion {
    Location {
        requested_for: DeviceId,
        result: Result<Option<LocationSample>, FetchError>,
    },
    Path {
        requested_for: DeviceId,
        result: Result<Path, FetchError>,
    },
}

impl FetchCompletion {
    #[must_use]
    pub fn requested_for(&self) -> &DeviceId {
        match self {
            Self::Location { requested_for, .. } | Self::Path { requested_for, .. } => requested_for,
        }
    }
}

/// What applying a completion did to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First marker for this device; the view was centered on it.
    MarkerPlaced,
    /// Existing marker swapped for an updated one.
    MarkerReplaced,
    /// Backend did not know the device; prior marker kept.
    NoLocation,
    /// Path polyline (re)drawn and the view fitted to it.
    PathDrawn,
    /// Fewer than two points; nothing drawn.
    PathTooShort,
    /// Fetch failed; prior overlays kept.
    FetchFailed,
    /// Selection changed since the request was issued; discarded.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TaggedOverlay {
    device_id: DeviceId,
    overlay: OverlayId,
}

/// Overlays currently owned by the renderer: at most one marker and one path.
#[derive(Debug, Default)]
pub struct RenderState {
    marker: Option<TaggedOverlay>,
    path: Option<TaggedOverlay>,
}

impl RenderState {
    /// Device the marker was drawn for.
    #[must_use]
    pub fn marker_tag(&self) -> Option<&DeviceId> {
        self.marker.as_ref().map(|t| &t.device_id)
    }

    /// Device the path was drawn for.
    #[must_use]
    pub fn path_tag(&self) -> Option<&DeviceId> {
        self.path.as_ref().map(|t| &t.device_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marker.is_none() && self.path.is_none()
    }
}

/// Owner of the selected device's marker and path overlays.
pub struct PositionRenderer<S> {
    source: Arc<S>,
    completions: mpsc::Sender<FetchCompletion>,
    settings: RenderSettings,
    state: RenderState,
}

impl<S> std::fmt::Debug for PositionRenderer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRenderer")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S: DataSource> PositionRenderer<S> {
    /// Completions of the fetches issued by [`refresh`](Self::refresh) are sent
    /// to `completions`; feed them back through [`apply`](Self::apply).
    pub fn new(source: Arc<S>, completions: mpsc::Sender<FetchCompletion>, settings: RenderSettings) -> Self {
        Self {
            source,
            completions,
            settings,
            state: RenderState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Bring the overlays in line with `selected` and fetch fresh data for it.
    ///
    /// Overlays for any other device are removed right away. With no selection
    /// everything is cleared and the view is left alone.
    pub fn refresh<D: DrawingSurface + ?Sized>(&mut self, surface: &mut D, selected: Option<&DeviceId>) {
        self.retain_only(surface, selected);

        let Some(device_id) = selected else {
            return;
        };
        self.spawn_location_fetch(device_id.clone());
        self.spawn_path_fetch(device_id.clone());
    }

    /// Apply a finished fetch, unless `current` no longer matches the device
    /// it was requested for.
    pub fn apply<D: DrawingSurface + ?Sized>(
        &mut self,
        surface: &mut D,
        completion: FetchCompletion,
        current: Option<&DeviceId>,
    ) -> ApplyOutcome {
        if current != Some(completion.requested_for()) {
            debug!(
                "Discarding stale response for {} (selection is now {})",
                completion.requested_for(),
                current.map_or("<none>", DeviceId::as_str)
            );
            return ApplyOutcome::Stale;
        }

        match completion {
            FetchCompletion::Location { requested_for, result } => match result {
                Ok(Some(sample)) => self.place_marker(surface, requested_for, &sample),
                Ok(None) => {
                    debug!("No location known for {}", requested_for);
                    ApplyOutcome::NoLocation
                }
                Err(e) => {
                    warn!("Location fetch for {} failed: {}", requested_for, e);
                    ApplyOutcome::FetchFailed
                }
            },
            FetchCompletion::Path { requested_for, result } => match result {
                Ok(path) if path.is_drawable() => self.draw_path(surface, requested_for, &path),
                Ok(path) => {
                    debug!(
                        "Path for {} has {} point(s), not drawing",
                        requested_for,
                        path.points.len()
                    );
                    ApplyOutcome::PathTooShort
                }
                Err(e) => {
                    warn!("Path fetch for {} failed: {}", requested_for, e);
                    ApplyOutcome::FetchFailed
                }
            },
        }
    }

    fn retain_only<D: DrawingSurface + ?Sized>(&mut self, surface: &mut D, selected: Option<&DeviceId>) {
        for slot in [&mut self.state.marker, &mut self.state.path] {
            if slot.as_ref().is_some_and(|t| Some(&t.device_id) != selected) {
                if let Some(stale) = slot.take() {
                    surface.remove_overlay(stale.overlay);
                }
            }
        }
    }

    fn place_marker<D: DrawingSurface + ?Sized>(
        &mut self,
        surface: &mut D,
        device_id: DeviceId,
        sample: &LocationSample,
    ) -> ApplyOutcome {
        let replacing = self.state.marker_tag() == Some(&device_id);

        let old = self.state.marker.take().map(|t| t.overlay);
        let marker = Overlay::Marker {
            position: sample.position(),
            label: sample.summary(),
        };
        let overlay = surface.replace_overlay(old, marker, true);
        self.state.marker = Some(TaggedOverlay { device_id, overlay });

        if replacing {
            ApplyOutcome::MarkerReplaced
        } else {
            surface.set_view(sample.position(), self.settings.focus_zoom);
            ApplyOutcome::MarkerPlaced
        }
    }

    fn draw_path<D: DrawingSurface + ?Sized>(&mut self, surface: &mut D, device_id: DeviceId, path: &Path) -> ApplyOutcome {
        let old = self.state.path.take().map(|t| t.overlay);
        let points = path.positions();
        let bounds = Bounds::from_points(points.iter().copied());
        let polyline = Overlay::Polyline {
            points,
            color: PATH_COLOR,
            label: path.speed_kmh().map(|speed| format!("Speed: {speed:.2} km/h")),
        };
        let overlay = surface.replace_overlay(old, polyline, false);
        self.state.path = Some(TaggedOverlay { device_id, overlay });

        if let Some(bounds) = bounds {
            surface.fit_bounds(bounds, self.settings.fit_padding);
        }
        ApplyOutcome::PathDrawn
    }

    fn spawn_location_fetch(&self, device_id: DeviceId) {
        let source = Arc::clone(&self.source);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = source
                .fetch_location(&device_id)
                .await
                .map(|record| record.map(LocationSample::from));
            let _ = completions
                .send(FetchCompletion::Location {
                    requested_for: device_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_path_fetch(&self, device_id: DeviceId) {
        let source = Arc::clone(&self.source);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = source.fetch_path(&device_id).await;
            let _ = completions
                .send(FetchCompletion::Path {
                    requested_for: device_id,
                    result,
                })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basemap::BaseLayer;
    use crate::geo::LatLon;
    use crate::protocol::PathPoint;
    use crate::surface::{MemorySurface, ViewChange};
    use crate::testing::{record, ScriptedSource};

    fn renderer() -> (PositionRenderer<ScriptedSource>, mpsc::Receiver<FetchCompletion>) {
        let (tx, rx) = mpsc::channel(16);
        let source = Arc::new(ScriptedSource::default());
        (PositionRenderer::new(source, tx, RenderSettings::default()), rx)
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::from(s)
    }

    fn location(device: &str, lat: f64) -> FetchCompletion {
        FetchCompletion::Location {
            requested_for: id(device),
            result: Ok(Some(record(device, lat, 51.3876, 80).into())),
        }
    }

    fn path(device: &str, points: &[(f64, f64)]) -> FetchCompletion {
        FetchCompletion::Path {
            requested_for: id(device),
            result: Ok(Path {
                points: points
                    .iter()
                    .map(|&(latitude, longitude)| PathPoint {
                        latitude,
                        longitude,
                        timestamp: None,
                    })
                    .collect(),
                reported_speed_kmh: None,
            }),
        }
    }

    fn failed_location(device: &str) -> FetchCompletion {
        FetchCompletion::Location {
            requested_for: id(device),
            result: Err(FetchError::Status {
                url: "test".to_string(),
                status: 500,
            }),
        }
    }

    #[test]
    fn test_location_places_marker_and_centers() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        let outcome = renderer.apply(&mut surface, location("A", 35.7246), Some(&a));

        assert_eq!(outcome, ApplyOutcome::MarkerPlaced);
        assert_eq!(surface.marker_count(), 1);
        assert!(surface.marker_label().unwrap().contains("(A)"));
        assert!(surface.open_label_id().is_some());
        assert!(matches!(
            surface.view(),
            Some(ViewChange::Center { zoom: 18, center }) if (center.lat - 35.7246).abs() < 1e-9
        ));
        assert_eq!(renderer.state().marker_tag(), Some(&a));
    }

    #[test]
    fn test_location_update_swaps_marker_without_recentering() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        renderer.apply(&mut surface, location("A", 35.7246), Some(&a));
        let outcome = renderer.apply(&mut surface, location("A", 35.7300), Some(&a));

        assert_eq!(outcome, ApplyOutcome::MarkerReplaced);
        assert_eq!(surface.marker_count(), 1);
        assert!(surface.marker_label().unwrap().contains("Lat: 35.73"));
        assert!(surface.open_label_id().is_some());
        assert_eq!(surface.view_revision(), 1);
    }

    #[test]
    fn test_stale_location_is_discarded() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let b = id("B");
        renderer.apply(&mut surface, location("B", 35.70), Some(&b));
        let label_before = surface.marker_label().map(str::to_owned);
        let revision_before = surface.view_revision();

        let outcome = renderer.apply(&mut surface, location("A", 35.7246), Some(&b));

        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.marker_label().map(str::to_owned), label_before);
        assert_eq!(surface.view_revision(), revision_before);
        assert_eq!(renderer.state().marker_tag(), Some(&b));
    }

    #[test]
    fn test_response_discarded_when_nothing_selected() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();

        assert_eq!(renderer.apply(&mut surface, location("A", 35.0), None), ApplyOutcome::Stale);
        assert_eq!(
            renderer.apply(&mut surface, path("A", &[(35.0, 51.0), (35.1, 51.1)]), None),
            ApplyOutcome::Stale
        );
        assert_eq!(surface.overlays().count(), 0);
    }

    #[test]
    fn test_failed_or_empty_location_keeps_marker() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");
        renderer.apply(&mut surface, location("A", 35.7246), Some(&a));

        assert_eq!(
            renderer.apply(&mut surface, failed_location("A"), Some(&a)),
            ApplyOutcome::FetchFailed
        );
        let empty = FetchCompletion::Location {
            requested_for: id("A"),
            result: Ok(None),
        };
        assert_eq!(renderer.apply(&mut surface, empty, Some(&a)), ApplyOutcome::NoLocation);
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(renderer.state().marker_tag(), Some(&a));
    }

    #[test]
    fn test_path_drawn_and_fitted() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        let outcome = renderer.apply(
            &mut surface,
            path("A", &[(35.70, 51.38), (35.71, 51.39), (35.72, 51.40)]),
            Some(&a),
        );

        assert_eq!(outcome, ApplyOutcome::PathDrawn);
        assert_eq!(surface.polyline_count(), 1);
        assert!(matches!(
            surface.view(),
            Some(ViewChange::Fit { bounds, padding })
                if (padding - 50.0).abs() < f32::EPSILON && (bounds.north_east.lat - 35.72).abs() < 1e-9
        ));
        assert_eq!(renderer.state().path_tag(), Some(&a));
    }

    #[test]
    fn test_single_point_path_not_drawn() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        assert_eq!(
            renderer.apply(&mut surface, path("A", &[(35.70, 51.38)]), Some(&a)),
            ApplyOutcome::PathTooShort
        );
        assert_eq!(
            renderer.apply(&mut surface, path("A", &[]), Some(&a)),
            ApplyOutcome::PathTooShort
        );
        assert_eq!(surface.polyline_count(), 0);
        assert_eq!(surface.view(), None);
    }

    #[test]
    fn test_short_path_leaves_previous_path() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        renderer.apply(&mut surface, path("A", &[(35.70, 51.38), (35.71, 51.39)]), Some(&a));
        renderer.apply(&mut surface, path("A", &[(35.72, 51.40)]), Some(&a));

        assert_eq!(surface.polyline_count(), 1);
        assert_eq!(renderer.state().path_tag(), Some(&a));
    }

    #[test]
    fn test_path_redraw_replaces_polyline() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");

        renderer.apply(&mut surface, path("A", &[(35.70, 51.38), (35.71, 51.39)]), Some(&a));
        renderer.apply(
            &mut surface,
            path("A", &[(35.70, 51.38), (35.71, 51.39), (35.72, 51.40)]),
            Some(&a),
        );

        assert_eq!(surface.polyline_count(), 1);
        let points = surface.overlays().find_map(|(_, o)| match o {
            Overlay::Polyline { points, .. } => Some(points.len()),
            Overlay::Marker { .. } => None,
        });
        assert_eq!(points, Some(3));
    }

    /// Records what a painter holding the shared lock would see after each
    /// surface call.
    #[derive(Default)]
    struct RecordingSurface {
        inner: MemorySurface,
        frames: Vec<(usize, bool)>,
    }

    impl RecordingSurface {
        fn snapshot(&mut self) {
            let frame = (self.inner.marker_count(), self.inner.open_label_id().is_some());
            self.frames.push(frame);
        }
    }

    impl DrawingSurface for RecordingSurface {
        fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
            let id = self.inner.add_overlay(overlay);
            self.snapshot();
            id
        }

        fn remove_overlay(&mut self, id: OverlayId) {
            self.inner.remove_overlay(id);
            self.snapshot();
        }

        fn open_label(&mut self, id: OverlayId) {
            self.inner.open_label(id);
            self.snapshot();
        }

        fn replace_overlay(&mut self, old: Option<OverlayId>, overlay: Overlay, open_label: bool) -> OverlayId {
            let id = self.inner.replace_overlay(old, overlay, open_label);
            self.snapshot();
            id
        }

        fn set_view(&mut self, center: LatLon, zoom: u8) {
            self.inner.set_view(center, zoom);
            self.snapshot();
        }

        fn fit_bounds(&mut self, bounds: Bounds, padding: f32) {
            self.inner.fit_bounds(bounds, padding);
            self.snapshot();
        }

        fn attached_base_layers(&self) -> Vec<BaseLayer> {
            self.inner.attached_base_layers()
        }

        fn attach_base_layer(&mut self, layer: BaseLayer) {
            self.inner.attach_base_layer(layer);
        }

        fn detach_base_layer(&mut self, layer: BaseLayer) {
            self.inner.detach_base_layer(layer);
        }
    }

    #[test]
    fn test_shared_surface_never_shows_half_swapped_marker() {
        let (mut renderer, _rx) = renderer();
        let shared = Arc::new(std::sync::Mutex::new(RecordingSurface::default()));
        let mut surface = Arc::clone(&shared);
        let a = id("A");

        renderer.apply(&mut surface, location("A", 35.7246), Some(&a));
        renderer.apply(&mut surface, location("A", 35.7300), Some(&a));
        renderer.apply(&mut surface, location("A", 35.7350), Some(&a));

        let recorded = shared.lock().unwrap();
        let first = recorded.frames.iter().position(|&(markers, _)| markers > 0).unwrap();
        assert!(recorded.frames.len() > first + 1);
        assert!(recorded.frames[first..].iter().all(|&frame| frame == (1, true)));
        assert!(recorded.inner.marker_label().unwrap().contains("Lat: 35.735"));
    }

    #[tokio::test]
    async fn test_refresh_without_selection_clears_overlays() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");
        renderer.apply(&mut surface, location("A", 35.7246), Some(&a));
        renderer.apply(&mut surface, path("A", &[(35.70, 51.38), (35.71, 51.39)]), Some(&a));
        let revision = surface.view_revision();

        renderer.refresh(&mut surface, None);

        assert_eq!(surface.overlays().count(), 0);
        assert!(renderer.state().is_empty());
        assert_eq!(surface.view_revision(), revision);
    }

    #[tokio::test]
    async fn test_refresh_for_other_device_drops_old_overlays() {
        let (mut renderer, _rx) = renderer();
        let mut surface = MemorySurface::new();
        let a = id("A");
        renderer.apply(&mut surface, location("A", 35.7246), Some(&a));
        renderer.apply(&mut surface, path("A", &[(35.70, 51.38), (35.71, 51.39)]), Some(&a));

        renderer.refresh(&mut surface, Some(&id("B")));

        assert_eq!(surface.overlays().count(), 0);
        assert!(renderer.state().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_fetches_marker_and_path() {
        let source = Arc::new(ScriptedSource::new(vec![
            record("A", 35.7246, 51.3876, 80),
            record("B", 35.7000, 51.4000, 40),
        ]));
        source.set_path("A", &[(35.70, 51.38), (35.71, 51.39)]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut renderer = PositionRenderer::new(Arc::clone(&source), tx, RenderSettings::default());
        let mut surface = MemorySurface::new();
        let a = id("A");

        renderer.refresh(&mut surface, Some(&a));
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            assert_eq!(completion.requested_for(), &a);
            outcomes.push(renderer.apply(&mut surface, completion, Some(&a)));
        }

        assert!(outcomes.contains(&ApplyOutcome::MarkerPlaced));
        assert!(outcomes.contains(&ApplyOutcome::PathDrawn));
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.polyline_count(), 1);
        assert_eq!(renderer.state().marker_tag(), Some(&a));
        assert_eq!(renderer.state().path_tag(), Some(&a));
    }
}
