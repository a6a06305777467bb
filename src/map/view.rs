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

//! Painter-based map widget.
//!
//! Draws the base layers attached to a [`MemorySurface`] plus its marker and
//! polyline overlays, and follows the view changes the renderer requests.

use avl_client::{BaseLayer, Bounds, DrawingSurface, LatLon, MemorySurface, Overlay, ViewChange};
use eframe::egui;

use super::tiles::{TileKey, TileManager, WebMercator, TILE_SIZE};

const MIN_ZOOM: f32 = 2.0;
const LABEL_FONT_SIZE: f32 = 11.0;

/// Pannable, zoomable map showing one surface.
#[derive(Debug)]
pub struct MapView {
    center: LatLon,
    zoom: f32,
    max_zoom: u8,
    tiles: TileManager,
    tile_error: Option<String>,
    seen_view_revision: u64,
}

impl MapView {
    pub fn new(tiles: TileManager, center: LatLon, zoom: u8) -> Self {
        let max_zoom = BaseLayer::ALL.iter().map(BaseLayer::max_zoom).min().unwrap_or(18);
        Self {
            center,
            zoom: f32::from(zoom.min(max_zoom)),
            max_zoom,
            tiles,
            tile_error: None,
            seen_view_revision: 0,
        }
    }

    fn tile_zoom(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "zoom is clamped to 2..=19")]
        let zoom = self.zoom.round() as u8;
        zoom
    }

    /// Apply the latest view request if the renderer issued a new one.
    fn follow_view(&mut self, surface: &MemorySurface, width: f32, height: f32) {
        if surface.view_revision() == self.seen_view_revision {
            return;
        }
        self.seen_view_revision = surface.view_revision();

        match surface.view() {
            Some(ViewChange::Center { center, zoom }) => {
                self.center = center;
                self.zoom = f32::from(zoom.min(self.max_zoom));
            }
            Some(ViewChange::Fit { bounds, padding }) => {
                self.center = bounds.center();
                self.zoom = f32::from(fit_zoom(&bounds, width, height, padding, self.max_zoom));
            }
            None => {}
        }
    }

    pub fn show(&mut self, ui: &mut egui::Ui, surface: &MemorySurface) {
        let (response, painter) = ui.allocate_painter(
            egui::vec2(ui.available_width(), ui.available_height()),
            egui::Sense::click_and_drag(),
        );

        let rect = response.rect;
        let center = rect.center();
        self.follow_view(surface, rect.width(), rect.height());

        painter.rect_filled(rect, 0.0, egui::Color32::from_rgb(200, 220, 240));

        // Scroll wheel or pinch zoom
        let zoom_delta = ui.ctx().input(|i| i.zoom_delta());
        let scroll = ui.ctx().input(|i| i.smooth_scroll_delta.y);
        if response.hovered() {
            if (zoom_delta - 1.0).abs() > 0.001 {
                self.zoom += zoom_delta.log2();
            } else if scroll.abs() > 0.0 {
                self.zoom += scroll / 200.0;
            }
        }
        self.zoom = self.zoom.clamp(MIN_ZOOM, f32::from(self.max_zoom));
        let tile_zoom = self.tile_zoom();
        let tile_size = f64::from(TILE_SIZE);

        // Pan by moving the center in tile space
        if response.dragged() {
            let delta = response.drag_delta();
            let x = WebMercator::lon_to_x(self.center.lon, tile_zoom) - f64::from(delta.x) / tile_size;
            let y = WebMercator::lat_to_y(self.center.lat, tile_zoom) - f64::from(delta.y) / tile_size;
            self.center = LatLon::new(
                WebMercator::tile_to_lat(y, tile_zoom).clamp(-85.0, 85.0),
                WebMercator::tile_to_lon(x, tile_zoom),
            );
        }

        let layers = surface.attached_base_layers();
        let visible = TileManager::get_visible_tiles(
            self.center.lat,
            self.center.lon,
            tile_zoom,
            rect.width(),
            rect.height(),
        );
        let mut tiles_rendered = 0;
        for &layer in &layers {
            for &(coord, offset_x, offset_y) in &visible {
                let key = TileKey { layer, coord };
                if let Some(texture) = self.tiles.get_tile(key, ui.ctx()) {
                    #[allow(clippy::cast_precision_loss, reason = "tile size is 256")]
                    let size = TILE_SIZE as f32;
                    let tile_rect = egui::Rect::from_min_size(
                        egui::pos2(center.x + offset_x, center.y + offset_y),
                        egui::vec2(size, size),
                    );
                    painter.image(
                        texture.id(),
                        tile_rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                    tiles_rendered += 1;
                }
            }
        }

        if self.tiles.get_error_count() > 0 {
            self.tile_error = Some(format!("Failed to load {} tiles", self.tiles.get_error_count()));
        } else if self.tiles.has_loading_tiles() {
            self.tile_error = Some("Loading map tiles...".to_string());
        } else if tiles_rendered > 0 {
            self.tile_error = None;
        }

        let center_x = WebMercator::lon_to_x(self.center.lon, tile_zoom);
        let center_y = WebMercator::lat_to_y(self.center.lat, tile_zoom);
        let to_screen = |p: LatLon| -> egui::Pos2 {
            let pixel_x = (WebMercator::lon_to_x(p.lon, tile_zoom) - center_x) * tile_size;
            let pixel_y = (WebMercator::lat_to_y(p.lat, tile_zoom) - center_y) * tile_size;
            #[allow(clippy::cast_possible_truncation, reason = "screen offsets fit in f32")]
            let offset = egui::vec2(pixel_x as f32, pixel_y as f32);
            center + offset
        };

        let painter = painter.with_clip_rect(rect);

        // Paths first so markers stay on top
        for (_, overlay) in surface.overlays() {
            if let Overlay::Polyline { points, color, label } = overlay {
                let stroke = egui::Stroke::new(3.0, egui::Color32::from_rgb(color[0], color[1], color[2]));
                let screen: Vec<egui::Pos2> = points.iter().copied().map(to_screen).collect();
                for pair in screen.windows(2) {
                    painter.line_segment([pair[0], pair[1]], stroke);
                }
                if let (Some(label), Some(last)) = (label, screen.last()) {
                    draw_label(&painter, *last + egui::vec2(10.0, 10.0), label);
                }
            }
        }

        for (_, overlay) in surface.overlays() {
            if let Overlay::Marker { position, .. } = overlay {
                let pos = to_screen(*position);
                painter.circle_filled(pos, 7.0, egui::Color32::from_rgb(220, 50, 50));
                painter.circle_stroke(pos, 7.0, egui::Stroke::new(2.0, egui::Color32::WHITE));
            }
        }

        // Open label last so no marker covers it
        if let Some(Overlay::Marker { position, label }) = surface.open_label_id().and_then(|id| surface.overlay(id)) {
            draw_label(&painter, to_screen(*position) + egui::vec2(12.0, -12.0), label);
        }

        painter.text(
            rect.left_top() + egui::vec2(10.0, 10.0),
            egui::Align2::LEFT_TOP,
            "Drag to pan | Scroll to zoom",
            egui::FontId::proportional(12.0),
            egui::Color32::BLACK,
        );

        let attribution = layers
            .iter()
            .map(BaseLayer::attribution)
            .collect::<Vec<_>>()
            .join(" | ");
        painter.text(
            rect.right_bottom() + egui::vec2(-10.0, -10.0),
            egui::Align2::RIGHT_BOTTOM,
            attribution,
            egui::FontId::proportional(10.0),
            egui::Color32::from_black_alpha(180),
        );

        if let Some(ref message) = self.tile_error {
            let bg_color = if message.starts_with("Failed") {
                egui::Color32::from_rgb(220, 50, 50)
            } else {
                egui::Color32::from_rgb(255, 200, 100)
            };
            let pos = rect.center_top() + egui::vec2(0.0, 20.0);
            let galley = painter.layout_no_wrap(
                message.clone(),
                egui::FontId::proportional(12.0),
                egui::Color32::WHITE,
            );
            let bubble = egui::Rect::from_center_size(pos, galley.size() + egui::vec2(24.0, 12.0));
            painter.rect_filled(bubble, 5.0, bg_color);
            painter.text(
                pos,
                egui::Align2::CENTER_CENTER,
                message,
                egui::FontId::proportional(12.0),
                egui::Color32::WHITE,
            );
        }
    }
}

/// Text in a dark box, anchored at its bottom-left corner.
fn draw_label(painter: &egui::Painter, anchor: egui::Pos2, text: &str) {
    let galley = painter.layout_no_wrap(
        text.to_owned(),
        egui::FontId::proportional(LABEL_FONT_SIZE),
        egui::Color32::WHITE,
    );
    let padding = egui::vec2(4.0, 3.0);
    let top_left = anchor - egui::vec2(0.0, galley.size().y);
    let box_rect = egui::Rect::from_min_size(top_left - padding, galley.size() + padding * 2.0);
    painter.rect_filled(box_rect, 3.0, egui::Color32::from_rgba_unmultiplied(0, 0, 0, 200));
    painter.galley(top_left, galley, egui::Color32::WHITE);
}

/// Highest zoom at which `bounds` fits in a `width` x `height` viewport
/// with `padding` pixels left free on every side.
fn fit_zoom(bounds: &Bounds, width: f32, height: f32, padding: f32, max_zoom: u8) -> u8 {
    let usable_w = f64::from((width - 2.0 * padding).max(1.0));
    let usable_h = f64::from((height - 2.0 * padding).max(1.0));
    let tile_size = f64::from(TILE_SIZE);

    (0..=max_zoom)
        .rev()
        .find(|&zoom| {
            let span_x = (WebMercator::lon_to_x(bounds.north_east.lon, zoom)
                - WebMercator::lon_to_x(bounds.south_west.lon, zoom))
                * tile_size;
            let span_y = (WebMercator::lat_to_y(bounds.south_west.lat, zoom)
                - WebMercator::lat_to_y(bounds.north_east.lat, zoom))
                * tile_size;
            span_x <= usable_w && span_y <= usable_h
        })
        .unwrap_or(0)
}
