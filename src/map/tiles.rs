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

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use avl_client::BaseLayer;
use egui::{ColorImage, TextureHandle};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

pub const TILE_SIZE: u32 = 256;
const CACHE_DURATION_DAYS: u64 = 7;
const USER_AGENT: &str = concat!("avl-desktop/", env!("CARGO_PKG_VERSION"));

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to Web Mercator Y coordinate in tile units
    pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
        let lat_rad = lat.to_radians();
        let n = 2_f64.powi(i32::from(zoom));
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * n
    }

    /// Convert longitude to Web Mercator X coordinate in tile units
    pub fn lon_to_x(lon: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        ((lon + 180.0) / 360.0) * n
    }

    /// Convert tile coordinates back to latitude
    pub fn tile_to_lat(y: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        let lat_rad = (std::f64::consts::PI * (1.0 - 2.0 * y / n)).sinh().atan();
        lat_rad.to_degrees()
    }

    /// Convert tile coordinates back to longitude
    pub fn tile_to_lon(x: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        x / n * 360.0 - 180.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }
}

/// A tile of one base layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub layer: BaseLayer,
    pub coord: TileCoord,
}

impl TileKey {
    fn url(&self) -> String {
        self.layer.tile_url(self.coord.x, self.coord.y, self.coord.zoom)
    }

    /// Cache filename based on hash of URL
    fn cache_filename(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url().as_bytes());
        format!("{:x}.png", hasher.finalize())
    }

    fn texture_name(&self) -> String {
        format!(
            "tile_{}_{}_{}/{}",
            self.layer.as_str(),
            self.coord.zoom,
            self.coord.x,
            self.coord.y
        )
    }
}

enum TileState {
    Loading,
    Loaded(TextureHandle),
    Failed,
}

type TileTable = Arc<Mutex<HashMap<TileKey, TileState>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Downloads, caches and uploads base layer tiles.
///
/// Tiles are fetched on background threads and written to a per-layer disk
/// cache; entries older than a week are removed at startup.
pub struct TileManager {
    cache_root: PathBuf,
    http: reqwest::blocking::Client,
    tiles: TileTable,
    download_queue: Arc<Mutex<HashSet<TileKey>>>,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("cache_root", &self.cache_root)
            .finish_non_exhaustive()
    }
}

impl TileManager {
    pub fn new() -> Result<Self, reqwest::Error> {
        let cache_root = Self::get_cache_root();
        for layer in BaseLayer::ALL {
            let dir = cache_root.join(layer.as_str());
            if let Err(e) = fs::create_dir_all(&dir) {
                warn!("Failed to create tile cache directory {}: {}", dir.display(), e);
            }
            Self::cleanup_old_tiles(&dir);
        }

        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            cache_root,
            http,
            tiles: Arc::new(Mutex::new(HashMap::new())),
            download_queue: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn get_cache_root() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        path.push("avl-desktop");
        path.push("tiles");
        path
    }

    fn cache_path(&self, key: &TileKey) -> PathBuf {
        self.cache_root.join(key.layer.as_str()).join(key.cache_filename())
    }

    fn cleanup_old_tiles(cache_dir: &Path) {
        let now = SystemTime::now();
        let max_age = Duration::from_secs(CACHE_DURATION_DAYS * 24 * 60 * 60);

        let Ok(entries) = fs::read_dir(cache_dir) else {
            return;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if expired && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} expired tiles from {}", removed, cache_dir.display());
        }
    }

    /// Get tile from memory or disk cache, or queue it for download
    pub fn get_tile(&self, key: TileKey, ctx: &egui::Context) -> Option<TextureHandle> {
        let mut tiles = lock(&self.tiles);

        match tiles.get(&key) {
            Some(TileState::Loaded(texture)) => Some(texture.clone()),
            Some(TileState::Loading | TileState::Failed) => None,
            None => {
                let cache_path = self.cache_path(&key);
                if cache_path.exists() {
                    match fs::read(&cache_path)
                        .map_err(|e| e.to_string())
                        .and_then(|bytes| load_texture(&bytes, &key, ctx))
                    {
                        Ok(texture) => {
                            tiles.insert(key, TileState::Loaded(texture.clone()));
                            return Some(texture);
                        }
                        Err(e) => warn!("Failed to load cached tile {}: {}", cache_path.display(), e),
                    }
                }
                tiles.insert(key, TileState::Loading);
                drop(tiles);
                self.queue_download(key, ctx.clone());
                None
            }
        }
    }

    fn queue_download(&self, key: TileKey, ctx: egui::Context) {
        if !lock(&self.download_queue).insert(key) {
            return;
        }

        let http = self.http.clone();
        let tiles = Arc::clone(&self.tiles);
        let queue = Arc::clone(&self.download_queue);
        let cache_path = self.cache_path(&key);

        std::thread::spawn(move || {
            let state = match download_tile(&http, &key, &cache_path, &ctx) {
                Ok(texture) => TileState::Loaded(texture),
                Err(e) => {
                    warn!("Failed to fetch tile {}: {}", key.url(), e);
                    TileState::Failed
                }
            };
            lock(&tiles).insert(key, state);
            lock(&queue).remove(&key);
            ctx.request_repaint();
        });
    }

    /// Get all tiles needed for a viewport, with their offsets from the
    /// viewport center in pixels
    pub fn get_visible_tiles(
        center_lat: f64,
        center_lon: f64,
        zoom: u8,
        viewport_width: f32,
        viewport_height: f32,
    ) -> Vec<(TileCoord, f32, f32)> {
        let mut tiles = Vec::new();
        let tile_size = f64::from(TILE_SIZE);

        let center_tile_x = WebMercator::lon_to_x(center_lon, zoom);
        let center_tile_y = WebMercator::lat_to_y(center_lat, zoom);

        #[allow(clippy::cast_possible_truncation, reason = "viewport sizes are a few thousand pixels")]
        let tiles_wide = (f64::from(viewport_width) / tile_size).ceil() as i64 + 2;
        #[allow(clippy::cast_possible_truncation, reason = "viewport sizes are a few thousand pixels")]
        let tiles_high = (f64::from(viewport_height) / tile_size).ceil() as i64 + 2;

        #[allow(clippy::cast_possible_truncation, reason = "tile indices fit in i64 at any zoom")]
        let start_x = center_tile_x.floor() as i64 - tiles_wide / 2;
        #[allow(clippy::cast_possible_truncation, reason = "tile indices fit in i64 at any zoom")]
        let start_y = center_tile_y.floor() as i64 - tiles_high / 2;

        let max_tile = 1_i64 << zoom;

        for dy in 0..tiles_high {
            for dx in 0..tiles_wide {
                let tile_x = start_x + dx;
                let tile_y = start_y + dy;

                // Latitude doesn't wrap
                if tile_y < 0 || tile_y >= max_tile {
                    continue;
                }
                let wrapped_x = tile_x.rem_euclid(max_tile);
                let (Ok(x), Ok(y)) = (u32::try_from(wrapped_x), u32::try_from(tile_y)) else {
                    continue;
                };

                #[allow(clippy::cast_precision_loss, reason = "tile indices are far below 2^52")]
                let offset_x = (tile_x as f64 - center_tile_x) * tile_size;
                #[allow(clippy::cast_precision_loss, reason = "tile indices are far below 2^52")]
                let offset_y = (tile_y as f64 - center_tile_y) * tile_size;

                #[allow(clippy::cast_possible_truncation, reason = "screen offsets fit in f32")]
                tiles.push((TileCoord::new(x, y, zoom), offset_x as f32, offset_y as f32));
            }
        }

        tiles
    }

    pub fn has_loading_tiles(&self) -> bool {
        lock(&self.tiles)
            .values()
            .any(|state| matches!(state, TileState::Loading))
    }

    pub fn get_error_count(&self) -> usize {
        lock(&self.tiles)
            .values()
            .filter(|state| matches!(state, TileState::Failed))
            .count()
    }
}

fn download_tile(
    http: &reqwest::blocking::Client,
    key: &TileKey,
    cache_path: &Path,
    ctx: &egui::Context,
) -> Result<TextureHandle, String> {
    let url = key.url();
    debug!("Downloading tile: {}", url);

    let response = http.get(&url).send().map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let bytes = response.bytes().map_err(|e| e.to_string())?;

    if let Err(e) = fs::write(cache_path, &bytes) {
        warn!("Failed to save tile to cache: {}", e);
    }

    load_texture(&bytes, key, ctx)
}

fn load_texture(bytes: &[u8], key: &TileKey, ctx: &egui::Context) -> Result<TextureHandle, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let rgba = img.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = ColorImage::from_rgba_unmultiplied(size, &rgba.into_raw());

    Ok(ctx.load_texture(key.texture_name(), color_image, egui::TextureOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mercator_round_trip() {
        let (lat, lon) = (35.7246, 51.3876);
        let y = WebMercator::lat_to_y(lat, 18);
        let x = WebMercator::lon_to_x(lon, 18);
        assert!((WebMercator::tile_to_lat(y, 18) - lat).abs() < 1e-9);
        assert!((WebMercator::tile_to_lon(x, 18) - lon).abs() < 1e-9);
    }

    #[test]
    fn test_visible_tiles_cover_viewport() {
        let tiles = TileManager::get_visible_tiles(35.7246, 51.3876, 18, 800.0, 600.0);
        // 800 / 256 -> 4 + 2 columns, 600 / 256 -> 3 + 2 rows
        assert_eq!(tiles.len(), 6 * 5);
        assert!(tiles.iter().all(|(c, _, _)| c.zoom == 18));
    }

    #[test]
    fn test_visible_tiles_wrap_longitude() {
        let tiles = TileManager::get_visible_tiles(0.0, 179.99, 2, 1024.0, 256.0);
        assert!(tiles.iter().any(|(c, _, _)| c.x == 0));
        assert!(tiles.iter().all(|(c, _, _)| c.x < 4 && c.y < 4));
    }

    #[test]
    fn test_cache_filename_differs_per_layer() {
        let coord = TileCoord::new(1, 2, 3);
        let osm = TileKey { layer: BaseLayer::Osm, coord };
        let satellite = TileKey { layer: BaseLayer::Satellite, coord };
        assert_ne!(osm.cache_filename(), satellite.cache_filename());
        assert!(osm.cache_filename().ends_with(".png"));
    }
}
