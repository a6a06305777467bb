//! Map rendering and tile management.
//!
//! This module provides the map widget, base layer tile fetching and caching,
//! and Web Mercator projection utilities.

pub mod tiles;
pub mod view;

pub use tiles::TileManager;
pub use view::MapView;
