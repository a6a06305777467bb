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

mod app;
mod config;
mod map;

use avl_client::BaseLayer;
use clap::Parser;
use eframe::egui;
use log::{error, info, warn};

use app::AvlApp;
use config::{AppConfig, Overrides};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Follow AVL tracking devices on a map.
#[derive(Debug, Parser)]
#[command(name = "avl-desktop", version, about)]
struct Args {
    /// Tracking server base URL, for this run only
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Base layer shown at startup (osm or satellite), for this run only
    #[arg(long, value_name = "LAYER")]
    base_layer: Option<BaseLayer>,
}

fn main() -> Result<(), eframe::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stored = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {}", e);
        AppConfig::default()
    });
    if let Ok(path) = AppConfig::get_config_path() {
        info!("Configuration: {}", path.display());
    }

    let overrides = Overrides {
        server_url: args.server,
        base_layer: args.base_layer,
    };
    let app = match AvlApp::new(stored, &overrides) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 800.0])
            .with_title("AVL Desktop"),
        ..Default::default()
    };

    eframe::run_native("AVL Desktop", options, Box::new(|_cc| Ok(Box::new(app))))
}
