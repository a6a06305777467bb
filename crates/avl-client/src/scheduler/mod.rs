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

//! Refresh scheduling.
//!
//! A single task owns the roster, the selection, the render state and the
//! base layer. It drives two independent fixed-interval cycles (roster and
//! render), handles user commands as they arrive, and applies fetch results
//! sent back by the short-lived tasks that perform the actual I/O. Because all
//! state changes happen on this one task, no component needs a lock.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::basemap::{BaseLayer, BaseLayerSwitcher};
use crate::protocol::{Device, DeviceId, LocationRecord};
use crate::render::{FetchCompletion, PositionRenderer};
use crate::roster::{RosterReconciler, RosterSnapshot};
use crate::source::{DataSource, FetchError};
use crate::surface::DrawingSurface;
use crate::ClientConfig;

/// User-driven events, handled immediately and outside the timer cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Display another device, or none.
    Select(Option<DeviceId>),
    /// Swap the background layer.
    SwitchBaseLayer(BaseLayer),
}

/// Channels for talking to a running [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandles {
    pub commands: mpsc::Sender<Command>,
    pub roster: watch::Receiver<RosterSnapshot>,
    pub base_layer: watch::Receiver<BaseLayer>,
}

type RosterResult = Result<Vec<LocationRecord>, FetchError>;

pub struct Scheduler<S, D> {
    source: Arc<S>,
    surface: D,
    reconciler: RosterReconciler,
    renderer: PositionRenderer<S>,
    base_layers: BaseLayerSwitcher,
    roster_interval: Duration,
    render_interval: Duration,
    commands: mpsc::Receiver<Command>,
    completions: mpsc::Receiver<FetchCompletion>,
    roster_tx: mpsc::Sender<RosterResult>,
    roster_rx: mpsc::Receiver<RosterResult>,
    roster_view: watch::Sender<RosterSnapshot>,
    base_layer_view: watch::Sender<BaseLayer>,
    cancel_token: CancellationToken,
}

impl<S, D> std::fmt::Debug for Scheduler<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("reconciler", &self.reconciler)
            .field("renderer", &self.renderer)
            .field("base_layers", &self.base_layers)
            .field("roster_interval", &self.roster_interval)
            .field("render_interval", &self.render_interval)
            .finish_non_exhaustive()
    }
}

impl<S: DataSource, D: DrawingSurface> Scheduler<S, D> {
    /// Build a scheduler around `surface`, attaching the initial base layer.
    pub fn new(
        config: &ClientConfig,
        source: Arc<S>,
        mut surface: D,
        cancel_token: CancellationToken,
    ) -> (Self, SchedulerHandles) {
        let (command_tx, commands) = mpsc::channel(config.channel_capacity);
        let (completion_tx, completions) = mpsc::channel(config.channel_capacity);
        let (roster_tx, roster_rx) = mpsc::channel(config.channel_capacity);

        let reconciler = RosterReconciler::new();
        let (roster_view, roster) = watch::channel(reconciler.snapshot());
        let base_layers = BaseLayerSwitcher::new(&mut surface, config.initial_base_layer);
        let (base_layer_view, base_layer) = watch::channel(base_layers.active());

        let scheduler = Self {
            renderer: PositionRenderer::new(Arc::clone(&source), completion_tx, config.render),
            source,
            surface,
            reconciler,
            base_layers,
            roster_interval: config.roster_interval,
            render_interval: config.render_interval,
            commands,
            completions,
            roster_tx,
            roster_rx,
            roster_view,
            base_layer_view,
            cancel_token,
        };
        let handles = SchedulerHandles {
            commands: command_tx,
            roster,
            base_layer,
        };
        (scheduler, handles)
    }

    /// Run until the cancellation token fires.
    ///
    /// Both cycles fire once immediately, then every `roster_interval` and
    /// `render_interval`. Commands never reset either timer.
    pub async fn run(mut self) {
        let mut roster_tick = interval(self.roster_interval);
        roster_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut render_tick = interval(self.render_interval);
        render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started (roster every {:?}, render every {:?})",
            self.roster_interval, self.render_interval
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Scheduler cancelled");
                    return;
                }
                _ = roster_tick.tick() => self.start_roster_fetch(),
                _ = render_tick.tick() => self.refresh_render(),
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(result) = self.roster_rx.recv() => self.handle_roster(result),
                Some(completion) = self.completions.recv() => {
                    let outcome = self.renderer.apply(
                        &mut self.surface,
                        completion,
                        self.reconciler.selection(),
                    );
                    debug!("Applied fetch result: {:?}", outcome);
                }
            }
        }
    }

    fn start_roster_fetch(&self) {
        let source = Arc::clone(&self.source);
        let roster_tx = self.roster_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_roster().await;
            let _ = roster_tx.send(result).await;
        });
    }

    /// Render cycle: refresh for the selection as it is right now.
    fn refresh_render(&mut self) {
        self.renderer.refresh(&mut self.surface, self.reconciler.selection());
    }

    fn handle_roster(&mut self, result: RosterResult) {
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!("Roster fetch failed, keeping previous roster: {}", e);
                return;
            }
        };

        let devices: Vec<Device> = records.iter().map(Device::from).collect();
        let outcome = self.reconciler.reconcile(&devices);
        self.publish_roster();

        if outcome.selection_changed() {
            self.refresh_render();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(device_id) => match self.reconciler.select(device_id) {
                Ok(true) => {
                    self.publish_roster();
                    self.refresh_render();
                }
                Ok(false) => {}
                Err(e) => warn!("Ignoring selection: {}", e),
            },
            Command::SwitchBaseLayer(layer) => {
                self.base_layers.switch(&mut self.surface, layer);
                self.base_layer_view.send_replace(layer);
            }
        }
    }

    fn publish_roster(&self) {
        let snapshot = self.reconciler.snapshot();
        self.roster_view.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
