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

//! Roster reconciliation.
//!
//! Keeps the displayed device list and the user's selection in step with the
//! backend while disturbing the list as little as possible: when membership is
//! unchanged only the selected entry's label is patched, and the list is only
//! rebuilt when devices appear or disappear.

use std::collections::HashSet;

use log::info;
use thiserror::Error;

use crate::protocol::{Device, DeviceId};

/// Label of the synthetic "no selection" entry at the top of the list.
pub const PLACEHOLDER_LABEL: &str = "-- Select a Device --";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("device '{0}' is not in the current roster")]
    UnknownDevice(DeviceId),
}

/// One entry of the displayed list. The placeholder has no device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub device_id: Option<DeviceId>,
    pub label: String,
}

impl RosterEntry {
    fn placeholder() -> Self {
        Self {
            device_id: None,
            label: PLACEHOLDER_LABEL.to_string(),
        }
    }
}

impl From<&Device> for RosterEntry {
    fn from(device: &Device) -> Self {
        Self {
            device_id: Some(device.id.clone()),
            label: device.label(),
        }
    }
}

/// What a reconciliation did to the displayed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Same membership; at most the selected entry's label changed.
    Patched { label_changed: bool },
    /// Membership changed and the list was rebuilt from the fresh roster.
    Rebuilt { selection_cleared: bool },
}

impl ReconcileOutcome {
    #[must_use]
    pub fn selection_changed(&self) -> bool {
        matches!(self, Self::Rebuilt { selection_cleared: true })
    }
}

/// Read-only copy of the displayed list, handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Placeholder first, then devices in server order.
    pub entries: Vec<RosterEntry>,
    pub selection: Option<DeviceId>,
    /// Incremented on every full rebuild.
    pub revision: u64,
}

impl RosterSnapshot {
    /// Label of the selected entry, or the placeholder label.
    #[must_use]
    pub fn selected_label(&self) -> &str {
        self.entries
            .iter()
            .find(|e| e.device_id.is_some() && e.device_id == self.selection)
            .map_or(PLACEHOLDER_LABEL, |e| e.label.as_str())
    }
}

impl Default for RosterSnapshot {
    fn default() -> Self {
        Self {
            entries: vec![RosterEntry::placeholder()],
            selection: None,
            revision: 0,
        }
    }
}

/// Owner of the displayed roster and of the current selection.
#[derive(Debug)]
pub struct RosterReconciler {
    entries: Vec<RosterEntry>,
    selection: Option<DeviceId>,
    revision: u64,
}

impl Default for RosterReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![RosterEntry::placeholder()],
            selection: None,
            revision: 0,
        }
    }

    /// The single source of truth for which device is displayed.
    #[must_use]
    pub fn selection(&self) -> Option<&DeviceId> {
        self.selection.as_ref()
    }

    #[must_use]
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Identifiers currently displayed, placeholder excluded.
    pub fn device_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.entries.iter().filter_map(|e| e.device_id.as_ref())
    }

    #[must_use]
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.device_ids().any(|d| d == id)
    }

    #[must_use]
    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            entries: self.entries.clone(),
            selection: self.selection.clone(),
            revision: self.revision,
        }
    }

    /// Change the selection on behalf of the user.
    ///
    /// Returns whether the selection actually changed. Selecting a device that
    /// is not displayed is rejected and leaves the selection untouched.
    pub fn select(&mut self, id: Option<DeviceId>) -> Result<bool, SelectError> {
        if let Some(id) = &id {
            if !self.contains(id) {
                return Err(SelectError::UnknownDevice(id.clone()));
            }
        }
        if self.selection == id {
            return Ok(false);
        }
        info!(
            "Selection changed: {} -> {}",
            display_selection(self.selection.as_ref()),
            display_selection(id.as_ref())
        );
        self.selection = id;
        Ok(true)
    }

    /// Merge a freshly fetched roster into the displayed one.
    pub fn reconcile(&mut self, fresh: &[Device]) -> ReconcileOutcome {
        let current: HashSet<&DeviceId> = self.device_ids().collect();
        let incoming: HashSet<&DeviceId> = fresh.iter().map(|d| &d.id).collect();

        if current == incoming {
            let label_changed = self.patch_selected_label(fresh);
            return ReconcileOutcome::Patched { label_changed };
        }

        let previous = self.selection.take();
        self.entries = std::iter::once(RosterEntry::placeholder())
            .chain(fresh.iter().map(RosterEntry::from))
            .collect();
        self.revision += 1;

        let selection_cleared = match previous {
            Some(id) if incoming.contains(&id) => {
                self.selection = Some(id);
                false
            }
            Some(id) => {
                info!("Selected device {} left the roster, clearing selection", id);
                true
            }
            None => false,
        };

        info!(
            "Roster rebuilt with {} devices (revision {})",
            fresh.len(),
            self.revision
        );
        ReconcileOutcome::Rebuilt { selection_cleared }
    }

    /// Refresh the label of the selected entry only. Other entries keep their
    /// labels until the next rebuild.
    fn patch_selected_label(&mut self, fresh: &[Device]) -> bool {
        let Some(selected) = &self.selection else {
            return false;
        };
        let Some(device) = fresh.iter().find(|d| &d.id == selected) else {
            return false;
        };
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.device_id.as_ref() == Some(selected))
        else {
            return false;
        };

        let label = device.label();
        if entry.label == label {
            return false;
        }
        entry.label = label;
        true
    }
}

fn display_selection(id: Option<&DeviceId>) -> &str {
    id.map_or("<none>", DeviceId::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, battery: u8) -> Device {
        Device {
            id: DeviceId::from(id),
            model: format!("Model-{id}"),
            battery_percent: battery,
        }
    }

    fn labels(reconciler: &RosterReconciler) -> Vec<&str> {
        reconciler.entries().iter().map(|e| e.label.as_str()).collect()
    }

    #[test]
    fn test_initial_state() {
        let reconciler = RosterReconciler::new();
        assert_eq!(labels(&reconciler), vec![PLACEHOLDER_LABEL]);
        assert_eq!(reconciler.selection(), None);
    }

    #[test]
    fn test_first_roster_rebuilds_in_server_order() {
        let mut reconciler = RosterReconciler::new();
        let outcome = reconciler.reconcile(&[device("B", 50), device("A", 80)]);

        assert_eq!(outcome, ReconcileOutcome::Rebuilt { selection_cleared: false });
        assert_eq!(
            labels(&reconciler),
            vec![PLACEHOLDER_LABEL, "Model-B (B) - 50%", "Model-A (A) - 80%"]
        );
        assert_eq!(reconciler.revision(), 1);
    }

    #[test]
    fn test_same_membership_patches_selected_label_only() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80), device("B", 50)]);
        reconciler.select(Some(DeviceId::from("A"))).unwrap();
        let before = reconciler.entries().to_vec();

        // Order differs and both batteries moved; only A's label follows.
        let outcome = reconciler.reconcile(&[device("B", 49), device("A", 79)]);

        assert_eq!(outcome, ReconcileOutcome::Patched { label_changed: true });
        assert_eq!(reconciler.entries().len(), 3);
        assert_eq!(reconciler.revision(), 1);
        assert_eq!(reconciler.entries()[1].label, "Model-A (A) - 79%");
        assert_eq!(reconciler.entries()[2], before[2]);
        let ids: Vec<_> = reconciler.device_ids().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(reconciler.selection(), Some(&DeviceId::from("A")));
    }

    #[test]
    fn test_same_membership_without_selection_is_untouched() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80)]);
        let before = reconciler.snapshot();

        let outcome = reconciler.reconcile(&[device("A", 10)]);

        assert_eq!(outcome, ReconcileOutcome::Patched { label_changed: false });
        assert_eq!(reconciler.snapshot(), before);
    }

    #[test]
    fn test_rebuild_keeps_surviving_selection() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80), device("B", 50)]);
        reconciler.select(Some(DeviceId::from("B"))).unwrap();

        let outcome = reconciler.reconcile(&[device("C", 90), device("B", 50)]);

        assert_eq!(outcome, ReconcileOutcome::Rebuilt { selection_cleared: false });
        assert!(!outcome.selection_changed());
        assert_eq!(reconciler.selection(), Some(&DeviceId::from("B")));
        assert_eq!(reconciler.entries().len(), 3);
        assert_eq!(reconciler.revision(), 2);
    }

    #[test]
    fn test_rebuild_evicts_missing_selection() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80), device("B", 50)]);
        reconciler.select(Some(DeviceId::from("A"))).unwrap();

        let outcome = reconciler.reconcile(&[device("B", 50)]);

        assert_eq!(outcome, ReconcileOutcome::Rebuilt { selection_cleared: true });
        assert!(outcome.selection_changed());
        assert_eq!(reconciler.selection(), None);
        assert!(!reconciler.contains(&DeviceId::from("A")));
    }

    #[test]
    fn test_empty_roster_clears_everything() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80)]);
        reconciler.select(Some(DeviceId::from("A"))).unwrap();

        reconciler.reconcile(&[]);

        assert_eq!(labels(&reconciler), vec![PLACEHOLDER_LABEL]);
        assert_eq!(reconciler.selection(), None);
    }

    #[test]
    fn test_select_unknown_device_rejected() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80)]);

        let err = reconciler.select(Some(DeviceId::from("Z"))).unwrap_err();
        assert_eq!(err, SelectError::UnknownDevice(DeviceId::from("Z")));
        assert_eq!(reconciler.selection(), None);
    }

    #[test]
    fn test_select_reports_changes() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80)]);

        assert_eq!(reconciler.select(Some(DeviceId::from("A"))), Ok(true));
        assert_eq!(reconciler.select(Some(DeviceId::from("A"))), Ok(false));
        assert_eq!(reconciler.select(None), Ok(true));
        assert_eq!(reconciler.select(None), Ok(false));
    }

    #[test]
    fn test_snapshot_selected_label() {
        let mut reconciler = RosterReconciler::new();
        reconciler.reconcile(&[device("A", 80)]);
        assert_eq!(reconciler.snapshot().selected_label(), PLACEHOLDER_LABEL);

        reconciler.select(Some(DeviceId::from("A"))).unwrap();
        assert_eq!(reconciler.snapshot().selected_label(), "Model-A (A) - 80%");
    }
}
