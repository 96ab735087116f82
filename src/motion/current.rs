// Run/hold current bookkeeping per axis
//
// Produces the batched current-set message. Nodes behind the 96-channel tip
// motor need a different message variant, so they travel as a separate list.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::topology::axis_to_node;
use super::types::{Axis, GantryLoad, NodeId};
use crate::bus::BusMessage;
use crate::config::CurrentDefaults;

/// Motor current in amperes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentSetting {
    pub run_current: f64,
    pub hold_current: f64,
}

impl CurrentSetting {
    pub const fn new(run_current: f64, hold_current: f64) -> Self {
        Self {
            run_current,
            hold_current,
        }
    }
}

/// One batched current-set request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentUpdate {
    pub currents: BTreeMap<NodeId, CurrentSetting>,
    /// Nodes that take the tip-motor message variant
    pub tip_motor_nodes: BTreeSet<NodeId>,
}

impl CurrentUpdate {
    pub fn targets(&self) -> BTreeSet<NodeId> {
        self.currents.keys().copied().collect()
    }

    pub fn into_message(self) -> BusMessage {
        BusMessage::SetCurrents {
            currents: self.currents,
            tip_motor_nodes: self.tip_motor_nodes,
        }
    }
}

/// Tracks the current settings last sent for each axis
#[derive(Debug, Clone)]
pub struct CurrentManager {
    defaults: CurrentDefaults,
    load: GantryLoad,
    settings: BTreeMap<Axis, CurrentSetting>,
}

impl CurrentManager {
    pub fn new(defaults: CurrentDefaults) -> Self {
        Self {
            defaults,
            load: GantryLoad::Standard,
            settings: BTreeMap::new(),
        }
    }

    pub fn load(&self) -> GantryLoad {
        self.load
    }

    pub fn settings(&self) -> &BTreeMap<Axis, CurrentSetting> {
        &self.settings
    }

    /// True if this axis needs the tip-motor message under `load`
    fn uses_tip_motor_message(axis: Axis, load: GantryLoad) -> bool {
        load == GantryLoad::HighThroughput && axis == Axis::Q
    }

    /// Axes that have a driver under this load. The tip motor exists only on
    /// the 96-channel.
    fn axis_applies(axis: Axis, load: GantryLoad) -> bool {
        match axis {
            Axis::Q => load == GantryLoad::HighThroughput,
            _ => true,
        }
    }

    /// Build the message for a subset of axes from the cached settings
    fn update_for(&self, axes: impl IntoIterator<Item = Axis>) -> CurrentUpdate {
        let mut currents: BTreeMap<NodeId, CurrentSetting> = BTreeMap::new();
        let mut tip_motor_nodes = BTreeSet::new();

        for axis in axes {
            let Some(&setting) = self.settings.get(&axis) else {
                continue;
            };
            let node = axis_to_node(axis);
            currents.insert(node, setting);
            if Self::uses_tip_motor_message(axis, self.load) {
                tip_motor_nodes.insert(node);
            }
        }

        CurrentUpdate {
            currents,
            tip_motor_nodes,
        }
    }

    /// Reset every axis to the defaults of `load` and build one batched message
    pub fn update_to_default_current_settings(&mut self, load: GantryLoad) -> CurrentUpdate {
        self.load = load;
        self.settings = self
            .defaults
            .for_load(load)
            .iter()
            .filter(|&(&axis, _)| Self::axis_applies(axis, load))
            .map(|(&axis, &setting)| (axis, setting))
            .collect();
        debug!("Default currents for {:?} load: {:?}", load, self.settings);
        let axes: Vec<Axis> = self.settings.keys().copied().collect();
        self.update_for(axes)
    }

    /// Override run currents for specific axes
    pub fn set_active_current(&mut self, axis_currents: &BTreeMap<Axis, f64>) -> CurrentUpdate {
        let axes = self.applicable(axis_currents);
        for &axis in &axes {
            let entry = self.settings.entry(axis).or_insert(CurrentSetting::new(0.0, 0.0));
            entry.run_current = axis_currents[&axis];
        }
        self.update_for(axes)
    }

    /// Override hold currents for specific axes
    pub fn set_hold_current(&mut self, axis_currents: &BTreeMap<Axis, f64>) -> CurrentUpdate {
        let axes = self.applicable(axis_currents);
        for &axis in &axes {
            let entry = self.settings.entry(axis).or_insert(CurrentSetting::new(0.0, 0.0));
            entry.hold_current = axis_currents[&axis];
        }
        self.update_for(axes)
    }

    /// Requested axes that have a driver under the current load
    fn applicable(&self, axis_currents: &BTreeMap<Axis, f64>) -> Vec<Axis> {
        axis_currents
            .keys()
            .copied()
            .filter(|&axis| {
                let applies = Self::axis_applies(axis, self.load);
                if !applies {
                    warn!("Ignoring current for {} under {:?} load", axis, self.load);
                }
                applies
            })
            .collect()
    }
}
