// Motor/encoder trust flags per node
//
// The map is held behind an Arc and replaced on write, so a snapshot handed
// out to a reader is never mutated underneath it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::topology::axis_to_node;
use super::types::{Axis, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorStatus {
    pub motor_ok: bool,
    pub encoder_ok: bool,
}

pub type StatusMap = BTreeMap<NodeId, MotorStatus>;

/// Single writer of the motor status map
#[derive(Debug, Default)]
pub struct StatusStore {
    map: Arc<StatusMap>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed map
    pub fn snapshot(&self) -> Arc<StatusMap> {
        Arc::clone(&self.map)
    }

    pub fn get(&self, node: NodeId) -> Option<MotorStatus> {
        self.map.get(&node).copied()
    }

    fn commit(&mut self, node: NodeId, status: MotorStatus) {
        let mut next = StatusMap::clone(&self.map);
        next.insert(node, status);
        self.map = Arc::new(next);
    }

    /// Both flags trusted after a successful home
    pub fn mark_homed(&mut self, node: NodeId) {
        debug!("Node {} homed", node);
        self.commit(
            node,
            MotorStatus {
                motor_ok: true,
                encoder_ok: true,
            },
        );
    }

    pub fn mark_estimated(&mut self, node: NodeId, motor_ok: bool, encoder_ok: bool) {
        debug!(
            "Node {} status: motor_ok={}, encoder_ok={}",
            node, motor_ok, encoder_ok
        );
        self.commit(
            node,
            MotorStatus {
                motor_ok,
                encoder_ok,
            },
        );
    }

    /// Drop motor trust after a stall or lost node, keeping the encoder flag
    pub fn invalidate(&mut self, node: NodeId) {
        let encoder_ok = self.get(node).is_some_and(|s| s.encoder_ok);
        self.mark_estimated(node, false, encoder_ok);
    }

    pub fn is_node_ready(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|s| s.motor_ok)
    }

    /// True iff every node behind `axes` has a trusted motor position
    pub fn is_ready_for_movement(&self, axes: &[Axis]) -> bool {
        axes.iter()
            .all(|&axis| self.is_node_ready(axis_to_node(axis)))
    }

    /// Axes among `axes` whose node is not trusted, in request order
    pub fn unhomed_axes(&self, axes: &[Axis]) -> Vec<Axis> {
        axes.iter()
            .copied()
            .filter(|&axis| !self.is_node_ready(axis_to_node(axis)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_node_not_ready() {
        let store = StatusStore::new();
        assert!(!store.is_ready_for_movement(&[Axis::X]));
        assert_eq!(store.unhomed_axes(&[Axis::X]), vec![Axis::X]);
    }

    #[test]
    fn test_mark_homed_makes_ready() {
        let mut store = StatusStore::new();
        store.mark_homed(NodeId::GantryX);
        store.mark_homed(NodeId::GantryY);
        assert!(store.is_ready_for_movement(&[Axis::X, Axis::Y]));
        assert!(!store.is_ready_for_movement(&[Axis::X, Axis::ZL]));
        assert!(store.unhomed_axes(&[Axis::X, Axis::Y]).is_empty());
    }

    #[test]
    fn test_encoder_only_is_not_ready() {
        let mut store = StatusStore::new();
        store.mark_estimated(NodeId::HeadL, false, true);
        assert!(!store.is_ready_for_movement(&[Axis::ZL]));
        assert_eq!(store.unhomed_axes(&[Axis::ZL, Axis::X]), vec![Axis::ZL, Axis::X]);
    }

    #[test]
    fn test_invalidate_keeps_encoder() {
        let mut store = StatusStore::new();
        store.mark_homed(NodeId::HeadR);
        store.invalidate(NodeId::HeadR);
        assert_eq!(
            store.get(NodeId::HeadR),
            Some(MotorStatus {
                motor_ok: false,
                encoder_ok: true
            })
        );
    }

    #[test]
    fn test_snapshot_is_not_torn_by_writes() {
        let mut store = StatusStore::new();
        store.mark_homed(NodeId::GantryX);
        let before = store.snapshot();
        store.invalidate(NodeId::GantryX);
        assert!(before[&NodeId::GantryX].motor_ok);
        assert!(!store.snapshot()[&NodeId::GantryX].motor_ok);
    }
}
