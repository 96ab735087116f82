// Axis <-> node translation and aggregate-node expansion
//
// Everything here is pure: presence is always passed in, never looked up.

use std::collections::BTreeSet;

use super::types::{Axis, NodeId, NodeKind};
use crate::error::{MotionError, Result};

/// Nodes confirmed reachable by the last probe
pub type PresentNodeSet = BTreeSet<NodeId>;

/// Node that drives an axis. Total over every axis.
pub fn axis_to_node(axis: Axis) -> NodeId {
    match axis {
        Axis::X => NodeId::GantryX,
        Axis::Y => NodeId::GantryY,
        Axis::ZL => NodeId::HeadL,
        Axis::ZR => NodeId::HeadR,
        Axis::ZG => NodeId::GripperZ,
        Axis::PL => NodeId::PipetteLeft,
        Axis::PR => NodeId::PipetteRight,
        Axis::Q => NodeId::TipMotor,
        Axis::G => NodeId::GripperG,
    }
}

/// Axis driven by a node; aggregates have none
pub fn node_to_axis(node: NodeId) -> Result<Axis> {
    Axis::ALL
        .into_iter()
        .find(|&axis| axis_to_node(axis) == node)
        .ok_or(MotionError::UnknownNode(node))
}

/// Expand an aggregate into its sub-nodes that are present.
/// Concrete nodes come back unchanged whether present or not.
pub fn expand_virtual_node(node: NodeId, present: &PresentNodeSet) -> BTreeSet<NodeId> {
    match node.kind() {
        NodeKind::Concrete(concrete) => BTreeSet::from([concrete]),
        NodeKind::Aggregate(members) => members
            .iter()
            .copied()
            .filter(|member| present.contains(member))
            .collect(),
    }
}

/// Every concrete node an aggregate could stand for, regardless of presence
pub fn possible_nodes(node: NodeId) -> BTreeSet<NodeId> {
    match node.kind() {
        NodeKind::Concrete(concrete) => BTreeSet::from([concrete]),
        NodeKind::Aggregate(members) => members.iter().copied().collect(),
    }
}

pub fn filter_to_present<I>(candidates: I, present: &PresentNodeSet) -> BTreeSet<NodeId>
where
    I: IntoIterator<Item = NodeId>,
{
    candidates
        .into_iter()
        .filter(|node| present.contains(node))
        .collect()
}

pub fn axis_is_present(axis: Axis, present: &PresentNodeSet) -> bool {
    present.contains(&axis_to_node(axis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_node_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(node_to_axis(axis_to_node(axis)).unwrap(), axis);
        }
    }

    #[test]
    fn test_aggregate_has_no_axis() {
        assert!(matches!(
            node_to_axis(NodeId::Head),
            Err(MotionError::UnknownNode(NodeId::Head))
        ));
        assert!(matches!(
            node_to_axis(NodeId::Gripper),
            Err(MotionError::UnknownNode(NodeId::Gripper))
        ));
    }

    #[test]
    fn test_expand_head_both_present() {
        let present = PresentNodeSet::from([NodeId::HeadL, NodeId::HeadR, NodeId::GantryX]);
        assert_eq!(
            expand_virtual_node(NodeId::Head, &present),
            BTreeSet::from([NodeId::HeadL, NodeId::HeadR])
        );
    }

    #[test]
    fn test_expand_head_one_present() {
        let present = PresentNodeSet::from([NodeId::HeadL]);
        assert_eq!(
            expand_virtual_node(NodeId::Head, &present),
            BTreeSet::from([NodeId::HeadL])
        );
    }

    #[test]
    fn test_expand_gripper_none_present() {
        let present = PresentNodeSet::from([NodeId::HeadL]);
        assert!(expand_virtual_node(NodeId::Gripper, &present).is_empty());
    }

    #[test]
    fn test_expand_concrete_is_identity() {
        let present = PresentNodeSet::new();
        assert_eq!(
            expand_virtual_node(NodeId::GantryX, &present),
            BTreeSet::from([NodeId::GantryX])
        );
    }

    #[test]
    fn test_filter_to_present() {
        let present = PresentNodeSet::from([NodeId::GantryX, NodeId::HeadL]);
        let filtered = filter_to_present([NodeId::GantryX, NodeId::GantryY, NodeId::HeadL], &present);
        assert_eq!(filtered, BTreeSet::from([NodeId::GantryX, NodeId::HeadL]));
    }
}
