// Node and axis identifiers for the gantry
//
// A NodeId is a bus-addressable controller board. An Axis is a robot-level
// degree of freedom. Two NodeIds (Head, Gripper) are aggregates that only make
// sense once expanded against the set of boards that answered a probe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus-addressable motor controller nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    GantryX,
    GantryY,
    Head,
    HeadL,
    HeadR,
    PipetteLeft,
    PipetteRight,
    TipMotor,
    Gripper,
    GripperZ,
    GripperG,
}

/// Either a concrete board or an aggregate standing in for several
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Concrete(NodeId),
    Aggregate(&'static [NodeId]),
}

const HEAD_NODES: &[NodeId] = &[NodeId::HeadL, NodeId::HeadR];
const GRIPPER_NODES: &[NodeId] = &[NodeId::GripperZ, NodeId::GripperG];

impl NodeId {
    /// Every node, aggregates included
    pub const ALL: [NodeId; 11] = [
        NodeId::GantryX,
        NodeId::GantryY,
        NodeId::Head,
        NodeId::HeadL,
        NodeId::HeadR,
        NodeId::PipetteLeft,
        NodeId::PipetteRight,
        NodeId::TipMotor,
        NodeId::Gripper,
        NodeId::GripperZ,
        NodeId::GripperG,
    ];

    pub fn kind(self) -> NodeKind {
        match self {
            NodeId::Head => NodeKind::Aggregate(HEAD_NODES),
            NodeId::Gripper => NodeKind::Aggregate(GRIPPER_NODES),
            other => NodeKind::Concrete(other),
        }
    }

    pub fn is_aggregate(self) -> bool {
        matches!(self.kind(), NodeKind::Aggregate(_))
    }

    /// One-byte bus address
    pub fn address(self) -> u8 {
        match self {
            NodeId::Gripper => 0x20,
            NodeId::GripperZ => 0x21,
            NodeId::GripperG => 0x22,
            NodeId::GantryX => 0x30,
            NodeId::GantryY => 0x40,
            NodeId::Head => 0x50,
            NodeId::HeadL => 0x51,
            NodeId::HeadR => 0x52,
            NodeId::PipetteLeft => 0x60,
            NodeId::TipMotor => 0x61,
            NodeId::PipetteRight => 0x70,
        }
    }

    pub fn from_address(address: u8) -> Option<NodeId> {
        NodeId::ALL.into_iter().find(|node| node.address() == address)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeId::GantryX => "gantry_x",
            NodeId::GantryY => "gantry_y",
            NodeId::Head => "head",
            NodeId::HeadL => "head_l",
            NodeId::HeadR => "head_r",
            NodeId::PipetteLeft => "pipette_left",
            NodeId::PipetteRight => "pipette_right",
            NodeId::TipMotor => "tip_motor",
            NodeId::Gripper => "gripper",
            NodeId::GripperZ => "gripper_z",
            NodeId::GripperG => "gripper_g",
        };
        f.write_str(name)
    }
}

/// Robot-level degrees of freedom
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    ZL,
    ZR,
    ZG,
    PL,
    PR,
    /// 96-channel tip motor
    Q,
    /// Gripper jaw
    G,
}

/// Classes of axis that get scheduled differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisClass {
    Gantry,
    Mount,
    Plunger,
    GripperJaw,
}

impl Axis {
    pub const ALL: [Axis; 9] = [
        Axis::X,
        Axis::Y,
        Axis::ZL,
        Axis::ZR,
        Axis::ZG,
        Axis::PL,
        Axis::PR,
        Axis::Q,
        Axis::G,
    ];

    pub fn class(self) -> AxisClass {
        match self {
            Axis::X | Axis::Y => AxisClass::Gantry,
            Axis::ZL | Axis::ZR | Axis::ZG => AxisClass::Mount,
            Axis::PL | Axis::PR | Axis::Q => AxisClass::Plunger,
            Axis::G => AxisClass::GripperJaw,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::ZL => "Z_L",
            Axis::ZR => "Z_R",
            Axis::ZG => "Z_G",
            Axis::PL => "P_L",
            Axis::PR => "P_R",
            Axis::Q => "Q",
            Axis::G => "G",
        };
        f.write_str(name)
    }
}

/// Instrument mounts on the head
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mount {
    Left,
    Right,
    Gripper,
}

impl Mount {
    pub const ALL: [Mount; 3] = [Mount::Left, Mount::Right, Mount::Gripper];

    /// Node that answers instrument-info requests for this mount
    pub fn info_node(self) -> NodeId {
        match self {
            Mount::Left => NodeId::PipetteLeft,
            Mount::Right => NodeId::PipetteRight,
            Mount::Gripper => NodeId::GripperZ,
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mount::Left => "left",
            Mount::Right => "right",
            Mount::Gripper => "gripper",
        };
        f.write_str(name)
    }
}

/// Coarse load classification of whatever is attached to the gantry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GantryLoad {
    #[default]
    Standard,
    HighThroughput,
}
