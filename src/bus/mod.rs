// Bus transport boundary
//
// The motion core never touches frames. It hands a message and a target set to
// a BusTransport and gets one result per node back.

pub mod sim;
pub mod zenoh_bus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::BusError;
use crate::motion::current::CurrentSetting;
use crate::motion::move_group::MoveGroup;
use crate::motion::tool::{RawGripperInfo, RawPipetteInfo};
use crate::motion::types::NodeId;

pub use sim::SimulatedBus;
pub use zenoh_bus::ZenohBus;

/// Messages the controller sends to nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// Presence probe
    Probe,
    ExecuteMoveGroup(MoveGroup),
    SetCurrents {
        currents: BTreeMap<NodeId, CurrentSetting>,
        /// Nodes that take the tip-motor current message variant
        tip_motor_nodes: BTreeSet<NodeId>,
    },
    ReadMotorPosition,
    /// Re-derive the motor position from the encoder
    UpdateEstimation,
    InstrumentInfo,
}

impl BusMessage {
    pub fn name(&self) -> &'static str {
        match self {
            BusMessage::Probe => "probe",
            BusMessage::ExecuteMoveGroup(_) => "execute_move_group",
            BusMessage::SetCurrents { .. } => "set_currents",
            BusMessage::ReadMotorPosition => "read_motor_position",
            BusMessage::UpdateEstimation => "update_estimation",
            BusMessage::InstrumentInfo => "instrument_info",
        }
    }
}

/// Position and trust flags reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub motor_position_mm: f64,
    pub encoder_position_mm: f64,
    pub motor_ok: bool,
    pub encoder_ok: bool,
}

/// Per-node result of a bus request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeResponse {
    Present,
    Ack,
    Position(PositionUpdate),
    PipetteInfo(RawPipetteInfo),
    GripperInfo(RawGripperInfo),
    Stall,
    NoResponse,
}

impl NodeResponse {
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeResponse::Stall | NodeResponse::NoResponse)
    }
}

pub type NodeResults = BTreeMap<NodeId, NodeResponse>;

/// The only I/O primitive the motion core uses
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Send `message` to `targets` and wait up to `timeout` for per-node results.
    /// Targets missing from the returned map did not respond.
    async fn send(
        &self,
        message: &BusMessage,
        targets: &BTreeSet<NodeId>,
        timeout: Duration,
    ) -> Result<NodeResults, BusError>;
}

/// Give every target exactly one result, filling silent ones with NoResponse
/// and dropping replies from nodes that were not asked.
pub fn normalize_results(targets: &BTreeSet<NodeId>, mut results: NodeResults) -> NodeResults {
    targets
        .iter()
        .map(|&node| {
            let response = results.remove(&node).unwrap_or(NodeResponse::NoResponse);
            (node, response)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fills_missing_and_drops_extra() {
        let targets = BTreeSet::from([NodeId::GantryX, NodeId::GantryY]);
        let results = NodeResults::from([
            (NodeId::GantryX, NodeResponse::Present),
            (NodeId::HeadL, NodeResponse::Present),
        ]);
        let normalized = normalize_results(&targets, results);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[&NodeId::GantryX], NodeResponse::Present);
        assert_eq!(normalized[&NodeId::GantryY], NodeResponse::NoResponse);
    }

    #[test]
    fn test_message_json_shape() {
        let message = BusMessage::SetCurrents {
            currents: BTreeMap::from([(NodeId::TipMotor, CurrentSetting::new(1.5, 0.1))]),
            tip_motor_nodes: BTreeSet::from([NodeId::TipMotor]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "set_currents");
        assert_eq!(json["tip_motor_nodes"][0], "tip_motor");
        assert_eq!(json["currents"]["tip_motor"]["run_current"], 1.5);

        let parsed: BusMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }
}
