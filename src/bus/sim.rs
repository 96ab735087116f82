// In-memory bus with simulated nodes
//
// Used by the `--simulate` runtime mode and by tests. Clones share state, so a
// test can keep a handle while the controller owns another.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{BusMessage, BusTransport, NodeResponse, NodeResults, PositionUpdate};
use crate::error::BusError;
use crate::motion::move_group::{MoveGroup, MoveStep, MoveType};
use crate::motion::tool::{RawGripperInfo, RawPipetteInfo};
use crate::motion::types::{Mount, NodeId};

/// Simulated state of one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimNode {
    pub motor_position_mm: f64,
    pub encoder_position_mm: f64,
    pub motor_ok: bool,
    pub encoder_ok: bool,
    pub info: Option<NodeResponse>,
}

impl SimNode {
    fn position(&self) -> NodeResponse {
        NodeResponse::Position(PositionUpdate {
            motor_position_mm: self.motor_position_mm,
            encoder_position_mm: self.encoder_position_mm,
            motor_ok: self.motor_ok,
            encoder_ok: self.encoder_ok,
        })
    }

    fn apply(&mut self, step: &MoveStep) {
        match step.move_type {
            MoveType::Home => {
                self.motor_position_mm = 0.0;
                self.encoder_position_mm = 0.0;
                self.motor_ok = true;
                self.encoder_ok = true;
            }
            MoveType::Linear => {
                if let Some(um) = step.encoder_position_um {
                    self.motor_position_mm = f64::from(um) / 1000.0;
                } else {
                    self.motor_position_mm += step.distance_mm;
                }
                self.encoder_position_mm = self.motor_position_mm;
            }
            MoveType::Grip => {}
        }
    }
}

/// A message as the simulated bus saw it
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: BusMessage,
    pub targets: BTreeSet<NodeId>,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: BTreeMap<NodeId, SimNode>,
    stalling: BTreeSet<NodeId>,
    silent: BTreeSet<NodeId>,
    transport_error: bool,
    sent: Vec<SentMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with the given concrete nodes connected, all unhomed
    pub fn with_nodes<I: IntoIterator<Item = NodeId>>(nodes: I) -> Self {
        let bus = Self::new();
        {
            let mut state = bus.lock();
            for node in nodes {
                state.nodes.insert(node, SimNode::default());
            }
        }
        bus
    }

    /// Every concrete node of a fully populated gantry
    pub fn full_gantry() -> Self {
        Self::with_nodes(NodeId::ALL.into_iter().filter(|node| !node.is_aggregate()))
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not wedge the other handles
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connect(&self, node: NodeId) {
        self.lock().nodes.entry(node).or_default();
    }

    pub fn disconnect(&self, node: NodeId) {
        self.lock().nodes.remove(&node);
    }

    pub fn attach_pipette(&self, mount: Mount, info: RawPipetteInfo) {
        let node = mount.info_node();
        self.lock().nodes.entry(node).or_default().info = Some(NodeResponse::PipetteInfo(info));
    }

    pub fn attach_gripper(&self, info: RawGripperInfo) {
        let node = Mount::Gripper.info_node();
        self.lock().nodes.entry(node).or_default().info = Some(NodeResponse::GripperInfo(info));
    }

    /// Make every motion step on `node` stall until cleared
    pub fn set_stalling(&self, node: NodeId, stalling: bool) {
        let mut state = self.lock();
        if stalling {
            state.stalling.insert(node);
        } else {
            state.stalling.remove(&node);
        }
    }

    /// Connected but never answers
    pub fn set_silent(&self, node: NodeId, silent: bool) {
        let mut state = self.lock();
        if silent {
            state.silent.insert(node);
        } else {
            state.silent.remove(&node);
        }
    }

    /// Fail every send at the transport level until cleared
    pub fn set_transport_error(&self, failing: bool) {
        self.lock().transport_error = failing;
    }

    pub fn set_node_state(&self, node: NodeId, sim: SimNode) {
        self.lock().nodes.insert(node, sim);
    }

    pub fn node_state(&self, node: NodeId) -> Option<SimNode> {
        self.lock().nodes.get(&node).cloned()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Move groups in dispatch order
    pub fn move_groups(&self) -> Vec<MoveGroup> {
        self.lock()
            .sent
            .iter()
            .filter_map(|sent| match &sent.message {
                BusMessage::ExecuteMoveGroup(group) => Some(group.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    fn respond(state: &mut SimState, message: &BusMessage, node: NodeId) -> Option<NodeResponse> {
        if state.silent.contains(&node) {
            return None;
        }
        let stalling = state.stalling.contains(&node);
        let sim = state.nodes.get_mut(&node)?;

        let response = match message {
            BusMessage::Probe => NodeResponse::Present,
            BusMessage::SetCurrents { .. } => NodeResponse::Ack,
            BusMessage::ReadMotorPosition => sim.position(),
            BusMessage::UpdateEstimation => {
                sim.motor_position_mm = sim.encoder_position_mm;
                sim.encoder_ok = true;
                sim.position()
            }
            BusMessage::InstrumentInfo => sim.info.clone()?,
            BusMessage::ExecuteMoveGroup(group) => {
                if stalling {
                    sim.motor_ok = false;
                    return Some(NodeResponse::Stall);
                }
                for step in group.stages.iter().filter_map(|stage| stage.get(&node)) {
                    sim.apply(step);
                }
                sim.position()
            }
        };
        Some(response)
    }
}

#[async_trait]
impl BusTransport for SimulatedBus {
    async fn send(
        &self,
        message: &BusMessage,
        targets: &BTreeSet<NodeId>,
        _timeout: Duration,
    ) -> Result<NodeResults, BusError> {
        let mut state = self.lock();
        debug!("Simulated bus: {} -> {:?}", message.name(), targets);
        state.sent.push(SentMessage {
            message: message.clone(),
            targets: targets.clone(),
        });
        if state.transport_error {
            return Err(BusError::Transport("simulated link failure".to_string()));
        }

        let mut results = NodeResults::new();
        for &node in targets {
            if let Some(response) = Self::respond(&mut state, message, node) {
                results.insert(node, response);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reports_connected_nodes_only() {
        let bus = SimulatedBus::with_nodes([NodeId::GantryX, NodeId::HeadL]);
        bus.set_silent(NodeId::HeadL, true);
        let targets = BTreeSet::from([NodeId::GantryX, NodeId::GantryY, NodeId::HeadL]);

        let results = bus
            .send(&BusMessage::Probe, &targets, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[&NodeId::GantryX], NodeResponse::Present);
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_fails_whole_send() {
        let bus = SimulatedBus::with_nodes([NodeId::GantryX]);
        bus.set_transport_error(true);
        let targets = BTreeSet::from([NodeId::GantryX]);

        let result = bus.send(&BusMessage::Probe, &targets, Duration::ZERO).await;
        assert!(matches!(result, Err(BusError::Transport(_))));

        bus.set_transport_error(false);
        assert!(bus.send(&BusMessage::Probe, &targets, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_home_step_sets_flags() {
        let bus = SimulatedBus::with_nodes([NodeId::GantryX]);
        let group = MoveGroup::single_stage(BTreeMap::from([(
            NodeId::GantryX,
            MoveStep::home(-100.0, 40.0),
        )]));
        let targets = BTreeSet::from([NodeId::GantryX]);

        bus.send(&BusMessage::ExecuteMoveGroup(group), &targets, Duration::ZERO)
            .await
            .unwrap();
        let node = bus.node_state(NodeId::GantryX).unwrap();
        assert!(node.motor_ok && node.encoder_ok);
        assert_eq!(node.motor_position_mm, 0.0);
    }
}
