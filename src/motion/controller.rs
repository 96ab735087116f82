// Motion controller for the gantry
//
// Owns the present-node set, the motor status store and the position cache,
// and turns axis-level requests into move groups dispatched one at a time
// through the bus transport.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::current::{CurrentManager, CurrentUpdate};
use super::move_group::{
    MoveGroup, MoveStep, TipActionKind, build_home_group, build_jaw_group, build_tip_action_group,
};
use super::status::{StatusMap, StatusStore};
use super::tool::{
    AttachedInstrument, InstrumentInfo, PipetteName, ToolSummary, decode_gripper, decode_pipette,
};
use super::topology::{
    PresentNodeSet, axis_is_present, axis_to_node, expand_virtual_node, filter_to_present,
    possible_nodes,
};
use super::types::{Axis, AxisClass, GantryLoad, Mount, NodeId};
use crate::bus::{BusMessage, BusTransport, NodeResponse, NodeResults, normalize_results};
use crate::config::ControllerConfig;
use crate::error::{MotionError, Result};

/// Nodes a full gantry is expected to carry
pub const EXPECTED_TOPOLOGY: [NodeId; 6] = [
    NodeId::GantryX,
    NodeId::GantryY,
    NodeId::Head,
    NodeId::PipetteLeft,
    NodeId::PipetteRight,
    NodeId::Gripper,
];

/// Home waves in dispatch order. Plungers and the jaw sit on their own boards;
/// mounts must be clear before the gantry sweeps under them.
const HOME_ORDER: [AxisClass; 4] = [
    AxisClass::Plunger,
    AxisClass::GripperJaw,
    AxisClass::Mount,
    AxisClass::Gantry,
];

/// Cached positions of one node, in mm
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePosition {
    pub motor_mm: f64,
    pub encoder_mm: f64,
}

/// What happened to one requested axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AxisOutcome {
    Completed { motor_mm: f64, encoder_mm: f64 },
    Stalled,
    NoResponse,
    SkippedAbsent,
}

impl AxisOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AxisOutcome::Completed { .. })
    }
}

pub type MotionReport = BTreeMap<Axis, AxisOutcome>;

/// How a successful response should update trust
#[derive(Debug, Clone, Copy, PartialEq)]
enum Trust {
    /// Stopped on a limit switch: both flags become true
    Homed,
    /// Use the flags the node reported
    Reported,
}

pub struct MotionController<T: BusTransport> {
    bus: T,
    config: ControllerConfig,
    present: Arc<PresentNodeSet>,
    status: StatusStore,
    positions: BTreeMap<NodeId, NodePosition>,
    currents: CurrentManager,
    instruments: BTreeMap<Mount, AttachedInstrument>,
}

impl<T: BusTransport> MotionController<T> {
    pub fn new(bus: T, config: ControllerConfig) -> Self {
        let currents = CurrentManager::new(config.currents.clone());
        Self {
            bus,
            config,
            present: Arc::new(PresentNodeSet::new()),
            status: StatusStore::new(),
            positions: BTreeMap::new(),
            currents,
            instruments: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn present_nodes(&self) -> Arc<PresentNodeSet> {
        Arc::clone(&self.present)
    }

    pub fn motor_status(&self) -> Arc<StatusMap> {
        self.status.snapshot()
    }

    pub fn positions(&self) -> &BTreeMap<NodeId, NodePosition> {
        &self.positions
    }

    pub fn gantry_load(&self) -> GantryLoad {
        self.currents.load()
    }

    pub fn attached_instruments(&self) -> &BTreeMap<Mount, AttachedInstrument> {
        &self.instruments
    }

    pub fn check_ready_for_movement(&self, axes: &[Axis]) -> bool {
        self.status.is_ready_for_movement(axes)
    }

    /// Probe, read back positions and apply default currents
    pub async fn setup(&mut self, load: GantryLoad) -> Result<()> {
        let mut expected = EXPECTED_TOPOLOGY.to_vec();
        if load == GantryLoad::HighThroughput {
            expected.push(NodeId::TipMotor);
        }
        let present = self.probe_network(&expected, self.config.probe_timeout()).await?;
        let nodes: Vec<NodeId> = present.iter().copied().collect();
        self.update_motor_status(&nodes).await?;
        self.update_to_default_current_settings(load).await?;
        if let Err(e) = self.get_attached_instruments(&BTreeMap::new()).await {
            warn!("Instrument detection failed: {}", e);
        }
        Ok(())
    }

    // === Probe and tools ===

    /// Probe `expected` (aggregates expanded to every possible sub-node) and
    /// replace the present set with whoever answered
    pub async fn probe_network(
        &mut self,
        expected: &[NodeId],
        timeout: Duration,
    ) -> Result<Arc<PresentNodeSet>> {
        let targets: BTreeSet<NodeId> = expected.iter().flat_map(|&n| possible_nodes(n)).collect();
        debug!("Probing {:?}", targets);

        let results = self.bus.send(&BusMessage::Probe, &targets, timeout).await?;
        let results = normalize_results(&targets, results);
        let found: PresentNodeSet = results
            .iter()
            .filter(|(_, response)| !response.is_failure())
            .map(|(&node, _)| node)
            .collect();

        let missing: Vec<NodeId> = targets.difference(&found).copied().collect();
        if !missing.is_empty() {
            warn!("Nodes not found on bus: {:?}", missing);
        }
        // A node that dropped off may have reset; its position is no longer known
        for &node in self.present.difference(&found) {
            self.status.invalidate(node);
        }

        info!("Present nodes: {:?}", found);
        self.present = Arc::new(found);
        Ok(Arc::clone(&self.present))
    }

    /// Query and decode instrument info for every mount whose board is present
    pub async fn probe_tools(&mut self) -> Result<ToolSummary> {
        let mounts: Vec<Mount> = Mount::ALL
            .into_iter()
            .filter(|mount| self.present.contains(&mount.info_node()))
            .collect();
        let mut summary = ToolSummary::default();
        if mounts.is_empty() {
            return Ok(summary);
        }

        let targets: BTreeSet<NodeId> = mounts.iter().map(|m| m.info_node()).collect();
        let results = self
            .bus
            .send(&BusMessage::InstrumentInfo, &targets, self.config.bus_timeout())
            .await?;
        let results = normalize_results(&targets, results);

        for mount in mounts {
            let node = mount.info_node();
            let info = match (mount, &results[&node]) {
                (Mount::Left | Mount::Right, NodeResponse::PipetteInfo(raw)) => {
                    InstrumentInfo::Pipette(decode_pipette(mount, raw)?)
                }
                (Mount::Gripper, NodeResponse::GripperInfo(raw)) => {
                    InstrumentInfo::Gripper(decode_gripper(raw)?)
                }
                (_, NodeResponse::NoResponse) => {
                    warn!("No instrument info from {} ({} mount)", node, mount);
                    continue;
                }
                (Mount::Gripper, _) => {
                    return Err(MotionError::UnexpectedResponse {
                        node,
                        expected: "gripper info",
                    });
                }
                (Mount::Left | Mount::Right, _) => {
                    return Err(MotionError::UnexpectedResponse {
                        node,
                        expected: "pipette info",
                    });
                }
            };
            summary.insert(mount, info);
        }
        Ok(summary)
    }

    /// Decode attached instruments. The cached map is replaced only if every
    /// mount decodes; a mount that fails to decode loses its cached entry.
    pub async fn get_attached_instruments(
        &mut self,
        expected_models: &BTreeMap<Mount, PipetteName>,
    ) -> Result<BTreeMap<Mount, AttachedInstrument>> {
        let summary = match self.probe_tools().await {
            Ok(summary) => summary,
            Err(e) => {
                if let Some(mount) = failed_mount(&e) {
                    if let Some(stale) = self.instruments.remove(&mount) {
                        warn!("Dropping {} from {} mount: {}", stale.identity, mount, e);
                    }
                }
                return Err(e);
            }
        };

        let mut attached = BTreeMap::new();
        let pipettes = [(Mount::Left, summary.left), (Mount::Right, summary.right)];
        for (mount, info) in pipettes {
            let Some(info) = info else { continue };
            if let Some(&expected) = expected_models.get(&mount) {
                if expected != info.name {
                    warn!(
                        "Expected {:?} on {} mount but found {:?}",
                        expected, mount, info.name
                    );
                }
            }
            attached.insert(mount, AttachedInstrument::from(InstrumentInfo::Pipette(info)));
        }
        if let Some(info) = summary.gripper {
            attached.insert(
                Mount::Gripper,
                AttachedInstrument::from(InstrumentInfo::Gripper(info)),
            );
        }

        for (mount, instrument) in &attached {
            info!("{} mount: {}", mount, instrument.identity);
        }
        self.instruments = attached.clone();
        Ok(attached)
    }

    // === Motion ===

    /// Home the present subset of `axes`, one wave per axis class
    pub async fn home(&mut self, axes: &[Axis]) -> Result<MotionReport> {
        let requested: BTreeSet<Axis> = axes.iter().copied().collect();
        let mut report = MotionReport::new();

        let mut checked = Vec::new();
        for axis in requested {
            if axis_is_present(axis, &self.present) {
                checked.push(axis);
            } else {
                debug!("Skipping home of absent axis {}", axis);
                report.insert(axis, AxisOutcome::SkippedAbsent);
            }
        }

        for class in HOME_ORDER {
            let wave: Vec<Axis> = checked
                .iter()
                .copied()
                .filter(|axis| axis.class() == class)
                .collect();
            if wave.is_empty() {
                continue;
            }
            // Built only once the previous wave has resolved
            let group = build_home_group(&wave, &self.config);
            info!("Homing {:?}", wave);
            let results = self.dispatch(group, Trust::Homed).await?;
            report.extend(outcomes(&wave, &results));
        }

        Ok(report)
    }

    /// Tip pick-up or drop on pipette axes
    pub async fn tip_action(
        &mut self,
        axes: &[Axis],
        speed_mm_s: f64,
        distance_mm: f64,
        kind: TipActionKind,
    ) -> Result<MotionReport> {
        if let Some(&axis) = axes.iter().find(|axis| axis.class() != AxisClass::Plunger) {
            return Err(MotionError::NotAPipetteAxis(axis));
        }

        let requested: BTreeSet<Axis> = axes.iter().copied().collect();
        let (present, absent): (Vec<Axis>, Vec<Axis>) = requested
            .into_iter()
            .partition(|&axis| axis_is_present(axis, &self.present));

        let mut report: MotionReport = absent
            .into_iter()
            .map(|axis| (axis, AxisOutcome::SkippedAbsent))
            .collect();
        if present.is_empty() {
            return Ok(report);
        }

        let group = build_tip_action_group(&present, speed_mm_s, distance_mm, kind);
        info!("Tip {:?} on {:?}", kind, present);
        // A drop ends on the limit switch, which re-references the motor
        let trust = match kind {
            TipActionKind::Drop => Trust::Homed,
            TipActionKind::PickUp => Trust::Reported,
        };
        let results = self.dispatch(group, trust).await?;
        report.extend(outcomes(&present, &results));
        Ok(report)
    }

    pub async fn gripper_home_jaw(&mut self) -> Result<MotionReport> {
        let step = MoveStep::jaw_home(self.config.gripper_home_duty_cycle);
        self.run_jaw(step, Trust::Homed).await
    }

    pub async fn gripper_grip_jaw(&mut self, duty_cycle: f32) -> Result<MotionReport> {
        if !(0.0..=100.0).contains(&duty_cycle) {
            return Err(MotionError::InvalidDutyCycle(duty_cycle));
        }
        self.run_jaw(MoveStep::grip(duty_cycle), Trust::Reported).await
    }

    pub async fn gripper_hold_jaw(&mut self, encoder_position_um: i32) -> Result<MotionReport> {
        self.run_jaw(MoveStep::hold(encoder_position_um), Trust::Reported)
            .await
    }

    async fn run_jaw(&mut self, step: MoveStep, trust: Trust) -> Result<MotionReport> {
        let node = axis_to_node(Axis::G);
        if !self.present.contains(&node) {
            return Err(MotionError::NodeNotPresent(node));
        }
        let group = build_jaw_group(step);
        debug!("Jaw {:?}", step.move_type);
        let results = self.dispatch(group, trust).await?;
        Ok(outcomes(&[Axis::G], &results))
    }

    /// Send one move group and fold per-node results into status and positions
    async fn dispatch(&mut self, group: MoveGroup, trust: Trust) -> Result<NodeResults> {
        let targets = group.nodes();
        debug!("Dispatching move group: {:?}", group);

        let message = BusMessage::ExecuteMoveGroup(group);
        let results = match self
            .bus
            .send(&message, &targets, self.config.bus_timeout())
            .await
        {
            Ok(results) => normalize_results(&targets, results),
            Err(e) => {
                // Steps may already be running; nothing in this group is trusted
                for &node in &targets {
                    self.status.invalidate(node);
                }
                return Err(e.into());
            }
        };

        for (&node, response) in &results {
            match response {
                NodeResponse::Position(update) => {
                    self.positions.insert(
                        node,
                        NodePosition {
                            motor_mm: update.motor_position_mm,
                            encoder_mm: update.encoder_position_mm,
                        },
                    );
                    match trust {
                        Trust::Homed => self.status.mark_homed(node),
                        Trust::Reported => {
                            self.status
                                .mark_estimated(node, update.motor_ok, update.encoder_ok)
                        }
                    }
                }
                NodeResponse::Stall => {
                    warn!("Node {} stalled", node);
                    self.status.invalidate(node);
                }
                NodeResponse::NoResponse => {
                    warn!("Node {} did not respond to move group", node);
                    self.status.invalidate(node);
                }
                other => {
                    warn!("Unexpected move response from {}: {:?}", node, other);
                    self.status.invalidate(node);
                }
            }
        }
        Ok(results)
    }

    // === Position estimation ===

    /// Read motor and encoder positions straight from the nodes
    pub async fn update_motor_status(
        &mut self,
        nodes: &[NodeId],
    ) -> Result<BTreeMap<NodeId, NodePosition>> {
        let candidates = nodes
            .iter()
            .flat_map(|&node| expand_virtual_node(node, &self.present));
        let targets = filter_to_present(candidates, &self.present);
        let mut read = BTreeMap::new();
        if targets.is_empty() {
            return Ok(read);
        }

        let results = self
            .bus
            .send(&BusMessage::ReadMotorPosition, &targets, self.config.bus_timeout())
            .await?;
        for (node, response) in normalize_results(&targets, results) {
            match response {
                NodeResponse::Position(update) => {
                    let position = NodePosition {
                        motor_mm: update.motor_position_mm,
                        encoder_mm: update.encoder_position_mm,
                    };
                    self.positions.insert(node, position);
                    self.status
                        .mark_estimated(node, update.motor_ok, update.encoder_ok);
                    read.insert(node, position);
                }
                other => warn!("No position from {}: {:?}", node, other),
            }
        }
        Ok(read)
    }

    /// Re-derive motor positions from the encoders. Every axis must be homed;
    /// nothing is sent otherwise.
    pub async fn update_motor_estimation(&mut self, axes: &[Axis]) -> Result<MotionReport> {
        let requested: Vec<Axis> = axes
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let unhomed = self.status.unhomed_axes(&requested);
        if !unhomed.is_empty() {
            return Err(MotionError::MustHome { axes: unhomed });
        }

        let targets: BTreeSet<NodeId> = requested.iter().map(|&axis| axis_to_node(axis)).collect();
        if targets.is_empty() {
            return Ok(MotionReport::new());
        }

        let results = self
            .bus
            .send(&BusMessage::UpdateEstimation, &targets, self.config.bus_timeout())
            .await?;
        let results = normalize_results(&targets, results);
        for (&node, response) in &results {
            match response {
                NodeResponse::Position(update) => {
                    self.positions.insert(
                        node,
                        NodePosition {
                            motor_mm: update.motor_position_mm,
                            encoder_mm: update.encoder_position_mm,
                        },
                    );
                    self.status
                        .mark_estimated(node, update.motor_ok, update.encoder_ok);
                }
                other => warn!("Estimation failed on {}: {:?}", node, other),
            }
        }
        Ok(outcomes(&requested, &results))
    }

    // === Currents ===

    pub async fn update_to_default_current_settings(&mut self, load: GantryLoad) -> Result<()> {
        info!("Applying default currents for {:?} load", load);
        let update = self.currents.update_to_default_current_settings(load);
        self.send_currents(update).await
    }

    pub async fn set_active_current(&mut self, axis_currents: &BTreeMap<Axis, f64>) -> Result<()> {
        let update = self.currents.set_active_current(axis_currents);
        self.send_currents(update).await
    }

    pub async fn set_hold_current(&mut self, axis_currents: &BTreeMap<Axis, f64>) -> Result<()> {
        let update = self.currents.set_hold_current(axis_currents);
        self.send_currents(update).await
    }

    async fn send_currents(&mut self, update: CurrentUpdate) -> Result<()> {
        let targets = update.targets();
        if targets.is_empty() {
            return Ok(());
        }
        if !update.tip_motor_nodes.is_empty() {
            debug!("Tip-motor current message for {:?}", update.tip_motor_nodes);
        }
        let results = self
            .bus
            .send(&update.into_message(), &targets, self.config.bus_timeout())
            .await?;
        for (node, response) in normalize_results(&targets, results) {
            if response.is_failure() {
                warn!("Node {} did not acknowledge current settings", node);
            }
        }
        Ok(())
    }
}

/// Mount whose instrument info could not be decoded
fn failed_mount(error: &MotionError) -> Option<Mount> {
    match error {
        MotionError::InvalidPipetteName { mount, .. }
        | MotionError::InvalidPipetteModel { mount, .. } => Some(*mount),
        MotionError::UnexpectedResponse { node, .. } => Mount::ALL
            .into_iter()
            .find(|mount| mount.info_node() == *node),
        _ => None,
    }
}

/// Map per-node results back onto the requested axes
fn outcomes(axes: &[Axis], results: &NodeResults) -> MotionReport {
    axes.iter()
        .map(|&axis| {
            let outcome = match results.get(&axis_to_node(axis)) {
                Some(NodeResponse::Position(update)) => AxisOutcome::Completed {
                    motor_mm: update.motor_position_mm,
                    encoder_mm: update.encoder_position_mm,
                },
                Some(NodeResponse::Stall) => AxisOutcome::Stalled,
                _ => AxisOutcome::NoResponse,
            };
            (axis, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;
    use crate::motion::move_group::StopCondition;

    async fn probed(bus: &SimulatedBus) -> MotionController<SimulatedBus> {
        let mut controller = MotionController::new(bus.clone(), ControllerConfig::default());
        controller
            .probe_network(&EXPECTED_TOPOLOGY, Duration::from_millis(10))
            .await
            .unwrap();
        bus.clear_sent();
        controller
    }

    #[tokio::test]
    async fn test_home_mounts_before_gantry() {
        let bus = SimulatedBus::full_gantry();
        let mut controller = probed(&bus).await;

        let report = controller.home(&[Axis::X, Axis::Y, Axis::ZL]).await.unwrap();
        assert!(report.values().all(AxisOutcome::is_completed));

        let groups = bus.move_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].nodes(), BTreeSet::from([NodeId::HeadL]));
        assert_eq!(
            groups[1].nodes(),
            BTreeSet::from([NodeId::GantryX, NodeId::GantryY])
        );
        assert!(controller.check_ready_for_movement(&[Axis::X, Axis::Y, Axis::ZL]));
    }

    #[tokio::test]
    async fn test_stalled_node_not_marked() {
        let bus = SimulatedBus::full_gantry();
        let mut controller = probed(&bus).await;
        bus.set_stalling(NodeId::GantryY, true);

        let report = controller.home(&[Axis::X, Axis::Y]).await.unwrap();
        assert!(report[&Axis::X].is_completed());
        assert_eq!(report[&Axis::Y], AxisOutcome::Stalled);
        assert!(controller.check_ready_for_movement(&[Axis::X]));
        assert!(!controller.check_ready_for_movement(&[Axis::Y]));
    }

    #[tokio::test]
    async fn test_jaw_hold_targets_jaw_only() {
        let bus = SimulatedBus::full_gantry();
        let mut controller = probed(&bus).await;

        controller.gripper_hold_jaw(15_000).await.unwrap();
        let groups = bus.move_groups();
        assert_eq!(groups.len(), 1);
        let (node, step) = groups[0].steps().next().unwrap();
        assert_eq!(node, NodeId::GripperG);
        assert_eq!(step.stop_condition, StopCondition::EncoderPosition);
    }

    #[tokio::test]
    async fn test_grip_rejects_bad_duty_cycle() {
        let bus = SimulatedBus::full_gantry();
        let mut controller = probed(&bus).await;

        assert!(matches!(
            controller.gripper_grip_jaw(120.0).await,
            Err(MotionError::InvalidDutyCycle(_))
        ));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_outcomes_default_to_no_response() {
        let results = NodeResults::from([(NodeId::GantryX, NodeResponse::Ack)]);
        let report = outcomes(&[Axis::X, Axis::Y], &results);
        assert_eq!(report[&Axis::X], AxisOutcome::NoResponse);
        assert_eq!(report[&Axis::Y], AxisOutcome::NoResponse);
    }
}
