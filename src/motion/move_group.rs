// Move group construction
//
// A move group is one atomically dispatched wave: an ordered list of stages,
// each stage a set of per-node steps that start together. Builders here are
// pure; dispatch and ordering between groups live in the controller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::topology::axis_to_node;
use super::types::{Axis, AxisClass, NodeId};
use crate::config::ControllerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Home,
    Linear,
    Grip,
}

/// Physical signal that ends a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    None,
    LimitSwitch,
    EncoderPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipActionKind {
    PickUp,
    Drop,
}

/// One node's contribution to a move group stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveStep {
    pub move_type: MoveType,
    pub stop_condition: StopCondition,
    pub distance_mm: f64,
    pub velocity_mm_s: f64,
    pub acceleration_mm_s2: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duty_cycle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_position_um: Option<i32>,
}

impl MoveStep {
    /// Drive toward the limit switch with no acceleration ramp
    pub fn home(distance_mm: f64, velocity_mm_s: f64) -> Self {
        Self {
            move_type: MoveType::Home,
            stop_condition: StopCondition::LimitSwitch,
            distance_mm,
            velocity_mm_s,
            acceleration_mm_s2: 0.0,
            duty_cycle: None,
            encoder_position_um: None,
        }
    }

    pub fn tip_action(distance_mm: f64, velocity_mm_s: f64, kind: TipActionKind) -> Self {
        let stop_condition = match kind {
            TipActionKind::PickUp => StopCondition::None,
            TipActionKind::Drop => StopCondition::LimitSwitch,
        };
        Self {
            move_type: MoveType::Linear,
            stop_condition,
            distance_mm,
            velocity_mm_s,
            acceleration_mm_s2: 0.0,
            duty_cycle: None,
            encoder_position_um: None,
        }
    }

    /// Jaw home runs open-loop at a PWM duty cycle
    pub fn jaw_home(duty_cycle: f32) -> Self {
        Self {
            duty_cycle: Some(duty_cycle),
            ..Self::home(0.0, 0.0)
        }
    }

    pub fn grip(duty_cycle: f32) -> Self {
        Self {
            move_type: MoveType::Grip,
            stop_condition: StopCondition::None,
            distance_mm: 0.0,
            velocity_mm_s: 0.0,
            acceleration_mm_s2: 0.0,
            duty_cycle: Some(duty_cycle),
            encoder_position_um: None,
        }
    }

    pub fn hold(encoder_position_um: i32) -> Self {
        Self {
            move_type: MoveType::Linear,
            stop_condition: StopCondition::EncoderPosition,
            distance_mm: 0.0,
            velocity_mm_s: 0.0,
            acceleration_mm_s2: 0.0,
            duty_cycle: None,
            encoder_position_um: Some(encoder_position_um),
        }
    }
}

pub type MoveStage = BTreeMap<NodeId, MoveStep>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveGroup {
    pub stages: Vec<MoveStage>,
}

impl MoveGroup {
    pub fn single_stage(stage: MoveStage) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    /// Every (node, step) in dispatch order
    pub fn steps(&self) -> impl Iterator<Item = (NodeId, &MoveStep)> {
        self.stages
            .iter()
            .flat_map(|stage| stage.iter().map(|(&node, step)| (node, step)))
    }

    pub fn nodes(&self) -> std::collections::BTreeSet<NodeId> {
        self.steps().map(|(node, _)| node).collect()
    }

    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.len()).sum()
    }
}

/// Home group for the given axes. Callers pass axes of one class.
pub fn build_home_group(axes: &[Axis], config: &ControllerConfig) -> MoveGroup {
    let stage = axes
        .iter()
        .map(|&axis| {
            let step = match axis.class() {
                AxisClass::GripperJaw => MoveStep::jaw_home(config.gripper_home_duty_cycle),
                AxisClass::Gantry | AxisClass::Mount | AxisClass::Plunger => MoveStep::home(
                    -config.bounds(axis).travel(),
                    config.home_speed(axis),
                ),
            };
            (axis_to_node(axis), step)
        })
        .collect();
    MoveGroup::single_stage(stage)
}

pub fn build_tip_action_group(
    axes: &[Axis],
    speed_mm_s: f64,
    distance_mm: f64,
    kind: TipActionKind,
) -> MoveGroup {
    let stage = axes
        .iter()
        .map(|&axis| {
            (
                axis_to_node(axis),
                MoveStep::tip_action(distance_mm, speed_mm_s, kind),
            )
        })
        .collect();
    MoveGroup::single_stage(stage)
}

/// Single-step group on the jaw actuator
pub fn build_jaw_group(step: MoveStep) -> MoveGroup {
    MoveGroup::single_stage(MoveStage::from([(NodeId::GripperG, step)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_steps_use_limit_switch_and_no_acceleration() {
        let config = ControllerConfig::default();
        let group = build_home_group(&[Axis::X, Axis::Y, Axis::G], &config);

        assert_eq!(group.stages.len(), 1);
        assert_eq!(group.step_count(), 3);
        for (_, step) in group.steps() {
            assert_eq!(step.move_type, MoveType::Home);
            assert_eq!(step.stop_condition, StopCondition::LimitSwitch);
            assert_eq!(step.acceleration_mm_s2, 0.0);
        }
    }

    #[test]
    fn test_home_distance_covers_full_travel() {
        let config = ControllerConfig::default();
        let group = build_home_group(&[Axis::ZL], &config);
        let step = group.stages[0][&NodeId::HeadL];
        assert!((step.distance_mm + config.bounds(Axis::ZL).travel()).abs() < 1e-9);
        assert!(step.distance_mm < 0.0);
        assert!((step.velocity_mm_s - config.home_speed(Axis::ZL)).abs() < 1e-9);
    }

    #[test]
    fn test_tip_action_stop_conditions() {
        let pick_up = build_tip_action_group(&[Axis::PL], 5.0, 10.0, TipActionKind::PickUp);
        let drop = build_tip_action_group(&[Axis::PL], 5.0, 10.0, TipActionKind::Drop);

        assert_eq!(
            pick_up.stages[0][&NodeId::PipetteLeft].stop_condition,
            StopCondition::None
        );
        assert_eq!(
            drop.stages[0][&NodeId::PipetteLeft].stop_condition,
            StopCondition::LimitSwitch
        );
        // Only the stop condition differs
        let mut dropped = drop.stages[0][&NodeId::PipetteLeft];
        dropped.stop_condition = StopCondition::None;
        assert_eq!(dropped, pick_up.stages[0][&NodeId::PipetteLeft]);
    }

    #[test]
    fn test_jaw_steps() {
        let home = build_jaw_group(MoveStep::jaw_home(100.0));
        let grip = build_jaw_group(MoveStep::grip(40.0));
        let hold = build_jaw_group(MoveStep::hold(12_000));

        for group in [&home, &grip, &hold] {
            assert_eq!(group.step_count(), 1);
            assert_eq!(group.nodes().into_iter().collect::<Vec<_>>(), vec![NodeId::GripperG]);
        }

        let (_, step) = home.steps().next().unwrap();
        assert_eq!(
            (step.move_type, step.stop_condition),
            (MoveType::Home, StopCondition::LimitSwitch)
        );
        let (_, step) = grip.steps().next().unwrap();
        assert_eq!(
            (step.move_type, step.stop_condition),
            (MoveType::Grip, StopCondition::None)
        );
        assert_eq!(step.duty_cycle, Some(40.0));
        let (_, step) = hold.steps().next().unwrap();
        assert_eq!(
            (step.move_type, step.stop_condition),
            (MoveType::Linear, StopCondition::EncoderPosition)
        );
        assert_eq!(step.encoder_position_um, Some(12_000));
    }
}
