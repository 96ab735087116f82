// Message types exchanged with callers over zenoh

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::motion::{
    AttachedInstrument, Axis, GantryLoad, Mount, MotionReport, MotorStatus, NodeId,
    NodePosition, PipetteName, TipActionKind,
};

// Command from a protocol runner -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MotionCommand {
    Home {
        axes: Vec<Axis>,
    },
    TipAction {
        axes: Vec<Axis>,
        speed_mm_s: f64,
        distance_mm: f64,
        kind: TipActionKind,
    },
    GripperHomeJaw,
    GripperGripJaw {
        duty_cycle: f32,
    },
    GripperHoldJaw {
        encoder_position_um: i32,
    },
    ProbeNetwork {
        expected: Vec<NodeId>,
        timeout_ms: Option<u64>,
    },
    GetAttachedInstruments {
        #[serde(default)]
        expected_models: BTreeMap<Mount, PipetteName>,
    },
    UpdateMotorStatus {
        nodes: Vec<NodeId>,
    },
    UpdateMotorEstimation {
        axes: Vec<Axis>,
    },
    UpdateToDefaultCurrentSettings {
        load: GantryLoad,
    },
    SetActiveCurrent {
        currents: BTreeMap<Axis, f64>,
    },
    SetHoldCurrent {
        currents: BTreeMap<Axis, f64>,
    },
    CheckReadyForMovement {
        axes: Vec<Axis>,
    },
}

impl MotionCommand {
    pub fn op(&self) -> &'static str {
        match self {
            MotionCommand::Home { .. } => "home",
            MotionCommand::TipAction { .. } => "tip_action",
            MotionCommand::GripperHomeJaw => "gripper_home_jaw",
            MotionCommand::GripperGripJaw { .. } => "gripper_grip_jaw",
            MotionCommand::GripperHoldJaw { .. } => "gripper_hold_jaw",
            MotionCommand::ProbeNetwork { .. } => "probe_network",
            MotionCommand::GetAttachedInstruments { .. } => "get_attached_instruments",
            MotionCommand::UpdateMotorStatus { .. } => "update_motor_status",
            MotionCommand::UpdateMotorEstimation { .. } => "update_motor_estimation",
            MotionCommand::UpdateToDefaultCurrentSettings { .. } => {
                "update_to_default_current_settings"
            }
            MotionCommand::SetActiveCurrent { .. } => "set_active_current",
            MotionCommand::SetHoldCurrent { .. } => "set_hold_current",
            MotionCommand::CheckReadyForMovement { .. } => "check_ready_for_movement",
        }
    }
}

/// Successful result payload of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReplyBody {
    Done,
    Motion { report: MotionReport },
    Present { nodes: BTreeSet<NodeId> },
    Instruments { attached: BTreeMap<Mount, AttachedInstrument> },
    Positions { positions: BTreeMap<NodeId, NodePosition> },
    Ready { ready: bool },
}

// Reply from runtime -> caller, one per command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReply {
    pub op: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ReplyBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MotionReply {
    pub fn success(op: &str, body: ReplyBody) -> Self {
        Self {
            op: op.to_string(),
            ok: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn failure(op: &str, error: impl ToString) -> Self {
        Self {
            op: op.to_string(),
            ok: false,
            body: None,
            error: Some(error.to_string()),
        }
    }
}

/// Read-only view of controller state published every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub present: BTreeSet<NodeId>,
    pub motor_status: BTreeMap<NodeId, MotorStatus>,
    pub positions: BTreeMap<NodeId, NodePosition>,
    pub load: GantryLoad,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    Unprobed,
    NeedsHome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_home_command() {
        let cmd: MotionCommand = serde_json::from_str(r#"{"op":"home","axes":["x","z_l"]}"#).unwrap();
        assert_eq!(
            cmd,
            MotionCommand::Home {
                axes: vec![Axis::X, Axis::ZL]
            }
        );
        assert_eq!(cmd.op(), "home");
    }

    #[test]
    fn test_parse_unit_command() {
        let cmd: MotionCommand = serde_json::from_str(r#"{"op":"gripper_home_jaw"}"#).unwrap();
        assert_eq!(cmd, MotionCommand::GripperHomeJaw);
    }

    #[test]
    fn test_instruments_default_expected_models() {
        let cmd: MotionCommand =
            serde_json::from_str(r#"{"op":"get_attached_instruments"}"#).unwrap();
        assert!(matches!(
            cmd,
            MotionCommand::GetAttachedInstruments { expected_models } if expected_models.is_empty()
        ));
    }

    #[test]
    fn test_failure_reply_omits_body() {
        let reply = MotionReply::failure("home", "bus down");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "bus down");
        assert!(json.get("body").is_none());
    }

    #[test]
    fn test_health_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::NeedsHome).unwrap(),
            "\"needs_home\""
        );
    }
}
