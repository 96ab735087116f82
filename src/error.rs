// Error types for the motion core, bus boundary and configuration

use crate::motion::types::{Axis, Mount, NodeId};

/// Failures raised by a bus transport itself (not per-node results)
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus transport error: {0}")]
    Transport(String),

    #[error("Bus message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid travel bounds for axis {axis}: min {min} must be < max {max}")]
    InvalidBounds { axis: Axis, min: f64, max: f64 },

    #[error("Invalid homing speed for axis {axis}: {speed} (must be > 0)")]
    InvalidSpeed { axis: Axis, speed: f64 },

    #[error("Invalid current for axis {axis}: {current} A (must be >= 0)")]
    InvalidCurrent { axis: Axis, current: f64 },

    #[error("Invalid gripper home duty cycle: {0} (must be 0-100)")]
    InvalidDutyCycle(f32),
}

/// Errors surfaced by the motion controller
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("Axes {axes:?} must be homed before this operation")]
    MustHome { axes: Vec<Axis> },

    #[error("Unrecognized pipette name code 0x{code:04X} on {mount} mount")]
    InvalidPipetteName { mount: Mount, code: u16 },

    #[error("Unparsable instrument model {model:?} on {mount} mount")]
    InvalidPipetteModel { mount: Mount, model: String },

    #[error("Node {0} has no axis mapping")]
    UnknownNode(NodeId),

    #[error("Node {0} is not present on the bus")]
    NodeNotPresent(NodeId),

    #[error("Axis {0} is not a pipette axis")]
    NotAPipetteAxis(Axis),

    #[error("Invalid duty cycle: {0} (must be 0-100)")]
    InvalidDutyCycle(f32),

    #[error("Unexpected response from node {node}: expected {expected}")]
    UnexpectedResponse { node: NodeId, expected: &'static str },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, MotionError>;
