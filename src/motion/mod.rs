// Motion control core for the liquid-handling gantry
//
// Provides:
// - Node/axis topology and present-node filtering
// - Motor status tracking (motor_ok / encoder_ok)
// - Move group construction for homing, tip actions and the gripper jaw
// - Instrument decoding and motor current management
// - The MotionController that sequences all of it over a BusTransport

pub mod controller;
pub mod current;
pub mod move_group;
pub mod status;
pub mod tool;
pub mod topology;
pub mod types;

pub use controller::{AxisOutcome, MotionController, MotionReport, NodePosition};
pub use current::{CurrentManager, CurrentSetting};
pub use move_group::{MoveGroup, MoveStep, TipActionKind};
pub use status::{MotorStatus, StatusMap};
pub use tool::{AttachedInstrument, InstrumentInfo, PipetteName, ToolSummary};
pub use topology::PresentNodeSet;
pub use types::{Axis, AxisClass, GantryLoad, Mount, NodeId, NodeKind};
