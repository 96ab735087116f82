// 10 Hz command loop around one MotionController
// Commands are executed one at a time, in arrival order; status and health are
// published every tick so callers never need to poll the controller directly.

use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::bus::BusTransport;
use crate::config::{ControllerConfig, LOOP_HZ, TOPIC_CMD, TOPIC_HEALTH, TOPIC_REPLY, TOPIC_STATUS};
use crate::error::Result;
use crate::messages::{MotionCommand, MotionReply, ReplyBody, RuntimeHealth, StatusSnapshot};
use crate::motion::{GantryLoad, MotionController};

pub struct Runtime<T: BusTransport> {
    controller: MotionController<T>,
}

impl<T: BusTransport> Runtime<T> {
    pub fn new(bus: T, config: ControllerConfig) -> Self {
        Self {
            controller: MotionController::new(bus, config),
        }
    }

    pub fn controller(&self) -> &MotionController<T> {
        &self.controller
    }

    /// Probe, read status and apply default currents
    pub async fn startup(&mut self, load: GantryLoad) -> Result<()> {
        self.controller.setup(load).await
    }

    /// Execute one command and build its reply
    pub async fn on_command(&mut self, cmd: MotionCommand) -> MotionReply {
        let op = cmd.op();
        info!("Received command: {}", op);
        match self.execute(cmd).await {
            Ok(body) => MotionReply::success(op, body),
            Err(e) => {
                warn!("Command {} failed: {}", op, e);
                MotionReply::failure(op, e)
            }
        }
    }

    async fn execute(&mut self, cmd: MotionCommand) -> Result<ReplyBody> {
        let controller = &mut self.controller;
        let body = match cmd {
            MotionCommand::Home { axes } => ReplyBody::Motion {
                report: controller.home(&axes).await?,
            },
            MotionCommand::TipAction {
                axes,
                speed_mm_s,
                distance_mm,
                kind,
            } => ReplyBody::Motion {
                report: controller
                    .tip_action(&axes, speed_mm_s, distance_mm, kind)
                    .await?,
            },
            MotionCommand::GripperHomeJaw => ReplyBody::Motion {
                report: controller.gripper_home_jaw().await?,
            },
            MotionCommand::GripperGripJaw { duty_cycle } => ReplyBody::Motion {
                report: controller.gripper_grip_jaw(duty_cycle).await?,
            },
            MotionCommand::GripperHoldJaw {
                encoder_position_um,
            } => ReplyBody::Motion {
                report: controller.gripper_hold_jaw(encoder_position_um).await?,
            },
            MotionCommand::ProbeNetwork {
                expected,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| controller.config().probe_timeout());
                let present = controller.probe_network(&expected, timeout).await?;
                ReplyBody::Present {
                    nodes: present.as_ref().clone(),
                }
            }
            MotionCommand::GetAttachedInstruments { expected_models } => ReplyBody::Instruments {
                attached: controller.get_attached_instruments(&expected_models).await?,
            },
            MotionCommand::UpdateMotorStatus { nodes } => ReplyBody::Positions {
                positions: controller.update_motor_status(&nodes).await?,
            },
            MotionCommand::UpdateMotorEstimation { axes } => ReplyBody::Motion {
                report: controller.update_motor_estimation(&axes).await?,
            },
            MotionCommand::UpdateToDefaultCurrentSettings { load } => {
                controller.update_to_default_current_settings(load).await?;
                ReplyBody::Done
            }
            MotionCommand::SetActiveCurrent { currents } => {
                controller.set_active_current(&currents).await?;
                ReplyBody::Done
            }
            MotionCommand::SetHoldCurrent { currents } => {
                controller.set_hold_current(&currents).await?;
                ReplyBody::Done
            }
            MotionCommand::CheckReadyForMovement { axes } => ReplyBody::Ready {
                ready: controller.check_ready_for_movement(&axes),
            },
        };
        Ok(body)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            present: self.controller.present_nodes().as_ref().clone(),
            motor_status: self.controller.motor_status().as_ref().clone(),
            positions: self.controller.positions().clone(),
            load: self.controller.gantry_load(),
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        let present = self.controller.present_nodes();
        if present.is_empty() {
            return RuntimeHealth::Unprobed;
        }
        let status = self.controller.motor_status();
        let all_homed = present
            .iter()
            .all(|node| status.get(node).is_some_and(|s| s.motor_ok));
        if all_homed {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::NeedsHome
        }
    }
}

pub async fn run<T: BusTransport>(
    session: zenoh::Session,
    bus: T,
    config: ControllerConfig,
    load: GantryLoad,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_reply = session.declare_publisher(TOPIC_REPLY).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(bus, config);
    if let Err(e) = runtime.startup(load).await {
        // Stay up unprobed; a caller can retry with probe_network
        warn!("Startup failed: {}", e);
    }

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    info!("Runtime started: {}Hz loop, {:?} load", LOOP_HZ, load);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_REPLY, TOPIC_STATUS, TOPIC_HEALTH
    );

    loop {
        tick.tick().await;

        // 1. Drain pending commands, executing each in order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            let reply = match serde_json::from_slice::<MotionCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd).await,
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    MotionReply::failure("parse", e)
                }
            };
            pub_reply.put(serde_json::to_string(&reply)?).await?;
        }

        // 2. Publish status snapshot
        let status_json = serde_json::to_string(&runtime.snapshot())?;
        pub_status.put(status_json).await?;

        // 3. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;
    use crate::motion::{Axis, NodeId};

    #[tokio::test]
    async fn test_health_progression() {
        let mut runtime = Runtime::new(SimulatedBus::full_gantry(), ControllerConfig::default());
        assert_eq!(runtime.health(), RuntimeHealth::Unprobed);

        runtime.startup(GantryLoad::Standard).await.unwrap();
        assert_eq!(runtime.health(), RuntimeHealth::NeedsHome);

        let reply = runtime
            .on_command(MotionCommand::Home {
                axes: Axis::ALL.to_vec(),
            })
            .await;
        assert!(reply.ok);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[tokio::test]
    async fn test_failed_command_reply() {
        let mut runtime = Runtime::new(SimulatedBus::full_gantry(), ControllerConfig::default());
        runtime.startup(GantryLoad::Standard).await.unwrap();

        let reply = runtime
            .on_command(MotionCommand::UpdateMotorEstimation { axes: vec![Axis::X] })
            .await;
        assert!(!reply.ok);
        assert_eq!(reply.op, "update_motor_estimation");
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_lists_present_nodes() {
        let bus = SimulatedBus::with_nodes([NodeId::GantryX, NodeId::GantryY]);
        let mut runtime = Runtime::new(bus, ControllerConfig::default());
        runtime.startup(GantryLoad::Standard).await.unwrap();

        let snapshot = runtime.snapshot();
        assert_eq!(snapshot.present.len(), 2);
        assert_eq!(snapshot.positions.len(), 2);
    }
}
