// Timeouts, topics, per-axis motion and current configuration
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::motion::current::CurrentSetting;
use crate::motion::types::{Axis, GantryLoad};

// Runtime loop frequency (status publishing)
pub const LOOP_HZ: u64 = 10;

// Default bus timeouts
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_CMD: &str = "motion/cmd"; // commands
pub const TOPIC_REPLY: &str = "motion/reply"; // command results
pub const TOPIC_STATUS: &str = "motion/state/status"; // status snapshot
pub const TOPIC_HEALTH: &str = "motion/state/health"; // health status
pub const TOPIC_BUS_REQUEST: &str = "motion/bus/request"; // queries answered by the bus gateway

/// Travel range of one axis in mm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisBounds {
    pub min_mm: f64,
    pub max_mm: f64,
}

impl AxisBounds {
    pub const fn new(min_mm: f64, max_mm: f64) -> Self {
        Self { min_mm, max_mm }
    }

    pub fn travel(&self) -> f64 {
        self.max_mm - self.min_mm
    }
}

/// Default run/hold currents, one table per gantry load class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentDefaults {
    pub standard: BTreeMap<Axis, CurrentSetting>,
    pub high_throughput: BTreeMap<Axis, CurrentSetting>,
}

impl CurrentDefaults {
    pub fn for_load(&self, load: GantryLoad) -> &BTreeMap<Axis, CurrentSetting> {
        match load {
            GantryLoad::Standard => &self.standard,
            GantryLoad::HighThroughput => &self.high_throughput,
        }
    }
}

impl Default for CurrentDefaults {
    fn default() -> Self {
        let standard = BTreeMap::from([
            (Axis::X, CurrentSetting::new(1.25, 0.5)),
            (Axis::Y, CurrentSetting::new(1.25, 0.5)),
            (Axis::ZL, CurrentSetting::new(1.0, 0.1)),
            (Axis::ZR, CurrentSetting::new(1.0, 0.1)),
            (Axis::ZG, CurrentSetting::new(0.67, 0.1)),
            (Axis::PL, CurrentSetting::new(1.0, 0.3)),
            (Axis::PR, CurrentSetting::new(1.0, 0.3)),
            (Axis::G, CurrentSetting::new(0.5, 0.0)),
        ]);
        // The 96-channel rides on both mounts and carries its own tip motor
        let high_throughput = BTreeMap::from([
            (Axis::X, CurrentSetting::new(1.4, 0.5)),
            (Axis::Y, CurrentSetting::new(1.4, 0.5)),
            (Axis::ZL, CurrentSetting::new(1.5, 1.8)),
            (Axis::ZR, CurrentSetting::new(1.0, 0.1)),
            (Axis::ZG, CurrentSetting::new(0.67, 0.1)),
            (Axis::PL, CurrentSetting::new(2.2, 0.3)),
            (Axis::PR, CurrentSetting::new(1.0, 0.3)),
            (Axis::Q, CurrentSetting::new(1.5, 0.1)),
            (Axis::G, CurrentSetting::new(0.5, 0.0)),
        ]);
        Self {
            standard,
            high_throughput,
        }
    }
}

/// Motion controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub bus_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub axis_bounds: BTreeMap<Axis, AxisBounds>,
    pub home_speed_mm_s: BTreeMap<Axis, f64>,
    pub currents: CurrentDefaults,
    /// PWM duty cycle (percent) used when homing the gripper jaw
    pub gripper_home_duty_cycle: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bus_timeout_ms: u64::try_from(DEFAULT_BUS_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            probe_timeout_ms: u64::try_from(DEFAULT_PROBE_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            axis_bounds: BTreeMap::from([
                (Axis::X, AxisBounds::new(0.0, 527.0)),
                (Axis::Y, AxisBounds::new(0.0, 482.0)),
                (Axis::ZL, AxisBounds::new(0.0, 215.0)),
                (Axis::ZR, AxisBounds::new(0.0, 215.0)),
                (Axis::ZG, AxisBounds::new(0.0, 218.0)),
                (Axis::PL, AxisBounds::new(0.0, 70.0)),
                (Axis::PR, AxisBounds::new(0.0, 70.0)),
                (Axis::Q, AxisBounds::new(0.0, 10.0)),
                (Axis::G, AxisBounds::new(0.0, 90.0)),
            ]),
            home_speed_mm_s: BTreeMap::from([
                (Axis::X, 40.0),
                (Axis::Y, 40.0),
                (Axis::ZL, 15.0),
                (Axis::ZR, 15.0),
                (Axis::ZG, 15.0),
                (Axis::PL, 10.0),
                (Axis::PR, 10.0),
                (Axis::Q, 5.5),
                (Axis::G, 10.0),
            ]),
            currents: CurrentDefaults::default(),
            gripper_home_duty_cycle: 100.0,
        }
    }
}

impl ControllerConfig {
    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate JSON; missing fields take defaults
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (&axis, bounds) in &self.axis_bounds {
            if bounds.min_mm >= bounds.max_mm {
                return Err(ConfigError::InvalidBounds {
                    axis,
                    min: bounds.min_mm,
                    max: bounds.max_mm,
                });
            }
        }

        for (&axis, &speed) in &self.home_speed_mm_s {
            if speed <= 0.0 {
                return Err(ConfigError::InvalidSpeed { axis, speed });
            }
        }

        let tables = [&self.currents.standard, &self.currents.high_throughput];
        for (&axis, setting) in tables.into_iter().flatten() {
            for current in [setting.run_current, setting.hold_current] {
                if current < 0.0 {
                    return Err(ConfigError::InvalidCurrent { axis, current });
                }
            }
        }

        if !(0.0..=100.0).contains(&self.gripper_home_duty_cycle) {
            return Err(ConfigError::InvalidDutyCycle(self.gripper_home_duty_cycle));
        }

        Ok(())
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn bounds(&self, axis: Axis) -> AxisBounds {
        self.axis_bounds
            .get(&axis)
            .copied()
            .unwrap_or(AxisBounds::new(0.0, 0.0))
    }

    pub fn home_speed(&self, axis: Axis) -> f64 {
        self.home_speed_mm_s.get(&axis).copied().unwrap_or(0.0)
    }
}
