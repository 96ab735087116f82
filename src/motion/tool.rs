// Attached instrument decoding
//
// Boards report a numeric name code, a "major.minor" model string and a
// serial. Anything we cannot decode is a hard error: a wrong identity would
// pull the wrong configuration table.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use super::types::Mount;
use crate::error::{MotionError, Result};

/// Pipette names as reported by pipette firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipetteName {
    P1000Single,
    P1000Multi,
    P50Single,
    P50Multi,
    P1000_96,
}

impl PipetteName {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x00 => Some(PipetteName::P1000Single),
            0x01 => Some(PipetteName::P1000Multi),
            0x02 => Some(PipetteName::P50Single),
            0x03 => Some(PipetteName::P50Multi),
            0x04 => Some(PipetteName::P1000_96),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            PipetteName::P1000Single => 0x00,
            PipetteName::P1000Multi => 0x01,
            PipetteName::P50Single => 0x02,
            PipetteName::P50Multi => 0x03,
            PipetteName::P1000_96 => 0x04,
        }
    }

    /// Short prefix used in serial-number style identities
    pub fn short_name(self) -> &'static str {
        match self {
            PipetteName::P1000Single => "P1KS",
            PipetteName::P1000Multi => "P1KM",
            PipetteName::P50Single => "P50S",
            PipetteName::P50Multi => "P50M",
            PipetteName::P1000_96 => "P1KH",
        }
    }
}

pub const GRIPPER_SHORT_NAME: &str = "GRP";

/// Model version parsed from "major[.minor]"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u8,
    pub minor: u8,
}

impl ModelVersion {
    /// None for unparsable strings and for the zero-version sentinel
    pub fn parse(model: &str) -> Option<Self> {
        let model = model.trim();
        let (major, minor) = match model.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (model, "0"),
        };
        let major: u8 = major.parse().ok()?;
        let minor: u8 = minor.parse().ok()?;
        if major == 0 {
            return None;
        }
        Some(Self { major, minor })
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.major, self.minor)
    }
}

/// Pipette info payload as it comes off the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPipetteInfo {
    pub name_code: u16,
    pub model: String,
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGripperInfo {
    pub model: String,
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipetteInformation {
    pub name: PipetteName,
    pub name_code: u16,
    pub model: String,
    pub serial: String,
    pub version: ModelVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperInformation {
    pub model: String,
    pub serial: String,
    pub version: ModelVersion,
}

/// Decoded result of a tool probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub left: Option<PipetteInformation>,
    pub right: Option<PipetteInformation>,
    pub gripper: Option<GripperInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrumentInfo {
    Pipette(PipetteInformation),
    Gripper(GripperInformation),
}

impl InstrumentInfo {
    /// Lookup key for the instrument configuration tables:
    /// short name, "V", version digits, serial
    pub fn identity(&self) -> String {
        match self {
            InstrumentInfo::Pipette(info) => {
                format!("{}V{}{}", info.name.short_name(), info.version, info.serial)
            }
            InstrumentInfo::Gripper(info) => {
                format!("{}V{}{}", GRIPPER_SHORT_NAME, info.version, info.serial)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedInstrument {
    pub info: InstrumentInfo,
    pub identity: String,
}

impl From<InstrumentInfo> for AttachedInstrument {
    fn from(info: InstrumentInfo) -> Self {
        let identity = info.identity();
        Self { info, identity }
    }
}

pub fn decode_pipette(mount: Mount, raw: &RawPipetteInfo) -> Result<PipetteInformation> {
    let name = PipetteName::from_code(raw.name_code).ok_or(MotionError::InvalidPipetteName {
        mount,
        code: raw.name_code,
    })?;
    let version = ModelVersion::parse(&raw.model).ok_or_else(|| MotionError::InvalidPipetteModel {
        mount,
        model: raw.model.clone(),
    })?;
    Ok(PipetteInformation {
        name,
        name_code: raw.name_code,
        model: raw.model.clone(),
        serial: raw.serial.clone(),
        version,
    })
}

pub fn decode_gripper(raw: &RawGripperInfo) -> Result<GripperInformation> {
    let version = ModelVersion::parse(&raw.model).ok_or_else(|| MotionError::InvalidPipetteModel {
        mount: Mount::Gripper,
        model: raw.model.clone(),
    })?;
    Ok(GripperInformation {
        model: raw.model.clone(),
        serial: raw.serial.clone(),
        version,
    })
}

impl ToolSummary {
    pub fn insert(&mut self, mount: Mount, info: InstrumentInfo) {
        match (mount, info) {
            (Mount::Left, InstrumentInfo::Pipette(info)) => self.left = Some(info),
            (Mount::Right, InstrumentInfo::Pipette(info)) => self.right = Some(info),
            (Mount::Gripper, InstrumentInfo::Gripper(info)) => self.gripper = Some(info),
            (mount, info) => {
                warn!("Ignoring {:?} reported on {} mount", info, mount)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(code: u16, model: &str) -> RawPipetteInfo {
        RawPipetteInfo {
            name_code: code,
            model: model.to_string(),
            serial: "20230101A01".to_string(),
        }
    }

    #[test]
    fn test_decode_known_pipette() {
        let info = decode_pipette(Mount::Left, &raw(0x00, "3.3")).unwrap();
        assert_eq!(info.name, PipetteName::P1000Single);
        assert_eq!(info.version, ModelVersion { major: 3, minor: 3 });
        assert_eq!(
            InstrumentInfo::Pipette(info).identity(),
            "P1KSV3320230101A01"
        );
    }

    #[test]
    fn test_unknown_name_code_rejected() {
        assert!(matches!(
            decode_pipette(Mount::Right, &raw(0x42, "3.3")),
            Err(MotionError::InvalidPipetteName {
                mount: Mount::Right,
                code: 0x42
            })
        ));
        assert!(matches!(
            decode_pipette(Mount::Right, &raw(0xFFFF, "3.3")),
            Err(MotionError::InvalidPipetteName { .. })
        ));
    }

    #[test]
    fn test_bad_model_rejected() {
        for model in ["", "abc", "0", "0.0", "3.x", "300.1"] {
            assert!(
                matches!(
                    decode_pipette(Mount::Left, &raw(0x01, model)),
                    Err(MotionError::InvalidPipetteModel { .. })
                ),
                "model {:?} should be rejected",
                model
            );
        }
    }

    #[test]
    fn test_model_without_minor() {
        assert_eq!(
            ModelVersion::parse("3"),
            Some(ModelVersion { major: 3, minor: 0 })
        );
    }

    #[test]
    fn test_gripper_identity() {
        let info = decode_gripper(&RawGripperInfo {
            model: "1.0".to_string(),
            serial: "GR001".to_string(),
        })
        .unwrap();
        assert_eq!(InstrumentInfo::Gripper(info).identity(), "GRPV10GR001");
    }

    #[test]
    fn test_name_code_round_trip() {
        for code in 0x00..=0x04 {
            assert_eq!(PipetteName::from_code(code).unwrap().code(), code);
        }
    }
}
