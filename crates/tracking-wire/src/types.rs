use crate::DecodeError;
use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Discriminator carried by every inbound message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventType {
    None,
    Connection,
    ConnectionLost,
    Device,
    DeviceFailure,
    Policy,
    Tracking,
    Log,
    DeviceLost,
    ConfigResponse,
    ConfigChange,
    DeviceStatusChange,
    DroppedFrame,
    Image,
    PointMappingChange,
    HeadPose,
}

impl EventType {
    pub fn raw(self) -> u32 {
        match self {
            EventType::None => 0x000,
            EventType::Connection => 0x001,
            EventType::ConnectionLost => 0x002,
            EventType::Device => 0x003,
            EventType::DeviceFailure => 0x004,
            EventType::Policy => 0x005,
            EventType::Tracking => 0x100,
            EventType::Log => 0x103,
            EventType::DeviceLost => 0x104,
            EventType::ConfigResponse => 0x105,
            EventType::ConfigChange => 0x106,
            EventType::DeviceStatusChange => 0x107,
            EventType::DroppedFrame => 0x108,
            EventType::Image => 0x109,
            EventType::PointMappingChange => 0x10A,
            EventType::HeadPose => 0x10C,
        }
    }
}

impl TryFrom<u32> for EventType {
    type Error = DecodeError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        let kind = match raw {
            0x000 => EventType::None,
            0x001 => EventType::Connection,
            0x002 => EventType::ConnectionLost,
            0x003 => EventType::Device,
            0x004 => EventType::DeviceFailure,
            0x005 => EventType::Policy,
            0x100 => EventType::Tracking,
            0x103 => EventType::Log,
            0x104 => EventType::DeviceLost,
            0x105 => EventType::ConfigResponse,
            0x106 => EventType::ConfigChange,
            0x107 => EventType::DeviceStatusChange,
            0x108 => EventType::DroppedFrame,
            0x109 => EventType::Image,
            0x10A => EventType::PointMappingChange,
            0x10C => EventType::HeadPose,
            other => return Err(DecodeError::UnknownEventType(other)),
        };
        Ok(kind)
    }
}

bitflags! {
    /// Daemon-side behavioural toggles requested by the client.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PolicyFlags: u32 {
        const BACKGROUND_FRAMES = 0x0000_0001;
        const IMAGES = 0x0000_0002;
        const OPTIMIZE_HMD = 0x0000_0004;
        const ALLOW_PAUSE_RESUME = 0x0000_0008;
        const MAP_POINTS = 0x0000_0080;
        const OPTIMIZE_SCREENTOP = 0x0000_0100;
    }
}

bitflags! {
    /// Streaming state bits reported for an attached device.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct DeviceStatus: u32 {
        const STREAMING = 0x0000_0001;
        const PAUSED = 0x0000_0002;
        const ROBUST = 0x0000_0004;
        const SMUDGED = 0x0000_0008;
        const LOW_RESOURCE = 0x0000_0010;
    }
}

/// Classification of a device failure status code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BadCalibration,
    BadControl,
    BadFirmware,
    BadTransport,
    Unknown,
}

impl FailureKind {
    pub const UNKNOWN_CODE: u32 = 0xE801_0000;
    pub const BAD_CALIBRATION_CODE: u32 = 0xE801_0001;
    pub const BAD_FIRMWARE_CODE: u32 = 0xE801_0002;
    pub const BAD_TRANSPORT_CODE: u32 = 0xE801_0003;
    pub const BAD_CONTROL_CODE: u32 = 0xE801_0004;

    pub fn from_status(status: u32) -> Self {
        match status {
            Self::BAD_CALIBRATION_CODE => FailureKind::BadCalibration,
            Self::BAD_FIRMWARE_CODE => FailureKind::BadFirmware,
            Self::BAD_TRANSPORT_CODE => FailureKind::BadTransport,
            Self::BAD_CONTROL_CODE => FailureKind::BadControl,
            _ => FailureKind::Unknown,
        }
    }

    pub fn status_code(self) -> u32 {
        match self {
            FailureKind::BadCalibration => Self::BAD_CALIBRATION_CODE,
            FailureKind::BadControl => Self::BAD_CONTROL_CODE,
            FailureKind::BadFirmware => Self::BAD_FIRMWARE_CODE,
            FailureKind::BadTransport => Self::BAD_TRANSPORT_CODE,
            FailureKind::Unknown => Self::UNKNOWN_CODE,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::BadCalibration => "bad calibration record",
            FailureKind::BadControl => "bad control interface",
            FailureKind::BadFirmware => "bad firmware",
            FailureKind::BadTransport => "bad transport",
            FailureKind::Unknown => "unknown failure",
        };
        f.write_str(text)
    }
}

/// Hardware model, keyed by USB product id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum DeviceType {
    Peripheral,
    Rigel,
    Sir170,
    ThreeDi,
    Gen2,
    Unknown(u32),
}

impl DeviceType {
    pub fn from_pid(pid: u32) -> Self {
        match pid {
            0x0003 => DeviceType::Peripheral,
            0x1202 => DeviceType::Rigel,
            0x1203 => DeviceType::Sir170,
            0x1204 => DeviceType::ThreeDi,
            0x1206 => DeviceType::Gen2,
            other => DeviceType::Unknown(other),
        }
    }

    pub fn pid(self) -> u32 {
        match self {
            DeviceType::Peripheral => 0x0003,
            DeviceType::Rigel => 0x1202,
            DeviceType::Sir170 => 0x1203,
            DeviceType::ThreeDi => 0x1204,
            DeviceType::Gen2 => 0x1206,
            DeviceType::Unknown(pid) => pid,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum LogSeverity {
    Unknown,
    Critical,
    Warning,
    Information,
}

impl LogSeverity {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => LogSeverity::Critical,
            2 => LogSeverity::Warning,
            3 => LogSeverity::Information,
            _ => LogSeverity::Unknown,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            LogSeverity::Unknown => 0,
            LogSeverity::Critical => 1,
            LogSeverity::Warning => 2,
            LogSeverity::Information => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum DroppedFrameKind {
    PreprocessingQueue,
    TrackingQueue,
    Other,
}

impl DroppedFrameKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DroppedFrameKind::PreprocessingQueue,
            1 => DroppedFrameKind::TrackingQueue,
            _ => DroppedFrameKind::Other,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            DroppedFrameKind::PreprocessingQueue => 0,
            DroppedFrameKind::TrackingQueue => 1,
            DroppedFrameKind::Other => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chirality {
    #[default]
    Left,
    Right,
}

impl Chirality {
    pub fn from_raw(raw: u32) -> Self {
        if raw == 1 {
            Chirality::Right
        } else {
            Chirality::Left
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Chirality::Left => 0,
            Chirality::Right => 1,
        }
    }
}

/// Stereo camera selector for pixel/ray projection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Camera {
    #[default]
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A configuration value as carried by config requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{v}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f32> for ConfigValue {
    fn from(v: f32) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Text(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_discriminators() {
        for raw in [0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x100, 0x103, 0x10C] {
            let kind = EventType::try_from(raw).unwrap();
            assert_eq!(kind.raw(), raw);
        }
        assert_eq!(
            EventType::try_from(0x101),
            Err(DecodeError::UnknownEventType(0x101))
        );
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FailureKind::from_status(0xE801_0001),
            FailureKind::BadCalibration
        );
        assert_eq!(FailureKind::from_status(0xE801_0004), FailureKind::BadControl);
        assert_eq!(FailureKind::from_status(0xE801_0002), FailureKind::BadFirmware);
        assert_eq!(FailureKind::from_status(0xE801_0003), FailureKind::BadTransport);
        assert_eq!(FailureKind::from_status(0x1234), FailureKind::Unknown);
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(PolicyFlags::from_name("IMAGES"), Some(PolicyFlags::IMAGES));
        assert_eq!(PolicyFlags::from_name("images"), None);
    }
}
