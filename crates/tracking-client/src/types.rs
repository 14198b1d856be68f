use serde::Serialize;
use std::fmt;
use time::OffsetDateTime;
use tracking_wire::{
    Chirality, ConfigValue, DeviceInfoRecord, DeviceStatus, DeviceType, DroppedFrameKind,
    FailureKind, HandRecord, HeadPoseRecord, ImageRecord, LogSeverity, Quaternion, Vector3,
};

/// Identifies a connection: a small integer id plus an optional server namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    pub id: i32,
    pub namespace: Option<String>,
}

impl ConnectionKey {
    pub fn new(id: i32, namespace: Option<&str>) -> Self {
        Self {
            id,
            namespace: namespace.map(str::to_string),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}@{}", self.id, ns),
            None => write!(f, "{}", self.id),
        }
    }
}

/// An attached tracking device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Device {
    pub handle: u32,
    /// Handle of the open device session, used for per-device queries.
    pub open_handle: u32,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub serial: String,
    pub h_fov: f32,
    pub v_fov: f32,
    pub range_mm: u32,
    pub baseline_um: u32,
}

impl Device {
    pub fn from_info(
        handle: u32,
        open_handle: u32,
        info: &DeviceInfoRecord,
        serial: String,
    ) -> Self {
        Self {
            handle,
            open_handle,
            device_type: DeviceType::from_pid(info.pid),
            status: DeviceStatus::from_bits_retain(info.status),
            serial,
            h_fov: info.h_fov,
            v_fov: info.v_fov,
            range_mm: info.range,
            baseline_um: info.baseline,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status.contains(DeviceStatus::STREAMING)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, handle {})", self.serial, self.device_type, self.handle)
    }
}

/// A device the daemon reported as failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub handle: u32,
    pub kind: FailureKind,
    pub status: u32,
    /// Serial of the failed device, or `Unavailable` when it was never registered.
    pub serial: String,
}

impl DeviceFailure {
    pub const UNAVAILABLE: &'static str = "Unavailable";
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Hand {
    pub id: u32,
    pub flags: u32,
    pub chirality: Chirality,
    pub confidence: f32,
    /// Microseconds the hand has been continuously visible.
    pub visible_time: u64,
    pub pinch_distance: f32,
    pub grab_angle: f32,
    pub pinch_strength: f32,
    pub grab_strength: f32,
    pub palm_position: Vector3,
    pub palm_velocity: Vector3,
    pub palm_normal: Vector3,
    pub palm_orientation: Quaternion,
}

impl From<HandRecord> for Hand {
    fn from(rec: HandRecord) -> Self {
        Self {
            id: rec.id,
            flags: rec.flags,
            chirality: Chirality::from_raw(rec.chirality),
            confidence: rec.confidence,
            visible_time: rec.visible_time,
            pinch_distance: rec.pinch_distance,
            grab_angle: rec.grab_angle,
            pinch_strength: rec.pinch_strength,
            grab_strength: rec.grab_strength,
            palm_position: rec.palm_position,
            palm_velocity: rec.palm_velocity,
            palm_normal: rec.palm_normal,
            palm_orientation: rec.palm_orientation,
        }
    }
}

/// One tracking sample. Handed out by value; holders never share storage
/// with the frame history.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrackingFrame {
    pub frame_id: i64,
    /// Daemon clock, microseconds.
    pub timestamp: i64,
    pub tracking_frame_id: i64,
    pub framerate: f32,
    pub hands: Vec<Hand>,
}

impl TrackingFrame {
    pub fn hand(&self, id: u32) -> Option<&Hand> {
        self.hands.iter().find(|h| h.id == id)
    }
}

/// Position plus rotation; the default is the identity transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Transform {
    pub position: Vector3,
    pub rotation: Quaternion,
}

impl Transform {
    pub fn from_palm(hand: &Hand) -> Self {
        Self {
            position: hand.palm_position,
            rotation: hand.palm_orientation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub timestamp: i64,
    pub message: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub received_at: Option<OffsetDateTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DroppedFrame {
    pub frame_id: i64,
    pub kind: DroppedFrameKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Image {
    pub kind: u32,
    pub format: u32,
    pub bpp: u32,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Image {
    pub fn from_record(rec: &ImageRecord, data: &[u8]) -> Self {
        Self {
            kind: rec.kind,
            format: rec.format,
            bpp: rec.bpp,
            width: rec.width,
            height: rec.height,
            data: data.to_vec(),
        }
    }
}

/// A stereo image pair, left camera first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImageFrame {
    pub frame_id: i64,
    pub timestamp: i64,
    pub images: [Image; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PointMappingChange {
    pub frame_id: i64,
    pub timestamp: i64,
    pub point_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PointMapping {
    pub frame_id: i64,
    pub timestamp: i64,
    pub points: Vec<Vector3>,
    pub ids: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HeadPose {
    pub timestamp: i64,
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl From<HeadPoseRecord> for HeadPose {
    fn from(rec: HeadPoseRecord) -> Self {
        Self {
            timestamp: rec.timestamp,
            position: rec.position,
            orientation: rec.orientation,
        }
    }
}

/// How a config transaction ended, as seen by its continuation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum ConfigOutcome {
    /// Reply to a read.
    Value(ConfigValue),
    /// Reply to a write; `true` when the daemon applied it.
    Changed(bool),
    /// The connection stopped before the daemon answered.
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key_display() {
        assert_eq!(ConnectionKey::new(0, None).to_string(), "0");
        assert_eq!(ConnectionKey::new(3, Some("lab")).to_string(), "3@lab");
        assert_ne!(ConnectionKey::new(0, None), ConnectionKey::new(0, Some("")));
    }

    #[test]
    fn test_device_from_info() {
        let info = DeviceInfoRecord {
            status: 0x5,
            pid: 0x1206,
            baseline: 64_000,
            h_fov: 2.3,
            v_fov: 2.1,
            range: 800,
            ..Default::default()
        };
        let device = Device::from_info(4, 0x1004, &info, "LP1234".into());
        assert_eq!(device.device_type, DeviceType::Gen2);
        assert!(device.is_streaming());
        assert!(device.status.contains(DeviceStatus::ROBUST));
        assert_eq!(device.range_mm, 800);
        assert_eq!(device.to_string(), "LP1234 (Gen2, handle 4)");
    }

    #[test]
    fn test_hand_maps_chirality_and_palm_transform() {
        let hand = Hand::from(HandRecord {
            id: 9,
            chirality: 1,
            palm_position: Vector3::new(0.0, 200.0, 0.0),
            ..Default::default()
        });
        assert_eq!(hand.chirality, Chirality::Right);
        let pose = Transform::from_palm(&hand);
        assert_eq!(pose.position.y, 200.0);
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        assert_eq!(Transform::default().rotation, Quaternion::IDENTITY);
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(ConfigOutcome::Value(ConfigValue::Int(3))).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "value", "value": 3}));
        let json = serde_json::to_value(ConfigOutcome::Abandoned).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "abandoned"}));
    }
}
