//! Turns a raw message into a typed record, before any state is touched.

use crate::types::{
    DroppedFrame, Hand, HeadPose, Image, ImageFrame, LogEntry, PointMapping, PointMappingChange,
    TrackingFrame,
};
use time::OffsetDateTime;
use tracking_wire::{
    decode, decode_array_element, decode_bytes, decode_str, decode_variant, ConfigChangeRecord,
    ConfigResponseRecord, ConfigValue, ConnectionLostRecord, ConnectionRecord, DeviceEventRecord,
    DeviceFailureRecord, DroppedFrameKind, DroppedFrameRecord, EventType, HandRecord,
    HeadPoseRecord, ImageEventRecord, LogRecord, LogSeverity, PointMappingChangeRecord,
    PointMappingRecord, PolicyRecord, Result, TrackingHeader, Vector3,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    None,
    Connection(ConnectionRecord),
    ConnectionLost(ConnectionLostRecord),
    Device(DeviceEventRecord),
    DeviceLost(DeviceEventRecord),
    DeviceFailure(DeviceFailureRecord),
    DeviceStatusChange(DeviceEventRecord),
    Policy(PolicyRecord),
    Tracking(TrackingFrame),
    Log(LogEntry),
    ConfigChange(ConfigChangeRecord),
    ConfigResponse { request_id: u32, value: ConfigValue },
    DroppedFrame(DroppedFrame),
    Image(ImageFrame),
    PointMappingChange(PointMappingChange),
    HeadPose(HeadPose),
}

pub(crate) fn decode_message(
    kind: EventType,
    payload: &[u8],
    received_at: Option<OffsetDateTime>,
) -> Result<Inbound> {
    let inbound = match kind {
        EventType::None => Inbound::None,
        EventType::Connection => Inbound::Connection(decode(payload, 0)?),
        EventType::ConnectionLost => Inbound::ConnectionLost(decode(payload, 0)?),
        EventType::Device => Inbound::Device(decode(payload, 0)?),
        EventType::DeviceLost => Inbound::DeviceLost(decode(payload, 0)?),
        EventType::DeviceFailure => Inbound::DeviceFailure(decode(payload, 0)?),
        EventType::DeviceStatusChange => Inbound::DeviceStatusChange(decode(payload, 0)?),
        EventType::Policy => Inbound::Policy(decode(payload, 0)?),
        EventType::Tracking => Inbound::Tracking(decode_frame(payload)?),
        EventType::Log => Inbound::Log(decode_log(payload, received_at)?),
        EventType::ConfigChange => Inbound::ConfigChange(decode(payload, 0)?),
        EventType::ConfigResponse => {
            let rec: ConfigResponseRecord = decode(payload, 0)?;
            Inbound::ConfigResponse {
                request_id: rec.request_id,
                value: decode_variant(payload, &rec.value)?,
            }
        }
        EventType::DroppedFrame => {
            let rec: DroppedFrameRecord = decode(payload, 0)?;
            Inbound::DroppedFrame(DroppedFrame {
                frame_id: rec.frame_id,
                kind: DroppedFrameKind::from_raw(rec.kind),
            })
        }
        EventType::Image => Inbound::Image(decode_images(payload)?),
        EventType::PointMappingChange => {
            let rec: PointMappingChangeRecord = decode(payload, 0)?;
            Inbound::PointMappingChange(PointMappingChange {
                frame_id: rec.frame_id,
                timestamp: rec.timestamp,
                point_count: rec.point_count,
            })
        }
        EventType::HeadPose => Inbound::HeadPose(decode_head_pose(payload)?),
    };
    Ok(inbound)
}

/// A tracking header plus the hand array it references.
pub(crate) fn decode_frame(payload: &[u8]) -> Result<TrackingFrame> {
    let header: TrackingHeader = decode(payload, 0)?;
    let hands = (0..header.hand_count as usize)
        .map(|i| {
            decode_array_element::<HandRecord>(payload, header.hands_offset as usize, i)
                .map(Hand::from)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TrackingFrame {
        frame_id: header.frame_id,
        timestamp: header.timestamp,
        tracking_frame_id: header.tracking_frame_id,
        framerate: header.framerate,
        hands,
    })
}

pub(crate) fn decode_head_pose(payload: &[u8]) -> Result<HeadPose> {
    let rec: HeadPoseRecord = decode(payload, 0)?;
    Ok(rec.into())
}

pub(crate) fn decode_point_mapping(payload: &[u8]) -> Result<PointMapping> {
    let rec: PointMappingRecord = decode(payload, 0)?;
    let count = rec.point_count as usize;
    let points = (0..count)
        .map(|i| decode_array_element::<Vector3>(payload, rec.points_offset as usize, i))
        .collect::<Result<Vec<_>>>()?;
    let ids = (0..count)
        .map(|i| decode_array_element::<u32>(payload, rec.ids_offset as usize, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(PointMapping {
        frame_id: rec.frame_id,
        timestamp: rec.timestamp,
        points,
        ids,
    })
}

fn decode_log(payload: &[u8], received_at: Option<OffsetDateTime>) -> Result<LogEntry> {
    let rec: LogRecord = decode(payload, 0)?;
    Ok(LogEntry {
        severity: LogSeverity::from_raw(rec.severity),
        timestamp: rec.timestamp,
        message: decode_str(payload, rec.message_offset, rec.message_len)?.to_string(),
        received_at,
    })
}

fn decode_images(payload: &[u8]) -> Result<ImageFrame> {
    let rec: ImageEventRecord = decode(payload, 0)?;
    let [left, right] = rec.images;
    Ok(ImageFrame {
        frame_id: rec.frame_id,
        timestamp: rec.timestamp,
        images: [
            Image::from_record(&left, decode_bytes(payload, left.data_offset, left.data_len)?),
            Image::from_record(&right, decode_bytes(payload, right.data_offset, right.data_len)?),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking_wire::{
        encode, variant_for, Chirality, DecodeError, ImageRecord, PayloadBuilder,
    };

    fn record_payload<T: tracking_wire::Record>(rec: &T) -> Vec<u8> {
        let mut out = Vec::new();
        encode(rec, &mut out);
        out
    }

    #[test]
    fn test_frame_with_hands() {
        let mut builder = PayloadBuilder::<TrackingHeader>::new();
        let hands_offset = builder.push_records(&[
            HandRecord {
                id: 1,
                ..Default::default()
            },
            HandRecord {
                id: 2,
                chirality: 1,
                grab_strength: 0.5,
                ..Default::default()
            },
        ]);
        let payload = builder.finish(&TrackingHeader {
            frame_id: 10,
            timestamp: 5_000,
            hand_count: 2,
            hands_offset,
            framerate: 115.0,
            ..Default::default()
        });

        let Inbound::Tracking(frame) = decode_message(EventType::Tracking, &payload, None).unwrap()
        else {
            panic!("expected tracking frame");
        };
        assert_eq!(frame.frame_id, 10);
        assert_eq!(frame.hands.len(), 2);
        let right = frame.hand(2).unwrap();
        assert_eq!(right.chirality, Chirality::Right);
        assert_eq!(right.grab_strength, 0.5);
    }

    #[test]
    fn test_hand_count_past_buffer_is_an_error() {
        let payload = record_payload(&TrackingHeader {
            hand_count: 3,
            hands_offset: 36,
            ..Default::default()
        });
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_truncated_records_fail() {
        assert!(decode_message(EventType::Device, &[0; 8], None).is_err());
        assert!(decode_message(EventType::Policy, &[], None).is_err());
        assert_eq!(
            decode_message(EventType::None, &[], None).unwrap(),
            Inbound::None
        );
    }

    #[test]
    fn test_log_message() {
        let mut builder = PayloadBuilder::<LogRecord>::new();
        let (message_offset, message_len) = builder.push_str("camera reset\0");
        let payload = builder.finish(&LogRecord {
            severity: 2,
            timestamp: 77,
            message_offset,
            message_len,
        });
        let Inbound::Log(entry) = decode_message(EventType::Log, &payload, None).unwrap() else {
            panic!("expected log");
        };
        assert_eq!(entry.severity, LogSeverity::Warning);
        assert_eq!(entry.message, "camera reset");
    }

    #[test]
    fn test_config_response_value() {
        let mut builder = PayloadBuilder::<ConfigResponseRecord>::new();
        let value = variant_for(&ConfigValue::Float(0.25), &mut builder);
        let payload = builder.finish(&ConfigResponseRecord {
            request_id: 4,
            value,
        });
        assert_eq!(
            decode_message(EventType::ConfigResponse, &payload, None).unwrap(),
            Inbound::ConfigResponse {
                request_id: 4,
                value: ConfigValue::Float(0.25)
            }
        );
    }

    #[test]
    fn test_image_pair() {
        let mut builder = PayloadBuilder::<ImageEventRecord>::new();
        let (lo, ll) = builder.push_bytes(&[1, 2, 3, 4]);
        let (ro, rl) = builder.push_bytes(&[5, 6, 7, 8]);
        let image = |data_offset, data_len| ImageRecord {
            bpp: 1,
            width: 2,
            height: 2,
            data_offset,
            data_len,
            ..Default::default()
        };
        let payload = builder.finish(&ImageEventRecord {
            frame_id: 3,
            timestamp: 30,
            images: [image(lo, ll), image(ro, rl)],
        });
        let Inbound::Image(frame) = decode_message(EventType::Image, &payload, None).unwrap() else {
            panic!("expected image");
        };
        assert_eq!(frame.images[0].data, vec![1, 2, 3, 4]);
        assert_eq!(frame.images[1].data, vec![5, 6, 7, 8]);
        assert_eq!(frame.images[1].width, 2);
    }

    #[test]
    fn test_point_mapping_arrays() {
        let mut builder = PayloadBuilder::<PointMappingRecord>::new();
        let points_offset =
            builder.push_records(&[Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 0.0)]);
        let ids_offset = builder.push_records(&[11u32, 12u32]);
        let payload = builder.finish(&PointMappingRecord {
            frame_id: 8,
            timestamp: 80,
            point_count: 2,
            points_offset,
            ids_offset,
        });
        let mapping = decode_point_mapping(&payload).unwrap();
        assert_eq!(mapping.ids, vec![11, 12]);
        assert_eq!(mapping.points[1], Vector3::new(0.0, 2.0, 0.0));
    }
}
