use crate::{FieldReader, FieldWriter, Quaternion, Record, Vector3};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionRecord {
    pub flags: u32,
}

impl Record for ConnectionRecord {
    const NAME: &'static str = "ConnectionRecord";
    const SIZE: usize = 4;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self { flags: r.u32() }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.flags);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionLostRecord {
    pub flags: u32,
}

impl Record for ConnectionLostRecord {
    const NAME: &'static str = "ConnectionLostRecord";
    const SIZE: usize = 4;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self { flags: r.u32() }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.flags);
    }
}

/// Device attach, lost and status-change events share this layout.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceEventRecord {
    pub flags: u32,
    pub handle: u32,
    pub id: u32,
    pub status: u32,
}

impl Record for DeviceEventRecord {
    const NAME: &'static str = "DeviceEventRecord";
    const SIZE: usize = 16;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            flags: r.u32(),
            handle: r.u32(),
            id: r.u32(),
            status: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.flags);
        w.u32(self.handle);
        w.u32(self.id);
        w.u32(self.status);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceFailureRecord {
    pub status: u32,
    pub handle: u32,
}

impl Record for DeviceFailureRecord {
    const NAME: &'static str = "DeviceFailureRecord";
    const SIZE: usize = 8;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            status: r.u32(),
            handle: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.status);
        w.u32(self.handle);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PolicyRecord {
    pub reserved: u32,
    pub current_policy: u32,
}

impl Record for PolicyRecord {
    const NAME: &'static str = "PolicyRecord";
    const SIZE: usize = 8;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            reserved: r.u32(),
            current_policy: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.reserved);
        w.u32(self.current_policy);
    }
}

/// Fixed head of a tracking event. `hand_count` [`HandRecord`]s start at
/// `hands_offset` in the same payload.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackingHeader {
    pub frame_id: i64,
    pub timestamp: i64,
    pub tracking_frame_id: i64,
    pub hand_count: u32,
    pub hands_offset: u32,
    pub framerate: f32,
}

impl Record for TrackingHeader {
    const NAME: &'static str = "TrackingHeader";
    const SIZE: usize = 36;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            frame_id: r.i64(),
            timestamp: r.i64(),
            tracking_frame_id: r.i64(),
            hand_count: r.u32(),
            hands_offset: r.u32(),
            framerate: r.f32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.frame_id);
        w.i64(self.timestamp);
        w.i64(self.tracking_frame_id);
        w.u32(self.hand_count);
        w.u32(self.hands_offset);
        w.f32(self.framerate);
    }
}

/// Palm-level hand snapshot. Finger and bone detail is not carried.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HandRecord {
    pub id: u32,
    pub flags: u32,
    pub chirality: u32,
    pub confidence: f32,
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

impl Record for HandRecord {
    const NAME: &'static str = "HandRecord";
    const SIZE: usize = 92;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            id: r.u32(),
            flags: r.u32(),
            chirality: r.u32(),
            confidence: r.f32(),
            visible_time: r.u64(),
            pinch_distance: r.f32(),
            grab_angle: r.f32(),
            pinch_strength: r.f32(),
            grab_strength: r.f32(),
            palm_position: r.vector3(),
            palm_velocity: r.vector3(),
            palm_normal: r.vector3(),
            palm_orientation: r.quaternion(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.id);
        w.u32(self.flags);
        w.u32(self.chirality);
        w.f32(self.confidence);
        w.u64(self.visible_time);
        w.f32(self.pinch_distance);
        w.f32(self.grab_angle);
        w.f32(self.pinch_strength);
        w.f32(self.grab_strength);
        w.vector3(self.palm_position);
        w.vector3(self.palm_velocity);
        w.vector3(self.palm_normal);
        w.quaternion(self.palm_orientation);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LogRecord {
    pub severity: u32,
    pub timestamp: i64,
    pub message_offset: u32,
    pub message_len: u32,
}

impl Record for LogRecord {
    const NAME: &'static str = "LogRecord";
    const SIZE: usize = 20;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            severity: r.u32(),
            timestamp: r.i64(),
            message_offset: r.u32(),
            message_len: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.severity);
        w.i64(self.timestamp);
        w.u32(self.message_offset);
        w.u32(self.message_len);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConfigChangeRecord {
    pub request_id: u32,
    pub status: u32,
}

impl Record for ConfigChangeRecord {
    const NAME: &'static str = "ConfigChangeRecord";
    const SIZE: usize = 8;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            request_id: r.u32(),
            status: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.request_id);
        w.u32(self.status);
    }
}

/// Tagged config value. Scalars live in `a`; strings are `(offset = a, len = b)`
/// into the enclosing payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VariantRecord {
    pub kind: u32,
    pub a: u32,
    pub b: u32,
}

impl VariantRecord {
    pub const KIND_BOOL: u32 = 1;
    pub const KIND_INT: u32 = 2;
    pub const KIND_FLOAT: u32 = 3;
    pub const KIND_STRING: u32 = 4;
}

impl Record for VariantRecord {
    const NAME: &'static str = "VariantRecord";
    const SIZE: usize = 12;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            kind: r.u32(),
            a: r.u32(),
            b: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.kind);
        w.u32(self.a);
        w.u32(self.b);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConfigResponseRecord {
    pub request_id: u32,
    pub value: VariantRecord,
}

impl Record for ConfigResponseRecord {
    const NAME: &'static str = "ConfigResponseRecord";
    const SIZE: usize = 16;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            request_id: r.u32(),
            value: VariantRecord::read(r),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.request_id);
        self.value.write(w);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DroppedFrameRecord {
    pub frame_id: i64,
    pub kind: u32,
}

impl Record for DroppedFrameRecord {
    const NAME: &'static str = "DroppedFrameRecord";
    const SIZE: usize = 12;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            frame_id: r.i64(),
            kind: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.frame_id);
        w.u32(self.kind);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ImageRecord {
    pub kind: u32,
    pub format: u32,
    pub bpp: u32,
    pub width: u32,
    pub height: u32,
    pub data_offset: u32,
    pub data_len: u32,
}

impl Record for ImageRecord {
    const NAME: &'static str = "ImageRecord";
    const SIZE: usize = 28;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            kind: r.u32(),
            format: r.u32(),
            bpp: r.u32(),
            width: r.u32(),
            height: r.u32(),
            data_offset: r.u32(),
            data_len: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.kind);
        w.u32(self.format);
        w.u32(self.bpp);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.data_offset);
        w.u32(self.data_len);
    }
}

/// Stereo image pair header; the two [`ImageRecord`]s start at byte 16.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ImageEventRecord {
    pub frame_id: i64,
    pub timestamp: i64,
    pub images: [ImageRecord; 2],
}

impl ImageEventRecord {
    pub const IMAGES_OFFSET: usize = 16;
}

impl Record for ImageEventRecord {
    const NAME: &'static str = "ImageEventRecord";
    const SIZE: usize = 72;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            frame_id: r.i64(),
            timestamp: r.i64(),
            images: [ImageRecord::read(r), ImageRecord::read(r)],
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.frame_id);
        w.i64(self.timestamp);
        for image in &self.images {
            image.write(w);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PointMappingChangeRecord {
    pub frame_id: i64,
    pub timestamp: i64,
    pub point_count: u32,
}

impl Record for PointMappingChangeRecord {
    const NAME: &'static str = "PointMappingChangeRecord";
    const SIZE: usize = 20;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            frame_id: r.i64(),
            timestamp: r.i64(),
            point_count: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.frame_id);
        w.i64(self.timestamp);
        w.u32(self.point_count);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PointMappingRecord {
    pub frame_id: i64,
    pub timestamp: i64,
    pub point_count: u32,
    pub points_offset: u32,
    pub ids_offset: u32,
}

impl Record for PointMappingRecord {
    const NAME: &'static str = "PointMappingRecord";
    const SIZE: usize = 28;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            frame_id: r.i64(),
            timestamp: r.i64(),
            point_count: r.u32(),
            points_offset: r.u32(),
            ids_offset: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.frame_id);
        w.i64(self.timestamp);
        w.u32(self.point_count);
        w.u32(self.points_offset);
        w.u32(self.ids_offset);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeadPoseRecord {
    pub timestamp: i64,
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl Record for HeadPoseRecord {
    const NAME: &'static str = "HeadPoseRecord";
    const SIZE: usize = 36;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            timestamp: r.i64(),
            position: r.vector3(),
            orientation: r.quaternion(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.i64(self.timestamp);
        w.vector3(self.position);
        w.quaternion(self.orientation);
    }
}

/// Reply to a device info query; the serial is `(serial_offset, serial_len)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeviceInfoRecord {
    pub status: u32,
    pub caps: u32,
    pub pid: u32,
    pub baseline: u32,
    pub serial_offset: u32,
    pub serial_len: u32,
    pub h_fov: f32,
    pub v_fov: f32,
    pub range: u32,
}

impl Record for DeviceInfoRecord {
    const NAME: &'static str = "DeviceInfoRecord";
    const SIZE: usize = 36;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            status: r.u32(),
            caps: r.u32(),
            pid: r.u32(),
            baseline: r.u32(),
            serial_offset: r.u32(),
            serial_len: r.u32(),
            h_fov: r.f32(),
            v_fov: r.f32(),
            range: r.u32(),
        }
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.status);
        w.u32(self.caps);
        w.u32(self.pid);
        w.u32(self.baseline);
        w.u32(self.serial_offset);
        w.u32(self.serial_len);
        w.f32(self.h_fov);
        w.f32(self.v_fov);
        w.u32(self.range);
    }
}
