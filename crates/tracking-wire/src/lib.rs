//! tracking-wire: fixed-layout binary records exchanged with the tracking daemon
//!
//! Every inbound message carries a discriminator ([`EventType`]) and a payload whose
//! first bytes hold exactly one fixed-size record. Variable-length data (hand arrays,
//! strings, image pixels, mapped points) follows the record in the same payload and is
//! referenced by `(offset, len)` pairs. Records are little-endian and packed.
//!
//! Decoding never allocates for the fixed part of a record and never panics: short or
//! misaligned buffers surface as [`DecodeError`].

mod error;
pub use error::{DecodeError, Result};

mod types;
pub use types::{
    Camera, Chirality, ConfigValue, DeviceStatus, DeviceType, DroppedFrameKind, EventType,
    FailureKind, LogSeverity, PolicyFlags, Quaternion, Vector3,
};

mod record;
pub use record::{FieldReader, FieldWriter, Record};

mod records;
pub use records::{
    ConfigChangeRecord, ConfigResponseRecord, ConnectionLostRecord, ConnectionRecord,
    DeviceEventRecord, DeviceFailureRecord, DeviceInfoRecord, DroppedFrameRecord, HandRecord,
    HeadPoseRecord, ImageEventRecord, ImageRecord, LogRecord, PointMappingChangeRecord,
    PointMappingRecord, PolicyRecord, TrackingHeader, VariantRecord,
};

mod decode;
pub use decode::{
    decode, decode_array_element, decode_bytes, decode_or_default, decode_str, decode_variant,
    record_size,
};

mod encode;
pub use encode::{encode, variant_for, PayloadBuilder};
