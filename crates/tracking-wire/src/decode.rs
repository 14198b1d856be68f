use crate::{ConfigValue, DecodeError, FieldReader, Record, Result, VariantRecord};

/// Byte size of a record type.
pub const fn record_size<T: Record>() -> usize {
    T::SIZE
}

/// Decode a `T` from exactly `T::SIZE` bytes at `offset` of `buf`.
pub fn decode<T: Record>(buf: &[u8], offset: usize) -> Result<T> {
    let end = offset.checked_add(T::SIZE).ok_or(DecodeError::Overflow {
        record: T::NAME,
        index: 0,
    })?;
    let bytes = buf.get(offset..end).ok_or(DecodeError::OutOfBounds {
        record: T::NAME,
        offset,
        needed: T::SIZE,
        available: buf.len(),
    })?;
    Ok(T::read(&mut FieldReader::new(bytes)))
}

/// Decode element `index` of a packed `T` array starting at `base`.
///
/// Only the buffer bound is checked. The element count must come from the record
/// that produced `base`.
pub fn decode_array_element<T: Record>(buf: &[u8], base: usize, index: usize) -> Result<T> {
    let offset = index
        .checked_mul(T::SIZE)
        .and_then(|rel| rel.checked_add(base))
        .ok_or(DecodeError::Overflow {
            record: T::NAME,
            index,
        })?;
    decode(buf, offset)
}

/// Like [`decode`] but yields a zero-valued record on failure, logging the reason.
pub fn decode_or_default<T: Record>(buf: &[u8], offset: usize) -> T {
    match decode(buf, offset) {
        Ok(rec) => rec,
        Err(e) => {
            tracing::warn!(error = %e, "decode failed, using default record");
            T::default()
        }
    }
}

pub fn decode_bytes(buf: &[u8], offset: u32, len: u32) -> Result<&[u8]> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(DecodeError::Overflow {
            record: "bytes",
            index: 0,
        })?;
    buf.get(start..end).ok_or(DecodeError::OutOfBounds {
        record: "bytes",
        offset: start,
        needed: len as usize,
        available: buf.len(),
    })
}

pub fn decode_str(buf: &[u8], offset: u32, len: u32) -> Result<&str> {
    let bytes = decode_bytes(buf, offset, len)?;
    // Daemon strings may carry a trailing NUL
    let trimmed = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    std::str::from_utf8(trimmed).map_err(|_| DecodeError::InvalidUtf8(offset as usize))
}

/// Resolve a variant record against the payload it was decoded from.
pub fn decode_variant(buf: &[u8], rec: &VariantRecord) -> Result<ConfigValue> {
    let value = match rec.kind {
        VariantRecord::KIND_BOOL => ConfigValue::Bool(rec.a != 0),
        VariantRecord::KIND_INT => ConfigValue::Int(rec.a as i32),
        VariantRecord::KIND_FLOAT => ConfigValue::Float(f32::from_bits(rec.a)),
        VariantRecord::KIND_STRING => ConfigValue::Text(decode_str(buf, rec.a, rec.b)?.to_string()),
        other => return Err(DecodeError::UnknownVariant(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode, ConfigResponseRecord, DeviceEventRecord, HandRecord, PayloadBuilder,
        TrackingHeader, Vector3,
    };

    #[test]
    fn test_device_record_bit_pattern() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let rec: DeviceEventRecord = decode(&bytes, 0).unwrap();
        assert_eq!(rec.flags, 0x0302_0100);
        assert_eq!(rec.handle, 0x0706_0504);
        assert_eq!(rec.id, 0x0B0A_0908);
        assert_eq!(rec.status, 0x0F0E_0D0C);
        assert_eq!(record_size::<DeviceEventRecord>(), 16);
    }

    #[test]
    fn test_decode_at_offset_with_signed_fields() -> anyhow::Result<()> {
        let mut buf = vec![0xAA; 4];
        buf.extend_from_slice(&(-2i64).to_le_bytes());
        buf.extend_from_slice(&1_700_000_000_000i64.to_le_bytes());
        buf.extend_from_slice(&7i64.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&90.0f32.to_le_bytes());

        let header: TrackingHeader = decode(&buf, 4)?;
        assert_eq!(header.frame_id, -2);
        assert_eq!(header.timestamp, 1_700_000_000_000);
        assert_eq!(header.tracking_frame_id, 7);
        assert_eq!(header.hand_count, 2);
        assert_eq!(header.hands_offset, 40);
        assert_eq!(header.framerate, 90.0);
        Ok(())
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let bytes = [0u8; 15];
        let err = decode::<DeviceEventRecord>(&bytes, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                record: "DeviceEventRecord",
                offset: 0,
                needed: 16,
                available: 15,
            }
        );
        assert!(decode::<DeviceEventRecord>(&[0u8; 32], usize::MAX).is_err());
    }

    #[test]
    fn test_decode_or_default_zeroes() {
        let rec: DeviceEventRecord = decode_or_default(&[1, 2, 3], 0);
        assert_eq!(rec, DeviceEventRecord::default());
    }

    #[test]
    fn test_array_elements() -> anyhow::Result<()> {
        let mut builder = PayloadBuilder::<TrackingHeader>::new();
        let hands = [
            HandRecord {
                id: 11,
                palm_position: Vector3::new(1.0, 2.0, 3.0),
                ..Default::default()
            },
            HandRecord {
                id: 12,
                chirality: 1,
                ..Default::default()
            },
        ];
        let base = builder.push_records(&hands);
        let payload = builder.finish(&TrackingHeader {
            hand_count: 2,
            hands_offset: base,
            ..Default::default()
        });

        let header: TrackingHeader = decode(&payload, 0)?;
        let second: HandRecord = decode_array_element(&payload, header.hands_offset as usize, 1)?;
        assert_eq!(second.id, 12);
        assert_eq!(second.chirality, 1);
        let first: HandRecord = decode_array_element(&payload, header.hands_offset as usize, 0)?;
        assert_eq!(first.palm_position, Vector3::new(1.0, 2.0, 3.0));
        // No count check, only the buffer bound
        assert!(decode_array_element::<HandRecord>(&payload, base as usize, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_variant_string() -> anyhow::Result<()> {
        let mut builder = PayloadBuilder::<ConfigResponseRecord>::new();
        let value = crate::variant_for(&ConfigValue::Text("robust".into()), &mut builder);
        let payload = builder.finish(&ConfigResponseRecord {
            request_id: 9,
            value,
        });
        let rec: ConfigResponseRecord = decode(&payload, 0)?;
        assert_eq!(rec.request_id, 9);
        assert_eq!(
            decode_variant(&payload, &rec.value)?,
            ConfigValue::Text("robust".into())
        );
        Ok(())
    }

    #[test]
    fn test_variant_unknown_kind() {
        let rec = VariantRecord {
            kind: 99,
            a: 0,
            b: 0,
        };
        assert_eq!(
            decode_variant(&[], &rec),
            Err(DecodeError::UnknownVariant(99))
        );
    }

    #[test]
    fn test_str_trims_nul_and_rejects_bad_utf8() {
        let buf = b"abc\0\xff\xfe";
        assert_eq!(decode_str(buf, 0, 4).unwrap(), "abc");
        assert_eq!(decode_str(buf, 4, 2), Err(DecodeError::InvalidUtf8(4)));
    }

    #[test]
    fn test_encoded_sizes_match_declared() {
        let mut out = Vec::new();
        encode(&HandRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<HandRecord>());
        out.clear();
        encode(&crate::ImageEventRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<crate::ImageEventRecord>());
        out.clear();
        encode(&crate::DeviceInfoRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<crate::DeviceInfoRecord>());
        out.clear();
        encode(&crate::PointMappingRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<crate::PointMappingRecord>());
        out.clear();
        encode(&crate::HeadPoseRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<crate::HeadPoseRecord>());
        out.clear();
        encode(&crate::LogRecord::default(), &mut out);
        assert_eq!(out.len(), record_size::<crate::LogRecord>());
    }
}
