use crate::{ConfigValue, FieldWriter, Record, VariantRecord};
use std::marker::PhantomData;

/// Append `rec` to `out` in wire layout.
pub fn encode<T: Record>(rec: &T, out: &mut Vec<u8>) {
    let mut w = FieldWriter::new(out);
    rec.write(&mut w);
}

/// Builds a message payload: the fixed record `T` at offset 0 followed by any
/// variable-length data it references.
pub struct PayloadBuilder<T: Record> {
    buf: Vec<u8>,
    _record: PhantomData<T>,
}

impl<T: Record> PayloadBuilder<T> {
    pub fn new() -> Self {
        Self::in_buffer(Vec::with_capacity(T::SIZE))
    }

    /// Reuse an existing allocation; its contents are discarded.
    pub fn in_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        buf.resize(T::SIZE, 0);
        Self {
            buf,
            _record: PhantomData,
        }
    }

    pub fn offset(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Returns `(offset, len)` of the appended bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> (u32, u32) {
        let offset = self.offset();
        self.buf.extend_from_slice(bytes);
        (offset, bytes.len() as u32)
    }

    pub fn push_str(&mut self, s: &str) -> (u32, u32) {
        self.push_bytes(s.as_bytes())
    }

    /// Returns the offset of the first appended record.
    pub fn push_records<R: Record>(&mut self, records: &[R]) -> u32 {
        let offset = self.offset();
        for rec in records {
            encode(rec, &mut self.buf);
        }
        offset
    }

    pub fn finish(mut self, header: &T) -> Vec<u8> {
        let mut head = Vec::with_capacity(T::SIZE);
        encode(header, &mut head);
        if let Some(dst) = self.buf.get_mut(..T::SIZE) {
            dst.copy_from_slice(&head);
        }
        self.buf
    }
}

impl<T: Record> Default for PayloadBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a config value as a variant, appending string data to `builder`.
pub fn variant_for<T: Record>(
    value: &ConfigValue,
    builder: &mut PayloadBuilder<T>,
) -> VariantRecord {
    match value {
        ConfigValue::Bool(v) => VariantRecord {
            kind: VariantRecord::KIND_BOOL,
            a: u32::from(*v),
            b: 0,
        },
        ConfigValue::Int(v) => VariantRecord {
            kind: VariantRecord::KIND_INT,
            a: *v as u32,
            b: 0,
        },
        ConfigValue::Float(v) => VariantRecord {
            kind: VariantRecord::KIND_FLOAT,
            a: v.to_bits(),
            b: 0,
        },
        ConfigValue::Text(s) => {
            let (a, b) = builder.push_str(s);
            VariantRecord {
                kind: VariantRecord::KIND_STRING,
                a,
                b,
            }
        }
    }
}
