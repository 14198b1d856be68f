use thiserror::Error;

pub type Result<T, E = DecodeError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{record} at offset {offset} needs {needed} bytes, payload holds {available}")]
    OutOfBounds {
        record: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("offset overflow locating element {index} of {record}")]
    Overflow { record: &'static str, index: usize },
    #[error("invalid utf-8 in string at offset {0}")]
    InvalidUtf8(usize),
    #[error("unknown variant kind: {0}")]
    UnknownVariant(u32),
    #[error("unknown event type: 0x{0:03X}")]
    UnknownEventType(u32),
}
