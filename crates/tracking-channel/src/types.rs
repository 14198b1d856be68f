use time::OffsetDateTime;
use tracking_wire::{DecodeError, EventType};

/// One inbound message: a discriminator and the payload holding its record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawMessage {
    pub event_type: u32,
    pub device_id: u32,
    pub payload: Vec<u8>,
    pub received_at: Option<OffsetDateTime>,
}

impl RawMessage {
    pub fn new(kind: EventType, device_id: u32, payload: Vec<u8>) -> Self {
        Self {
            event_type: kind.raw(),
            device_id,
            payload,
            received_at: None,
        }
    }

    pub fn kind(&self) -> Result<EventType, DecodeError> {
        EventType::try_from(self.event_type)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Handle of a device opened through the channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OpenDevice(pub u32);
