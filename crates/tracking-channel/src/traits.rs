use crate::{ChannelError, OpenDevice, RawMessage, Result};
use std::sync::Arc;
use std::time::Duration;
use tracking_wire::{Camera, ConfigValue, Vector3};

/// Buffer provider the channel uses for memory it fills on the client's behalf.
///
/// Installed while a channel is open. Buffers handed out by `allocate` must stay
/// valid until passed back to `deallocate`.
pub trait Allocator: Send + Sync {
    fn allocate(&self, size: usize) -> Vec<u8>;

    fn deallocate(&self, buf: Vec<u8>);
}

/// Creates channel handles. One handle per connection start.
pub trait Connector: Send + Sync {
    fn create(&self) -> Result<Arc<dyn Channel>>;
}

/// The blocking primitives a client needs from the daemon.
///
/// All methods take `&self`: the poll loop and caller threads share one handle, so
/// backends must be safe to call concurrently.
pub trait Channel: Send + Sync {
    /// Connect, optionally inside a server namespace.
    fn open(&self, namespace: Option<&str>) -> Result<()>;

    /// Disconnect. Must unblock a concurrent `poll`.
    fn close(&self);

    /// Release the handle. Called exactly once, after `close`.
    fn destroy(&self);

    fn set_allocator(&self, allocator: Option<Arc<dyn Allocator>>);

    /// Wait up to `timeout` for the next message.
    fn poll(&self, timeout: Duration) -> Result<RawMessage>;

    /// Replace the policy state: bits in `set` are requested, bits in `clear` dropped.
    fn set_policy_flags(&self, set: u32, clear: u32) -> Result<()>;

    /// Returns the request id, or 0 when the daemon refused the request.
    fn request_config_value(&self, key: &str) -> Result<u32>;

    /// Returns the request id, or 0 when the daemon refused the request.
    fn save_config_value(&self, key: &str, value: &ConfigValue) -> Result<u32>;

    fn open_device(&self, handle: u32) -> Result<OpenDevice>;

    fn close_device(&self, device: OpenDevice);

    /// Bytes needed for a device info reply including the serial.
    fn device_info_size(&self, device: OpenDevice) -> Result<usize>;

    fn device_info(&self, device: OpenDevice, buf: &mut [u8]) -> Result<()>;

    fn frame_size(&self, time: i64) -> Result<usize>;

    fn interpolate_frame(&self, time: i64, buf: &mut [u8]) -> Result<()>;

    fn interpolate_frame_from_time(
        &self,
        _time: i64,
        _source_time: i64,
        _buf: &mut [u8],
    ) -> Result<()> {
        Err(ChannelError::Unsupported("interpolation from source time"))
    }

    fn interpolate_head_pose(&self, _time: i64, _buf: &mut [u8]) -> Result<()> {
        Err(ChannelError::Unsupported("head pose interpolation"))
    }

    fn point_mapping_size(&self) -> Result<usize> {
        Err(ChannelError::Unsupported("point mapping"))
    }

    fn point_mapping(&self, _buf: &mut [u8]) -> Result<()> {
        Err(ChannelError::Unsupported("point mapping"))
    }

    fn pixel_to_rectilinear(&self, _camera: Camera, _pixel: Vector3) -> Result<Vector3> {
        Err(ChannelError::Unsupported("pixel projection"))
    }

    fn rectilinear_to_pixel(&self, _camera: Camera, _ray: Vector3) -> Result<Vector3> {
        Err(ChannelError::Unsupported("ray projection"))
    }
}
