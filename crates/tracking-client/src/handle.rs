use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracking_channel::Channel;

/// Owns one channel from `open` to `destroy`.
///
/// [`close`](Self::close) detaches the allocator and disconnects, once. The
/// channel is destroyed when the last reference drops, so a query still holding
/// a clone never runs against a destroyed channel.
pub(crate) struct ChannelHandle {
    channel: Arc<dyn Channel>,
    closed: AtomicBool,
}

impl ChannelHandle {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.channel.set_allocator(None);
            self.channel.close();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
        self.channel.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking_channel::{Connector, MockDaemon};

    #[test]
    fn test_close_is_idempotent_and_destroy_waits_for_drop() {
        let daemon = MockDaemon::new();
        let handle = ChannelHandle::new(daemon.create().unwrap());
        handle.channel().open(None).unwrap();
        assert_eq!(daemon.open_channels(), 1);

        handle.close();
        handle.close();
        assert_eq!(daemon.open_channels(), 0);
        assert_eq!(daemon.channels_destroyed(), 0);
        drop(handle);
        assert_eq!(daemon.channels_destroyed(), 1);
    }

    #[test]
    fn test_last_clone_destroys() {
        let daemon = MockDaemon::new();
        let handle = Arc::new(ChannelHandle::new(daemon.create().unwrap()));
        let query = Arc::clone(&handle);
        handle.close();
        drop(handle);
        assert_eq!(daemon.channels_destroyed(), 0);
        drop(query);
        assert_eq!(daemon.channels_destroyed(), 1);
    }
}
