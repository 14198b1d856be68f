use crate::types::{
    Device, DeviceFailure, DroppedFrame, HeadPose, ImageFrame, LogEntry, PointMappingChange,
    TrackingFrame,
};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tracking_wire::{ConfigValue, DeviceStatus, PolicyFlags};

/// Everything a connection reports to its observers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ConnectionEstablished,
    ConnectionLost,
    DeviceAttached(Device),
    DeviceLost(Device),
    DeviceFailed(DeviceFailure),
    DeviceStatusChanged {
        device: Device,
        previous: DeviceStatus,
    },
    PolicyChanged {
        previous: PolicyFlags,
        current: PolicyFlags,
    },
    Frame(TrackingFrame),
    Log(LogEntry),
    /// `key` is `None` when the request id was not pending.
    ConfigChanged {
        request_id: u32,
        key: Option<String>,
        succeeded: bool,
    },
    ConfigResponse {
        request_id: u32,
        key: Option<String>,
        value: ConfigValue,
    },
    DroppedFrame(DroppedFrame),
    Image(ImageFrame),
    PointMappingChanged(PointMappingChange),
    HeadPose(HeadPose),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionEstablished => "connection_established",
            Event::ConnectionLost => "connection_lost",
            Event::DeviceAttached(_) => "device_attached",
            Event::DeviceLost(_) => "device_lost",
            Event::DeviceFailed(_) => "device_failed",
            Event::DeviceStatusChanged { .. } => "device_status_changed",
            Event::PolicyChanged { .. } => "policy_changed",
            Event::Frame(_) => "frame",
            Event::Log(_) => "log",
            Event::ConfigChanged { .. } => "config_changed",
            Event::ConfigResponse { .. } => "config_response",
            Event::DroppedFrame(_) => "dropped_frame",
            Event::Image(_) => "image",
            Event::PointMappingChanged(_) => "point_mapping_changed",
            Event::HeadPose(_) => "head_pose",
        }
    }
}

pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fans events out to callbacks and channel subscribers, on the poll thread,
/// in arrival order.
#[derive(Default)]
pub(crate) struct Dispatcher {
    observers: Mutex<Vec<Observer>>,
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl Dispatcher {
    pub fn add_observer(&self, observer: Observer) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Observer panics propagate to the caller.
    pub fn dispatch(&self, event: Event) {
        // Snapshot so observers may register further observers
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer(&event);
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observers_then_subscribers_in_order() {
        let dispatcher = Dispatcher::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.add_observer(Arc::new(move |e: &Event| {
            sink.lock().unwrap().push(e.name());
        }));
        let rx = dispatcher.subscribe();

        dispatcher.dispatch(Event::ConnectionEstablished);
        dispatcher.dispatch(Event::ConnectionLost);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["connection_established", "connection_lost"]
        );
        assert_eq!(rx.recv().unwrap(), Event::ConnectionEstablished);
        assert_eq!(rx.recv().unwrap(), Event::ConnectionLost);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let dispatcher = Dispatcher::default();
        let rx = dispatcher.subscribe();
        let _kept = dispatcher.subscribe();
        drop(rx);
        dispatcher.dispatch(Event::ConnectionEstablished);
        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[test]
    fn test_every_observer_sees_each_event_once() {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            dispatcher.add_observer(Arc::new(move |_: &Event| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.dispatch(Event::Frame(TrackingFrame::default()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(Event::PolicyChanged {
            previous: PolicyFlags::empty(),
            current: PolicyFlags::IMAGES,
        })
        .unwrap();
        assert_eq!(json["event"], "policy_changed");
    }
}
