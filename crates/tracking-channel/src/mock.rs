use crate::{Allocator, Channel, ChannelError, Connector, OpenDevice, RawMessage, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracking_wire::{
    variant_for, Camera, ConfigChangeRecord, ConfigResponseRecord, ConfigValue,
    ConnectionLostRecord, ConnectionRecord, DeviceEventRecord, DeviceFailureRecord,
    DeviceInfoRecord, DeviceStatus, DeviceType, DroppedFrameKind, DroppedFrameRecord, EventType,
    FailureKind, HandRecord, HeadPoseRecord, ImageEventRecord, ImageRecord, LogRecord,
    LogSeverity, PayloadBuilder, PointMappingChangeRecord, PointMappingRecord, PolicyRecord,
    Record, TrackingHeader, Vector3,
};

const OPEN_HANDLE_BASE: u32 = 0x1000;
const FOCAL_PX: f32 = 320.0;

type Namespace = Option<String>;

/// A device known to the mock daemon.
#[derive(Clone, Debug)]
pub struct MockDevice {
    pub handle: u32,
    pub id: u32,
    pub serial: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub h_fov: f32,
    pub v_fov: f32,
    pub range: u32,
    pub baseline: u32,
    /// Refuse `open_device` for this device.
    pub refuse_open: bool,
}

impl MockDevice {
    pub fn new(handle: u32, serial: &str) -> Self {
        Self {
            handle,
            id: handle,
            serial: serial.to_string(),
            device_type: DeviceType::Gen2,
            status: DeviceStatus::STREAMING,
            h_fov: 2.44,
            v_fov: 2.23,
            range: 470,
            baseline: 40,
            refuse_open: false,
        }
    }
}

struct ChannelState {
    namespace: Namespace,
    open: bool,
}

struct DaemonState {
    queues: HashMap<Namespace, VecDeque<RawMessage>>,
    channels: HashMap<u64, ChannelState>,
    next_channel: u64,
    devices: HashMap<u32, MockDevice>,
    next_request_id: u32,
    refuse_requests: bool,
    refuse_open: bool,
    auto_respond: bool,
    config: HashMap<String, ConfigValue>,
    policy_calls: Vec<(u32, u32)>,
    frame: Option<(TrackingHeader, Vec<HandRecord>)>,
    head_pose: Option<HeadPoseRecord>,
    points: Vec<(Vector3, u32)>,
    created: usize,
    destroyed: usize,
    reply_size: Option<usize>,
    hold_queries: bool,
    held_queries: usize,
    calls_after_destroy: usize,
}

impl Default for DaemonState {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            channels: HashMap::new(),
            next_channel: 1,
            devices: HashMap::new(),
            next_request_id: 1,
            refuse_requests: false,
            refuse_open: false,
            auto_respond: true,
            config: HashMap::new(),
            policy_calls: Vec::new(),
            frame: None,
            head_pose: None,
            points: Vec::new(),
            created: 0,
            destroyed: 0,
            reply_size: None,
            hold_queries: false,
            held_queries: 0,
            calls_after_destroy: 0,
        }
    }
}

impl DaemonState {
    fn enqueue(&mut self, namespace: &Namespace, msg: RawMessage) {
        self.queues.entry(namespace.clone()).or_default().push_back(msg);
    }

    fn open_namespace(&self, channel: u64) -> Result<Namespace> {
        match self.channels.get(&channel) {
            Some(state) if state.open => Ok(state.namespace.clone()),
            _ => Err(ChannelError::NotConnected),
        }
    }

    fn issue_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    fn device_for(&self, device: OpenDevice) -> Result<&MockDevice> {
        let handle = device.0.wrapping_sub(OPEN_HANDLE_BASE);
        self.devices
            .get(&handle)
            .ok_or(ChannelError::DeviceNotFound(handle))
    }
}

struct Shared {
    state: Mutex<DaemonState>,
    ready: Condvar,
}

/// In-process stand-in for the tracking daemon.
///
/// Cloning yields another view of the same daemon. Messages pushed through a view go
/// to the namespace that view is bound to (see [`MockDaemon::namespace`]).
#[derive(Clone)]
pub struct MockDaemon {
    shared: Arc<Shared>,
    namespace: Namespace,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDaemon {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DaemonState::default()),
                ready: Condvar::new(),
            }),
            namespace: None,
        }
    }

    /// A view of this daemon bound to another server namespace.
    pub fn namespace(&self, namespace: Option<&str>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            namespace: namespace.map(str::to_string),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DaemonState) -> R) -> Option<R> {
        let mut state = self.shared.state.lock().ok()?;
        let out = f(&mut state);
        self.shared.ready.notify_all();
        Some(out)
    }

    fn push(&self, kind: EventType, device_id: u32, payload: Vec<u8>) {
        let ns = self.namespace.clone();
        self.with_state(|s| s.enqueue(&ns, RawMessage::new(kind, device_id, payload)));
    }

    fn push_record<T: Record>(&self, kind: EventType, device_id: u32, rec: &T) {
        self.push(kind, device_id, PayloadBuilder::<T>::new().finish(rec));
    }

    /// When set (the default), config requests and policy changes are answered
    /// with the matching event as a real daemon would.
    pub fn set_auto_respond(&self, on: bool) {
        self.with_state(|s| s.auto_respond = on);
    }

    /// Make config requests return request id 0.
    pub fn refuse_requests(&self, on: bool) {
        self.with_state(|s| s.refuse_requests = on);
    }

    /// Make `Channel::open` fail.
    pub fn refuse_open(&self, on: bool) {
        self.with_state(|s| s.refuse_open = on);
    }

    /// Answer every reply-size query with `size` instead of the real size.
    pub fn misreport_reply_size(&self, size: Option<usize>) {
        self.with_state(|s| s.reply_size = size);
    }

    /// While set, reply-size queries block until cleared.
    pub fn hold_queries(&self, on: bool) {
        self.with_state(|s| s.hold_queries = on);
    }

    /// Reply-size queries currently blocked by [`hold_queries`](Self::hold_queries).
    pub fn held_queries(&self) -> usize {
        self.with_state(|s| s.held_queries).unwrap_or_default()
    }

    /// Reply-size queries made on a channel after it was destroyed.
    pub fn calls_after_destroy(&self) -> usize {
        self.with_state(|s| s.calls_after_destroy).unwrap_or_default()
    }

    pub fn set_config(&self, key: &str, value: ConfigValue) {
        self.with_state(|s| s.config.insert(key.to_string(), value));
    }

    pub fn config_value(&self, key: &str) -> Option<ConfigValue> {
        self.with_state(|s| s.config.get(key).cloned()).flatten()
    }

    /// Every `(set, clear)` pair received, oldest first.
    pub fn policy_calls(&self) -> Vec<(u32, u32)> {
        self.with_state(|s| s.policy_calls.clone())
            .unwrap_or_default()
    }

    pub fn channels_created(&self) -> usize {
        self.with_state(|s| s.created).unwrap_or_default()
    }

    pub fn channels_destroyed(&self) -> usize {
        self.with_state(|s| s.destroyed).unwrap_or_default()
    }

    pub fn open_channels(&self) -> usize {
        self.with_state(|s| s.channels.values().filter(|c| c.open).count())
            .unwrap_or_default()
    }

    pub fn pending_messages(&self) -> usize {
        let ns = self.namespace.clone();
        self.with_state(|s| s.queues.get(&ns).map(VecDeque::len).unwrap_or(0))
            .unwrap_or_default()
    }

    pub fn connect(&self) {
        self.push_record(EventType::Connection, 0, &ConnectionRecord { flags: 0 });
    }

    pub fn disconnect(&self) {
        self.push_record(EventType::ConnectionLost, 0, &ConnectionLostRecord { flags: 0 });
    }

    pub fn attach_device(&self, device: MockDevice) {
        let rec = DeviceEventRecord {
            flags: 0,
            handle: device.handle,
            id: device.id,
            status: device.status.bits(),
        };
        self.with_state(|s| s.devices.insert(device.handle, device));
        self.push_record(EventType::Device, rec.id, &rec);
    }

    pub fn detach_device(&self, handle: u32) {
        let id = self
            .with_state(|s| s.devices.remove(&handle).map(|d| d.id))
            .flatten()
            .unwrap_or(handle);
        let rec = DeviceEventRecord {
            flags: 0,
            handle,
            id,
            status: 0,
        };
        self.push_record(EventType::DeviceLost, id, &rec);
    }

    pub fn fail_device(&self, handle: u32, kind: FailureKind) {
        self.with_state(|s| s.devices.remove(&handle));
        let rec = DeviceFailureRecord {
            status: kind.status_code(),
            handle,
        };
        self.push_record(EventType::DeviceFailure, handle, &rec);
    }

    pub fn set_device_status(&self, handle: u32, status: DeviceStatus) {
        self.with_state(|s| {
            if let Some(dev) = s.devices.get_mut(&handle) {
                dev.status = status;
            }
        });
        let rec = DeviceEventRecord {
            flags: 0,
            handle,
            id: handle,
            status: status.bits(),
        };
        self.push_record(EventType::DeviceStatusChange, handle, &rec);
    }

    pub fn push_policy(&self, flags: u32) {
        let rec = PolicyRecord {
            reserved: 0,
            current_policy: flags,
        };
        self.push_record(EventType::Policy, 0, &rec);
    }

    pub fn push_frame(&self, frame_id: i64, timestamp: i64, hands: &[HandRecord]) {
        let header = TrackingHeader {
            frame_id,
            timestamp,
            tracking_frame_id: frame_id,
            framerate: 90.0,
            ..Default::default()
        };
        self.push(EventType::Tracking, 0, frame_payload(&header, hands));
    }

    pub fn push_log(&self, severity: LogSeverity, message: &str) {
        let mut builder = PayloadBuilder::<LogRecord>::new();
        let (message_offset, message_len) = builder.push_str(message);
        let rec = LogRecord {
            severity: severity.raw(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            message_offset,
            message_len,
        };
        self.push(EventType::Log, 0, builder.finish(&rec));
    }

    pub fn respond_config(&self, request_id: u32, value: &ConfigValue) {
        self.push(EventType::ConfigResponse, 0, config_response_payload(request_id, value));
    }

    pub fn confirm_config(&self, request_id: u32, succeeded: bool) {
        let rec = ConfigChangeRecord {
            request_id,
            status: u32::from(succeeded),
        };
        self.push_record(EventType::ConfigChange, 0, &rec);
    }

    pub fn push_dropped_frame(&self, frame_id: i64, kind: DroppedFrameKind) {
        let rec = DroppedFrameRecord {
            frame_id,
            kind: kind.raw(),
        };
        self.push_record(EventType::DroppedFrame, 0, &rec);
    }

    /// Push a stereo image pair of 8-bit grayscale pixels.
    pub fn push_image(&self, frame_id: i64, width: u32, height: u32, left: &[u8], right: &[u8]) {
        let mut builder = PayloadBuilder::<ImageEventRecord>::new();
        let mut images = [ImageRecord::default(); 2];
        for (kind, (slot, pixels)) in images.iter_mut().zip([left, right]).enumerate() {
            let (data_offset, data_len) = builder.push_bytes(pixels);
            *slot = ImageRecord {
                kind: kind as u32,
                format: 0,
                bpp: 1,
                width,
                height,
                data_offset,
                data_len,
            };
        }
        let rec = ImageEventRecord {
            frame_id,
            timestamp: frame_id,
            images,
        };
        self.push(EventType::Image, 0, builder.finish(&rec));
    }

    pub fn push_point_mapping_change(&self, frame_id: i64, timestamp: i64, point_count: u32) {
        let rec = PointMappingChangeRecord {
            frame_id,
            timestamp,
            point_count,
        };
        self.push_record(EventType::PointMappingChange, 0, &rec);
    }

    pub fn push_head_pose(&self, pose: HeadPoseRecord) {
        self.push_record(EventType::HeadPose, 0, &pose);
    }

    /// Push an arbitrary, possibly malformed, message.
    pub fn push_raw(&self, event_type: u32, payload: Vec<u8>) {
        let ns = self.namespace.clone();
        let msg = RawMessage {
            event_type,
            device_id: 0,
            payload,
            received_at: None,
        };
        self.with_state(|s| s.enqueue(&ns, msg));
    }

    /// Frame returned by interpolation queries; its timestamp follows the query.
    pub fn set_interpolated_frame(&self, header: TrackingHeader, hands: Vec<HandRecord>) {
        self.with_state(|s| s.frame = Some((header, hands)));
    }

    pub fn set_head_pose(&self, pose: HeadPoseRecord) {
        self.with_state(|s| s.head_pose = Some(pose));
    }

    pub fn set_point_mapping(&self, points: Vec<(Vector3, u32)>) {
        self.with_state(|s| s.points = points);
    }
}

impl Connector for MockDaemon {
    fn create(&self) -> Result<Arc<dyn Channel>> {
        let id = self
            .with_state(|s| {
                let id = s.next_channel;
                s.next_channel += 1;
                s.created += 1;
                s.channels.insert(
                    id,
                    ChannelState {
                        namespace: None,
                        open: false,
                    },
                );
                id
            })
            .ok_or_else(|| ChannelError::Io("mock daemon state poisoned".into()))?;
        Ok(Arc::new(MockChannel {
            id,
            shared: Arc::clone(&self.shared),
            allocator: Mutex::new(None),
        }))
    }
}

/// Channel handle onto a [`MockDaemon`].
pub struct MockChannel {
    id: u64,
    shared: Arc<Shared>,
    allocator: Mutex<Option<Arc<dyn Allocator>>>,
}

impl MockChannel {
    fn lock(&self) -> Result<MutexGuard<'_, DaemonState>> {
        self.shared
            .state
            .lock()
            .map_err(|_| ChannelError::Io("mock daemon state poisoned".into()))
    }

    fn fill(payload: &[u8], buf: &mut [u8]) -> Result<()> {
        let dst = buf
            .get_mut(..payload.len())
            .ok_or(ChannelError::InsufficientBuffer {
                required: payload.len(),
            })?;
        dst.copy_from_slice(payload);
        Ok(())
    }

    /// Entry point of every reply-size query. Returns the misreported size, if any.
    fn enter_query(&self) -> Result<Option<usize>> {
        let mut state = self.lock()?;
        if state.hold_queries {
            state.held_queries += 1;
            while state.hold_queries {
                state = self
                    .shared
                    .ready
                    .wait(state)
                    .map_err(|_| ChannelError::Io("mock daemon state poisoned".into()))?;
            }
            state.held_queries -= 1;
        }
        if !state.channels.contains_key(&self.id) {
            state.calls_after_destroy += 1;
        }
        Ok(state.reply_size)
    }

    fn interpolated_payload(&self, time: i64) -> Result<Vec<u8>> {
        let state = self.lock()?;
        state.open_namespace(self.id)?;
        let (header, hands) = state
            .frame
            .as_ref()
            .ok_or(ChannelError::NotAvailable("no frame to interpolate"))?;
        let header = TrackingHeader {
            timestamp: time,
            ..*header
        };
        Ok(frame_payload(&header, hands))
    }

    fn point_mapping_payload(&self) -> Result<Vec<u8>> {
        let state = self.lock()?;
        state.open_namespace(self.id)?;
        let points: Vec<Vector3> = state.points.iter().map(|(p, _)| *p).collect();
        let ids: Vec<u32> = state.points.iter().map(|(_, id)| *id).collect();
        let mut builder = PayloadBuilder::<PointMappingRecord>::new();
        let points_offset = builder.push_records(&points);
        let ids_offset = builder.push_records(&ids);
        Ok(builder.finish(&PointMappingRecord {
            frame_id: 0,
            timestamp: 0,
            point_count: points.len() as u32,
            points_offset,
            ids_offset,
        }))
    }

    fn device_info_payload(&self, device: OpenDevice) -> Result<Vec<u8>> {
        let state = self.lock()?;
        let dev = state.device_for(device)?;
        let mut builder = PayloadBuilder::<DeviceInfoRecord>::new();
        let (serial_offset, serial_len) = builder.push_str(&dev.serial);
        Ok(builder.finish(&DeviceInfoRecord {
            status: dev.status.bits(),
            caps: 0,
            pid: dev.device_type.pid(),
            baseline: dev.baseline,
            serial_offset,
            serial_len,
            h_fov: dev.h_fov,
            v_fov: dev.v_fov,
            range: dev.range,
        }))
    }
}

impl Channel for MockChannel {
    fn open(&self, namespace: Option<&str>) -> Result<()> {
        let mut state = self.lock()?;
        if state.refuse_open {
            return Err(ChannelError::Refused("mock daemon refused connection".into()));
        }
        let slot = state
            .channels
            .get_mut(&self.id)
            .ok_or(ChannelError::NotConnected)?;
        slot.namespace = namespace.map(str::to_string);
        slot.open = true;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut state) = self.lock() {
            if let Some(slot) = state.channels.get_mut(&self.id) {
                slot.open = false;
            }
        }
        self.shared.ready.notify_all();
    }

    fn destroy(&self) {
        if let Ok(mut state) = self.lock() {
            if state.channels.remove(&self.id).is_some() {
                state.destroyed += 1;
            }
        }
        self.shared.ready.notify_all();
    }

    fn set_allocator(&self, allocator: Option<Arc<dyn Allocator>>) {
        if let Ok(mut slot) = self.allocator.lock() {
            *slot = allocator;
        }
    }

    fn poll(&self, timeout: Duration) -> Result<RawMessage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        let mut msg = loop {
            let ns = state.open_namespace(self.id)?;
            if let Some(msg) = state.queues.get_mut(&ns).and_then(VecDeque::pop_front) {
                break msg;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout);
            }
            state = self
                .shared
                .ready
                .wait_timeout(state, remaining)
                .map_err(|_| ChannelError::Io("mock daemon state poisoned".into()))?
                .0;
        };
        drop(state);

        msg.received_at = Some(OffsetDateTime::now_utc());
        let allocator = self.allocator.lock().ok().and_then(|a| a.clone());
        if let Some(allocator) = allocator {
            let mut buf = allocator.allocate(msg.payload.len());
            buf.clear();
            buf.extend_from_slice(&msg.payload);
            msg.payload = buf;
        }
        Ok(msg)
    }

    fn set_policy_flags(&self, set: u32, clear: u32) -> Result<()> {
        let mut state = self.lock()?;
        let ns = state.open_namespace(self.id)?;
        state.policy_calls.push((set, clear));
        if state.auto_respond {
            let rec = PolicyRecord {
                reserved: 0,
                current_policy: set & !clear,
            };
            let payload = PayloadBuilder::<PolicyRecord>::new().finish(&rec);
            state.enqueue(&ns, RawMessage::new(EventType::Policy, 0, payload));
            self.shared.ready.notify_all();
        }
        Ok(())
    }

    fn request_config_value(&self, key: &str) -> Result<u32> {
        let mut state = self.lock()?;
        let ns = state.open_namespace(self.id)?;
        if state.refuse_requests {
            return Ok(0);
        }
        let request_id = state.issue_request_id();
        if state.auto_respond {
            if let Some(value) = state.config.get(key).cloned() {
                let payload = config_response_payload(request_id, &value);
                state.enqueue(&ns, RawMessage::new(EventType::ConfigResponse, 0, payload));
                self.shared.ready.notify_all();
            }
        }
        Ok(request_id)
    }

    fn save_config_value(&self, key: &str, value: &ConfigValue) -> Result<u32> {
        let mut state = self.lock()?;
        let ns = state.open_namespace(self.id)?;
        if state.refuse_requests {
            return Ok(0);
        }
        let request_id = state.issue_request_id();
        state.config.insert(key.to_string(), value.clone());
        if state.auto_respond {
            let rec = ConfigChangeRecord {
                request_id,
                status: 1,
            };
            let payload = PayloadBuilder::<ConfigChangeRecord>::new().finish(&rec);
            state.enqueue(&ns, RawMessage::new(EventType::ConfigChange, 0, payload));
            self.shared.ready.notify_all();
        }
        Ok(request_id)
    }

    fn open_device(&self, handle: u32) -> Result<OpenDevice> {
        let state = self.lock()?;
        state.open_namespace(self.id)?;
        match state.devices.get(&handle) {
            Some(dev) if !dev.refuse_open => Ok(OpenDevice(handle + OPEN_HANDLE_BASE)),
            _ => Err(ChannelError::DeviceNotFound(handle)),
        }
    }

    fn close_device(&self, _device: OpenDevice) {}

    fn device_info_size(&self, device: OpenDevice) -> Result<usize> {
        if let Some(size) = self.enter_query()? {
            return Ok(size);
        }
        Ok(self.device_info_payload(device)?.len())
    }

    fn device_info(&self, device: OpenDevice, buf: &mut [u8]) -> Result<()> {
        let payload = self.device_info_payload(device)?;
        Self::fill(&payload, buf)
    }

    fn frame_size(&self, time: i64) -> Result<usize> {
        if let Some(size) = self.enter_query()? {
            return Ok(size);
        }
        Ok(self.interpolated_payload(time)?.len())
    }

    fn interpolate_frame(&self, time: i64, buf: &mut [u8]) -> Result<()> {
        let payload = self.interpolated_payload(time)?;
        Self::fill(&payload, buf)
    }

    fn interpolate_frame_from_time(
        &self,
        time: i64,
        _source_time: i64,
        buf: &mut [u8],
    ) -> Result<()> {
        self.interpolate_frame(time, buf)
    }

    fn interpolate_head_pose(&self, time: i64, buf: &mut [u8]) -> Result<()> {
        let pose = {
            let state = self.lock()?;
            state.open_namespace(self.id)?;
            state
                .head_pose
                .ok_or(ChannelError::NotAvailable("no head pose"))?
        };
        let payload = PayloadBuilder::<HeadPoseRecord>::new().finish(&HeadPoseRecord {
            timestamp: time,
            ..pose
        });
        Self::fill(&payload, buf)
    }

    fn point_mapping_size(&self) -> Result<usize> {
        if let Some(size) = self.enter_query()? {
            return Ok(size);
        }
        Ok(self.point_mapping_payload()?.len())
    }

    fn point_mapping(&self, buf: &mut [u8]) -> Result<()> {
        let payload = self.point_mapping_payload()?;
        Self::fill(&payload, buf)
    }

    fn pixel_to_rectilinear(&self, camera: Camera, pixel: Vector3) -> Result<Vector3> {
        self.lock()?.open_namespace(self.id)?;
        let (cx, cy) = principal_point(camera);
        Ok(Vector3::new(
            (pixel.x - cx) / FOCAL_PX,
            (pixel.y - cy) / FOCAL_PX,
            1.0,
        ))
    }

    fn rectilinear_to_pixel(&self, camera: Camera, ray: Vector3) -> Result<Vector3> {
        self.lock()?.open_namespace(self.id)?;
        let (cx, cy) = principal_point(camera);
        Ok(Vector3::new(ray.x * FOCAL_PX + cx, ray.y * FOCAL_PX + cy, 0.0))
    }
}

fn principal_point(camera: Camera) -> (f32, f32) {
    match camera {
        Camera::Left => (320.0, 240.0),
        Camera::Right => (316.0, 240.0),
    }
}

fn frame_payload(header: &TrackingHeader, hands: &[HandRecord]) -> Vec<u8> {
    let mut builder = PayloadBuilder::<TrackingHeader>::new();
    let hands_offset = builder.push_records(hands);
    builder.finish(&TrackingHeader {
        hand_count: hands.len() as u32,
        hands_offset,
        ..*header
    })
}

fn config_response_payload(request_id: u32, value: &ConfigValue) -> Vec<u8> {
    let mut builder = PayloadBuilder::<ConfigResponseRecord>::new();
    let value = variant_for(value, &mut builder);
    builder.finish(&ConfigResponseRecord { request_id, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tracking_wire::decode;

    fn open_channel(daemon: &MockDaemon, ns: Option<&str>) -> Arc<dyn Channel> {
        let channel = daemon.create().unwrap();
        channel.open(ns).unwrap();
        channel
    }

    #[test]
    fn test_poll_times_out_when_idle() {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        let err = channel.poll(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, ChannelError::Timeout);
        assert!(err.is_transient());
    }

    #[test]
    fn test_close_unblocks_poll() {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        let poller = Arc::clone(&channel);
        let started = Instant::now();
        let handle = thread::spawn(move || poller.poll(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        channel.close();
        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), ChannelError::NotConnected);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_messages_are_namespaced() {
        let daemon = MockDaemon::new();
        let default_ns = open_channel(&daemon, None);
        let alt = open_channel(&daemon, Some("alt"));
        daemon.namespace(Some("alt")).connect();

        let msg = alt.poll(Duration::from_millis(50)).unwrap();
        assert_eq!(msg.kind().unwrap(), EventType::Connection);
        assert!(msg.received_at.is_some());
        assert_eq!(
            default_ns.poll(Duration::from_millis(10)).unwrap_err(),
            ChannelError::Timeout
        );
    }

    #[test]
    fn test_request_ids_and_refusal() -> anyhow::Result<()> {
        let daemon = MockDaemon::new();
        daemon.set_auto_respond(false);
        let channel = open_channel(&daemon, None);
        assert_eq!(channel.request_config_value("a")?, 1);
        assert_eq!(channel.save_config_value("b", &ConfigValue::Bool(true))?, 2);
        daemon.refuse_requests(true);
        assert_eq!(channel.request_config_value("a")?, 0);
        assert_eq!(daemon.config_value("b"), Some(ConfigValue::Bool(true)));
        Ok(())
    }

    #[test]
    fn test_device_info_needs_two_round_trips() -> anyhow::Result<()> {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        daemon.attach_device(MockDevice::new(7, "LP2-0042"));

        let device = channel.open_device(7)?;
        let size = channel.device_info_size(device)?;
        assert_eq!(size, DeviceInfoRecord::SIZE + "LP2-0042".len());

        let mut short = vec![0u8; DeviceInfoRecord::SIZE];
        assert_eq!(
            channel.device_info(device, &mut short).unwrap_err(),
            ChannelError::InsufficientBuffer { required: size }
        );

        let mut buf = vec![0u8; size];
        channel.device_info(device, &mut buf)?;
        let info: DeviceInfoRecord = decode(&buf, 0)?;
        assert_eq!(info.serial_len, 8);
        assert_eq!(info.pid, DeviceType::Gen2.pid());
        Ok(())
    }

    #[test]
    fn test_allocator_backs_polled_payloads() {
        struct Counting(Mutex<usize>);
        impl Allocator for Counting {
            fn allocate(&self, size: usize) -> Vec<u8> {
                *self.0.lock().unwrap() += 1;
                vec![0; size]
            }
            fn deallocate(&self, _buf: Vec<u8>) {}
        }

        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        let counting = Arc::new(Counting(Mutex::new(0)));
        channel.set_allocator(Some(counting.clone() as Arc<dyn Allocator>));
        daemon.push_frame(1, 100, &[HandRecord::default()]);

        let msg = channel.poll(Duration::from_millis(50)).unwrap();
        assert_eq!(*counting.0.lock().unwrap(), 1);
        let header: TrackingHeader = decode(&msg.payload, 0).unwrap();
        assert_eq!(header.hand_count, 1);
    }

    #[test]
    fn test_destroy_counts_once() {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        channel.close();
        channel.destroy();
        channel.destroy();
        assert_eq!(daemon.channels_created(), 1);
        assert_eq!(daemon.channels_destroyed(), 1);
    }

    #[test]
    fn test_misreported_reply_size() -> anyhow::Result<()> {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        daemon.attach_device(MockDevice::new(2, "LP0002"));
        daemon.set_point_mapping(vec![(Vector3::new(1.0, 1.0, 1.0), 1)]);
        daemon.misreport_reply_size(Some(usize::MAX));

        let device = channel.open_device(2)?;
        assert_eq!(channel.device_info_size(device)?, usize::MAX);
        assert_eq!(channel.point_mapping_size()?, usize::MAX);
        assert_eq!(channel.frame_size(0)?, usize::MAX);

        daemon.misreport_reply_size(None);
        assert_eq!(channel.device_info_size(device)?, DeviceInfoRecord::SIZE + 6);
        Ok(())
    }

    #[test]
    fn test_held_query_resumes_and_reports_destroyed_channel() {
        let daemon = MockDaemon::new();
        let channel = open_channel(&daemon, None);
        daemon.hold_queries(true);

        let querier = Arc::clone(&channel);
        let handle = thread::spawn(move || querier.frame_size(0));
        let deadline = Instant::now() + Duration::from_secs(5);
        while daemon.held_queries() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(daemon.held_queries(), 1);

        channel.close();
        channel.destroy();
        daemon.hold_queries(false);
        assert!(handle.join().unwrap().is_err());
        assert_eq!(daemon.held_queries(), 0);
        assert_eq!(daemon.calls_after_destroy(), 1);
    }
}
