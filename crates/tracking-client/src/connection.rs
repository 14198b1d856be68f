use crate::config::ConnectionConfig;
use crate::devices::DeviceRegistry;
use crate::events::{Dispatcher, Event, Observer};
use crate::frame_history::FrameHistory;
use crate::handle::ChannelHandle;
use crate::inbound::{self, Inbound};
use crate::metrics::ConnectionMetrics;
use crate::pool::BufferPool;
use crate::result_log::ResultLog;
use crate::transactions::{ConfigSink, TransactionTable};
use crate::types::{
    ConfigOutcome, ConnectionKey, Device, DeviceFailure, HeadPose, LogEntry, PointMapping,
    TrackingFrame, Transform,
};
use crate::{ClientError, Result};

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracking_channel::{Allocator, Channel, Connector, OpenDevice, RawMessage};
use tracking_wire::{
    decode, decode_str, record_size, Camera, ConfigValue, DeviceEventRecord,
    DeviceFailureRecord, DeviceInfoRecord, DeviceStatus, FailureKind, HeadPoseRecord,
    LogSeverity, PolicyFlags, Vector3,
};

/// State shared between a connection and its poll thread.
struct Shared {
    label: String,
    running: AtomicBool,
    connected: AtomicBool,
    frames: FrameHistory,
    devices: Mutex<DeviceRegistry>,
    failed_devices: Mutex<Vec<DeviceFailure>>,
    transactions: Mutex<TransactionTable>,
    requested_policy: AtomicU32,
    active_policy: AtomicU32,
    results: Mutex<ResultLog>,
    dispatcher: Dispatcher,
    pool: Arc<BufferPool>,
    metrics: ConnectionMetrics,
}

/// A client connection to the tracking daemon.
///
/// `start` opens a channel and spawns a poll thread that decodes every message,
/// updates the frame history, device registry and config transactions, then
/// dispatches an [`Event`] to observers. Queries run synchronously on the
/// calling thread against the same channel.
pub struct Connection {
    key: ConnectionKey,
    config: ConnectionConfig,
    default_policy: PolicyFlags,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    handle: Mutex<Option<Arc<ChannelHandle>>>,
    // Also serializes start and stop
    worker: Mutex<Option<JoinHandle<()>>>,
    send_lock: Mutex<()>,
}

impl Connection {
    pub fn new(
        key: ConnectionKey,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let label = key.to_string();
        let default_policy = config.default_policy_flags()?;
        let shared = Shared {
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            frames: FrameHistory::new(config.frame_history_capacity),
            devices: Mutex::new(DeviceRegistry::default()),
            failed_devices: Mutex::new(Vec::new()),
            transactions: Mutex::new(TransactionTable::default()),
            requested_policy: AtomicU32::new(0),
            active_policy: AtomicU32::new(0),
            results: Mutex::new(ResultLog::new(config.repeat_log_interval)),
            dispatcher: Dispatcher::default(),
            pool: Arc::new(BufferPool::new(config.pool_max_idle, config.max_reply_bytes)),
            metrics: ConnectionMetrics::new(&label)?,
            label,
        };
        Ok(Self {
            key,
            config,
            default_policy,
            connector,
            shared: Arc::new(shared),
            handle: Mutex::new(None),
            worker: Mutex::new(None),
            send_lock: Mutex::new(()),
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the channel and start polling. Does nothing when already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| ClientError::Poisoned("worker"))?;
        if self.shared.running.load(Ordering::Acquire) {
            debug!(connection = %self.key, "already running");
            return Ok(());
        }
        // A poll loop that died on a fatal error leaves its channel behind
        self.shutdown(&mut worker);

        let channel = self.connector.create().map_err(|e| {
            self.shared.note_failure("create connection", &e, false);
            e
        })?;
        let handle = Arc::new(ChannelHandle::new(channel));
        if let Err(e) = handle.channel().open(self.key.namespace.as_deref()) {
            self.shared.note_failure("open connection", &e, false);
            return Err(e.into());
        }
        handle
            .channel()
            .set_allocator(Some(Arc::clone(&self.shared.pool) as Arc<dyn Allocator>));

        *self.handle_slot() = Some(Arc::clone(&handle));
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let poll_handle = Arc::clone(&handle);
        let timeout = self.config.poll_timeout();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.worker_name_prefix, self.key))
            .spawn(move || shared.run(&poll_handle, timeout));
        match spawned {
            Ok(join) => *worker = Some(join),
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.handle_slot().take();
                handle.close();
                return Err(ClientError::Worker(e.to_string()));
            }
        }
        info!(connection = %self.key, "connection started");

        self.shared
            .requested_policy
            .fetch_or(self.default_policy.bits(), Ordering::AcqRel);
        if !self.requested_policy().is_empty() {
            if let Err(e) = self.send_policy() {
                warn!(connection = %self.key, error = %e, "could not apply requested policy");
            }
        }
        Ok(())
    }

    /// Stop polling, release the channel and abandon pending config requests.
    /// Does nothing when not running.
    pub fn stop(&self) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.shared.running.load(Ordering::Acquire) && worker.is_none() {
            return;
        }
        self.shutdown(&mut worker);
        info!(connection = %self.key, "connection stopped");
    }

    /// The channel is destroyed once the poll thread and any in-flight query
    /// have dropped their handle clones.
    fn shutdown(&self, worker: &mut Option<JoinHandle<()>>) {
        self.shared.running.store(false, Ordering::Release);
        let handle = self.handle_slot().take();
        if let Some(handle) = &handle {
            // Unblocks the pending poll
            handle.close();
        }
        if let Some(join) = worker.take() {
            if join.thread().id() == thread::current().id() {
                warn!(connection = %self.key, "stop called from the poll thread, not joining");
            } else if join.join().is_err() {
                error!(connection = %self.key, "poll thread panicked");
            }
        }
        drop(handle);

        self.shared.connected.store(false, Ordering::Release);
        self.shared.active_policy.store(0, Ordering::Release);
        {
            let mut devices = self
                .shared
                .devices
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            devices.clear();
        }
        self.shared.metrics.devices_attached.set(0);

        let abandoned = self
            .shared
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        self.shared.metrics.pending_transactions.set(0);
        for pending in abandoned {
            debug!(
                connection = %self.key,
                request_id = pending.request_id,
                key = %pending.key,
                "abandoning config request"
            );
            pending.complete(ConfigOutcome::Abandoned);
        }
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<Arc<ChannelHandle>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> Result<Arc<ChannelHandle>> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(ClientError::NotRunning);
        }
        self.handle_slot().clone().ok_or(ClientError::NotRunning)
    }

    fn with_channel<T>(&self, f: impl FnOnce(&dyn Channel) -> Result<T>) -> Result<T> {
        let handle = self.channel()?;
        f(handle.channel())
    }

    /// Query results degrade to a default value; the failure is logged.
    fn report<T: Default>(&self, context: &str, result: Result<T>) -> T {
        match result {
            Ok(value) => {
                self.shared.note_success();
                value
            }
            Err(e) => {
                let transient = matches!(&e, ClientError::Channel(c) if c.is_transient());
                self.shared.note_failure(context, &e, transient);
                T::default()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the daemon reported the service as connected.
    pub fn is_service_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether a poll thread exists and has not exited.
    pub fn worker_active(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().is_some_and(|join| !join.is_finished()))
            .unwrap_or(false)
    }

    /// Runs on the poll thread for every event, in arrival order.
    ///
    /// A panicking observer stops the poll loop.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        self.shared.dispatcher.add_observer(observer);
    }

    /// Every event from now on, in arrival order.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.shared.dispatcher.subscribe()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.shared.metrics
    }

    pub fn devices(&self) -> Vec<Device> {
        self.shared
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .list()
    }

    pub fn failed_devices(&self) -> Vec<DeviceFailure> {
        self.shared
            .failed_devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Retained frames, oldest first.
    pub fn frame_history(&self) -> Vec<TrackingFrame> {
        self.shared.frames.snapshot()
    }

    pub fn latest_frame(&self) -> Option<TrackingFrame> {
        self.shared.frames.latest()
    }

    pub fn frame(&self, frame_id: i64) -> Option<TrackingFrame> {
        self.shared.frames.get(frame_id)
    }

    /// Newest retained frame not after `timestamp`.
    pub fn frame_at(&self, timestamp: i64) -> Option<TrackingFrame> {
        self.shared.frames.at_or_before(timestamp)
    }

    pub fn pending_transactions(&self) -> usize {
        self.shared
            .transactions
            .lock()
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn buffers_outstanding(&self) -> usize {
        self.shared.pool.outstanding()
    }

    // ---- policy ----

    /// Add `policy` to the requested set and send the full set to the daemon.
    ///
    /// The request is kept when the send fails and is re-sent on the next start.
    pub fn set_policy(&self, policy: PolicyFlags) -> Result<()> {
        self.shared
            .requested_policy
            .fetch_or(policy.bits(), Ordering::AcqRel);
        self.send_policy()
    }

    pub fn clear_policy(&self, policy: PolicyFlags) -> Result<()> {
        self.shared
            .requested_policy
            .fetch_and(!policy.bits(), Ordering::AcqRel);
        self.send_policy()
    }

    /// Whether the daemon last reported `policy` as active.
    pub fn is_policy_set(&self, policy: PolicyFlags) -> bool {
        self.active_policy().contains(policy)
    }

    pub fn requested_policy(&self) -> PolicyFlags {
        PolicyFlags::from_bits_retain(self.shared.requested_policy.load(Ordering::Acquire))
    }

    pub fn active_policy(&self) -> PolicyFlags {
        PolicyFlags::from_bits_retain(self.shared.active_policy.load(Ordering::Acquire))
    }

    fn send_policy(&self) -> Result<()> {
        let handle = self.channel()?;
        let _send = self
            .send_lock
            .lock()
            .map_err(|_| ClientError::Poisoned("send"))?;
        let requested = self.requested_policy();
        let result = handle
            .channel()
            .set_policy_flags(requested.bits(), !requested.bits());
        self.shared.note_channel_result("set policy flags", &result);
        debug!(connection = %self.key, policy = ?requested, "policy requested");
        result.map_err(Into::into)
    }

    // ---- configuration ----

    /// Ask the daemon for a config value. The reply arrives as
    /// [`Event::ConfigResponse`]; returns the request id.
    pub fn get_config_value(&self, key: &str) -> Result<u32> {
        self.request_config(key, None)
    }

    /// Like [`get_config_value`](Self::get_config_value), also running `on_done`
    /// exactly once with the outcome.
    pub fn get_config_value_with<F>(&self, key: &str, on_done: F) -> Result<u32>
    where
        F: FnOnce(ConfigOutcome) + Send + 'static,
    {
        self.request_config(key, Some(Box::new(on_done)))
    }

    pub fn set_config_value(&self, key: &str, value: impl Into<ConfigValue>) -> Result<u32> {
        self.save_config(key, value.into(), None)
    }

    pub fn set_config_value_with<F>(
        &self,
        key: &str,
        value: impl Into<ConfigValue>,
        on_done: F,
    ) -> Result<u32>
    where
        F: FnOnce(ConfigOutcome) + Send + 'static,
    {
        self.save_config(key, value.into(), Some(Box::new(on_done)))
    }

    /// Set a value given as JSON: a bool, an integer that fits 32 bits, a float
    /// or a string.
    pub fn set_config_json(&self, key: &str, value: &serde_json::Value) -> Result<u32> {
        let value = config_value_from_json(key, value)?;
        self.set_config_value(key, value)
    }

    fn request_config(&self, key: &str, sink: Option<ConfigSink>) -> Result<u32> {
        self.send_tracked("request config value", key, sink, |channel| {
            channel.request_config_value(key)
        })
    }

    fn save_config(&self, key: &str, value: ConfigValue, sink: Option<ConfigSink>) -> Result<u32> {
        self.send_tracked("save config value", key, sink, |channel| {
            channel.save_config_value(key, &value)
        })
    }

    fn send_tracked(
        &self,
        context: &str,
        key: &str,
        sink: Option<ConfigSink>,
        send: impl FnOnce(&dyn Channel) -> tracking_channel::Result<u32>,
    ) -> Result<u32> {
        let handle = self.channel()?;
        let _send = self
            .send_lock
            .lock()
            .map_err(|_| ClientError::Poisoned("send"))?;
        // Held across the send so the poll thread cannot see the reply before the entry
        let mut table = self.shared.transactions()?;
        let result = send(handle.channel());
        self.shared.note_channel_result(context, &result);
        let request_id = result?;
        if request_id == 0 {
            debug!(connection = %self.key, key, "config request refused");
            return Err(ClientError::Rejected(key.to_string()));
        }
        let displaced = table.insert(request_id, key, sink);
        self.shared
            .metrics
            .pending_transactions
            .set(table.len() as i64);
        drop(table);

        if let Some(old) = displaced {
            warn!(connection = %self.key, request_id, key = %old.key, "request id reused");
            old.complete(ConfigOutcome::Abandoned);
        }
        debug!(connection = %self.key, request_id, key, "config request sent");
        Ok(request_id)
    }

    // ---- synchronous queries ----

    /// The frame interpolated at `time` (daemon clock, microseconds), or an
    /// empty frame when unavailable.
    pub fn interpolated_frame(&self, time: i64) -> TrackingFrame {
        let result = self.with_channel(|channel| {
            let size = channel.frame_size(time)?;
            let mut buf = self.shared.pool.acquire(size)?;
            channel.interpolate_frame(time, &mut buf)?;
            Ok(inbound::decode_frame(&buf)?)
        });
        self.report("interpolate frame", result)
    }

    /// Interpolate at `time`, blending hand poses from `source_time`.
    pub fn interpolated_frame_from_time(&self, time: i64, source_time: i64) -> TrackingFrame {
        let result = self.with_channel(|channel| {
            let size = channel.frame_size(time)?;
            let mut buf = self.shared.pool.acquire(size)?;
            channel.interpolate_frame_from_time(time, source_time, &mut buf)?;
            Ok(inbound::decode_frame(&buf)?)
        });
        self.report("interpolate frame from time", result)
    }

    pub fn interpolated_head_pose(&self, time: i64) -> HeadPose {
        let result = self.with_channel(|channel| {
            let mut buf = self.shared.pool.acquire(record_size::<HeadPoseRecord>())?;
            channel.interpolate_head_pose(time, &mut buf)?;
            Ok(inbound::decode_head_pose(&buf)?)
        });
        self.report("interpolate head pose", result)
    }

    /// Palm transforms of two hands in the frame interpolated at `time` from
    /// `source_time`. A hand missing from the frame yields the identity.
    pub fn interpolated_left_right_transform(
        &self,
        time: i64,
        source_time: i64,
        left_id: u32,
        right_id: u32,
    ) -> (Transform, Transform) {
        let frame = self.interpolated_frame_from_time(time, source_time);
        let transform = |id| frame.hand(id).map(Transform::from_palm).unwrap_or_default();
        (transform(left_id), transform(right_id))
    }

    pub fn point_mapping(&self) -> PointMapping {
        let result = self.with_channel(|channel| {
            let size = channel.point_mapping_size()?;
            let mut buf = self.shared.pool.acquire(size)?;
            channel.point_mapping(&mut buf)?;
            Ok(inbound::decode_point_mapping(&buf)?)
        });
        self.report("point mapping", result)
    }

    pub fn pixel_to_rectilinear(&self, camera: Camera, pixel: Vector3) -> Vector3 {
        let result = self.with_channel(|channel| Ok(channel.pixel_to_rectilinear(camera, pixel)?));
        self.report("pixel to rectilinear", result)
    }

    pub fn rectilinear_to_pixel(&self, camera: Camera, ray: Vector3) -> Vector3 {
        let result = self.with_channel(|channel| Ok(channel.rectilinear_to_pixel(camera, ray)?));
        self.report("rectilinear to pixel", result)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.running.load(Ordering::Acquire) || worker.is_some() {
            self.shutdown(&mut worker);
            debug!(connection = %self.key, "connection dropped while running");
        }
    }
}

fn config_value_from_json(key: &str, value: &serde_json::Value) -> Result<ConfigValue> {
    use serde_json::Value;
    match value {
        Value::Bool(b) => Ok(ConfigValue::Bool(*b)),
        Value::String(s) => Ok(ConfigValue::Text(s.clone())),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| ConfigValue::Float(f as f32))
            .ok_or_else(|| ClientError::InvalidArgument(format!("{key}: {n}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(ConfigValue::Int)
            .ok_or_else(|| {
                ClientError::InvalidArgument(format!("{key}: {n} does not fit a 32-bit integer"))
            }),
        other => Err(ClientError::InvalidArgument(format!(
            "{key}: unsupported config value {other}"
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Shared {
    fn devices(&self) -> Result<MutexGuard<'_, DeviceRegistry>> {
        self.devices
            .lock()
            .map_err(|_| ClientError::Poisoned("device registry"))
    }

    fn transactions(&self) -> Result<MutexGuard<'_, TransactionTable>> {
        self.transactions
            .lock()
            .map_err(|_| ClientError::Poisoned("transaction table"))
    }

    fn note_failure(&self, context: &str, err: &dyn Display, transient: bool) {
        if let Ok(mut log) = self.results.lock() {
            log.failure(&self.label, context, err, transient);
        }
    }

    fn note_success(&self) {
        if let Ok(mut log) = self.results.lock() {
            log.success();
        }
    }

    fn note_channel_result<T>(&self, context: &str, result: &tracking_channel::Result<T>) {
        match result {
            Ok(_) => self.note_success(),
            Err(e) => self.note_failure(context, e, e.is_transient()),
        }
    }

    /// The poll loop. Exits when `running` drops or a handler fails.
    fn run(&self, handle: &ChannelHandle, timeout: Duration) {
        debug!(connection = %self.label, "poll loop started");
        while self.running.load(Ordering::Acquire) {
            let message = match handle.channel().poll(timeout) {
                Ok(message) => message,
                Err(e) => {
                    self.metrics.poll_failures.inc();
                    self.note_failure("poll", &e, e.is_transient());
                    if !e.is_transient() && self.running.load(Ordering::Acquire) {
                        thread::sleep(timeout);
                    }
                    continue;
                }
            };
            self.metrics.messages_received.inc();

            let handled = panic::catch_unwind(AssertUnwindSafe(|| {
                self.handle_message(handle.channel(), message)
            }));
            match handled {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        connection = %self.label,
                        error = %e,
                        "event handling failed, stopping poll loop"
                    );
                    break;
                }
                Err(payload) => {
                    error!(
                        connection = %self.label,
                        panic = panic_message(payload.as_ref()),
                        "event handler panicked, stopping poll loop"
                    );
                    break;
                }
            }
        }
        self.running.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        debug!(connection = %self.label, "poll loop exited");
    }

    fn handle_message(&self, channel: &dyn Channel, message: RawMessage) -> Result<()> {
        let event_type = message.event_type;
        let decoded = message.kind().and_then(|kind| {
            inbound::decode_message(kind, &message.payload, message.received_at)
        });
        // Decoded values own their data, so the payload can go back right away
        self.pool.deallocate(message.into_payload());

        match decoded {
            Ok(inbound) => self.route(channel, inbound),
            Err(e) => {
                self.metrics.decode_failures.inc();
                warn!(
                    connection = %self.label,
                    event_type,
                    error = %e,
                    "dropping undecodable message"
                );
                Ok(())
            }
        }
    }

    fn route(&self, channel: &dyn Channel, inbound: Inbound) -> Result<()> {
        match inbound {
            Inbound::None => {}
            Inbound::Connection(_) => {
                self.connected.store(true, Ordering::Release);
                info!(connection = %self.label, "service connected");
                self.dispatcher.dispatch(Event::ConnectionEstablished);
            }
            Inbound::ConnectionLost(_) => {
                self.connected.store(false, Ordering::Release);
                warn!(connection = %self.label, "service connection lost");
                self.dispatcher.dispatch(Event::ConnectionLost);
            }
            Inbound::Device(rec) => self.attach_device(channel, rec)?,
            Inbound::DeviceLost(rec) => self.lose_device(channel, rec)?,
            Inbound::DeviceFailure(rec) => self.fail_device(channel, rec)?,
            Inbound::DeviceStatusChange(rec) => {
                let status = DeviceStatus::from_bits_retain(rec.status);
                let updated = self.devices()?.update_status(rec.handle, status);
                if let Some((device, previous)) = updated {
                    debug!(
                        connection = %self.label,
                        handle = rec.handle,
                        ?previous,
                        ?status,
                        "device status changed"
                    );
                    self.dispatcher.dispatch(Event::DeviceStatusChanged { device, previous });
                }
            }
            Inbound::Policy(rec) => {
                let current = PolicyFlags::from_bits_retain(rec.current_policy);
                let previous = PolicyFlags::from_bits_retain(
                    self.active_policy.swap(current.bits(), Ordering::AcqRel),
                );
                debug!(connection = %self.label, ?previous, ?current, "policy changed");
                self.dispatcher.dispatch(Event::PolicyChanged { previous, current });
            }
            Inbound::Tracking(frame) => {
                self.metrics.frames_received.inc();
                self.frames.push(frame.clone());
                self.dispatcher.dispatch(Event::Frame(frame));
            }
            Inbound::Log(entry) => {
                self.forward_log(&entry);
                self.dispatcher.dispatch(Event::Log(entry));
            }
            Inbound::ConfigChange(rec) => {
                let succeeded = rec.status != 0;
                let key = self.complete(rec.request_id, ConfigOutcome::Changed(succeeded))?;
                self.dispatcher.dispatch(Event::ConfigChanged {
                    request_id: rec.request_id,
                    key,
                    succeeded,
                });
            }
            Inbound::ConfigResponse { request_id, value } => {
                let key = self.complete(request_id, ConfigOutcome::Value(value.clone()))?;
                self.dispatcher.dispatch(Event::ConfigResponse {
                    request_id,
                    key,
                    value,
                });
            }
            Inbound::DroppedFrame(dropped) => {
                self.metrics.frames_dropped.inc();
                debug!(
                    connection = %self.label,
                    frame_id = dropped.frame_id,
                    kind = ?dropped.kind,
                    "frame dropped"
                );
                self.dispatcher.dispatch(Event::DroppedFrame(dropped));
            }
            Inbound::Image(images) => self.dispatcher.dispatch(Event::Image(images)),
            Inbound::PointMappingChange(change) => {
                self.dispatcher.dispatch(Event::PointMappingChanged(change))
            }
            Inbound::HeadPose(pose) => self.dispatcher.dispatch(Event::HeadPose(pose)),
        }
        Ok(())
    }

    fn forward_log(&self, entry: &LogEntry) {
        let connection = self.label.as_str();
        let daemon_ts = entry.timestamp;
        let message = entry.message.as_str();
        match entry.severity {
            LogSeverity::Critical => error!(connection, daemon_ts, "daemon: {message}"),
            LogSeverity::Warning => warn!(connection, daemon_ts, "daemon: {message}"),
            LogSeverity::Information => info!(connection, daemon_ts, "daemon: {message}"),
            LogSeverity::Unknown => debug!(connection, daemon_ts, "daemon: {message}"),
        }
    }

    /// Completes a pending config request. `None` when the id was not pending.
    fn complete(&self, request_id: u32, outcome: ConfigOutcome) -> Result<Option<String>> {
        let pending = {
            let mut table = self.transactions()?;
            let pending = table.take(request_id);
            self.metrics.pending_transactions.set(table.len() as i64);
            pending
        };
        match pending {
            Some(pending) => Ok(Some(pending.complete(outcome))),
            None => {
                debug!(connection = %self.label, request_id, "reply for unknown config request");
                Ok(None)
            }
        }
    }

    fn attach_device(&self, channel: &dyn Channel, rec: DeviceEventRecord) -> Result<()> {
        let device = match self.open_device(channel, rec.handle) {
            Ok(device) => device,
            Err(e) => {
                debug!(
                    connection = %self.label,
                    handle = rec.handle,
                    error = %e,
                    "device attach aborted"
                );
                return Ok(());
            }
        };
        let replaced = {
            let mut devices = self.devices()?;
            let replaced = devices.insert(device.clone());
            self.metrics.devices_attached.set(devices.len() as i64);
            replaced
        };
        if let Some(old) = replaced {
            channel.close_device(OpenDevice(old.open_handle));
        }
        info!(connection = %self.label, device = %device, "device attached");
        self.dispatcher.dispatch(Event::DeviceAttached(device));
        Ok(())
    }

    fn open_device(&self, channel: &dyn Channel, handle: u32) -> Result<Device> {
        let open = channel.open_device(handle)?;
        match self.describe_device(channel, open) {
            Ok((info, serial)) => Ok(Device::from_info(handle, open.0, &info, serial)),
            Err(e) => {
                channel.close_device(open);
                Err(e)
            }
        }
    }

    /// Two round trips: the reply size, then the reply itself.
    fn describe_device(
        &self,
        channel: &dyn Channel,
        open: OpenDevice,
    ) -> Result<(DeviceInfoRecord, String)> {
        let size = channel.device_info_size(open)?;
        let mut buf = self.pool.acquire(size)?;
        channel.device_info(open, &mut buf)?;
        let info: DeviceInfoRecord = decode(&buf, 0)?;
        let serial = decode_str(&buf, info.serial_offset, info.serial_len)?.to_string();
        Ok((info, serial))
    }

    fn lose_device(&self, channel: &dyn Channel, rec: DeviceEventRecord) -> Result<()> {
        let removed = {
            let mut devices = self.devices()?;
            let removed = devices.remove(rec.handle);
            self.metrics.devices_attached.set(devices.len() as i64);
            removed
        };
        match removed {
            Some(device) => {
                channel.close_device(OpenDevice(device.open_handle));
                info!(connection = %self.label, device = %device, "device lost");
                self.dispatcher.dispatch(Event::DeviceLost(device));
            }
            None => {
                debug!(
                    connection = %self.label,
                    handle = rec.handle,
                    "lost event for unknown device"
                );
            }
        }
        Ok(())
    }

    fn fail_device(&self, channel: &dyn Channel, rec: DeviceFailureRecord) -> Result<()> {
        let removed = {
            let mut devices = self.devices()?;
            let removed = devices.remove(rec.handle);
            self.metrics.devices_attached.set(devices.len() as i64);
            removed
        };
        if let Some(device) = &removed {
            channel.close_device(OpenDevice(device.open_handle));
        }
        let failure = DeviceFailure {
            handle: rec.handle,
            kind: FailureKind::from_status(rec.status),
            status: rec.status,
            serial: removed
                .map(|d| d.serial)
                .unwrap_or_else(|| DeviceFailure::UNAVAILABLE.to_string()),
        };
        {
            let mut failed = self
                .failed_devices
                .lock()
                .map_err(|_| ClientError::Poisoned("failed devices"))?;
            failed.retain(|f| f.handle != failure.handle);
            failed.push(failure.clone());
        }
        warn!(
            connection = %self.label,
            handle = failure.handle,
            kind = %failure.kind,
            serial = %failure.serial,
            "device failed"
        );
        self.dispatcher.dispatch(Event::DeviceFailed(failure));
        Ok(())
    }
}
