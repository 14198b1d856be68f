use crate::{ClientError, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Counters for one connection, labelled with its key.
#[derive(Clone)]
pub struct ConnectionMetrics {
    pub registry: Registry,
    pub messages_received: IntCounter,
    pub frames_received: IntCounter,
    pub frames_dropped: IntCounter,
    pub poll_failures: IntCounter,
    pub decode_failures: IntCounter,
    pub devices_attached: IntGauge,
    pub pending_transactions: IntGauge,
}

fn counter(connection: &str, name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).const_label("connection", connection))
        .map_err(|e| ClientError::Metrics(format!("metrics init error: {e}")))
}

fn gauge(connection: &str, name: &str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help).const_label("connection", connection))
        .map_err(|e| ClientError::Metrics(format!("metrics init error: {e}")))
}

impl ConnectionMetrics {
    pub fn new(connection: &str) -> Result<Self> {
        let registry = Registry::new();
        let metrics = Self {
            messages_received: counter(
                connection,
                "tracking_messages_received",
                "Messages returned by poll",
            )?,
            frames_received: counter(
                connection,
                "tracking_frames_received",
                "Tracking frames decoded",
            )?,
            frames_dropped: counter(
                connection,
                "tracking_frames_dropped",
                "Frames the daemon reported as dropped",
            )?,
            poll_failures: counter(
                connection,
                "tracking_poll_failures",
                "Polls that returned an error, timeouts included",
            )?,
            decode_failures: counter(
                connection,
                "tracking_decode_failures",
                "Messages dropped because they could not be decoded",
            )?,
            devices_attached: gauge(
                connection,
                "tracking_devices_attached",
                "Devices currently in the registry",
            )?,
            pending_transactions: gauge(
                connection,
                "tracking_pending_transactions",
                "Config requests awaiting a reply",
            )?,
            registry,
        };
        let _ = metrics.registry.register(Box::new(metrics.messages_received.clone()));
        let _ = metrics.registry.register(Box::new(metrics.frames_received.clone()));
        let _ = metrics.registry.register(Box::new(metrics.frames_dropped.clone()));
        let _ = metrics.registry.register(Box::new(metrics.poll_failures.clone()));
        let _ = metrics.registry.register(Box::new(metrics.decode_failures.clone()));
        let _ = metrics.registry.register(Box::new(metrics.devices_attached.clone()));
        let _ = metrics.registry.register(Box::new(metrics.pending_transactions.clone()));
        Ok(metrics)
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_carries_label() {
        let metrics = ConnectionMetrics::new("0@lab").unwrap();
        metrics.frames_received.inc_by(3);
        metrics.devices_attached.set(1);
        let text = metrics.encode_text();
        assert!(text.contains("tracking_frames_received{connection=\"0@lab\"} 3"));
        assert!(text.contains("tracking_devices_attached{connection=\"0@lab\"} 1"));
    }
}
