use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::types::ConnectionKey;
use crate::{ClientError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use tracking_channel::Connector;

/// Process-wide table of connections. A key maps to the same connection for
/// the life of the registry.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    connections: Mutex<HashMap<ConnectionKey, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// New connections are built from `connector` and `config`.
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn connections(&self) -> Result<MutexGuard<'_, HashMap<ConnectionKey, Arc<Connection>>>> {
        self.connections
            .lock()
            .map_err(|_| ClientError::Poisoned("connection registry"))
    }

    /// The connection for `key`, created (not started) on first use.
    pub fn get_or_create(&self, key: ConnectionKey) -> Result<Arc<Connection>> {
        let mut connections = self.connections()?;
        if let Some(existing) = connections.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let connection = Arc::new(Connection::new(
            key.clone(),
            self.config.clone(),
            Arc::clone(&self.connector),
        )?);
        debug!(connection = %key, "connection created");
        connections.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        self.connections().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys.
    pub fn keys(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<ConnectionKey> = self
            .connections()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Stop every connection. Entries stay registered.
    pub fn stop_all(&self) {
        let connections: Vec<Arc<Connection>> = match self.connections() {
            Ok(c) => c.values().cloned().collect(),
            Err(_) => return,
        };
        // Outside the registry lock, stop joins poll threads
        for connection in connections {
            connection.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;
    use std::time::Duration;
    use tracking_channel::{MockDaemon, MockDevice};

    fn registry(daemon: &MockDaemon) -> ConnectionRegistry {
        ConnectionRegistry::new(
            Arc::new(daemon.clone()),
            ConnectionConfig {
                poll_timeout_ms: 10,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_same_key_same_connection() {
        let daemon = MockDaemon::new();
        let reg = registry(&daemon);
        let a = reg.get_or_create(ConnectionKey::new(0, None)).unwrap();
        let b = reg.get_or_create(ConnectionKey::new(0, None)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &reg.get(&ConnectionKey::new(0, None)).unwrap()));
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&ConnectionKey::new(1, None)).is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let daemon = MockDaemon::new();
        let reg = registry(&daemon);
        let plain = reg.get_or_create(ConnectionKey::new(0, None)).unwrap();
        let lab = reg.get_or_create(ConnectionKey::new(0, Some("lab"))).unwrap();
        let other = reg.get_or_create(ConnectionKey::new(1, None)).unwrap();
        assert!(!Arc::ptr_eq(&plain, &lab));
        assert_eq!(
            reg.keys(),
            vec![
                ConnectionKey::new(0, None),
                ConnectionKey::new(0, Some("lab")),
                ConnectionKey::new(1, None),
            ]
        );

        let rx = lab.subscribe();
        lab.start().unwrap();
        assert!(lab.is_running());
        assert!(!plain.is_running());
        assert!(!other.is_running());

        daemon.namespace(Some("lab")).attach_device(MockDevice::new(5, "LP0005"));
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, Event::DeviceAttached(_)));
        assert_eq!(lab.devices().len(), 1);
        assert!(plain.devices().is_empty());

        reg.stop_all();
        assert!(!lab.is_running());
        assert_eq!(reg.len(), 3);
        assert_eq!(daemon.open_channels(), 0);
    }
}
