use crate::types::ConfigOutcome;
use std::collections::HashMap;
use std::fmt;

/// Continuation run once when a config transaction completes.
pub type ConfigSink = Box<dyn FnOnce(ConfigOutcome) + Send>;

pub struct PendingTransaction {
    pub request_id: u32,
    pub key: String,
    sink: Option<ConfigSink>,
}

impl PendingTransaction {
    /// Runs the continuation, if any, and hands back the key.
    pub fn complete(self, outcome: ConfigOutcome) -> String {
        if let Some(sink) = self.sink {
            sink(outcome);
        }
        self.key
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("request_id", &self.request_id)
            .field("key", &self.key)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Outstanding config requests keyed by daemon request id.
#[derive(Debug, Default)]
pub struct TransactionTable {
    pending: HashMap<u32, PendingTransaction>,
}

impl TransactionTable {
    /// Returns a transaction displaced by a reused id.
    pub fn insert(
        &mut self,
        request_id: u32,
        key: &str,
        sink: Option<ConfigSink>,
    ) -> Option<PendingTransaction> {
        self.pending.insert(
            request_id,
            PendingTransaction {
                request_id,
                key: key.to_string(),
                sink,
            },
        )
    }

    /// Removes the entry so a duplicate response finds nothing.
    pub fn take(&mut self, request_id: u32) -> Option<PendingTransaction> {
        self.pending.remove(&request_id)
    }

    pub fn contains(&self, request_id: u32) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Empties the table, lowest request id first.
    pub fn drain(&mut self) -> Vec<PendingTransaction> {
        let mut drained: Vec<PendingTransaction> = self.pending.drain().map(|(_, t)| t).collect();
        drained.sort_by_key(|t| t.request_id);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracking_wire::ConfigValue;

    fn recorder() -> (Arc<Mutex<Vec<ConfigOutcome>>>, ConfigSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Box::new(move |o| sink.lock().unwrap().push(o)))
    }

    #[test]
    fn test_take_completes_once() {
        let mut table = TransactionTable::default();
        let (seen, sink) = recorder();
        assert!(table.insert(5, "image_processing_auto_flip", Some(sink)).is_none());
        assert!(table.contains(5));

        let pending = table.take(5).unwrap();
        let key = pending.complete(ConfigOutcome::Value(ConfigValue::Bool(true)));
        assert_eq!(key, "image_processing_auto_flip");
        assert!(table.take(5).is_none());
        assert!(table.is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConfigOutcome::Value(ConfigValue::Bool(true))]
        );
    }

    #[test]
    fn test_reused_id_displaces() {
        let mut table = TransactionTable::default();
        table.insert(1, "a", None);
        let displaced = table.insert(1, "b", None).unwrap();
        assert_eq!(displaced.key, "a");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_in_id_order() {
        let mut table = TransactionTable::default();
        let (seen, sink) = recorder();
        table.insert(9, "late", Some(sink));
        table.insert(2, "early", None);
        let drained = table.drain();
        assert_eq!(drained.iter().map(|t| t.request_id).collect::<Vec<_>>(), vec![2, 9]);
        for t in drained {
            t.complete(ConfigOutcome::Abandoned);
        }
        assert!(table.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![ConfigOutcome::Abandoned]);
    }
}
