use std::fmt::Display;
use tracing::{debug, trace, warn};

/// Collapses runs of the same abnormal result into one log line.
///
/// A result is logged when it differs from the previous one. With a non-zero
/// `relog_every`, a run is also re-logged every that many repeats.
#[derive(Debug, Default)]
pub(crate) struct ResultLog {
    last: Option<String>,
    repeats: u32,
    relog_every: u32,
}

impl ResultLog {
    pub fn new(relog_every: u32) -> Self {
        Self {
            relog_every,
            ..Default::default()
        }
    }

    /// Records a failure. Returns true when it was logged.
    pub fn failure(
        &mut self,
        connection: &str,
        context: &str,
        err: &dyn Display,
        transient: bool,
    ) -> bool {
        let rendered = err.to_string();
        if self.last.as_deref() == Some(rendered.as_str()) {
            self.repeats = self.repeats.saturating_add(1);
            if self.relog_every > 0 && self.repeats % self.relog_every == 0 {
                warn!(
                    connection,
                    context,
                    error = %rendered,
                    repeats = self.repeats,
                    "result still abnormal"
                );
                return true;
            }
            trace!(connection, context, error = %rendered, "repeated abnormal result");
            return false;
        }

        if transient {
            debug!(connection, context, error = %rendered, "abnormal result");
        } else {
            warn!(connection, context, error = %rendered, "abnormal result");
        }
        self.last = Some(rendered);
        self.repeats = 0;
        true
    }

    pub fn success(&mut self) {
        self.last = None;
        self.repeats = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking_channel::ChannelError;

    #[test]
    fn test_repeats_logged_once() {
        let mut log = ResultLog::new(0);
        assert!(log.failure("0", "poll", &ChannelError::Timeout, true));
        for _ in 0..50 {
            assert!(!log.failure("0", "poll", &ChannelError::Timeout, true));
        }
        assert!(log.failure("0", "poll", &ChannelError::NotConnected, false));
        assert!(log.failure("0", "poll", &ChannelError::Timeout, true));
    }

    #[test]
    fn test_success_resets() {
        let mut log = ResultLog::new(0);
        assert!(log.failure("0", "set policy", &ChannelError::NotConnected, false));
        log.success();
        assert!(log.failure("0", "set policy", &ChannelError::NotConnected, false));
    }

    #[test]
    fn test_relog_interval() {
        let mut log = ResultLog::new(3);
        assert!(log.failure("0", "poll", &ChannelError::Timeout, true));
        let logged: Vec<bool> = (0..6)
            .map(|_| log.failure("0", "poll", &ChannelError::Timeout, true))
            .collect();
        assert_eq!(logged, vec![false, false, true, false, false, true]);
    }
}
