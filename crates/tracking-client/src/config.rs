use crate::{ClientError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracking_wire::PolicyFlags;

/// Per-connection tuning. Every field has a default so partial files are fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long one poll waits before reporting a timeout.
    pub poll_timeout_ms: u64,
    /// Frames kept in the history ring.
    pub frame_history_capacity: usize,
    /// Re-log a repeated channel error every N repeats; 0 logs only on change.
    pub repeat_log_interval: u32,
    pub worker_name_prefix: String,
    /// Idle buffers the transient pool keeps around.
    pub pool_max_idle: usize,
    /// Largest reply buffer a daemon-reported size may ask for.
    pub max_reply_bytes: usize,
    /// Policy names requested on every start, e.g. `images` or `OPTIMIZE_HMD`.
    pub default_policy: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 150,
            frame_history_capacity: 60,
            repeat_log_interval: 0,
            worker_name_prefix: "tracking-poll".to_string(),
            pool_max_idle: 8,
            max_reply_bytes: 16 * 1024 * 1024,
            default_policy: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn default_policy_flags(&self) -> Result<PolicyFlags> {
        let mut flags = PolicyFlags::empty();
        for name in &self.default_policy {
            let flag = PolicyFlags::from_name(&name.trim().to_ascii_uppercase())
                .ok_or_else(|| ClientError::InvalidArgument(format!("unknown policy: {name}")))?;
            flags |= flag;
        }
        Ok(flags)
    }
}

pub fn parse_config(raw: &str) -> anyhow::Result<ConnectionConfig> {
    // An empty document parses as null
    if raw.trim().is_empty() {
        return Ok(ConnectionConfig::default());
    }
    let config: ConnectionConfig =
        serde_yaml::from_str(raw).context("decoding connection config")?;
    config
        .default_policy_flags()
        .context("validating default_policy")?;
    Ok(config)
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<ConnectionConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("loading config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.poll_timeout(), Duration::from_millis(150));
        assert_eq!(config.frame_history_capacity, 60);
        assert_eq!(config.repeat_log_interval, 0);
        assert_eq!(config.max_reply_bytes, 16 * 1024 * 1024);
        assert!(config.default_policy_flags().unwrap().is_empty());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = parse_config(
            "poll_timeout_ms: 20\ndefault_policy: [images, OPTIMIZE_HMD]\n",
        )
        .unwrap();
        assert_eq!(config.poll_timeout_ms, 20);
        assert_eq!(config.frame_history_capacity, 60);
        assert_eq!(
            config.default_policy_flags().unwrap(),
            PolicyFlags::IMAGES | PolicyFlags::OPTIMIZE_HMD
        );
        assert_eq!(parse_config("").unwrap(), ConnectionConfig::default());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let err = parse_config("default_policy: [teleport]\n").unwrap_err();
        assert!(format!("{err:#}").contains("unknown policy: teleport"));
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = load_config_file("/nonexistent/tracking.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tracking.yaml"));
    }

    #[test]
    fn test_load_from_disk() -> anyhow::Result<()> {
        let path =
            std::env::temp_dir().join(format!("tracking-config-{}.yaml", std::process::id()));
        fs::write(&path, "frame_history_capacity: 5\nrepeat_log_interval: 3\n")?;
        let config = load_config_file(&path);
        fs::remove_file(&path).ok();
        let config = config?;
        assert_eq!(config.frame_history_capacity, 5);
        assert_eq!(config.repeat_log_interval, 3);
        Ok(())
    }
}
