use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::frame::{DEFAULT_PAYLOAD_BUDGET, MIN_PAYLOAD_BUDGET};
use crate::constants::limits::{MAX_PENDING_BUFFERS, MAX_RETAINED_MESSAGES};
use crate::constants::timing::{CHUNK_DELAY, CLEANUP_INTERVAL, REASSEMBLY_TIMEOUT};
use crate::protocol::PayloadBudget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes available to one advertisement frame
    pub payload_budget: usize,
    /// Pause between chunk advertisements, applied by the transport
    pub chunk_delay_ms: u64,
    pub reassembly_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_pending_buffers: usize,
    pub max_retained_messages: usize,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_budget: DEFAULT_PAYLOAD_BUDGET,
            chunk_delay_ms: CHUNK_DELAY.as_millis() as u64,
            reassembly_timeout_ms: REASSEMBLY_TIMEOUT.as_millis() as u64,
            cleanup_interval_ms: CLEANUP_INTERVAL.as_millis() as u64,
            max_pending_buffers: MAX_PENDING_BUFFERS,
            max_retained_messages: MAX_RETAINED_MESSAGES,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nearchat"),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location of the config file inside `data_dir`.
    pub fn default_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn with_payload_budget(mut self, bytes: usize) -> Self {
        self.payload_budget = bytes.max(MIN_PAYLOAD_BUDGET);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_pending_buffers(mut self, max: usize) -> Self {
        self.max_pending_buffers = max;
        self
    }

    pub fn budget(&self) -> PayloadBudget {
        PayloadBudget::new(self.payload_budget)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.payload_budget < MIN_PAYLOAD_BUDGET {
            bail!(
                "payload_budget {} is below the minimum of {}",
                self.payload_budget,
                MIN_PAYLOAD_BUDGET
            );
        }
        if self.reassembly_timeout_ms == 0 {
            bail!("reassembly_timeout_ms must be greater than zero");
        }
        if self.cleanup_interval_ms == 0 {
            bail!("cleanup_interval_ms must be greater than zero");
        }
        if self.max_pending_buffers == 0 {
            bail!("max_pending_buffers must be greater than zero");
        }
        Ok(())
    }
}
