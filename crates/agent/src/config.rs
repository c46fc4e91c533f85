//! Agent configuration

use anyhow::{bail, Result};
use drcio_lib::contention::ContentionConfig;
use drcio_lib::controller::ControllerConfig;
use drcio_lib::BandwidthLimit;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Agent configuration, loaded from `DRCIO_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from the Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/status/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Control loop tick period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Host mount point of the shared data volume
    #[serde(default = "default_shared_mount_path")]
    pub shared_mount_path: String,

    /// cgroup-v2 hierarchy root
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: String,

    /// Pod label carrying the priority class
    #[serde(default = "default_priority_label")]
    pub priority_label: String,

    /// Low-class read limit outside contention
    #[serde(default = "default_read_ceiling")]
    pub read_ceiling_bps: u64,

    /// Low-class write limit outside contention
    #[serde(default = "default_write_ceiling")]
    pub write_ceiling_bps: u64,

    /// Low-class read limit during active contention
    #[serde(default = "default_read_floor")]
    pub read_floor_bps: u64,

    /// Low-class write limit during active contention
    #[serde(default = "default_write_floor")]
    pub write_floor_bps: u64,

    /// Aggregate Low-class throughput that counts as contention
    #[serde(default = "default_saturation")]
    pub saturation_bps: u64,

    /// Consecutive elevated ticks before throttling engages
    #[serde(default = "default_trigger_ticks")]
    pub trigger_ticks: u32,

    /// Consecutive quiet ticks before throttling releases
    #[serde(default = "default_cooldown_ticks")]
    pub cooldown_ticks: u32,

    /// EMA smoothing factor for the throughput estimate
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,

    /// How long resolved cgroup paths stay cached, in seconds
    #[serde(default = "default_resolve_ttl")]
    pub resolve_ttl_secs: u64,

    /// Kubernetes API request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,

    /// Remove all managed limits on shutdown
    #[serde(default = "default_clear_on_exit")]
    pub clear_on_exit: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    5
}

fn default_shared_mount_path() -> String {
    "/mnt/shared".to_string()
}

fn default_cgroup_root() -> String {
    "/sys/fs/cgroup".to_string()
}

fn default_priority_label() -> String {
    "drcio.io/priority".to_string()
}

fn default_read_ceiling() -> u64 {
    200 * 1024 * 1024
}

fn default_write_ceiling() -> u64 {
    50 * 1024 * 1024
}

fn default_read_floor() -> u64 {
    50 * 1024 * 1024
}

fn default_write_floor() -> u64 {
    10 * 1024 * 1024
}

fn default_saturation() -> u64 {
    100 * 1024 * 1024
}

fn default_trigger_ticks() -> u32 {
    3
}

fn default_cooldown_ticks() -> u32 {
    3
}

fn default_ema_alpha() -> f64 {
    0.5
}

fn default_resolve_ttl() -> u64 {
    30
}

fn default_api_timeout() -> u64 {
    10
}

fn default_clear_on_exit() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from the environment and validate it. A bad
    /// value is fatal at startup rather than silently replaced.
    pub fn load() -> Result<Self> {
        let config: AgentConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix("DRCIO"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.shared_mount_path.is_empty() {
            bail!("shared_mount_path must not be empty");
        }
        if self.read_floor_bps == 0 || self.write_floor_bps == 0 {
            bail!("floor limits must be non-zero");
        }
        if self.read_floor_bps > self.read_ceiling_bps {
            bail!(
                "read_floor_bps ({}) exceeds read_ceiling_bps ({})",
                self.read_floor_bps,
                self.read_ceiling_bps
            );
        }
        if self.write_floor_bps > self.write_ceiling_bps {
            bail!(
                "write_floor_bps ({}) exceeds write_ceiling_bps ({})",
                self.write_floor_bps,
                self.write_ceiling_bps
            );
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            bail!("ema_alpha must be in (0, 1], got {}", self.ema_alpha);
        }
        if self.trigger_ticks == 0 || self.cooldown_ticks == 0 {
            bail!("trigger_ticks and cooldown_ticks must be at least 1");
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            node_name: self.node_name.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            priority_label: self.priority_label.clone(),
            floor: BandwidthLimit::new(self.read_floor_bps, self.write_floor_bps),
            ceiling: BandwidthLimit::new(self.read_ceiling_bps, self.write_ceiling_bps),
            contention: ContentionConfig {
                saturation_bps: self.saturation_bps,
                trigger_ticks: self.trigger_ticks,
                cooldown_ticks: self.cooldown_ticks,
                ema_alpha: self.ema_alpha,
            },
            clear_on_exit: self.clear_on_exit,
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn resolve_ttl(&self) -> Duration {
        Duration::from_secs(self.resolve_ttl_secs)
    }

    /// The configuration subset echoed by the status endpoint.
    pub fn echo(&self) -> ConfigEcho {
        ConfigEcho {
            poll_interval_secs: self.poll_interval_secs,
            shared_mount_path: self.shared_mount_path.clone(),
            priority_label: self.priority_label.clone(),
            read_ceiling_bps: self.read_ceiling_bps,
            write_ceiling_bps: self.write_ceiling_bps,
            read_floor_bps: self.read_floor_bps,
            write_floor_bps: self.write_floor_bps,
            saturation_bps: self.saturation_bps,
            trigger_ticks: self.trigger_ticks,
            cooldown_ticks: self.cooldown_ticks,
        }
    }
}

/// Effective tunables shown to operators on `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub poll_interval_secs: u64,
    pub shared_mount_path: String,
    pub priority_label: String,
    pub read_ceiling_bps: u64,
    pub write_ceiling_bps: u64,
    pub read_floor_bps: u64,
    pub write_floor_bps: u64,
    pub saturation_bps: u64,
    pub trigger_ticks: u32,
    pub cooldown_ticks: u32,
}
