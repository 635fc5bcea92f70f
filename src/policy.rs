use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// USB vendor/product identity used by the USB recovery chain (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Before each restart attempt following a failure, reset the bus first.
    #[serde(default)]
    pub reset_on_retry: bool,
    /// On an L4 bus-level probe failure, reset proactively without waiting for the
    /// 3-strike watchdog threshold.
    #[serde(default)]
    pub reset_on_bus_failure: bool,
}

/// Immutable per-supervisor policy configuration (§3). Host processes load this from
/// whichever configuration format they use and hand it to [`crate::supervisor::Supervisor::new`];
/// this crate never parses config itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorPolicy {
    pub name: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    #[serde(default = "SupervisorPolicy::default_restart_on_failure")]
    pub restart_on_failure: bool,
    #[serde(default = "SupervisorPolicy::default_restart_delay")]
    pub restart_delay: Duration,
    #[serde(default = "SupervisorPolicy::default_max_restart_delay")]
    pub max_restart_delay: Duration,
    /// 0 means unlimited.
    #[serde(default = "SupervisorPolicy::default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "SupervisorPolicy::default_stable_threshold")]
    pub stable_threshold: Duration,
    #[serde(default = "SupervisorPolicy::default_graceful_timeout")]
    pub graceful_timeout: Duration,

    #[serde(default = "SupervisorPolicy::default_health_check_interval")]
    pub health_check_interval: Duration,
    #[serde(default = "SupervisorPolicy::default_probe_timeout")]
    pub probe_timeout: Duration,

    #[serde(default)]
    pub usb: Option<UsbIdentity>,
}

impl SupervisorPolicy {
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
            restart_on_failure: Self::default_restart_on_failure(),
            restart_delay: Self::default_restart_delay(),
            max_restart_delay: Self::default_max_restart_delay(),
            max_restart_attempts: Self::default_max_restart_attempts(),
            stable_threshold: Self::default_stable_threshold(),
            graceful_timeout: Self::default_graceful_timeout(),
            health_check_interval: Self::default_health_check_interval(),
            probe_timeout: Self::default_probe_timeout(),
            usb: None,
        }
    }

    fn default_restart_on_failure() -> bool {
        true
    }
    fn default_restart_delay() -> Duration {
        Duration::from_secs(5)
    }
    fn default_max_restart_delay() -> Duration {
        Duration::from_secs(5 * 60)
    }
    fn default_max_restart_attempts() -> u32 {
        10
    }
    fn default_stable_threshold() -> Duration {
        Duration::from_secs(2 * 60)
    }
    fn default_graceful_timeout() -> Duration {
        Duration::from_secs(10)
    }
    fn default_health_check_interval() -> Duration {
        Duration::from_secs(30)
    }
    fn default_probe_timeout() -> Duration {
        Duration::from_secs(5)
    }
}
