use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The supervisor's lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl Default for Status {
    fn default() -> Self {
        Status::Stopped
    }
}

/// An immutable snapshot of a supervisor's state, serializable for exposure over HTTP by the
/// host binary (§6). This crate never serves it itself; the HTTP front-end is a non-goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub name: String,
    pub status: Status,
    /// 0 when no child is running.
    pub pid: u32,
    pub uptime: Duration,
    pub restart_count: u32,
    pub last_error: Option<String>,
}
