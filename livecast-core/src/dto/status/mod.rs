//! Status summary DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::job::JobStatus;

/// Job counts grouped by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub waiting: usize,
    pub live: usize,
    pub completed: usize,
    pub stopped: usize,
    pub disconnected: usize,
    pub errored: usize,
}

impl StatusCounts {
    /// Counts one job in the bucket for its status
    pub fn record(&mut self, status: &JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Waiting => self.waiting += 1,
            JobStatus::Live => self.live += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Stopped => self.stopped += 1,
            JobStatus::Disconnected => self.disconnected += 1,
            JobStatus::Error { .. } => self.errored += 1,
        }
    }
}

/// Host load sampled when the summary was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    /// Average over all cores, 0-100
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

impl HostUsage {
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        (self.memory_used_bytes as f64 / self.memory_total_bytes as f64 * 100.0) as f32
    }
}

/// Overview returned by `GET /api/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Current time in the schedule timezone, `HH:MM`
    pub clock: String,
    pub counts: StatusCounts,
    pub channels: BTreeMap<String, StatusCounts>,
    pub host: HostUsage,
}
