//! Encoder log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tail of a job's encoder log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTail {
    pub job_id: Uuid,
    pub lines: Vec<String>,
}
