//! Table-level migration status and the bounded-retry state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 4] = [
        MigrationStatus::Pending,
        MigrationStatus::Running,
        MigrationStatus::Succeeded,
        MigrationStatus::Failed,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::Running => "RUNNING",
            MigrationStatus::Succeeded => "SUCCEEDED",
            MigrationStatus::Failed => "FAILED",
        }
    }

    /// Only resubmission moves a job out of a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Succeeded | MigrationStatus::Failed)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown migration status '{}'", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for MigrationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MigrationStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Status and retry counter of a job. Always read and written as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: MigrationStatus,
    pub retry_count: u32,
}

impl JobState {
    /// State of a freshly created or resubmitted job.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            status: MigrationStatus::Pending,
            retry_count: 0,
        }
    }

    /// Two lines: `<STATUS>\n<retryCount>\n`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}\n{}\n", self.status, self.retry_count)
    }

    /// Inverse of `encode`. A missing final newline is tolerated.
    pub fn decode(text: &str) -> Result<Self, String> {
        let body = text.strip_suffix('\n').unwrap_or(text);
        let mut lines = body.split('\n');
        let (Some(status), Some(count), None) = (lines.next(), lines.next(), lines.next()) else {
            return Err(format!("expected two lines, got {:?}", text));
        };
        let status = status.parse::<MigrationStatus>().map_err(|e| e.to_string())?;
        let retry_count = count
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("bad retry count {:?}: {}", count, e))?;
        Ok(Self {
            status,
            retry_count,
        })
    }
}

/// Apply a status event to the current state.
///
/// A failure always bumps the counter. The job lands in FAILED only once the
/// counter exceeds `retry_limit`; before that it goes back to PENDING for
/// another attempt. PENDING is accepted as a manual reset and keeps the
/// counter.
#[must_use]
pub fn transition(current: JobState, event: MigrationStatus, retry_limit: u32) -> JobState {
    match event {
        MigrationStatus::Failed => {
            let retry_count = current.retry_count.saturating_add(1);
            let status = if retry_count <= retry_limit {
                MigrationStatus::Pending
            } else {
                MigrationStatus::Failed
            };
            JobState {
                status,
                retry_count,
            }
        }
        status => JobState {
            status,
            retry_count: current.retry_count,
        },
    }
}
