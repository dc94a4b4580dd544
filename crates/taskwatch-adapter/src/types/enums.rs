/*
[INPUT]:  Task API schema definitions and serde requirements
[OUTPUT]: Typed Rust enums for task status and task kind
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new task kinds are added
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-side task status, transmitted as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    /// Whether the server will never move the task out of this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Terminal statuses other than `Completed`.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Pending => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Failed => 4,
            TaskStatus::Timeout => 5,
            TaskStatus::Cancelled => 6,
        }
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(TaskStatus::Pending),
            2 => Ok(TaskStatus::Running),
            3 => Ok(TaskStatus::Completed),
            4 => Ok(TaskStatus::Failed),
            5 => Ok(TaskStatus::Timeout),
            6 => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status code {other}")),
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status.code()
    }
}

/// Kind of background job. Unknown kinds deserialize to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Export,
    VariantGeneration,
    Copy,
    Archive,
    Unarchive,
    Scan,
    UpgradeStudy,
    ThermalClusterSeriesGeneration,
    SnapshotClearing,
    #[serde(other)]
    Other,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Export => "EXPORT",
            TaskType::VariantGeneration => "VARIANT_GENERATION",
            TaskType::Copy => "COPY",
            TaskType::Archive => "ARCHIVE",
            TaskType::Unarchive => "UNARCHIVE",
            TaskType::Scan => "SCAN",
            TaskType::UpgradeStudy => "UPGRADE_STUDY",
            TaskType::ThermalClusterSeriesGeneration => "THERMAL_CLUSTER_SERIES_GENERATION",
            TaskType::SnapshotClearing => "SNAPSHOT_CLEARING",
            TaskType::Other => "OTHER",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
