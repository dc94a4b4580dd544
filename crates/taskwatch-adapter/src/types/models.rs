/*
[INPUT]:  Task API schema definitions and serde requirements
[OUTPUT]: Typed task records returned by the task service
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new fields are exposed
*/

use serde::{Deserialize, Serialize};

use super::enums::{TaskStatus, TaskType};

/// Outcome attached to a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<String>,
}

/// Task record as returned by `GET /v1/tasks/{id}` and `POST /v1/tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<i64>,
    pub status: TaskStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub creation_date_utc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date_utc: Option<String>,
}

impl TaskDto {
    /// Failure message reported by the server, if any.
    pub fn failure_message(&self) -> Option<&str> {
        self.result
            .as_ref()
            .filter(|result| !result.success)
            .map(|result| result.message.as_str())
            .filter(|message| !message.is_empty())
    }
}
