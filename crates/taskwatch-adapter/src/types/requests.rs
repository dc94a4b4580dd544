/*
[INPUT]:  Task list query parameters
[OUTPUT]: Serializable task list filter body
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the task list endpoint accepts new filter fields
*/

use serde::{Deserialize, Serialize};

use super::enums::{TaskStatus, TaskType};

/// Body of `POST /v1/tasks`. Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(rename = "type", default)]
    pub types: Vec<TaskType>,
    #[serde(rename = "status", default)]
    pub statuses: Vec<TaskStatus>,
}

impl TaskListFilter {
    /// Unfinished tasks of the given kinds attached to one study.
    pub fn unfinished_for_study(study_id: &str, types: &[TaskType]) -> Self {
        Self {
            ref_id: Some(study_id.to_string()),
            types: types.to_vec(),
            statuses: vec![TaskStatus::Pending, TaskStatus::Running],
        }
    }
}
