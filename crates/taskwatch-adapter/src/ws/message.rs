/*
[INPUT]:  Raw WebSocket payloads and channel names
[OUTPUT]: Parsed event payloads and typed channel identifiers
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new event payloads or channel kinds
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::TaskType;

const TASK_CHANNEL_PREFIX: &str = "task:";
const STUDY_GENERATION_CHANNEL_PREFIX: &str = "study-generation:";

/// Subscription channel on the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Events of a single task, `task:<id>`
    Task(String),
    /// Coarse per-study generation stream, `study-generation:<study id>`
    StudyGeneration(String),
}

impl Channel {
    pub fn task(id: impl Into<String>) -> Self {
        Channel::Task(id.into())
    }

    pub fn study_generation(study_id: impl Into<String>) -> Self {
        Channel::StudyGeneration(study_id.into())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Task(id) => write!(f, "{TASK_CHANNEL_PREFIX}{id}"),
            Channel::StudyGeneration(study_id) => {
                write!(f, "{STUDY_GENERATION_CHANNEL_PREFIX}{study_id}")
            }
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix(TASK_CHANNEL_PREFIX)
            && !id.is_empty()
        {
            return Ok(Channel::Task(id.to_string()));
        }
        if let Some(study_id) = s.strip_prefix(STUDY_GENERATION_CHANNEL_PREFIX)
            && !study_id.is_empty()
        {
            return Ok(Channel::StudyGeneration(study_id.to_string()));
        }
        Err(format!("unrecognized channel name: {s}"))
    }
}

/// Payload of task lifecycle events (added, running, completed, failed)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskEventPayload {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<String>,
}

/// Payload of progress events
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressPayload {
    pub task_id: String,
    pub progress: f64,
}

impl ProgressPayload {
    /// Progress as a whole percentage in 0..=100
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::task("abc").to_string(), "task:abc");
        assert_eq!(
            Channel::study_generation("s1").to_string(),
            "study-generation:s1"
        );
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("task:abc".parse::<Channel>(), Ok(Channel::task("abc")));
        assert_eq!(
            "study-generation:s1".parse::<Channel>(),
            Ok(Channel::study_generation("s1"))
        );
        assert!("task:".parse::<Channel>().is_err());
        assert!("TASK_abc".parse::<Channel>().is_err());
    }

    #[test]
    fn test_progress_percent_clamps() {
        let payload = |progress| ProgressPayload {
            task_id: "t".into(),
            progress,
        };
        assert_eq!(payload(39.6).percent(), 40);
        assert_eq!(payload(-3.0).percent(), 0);
        assert_eq!(payload(250.0).percent(), 100);
        assert_eq!(payload(f64::NAN).percent(), 0);
    }
}
