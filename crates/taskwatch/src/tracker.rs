/*
[INPUT]:  Seed task records, push events and pulled task snapshots for one study
[OUTPUT]: Keyed set of tracked blocking tasks + subscription effects to perform
[POS]:    State layer - pure reducer owned by the reconciler worker (no I/O)
[UPDATE]: When changing transition rules or the exposed task view
*/

use std::collections::{HashMap, HashSet};

use taskwatch_adapter::{Channel, TaskDto, TaskStatus, TaskType};
use thiserror::Error;

pub const NOT_FOUND_MESSAGE: &str = "task not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No progress signal received yet
    Indeterminate,
    Percent(u8),
}

impl Progress {
    pub const COMPLETE: Progress = Progress::Percent(100);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TrackedStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackedStatus::Completed | TrackedStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTask {
    pub id: String,
    pub task_type: TaskType,
    pub status: TrackedStatus,
    pub progress: Progress,
    pub error: Option<String>,
}

impl TrackedTask {
    fn new(id: String, task_type: TaskType) -> Self {
        Self {
            id,
            task_type,
            status: TrackedStatus::Pending,
            progress: Progress::Indeterminate,
            error: None,
        }
    }

    /// Neither completed nor carrying an error.
    pub fn is_unresolved(&self) -> bool {
        self.status != TrackedStatus::Completed && self.error.is_none()
    }
}

/// Snapshot handed to the consuming view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskView {
    pub study_id: Option<String>,
    pub tasks: Vec<TrackedTask>,
    pub has_unresolved: bool,
}

/// Side effect requested by a transition; the worker performs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Subscribe(Channel),
    Unsubscribe(Channel),
    /// One-shot fetch of a task record
    Reconcile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DismissError {
    #[error("{count} task(s) still unresolved")]
    Unresolved { count: usize },
    #[error("reconciler is not active")]
    Inactive,
}

/// Blocking tasks of one study, keyed by task id, in arrival order.
#[derive(Debug)]
pub struct TaskTracker {
    study_id: String,
    blocking_types: HashSet<TaskType>,
    tasks: HashMap<String, TrackedTask>,
    order: Vec<String>,
    revision: u64,
}

impl TaskTracker {
    pub fn new(study_id: impl Into<String>, blocking_types: &[TaskType]) -> Self {
        Self {
            study_id: study_id.into(),
            blocking_types: blocking_types.iter().copied().collect(),
            tasks: HashMap::new(),
            order: Vec::new(),
            revision: 0,
        }
    }

    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Bumped on every state change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TrackedTask> {
        self.tasks.get(id)
    }

    pub fn is_blocking(&self, task_type: TaskType) -> bool {
        self.blocking_types.contains(&task_type)
    }

    /// Merge the initial bulk fetch. Tasks already tracked (from early push
    /// events) are updated, never replaced.
    pub fn seed(&mut self, tasks: Vec<TaskDto>) -> Vec<Effect> {
        let mut effects = Vec::new();
        for dto in tasks {
            if dto.ref_id.as_deref().is_some_and(|ref_id| ref_id != self.study_id) {
                continue;
            }
            let task_type = dto.task_type.unwrap_or(TaskType::Other);
            if !self.is_blocking(task_type) {
                continue;
            }
            if self.insert(&dto.id, task_type) {
                effects.push(Effect::Subscribe(Channel::task(dto.id.clone())));
            }
            effects.extend(self.apply_snapshot(&dto));
        }
        effects
    }

    pub fn task_added(
        &mut self,
        id: &str,
        task_type: Option<TaskType>,
        study_id: Option<&str>,
    ) -> Vec<Effect> {
        if study_id != Some(self.study_id.as_str()) {
            return Vec::new();
        }
        let Some(task_type) = task_type.filter(|task_type| self.is_blocking(*task_type)) else {
            return Vec::new();
        };
        if !self.insert(id, task_type) {
            return Vec::new();
        }
        vec![
            Effect::Subscribe(Channel::task(id)),
            Effect::Reconcile(id.to_string()),
        ]
    }

    pub fn task_running(&mut self, id: &str) -> Vec<Effect> {
        if let Some(task) = self.tasks.get_mut(id)
            && task.status == TrackedStatus::Pending
        {
            task.status = TrackedStatus::Running;
            self.revision += 1;
        }
        Vec::new()
    }

    pub fn progress(&mut self, id: &str, percent: u8) -> Vec<Effect> {
        let progress = Progress::Percent(percent.min(100));
        if let Some(task) = self.tasks.get_mut(id)
            && !task.status.is_terminal()
            && (task.progress != progress || task.status == TrackedStatus::Pending)
        {
            task.progress = progress;
            task.status = TrackedStatus::Running;
            self.revision += 1;
        }
        Vec::new()
    }

    pub fn failed(&mut self, id: &str, message: impl Into<String>) -> Vec<Effect> {
        let Some(task) = self.tasks.get_mut(id) else {
            return Vec::new();
        };
        if task.status.is_terminal() {
            return Vec::new();
        }
        task.status = TrackedStatus::Failed;
        task.error = Some(message.into());
        self.revision += 1;
        vec![Effect::Unsubscribe(Channel::task(id))]
    }

    pub fn completed(&mut self, id: &str) -> Vec<Effect> {
        let Some(task) = self.tasks.get_mut(id) else {
            return Vec::new();
        };
        if task.status.is_terminal() {
            return Vec::new();
        }
        task.status = TrackedStatus::Completed;
        task.progress = Progress::COMPLETE;
        self.revision += 1;
        vec![Effect::Unsubscribe(Channel::task(id))]
    }

    /// Apply a pulled task record with the same rules as push events.
    pub fn apply_snapshot(&mut self, dto: &TaskDto) -> Vec<Effect> {
        match dto.status {
            TaskStatus::Pending => Vec::new(),
            TaskStatus::Running => {
                let mut effects = self.task_running(&dto.id);
                if let Some(percent) = dto.progress {
                    effects.extend(self.progress(&dto.id, percent));
                }
                effects
            }
            TaskStatus::Completed => self.completed(&dto.id),
            status => {
                let message = dto
                    .failure_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| default_failure_message(status).to_string());
                self.failed(&dto.id, message)
            }
        }
    }

    /// The server no longer knows the task; nothing can resolve it later.
    pub fn not_found(&mut self, id: &str) -> Vec<Effect> {
        self.failed(id, NOT_FOUND_MESSAGE)
    }

    pub fn has_unresolved(&self) -> bool {
        self.tasks.values().any(TrackedTask::is_unresolved)
    }

    pub fn unresolved_count(&self) -> usize {
        self.tasks.values().filter(|task| task.is_unresolved()).count()
    }

    /// Ids of tasks that are not yet terminal, in arrival order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|task| !task.status.is_terminal())
            })
            .cloned()
            .collect()
    }

    /// Task channels currently held: one per non-terminal task.
    pub fn held_channels(&self) -> Vec<Channel> {
        self.pending_ids().into_iter().map(Channel::Task).collect()
    }

    /// Clear the set once nothing is unresolved.
    pub fn dismiss(&mut self) -> Result<Vec<Effect>, DismissError> {
        let count = self.unresolved_count();
        if count > 0 {
            return Err(DismissError::Unresolved { count });
        }
        Ok(self.force_clear())
    }

    /// Clear the set unconditionally, releasing every held channel.
    pub fn force_clear(&mut self) -> Vec<Effect> {
        let effects = self
            .held_channels()
            .into_iter()
            .map(Effect::Unsubscribe)
            .collect();
        if !self.order.is_empty() {
            self.tasks.clear();
            self.order.clear();
            self.revision += 1;
        }
        effects
    }

    pub fn records(&self) -> Vec<TrackedTask> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            study_id: Some(self.study_id.clone()),
            tasks: self.records(),
            has_unresolved: self.has_unresolved(),
        }
    }

    fn insert(&mut self, id: &str, task_type: TaskType) -> bool {
        if self.tasks.contains_key(id) {
            return false;
        }
        self.tasks
            .insert(id.to_string(), TrackedTask::new(id.to_string(), task_type));
        self.order.push(id.to_string());
        self.revision += 1;
        true
    }
}

fn default_failure_message(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Timeout => "task timed out",
        TaskStatus::Cancelled => "task cancelled",
        _ => "task failed",
    }
}
