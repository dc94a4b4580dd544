/*
[INPUT]:  Task service client and event channel implementations
[OUTPUT]: Collaborator traits consumed by the reconciler
[POS]:    Boundary layer - seams between reconciliation logic and transports
[UPDATE]: When the reconciler needs new collaborator operations
*/

use async_trait::async_trait;
use tokio::sync::broadcast;

use taskwatch_adapter::{Channel, Result, TaskDto, TaskListFilter, TaskwatchClient, WsEvent};

/// Request/response access to task records.
///
/// `fetch_task` must report a missing task as `TaskwatchError::NotFound` so
/// callers can tell it apart from a transient failure.
#[async_trait]
pub trait TaskQuery: Send + Sync + 'static {
    async fn fetch_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskDto>>;

    async fn fetch_task(&self, id: &str) -> Result<TaskDto>;
}

/// Best-effort pub/sub transport for task events.
#[async_trait]
pub trait EventChannel: Send + Sync + 'static {
    async fn subscribe(&self, channel: &Channel) -> Result<()>;

    async fn unsubscribe(&self, channel: &Channel) -> Result<()>;

    /// Register a listener. Dropping the receiver unregisters it.
    fn listen(&self) -> broadcast::Receiver<WsEvent>;
}

#[async_trait]
impl TaskQuery for TaskwatchClient {
    async fn fetch_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskDto>> {
        self.list_tasks(filter).await
    }

    async fn fetch_task(&self, id: &str) -> Result<TaskDto> {
        self.get_task(id).await
    }
}
