/*
[INPUT]:  Reconciler collaborator traits
[OUTPUT]: In-memory TaskQuery / EventChannel fakes and polling helpers
[POS]:    Test infrastructure - shared across reconciler test modules
[UPDATE]: When collaborator traits gain operations
*/

//! Common test utilities for taskwatch tests

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use taskwatch::{EventChannel, TaskQuery, TaskView};
use taskwatch_adapter::{
    Channel, Result, TaskDto, TaskListFilter, TaskStatus, TaskType, TaskwatchError, WsEvent,
};

pub const STUDY: &str = "study-1";

pub fn dto(id: &str, status: TaskStatus) -> TaskDto {
    TaskDto {
        id: id.to_string(),
        name: format!("upgrade {STUDY}"),
        owner: Some(1),
        status,
        task_type: Some(TaskType::UpgradeStudy),
        ref_id: Some(STUDY.to_string()),
        progress: None,
        result: None,
        creation_date_utc: "2024-03-01T10:00:00".to_string(),
        completion_date_utc: None,
    }
}

pub fn task_added(id: &str, task_type: TaskType, study_id: &str) -> WsEvent {
    WsEvent::TaskAdded {
        id: id.to_string(),
        task_type: Some(task_type),
        study_id: Some(study_id.to_string()),
        message: String::new(),
    }
}

#[derive(Debug, Default)]
struct QueryState {
    listed: Vec<TaskDto>,
    list_failures: u32,
    list_delay: Option<Duration>,
    tasks: HashMap<String, TaskDto>,
    failing: BTreeSet<String>,
    rate_limited: HashMap<String, u64>,
    crashing: BTreeSet<String>,
    task_delays: HashMap<String, Duration>,
    list_calls: u32,
    task_calls: HashMap<String, u32>,
    filters: Vec<TaskListFilter>,
}

/// Task service backed by in-memory records.
#[derive(Debug, Default)]
pub struct FakeQuery {
    state: Mutex<QueryState>,
}

impl FakeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records returned by the bulk fetch; each is also served by `fetch_task`.
    pub fn with_listed(tasks: Vec<TaskDto>) -> Self {
        let query = Self::new();
        {
            let mut state = query.state.lock().unwrap();
            for task in &tasks {
                state.tasks.insert(task.id.clone(), task.clone());
            }
            state.listed = tasks;
        }
        query
    }

    pub fn set_task(&self, task: TaskDto) {
        self.state.lock().unwrap().tasks.insert(task.id.clone(), task);
    }

    pub fn remove_task(&self, id: &str) {
        self.state.lock().unwrap().tasks.remove(id);
    }

    pub fn fail_task(&self, id: &str, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(id.to_string());
        } else {
            state.failing.remove(id);
        }
    }

    /// Answers `fetch_task(id)` with a rate-limit error while set.
    pub fn rate_limit_task(&self, id: &str, retry_after: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        match retry_after {
            Some(secs) => state.rate_limited.insert(id.to_string(), secs),
            None => state.rate_limited.remove(id),
        };
    }

    /// Makes the fetch task for `id` panic instead of returning.
    pub fn crash_task(&self, id: &str) {
        self.state.lock().unwrap().crashing.insert(id.to_string());
    }

    pub fn delay_task(&self, id: &str, delay: Duration) {
        self.state.lock().unwrap().task_delays.insert(id.to_string(), delay);
    }

    pub fn fail_next_lists(&self, count: u32) {
        self.state.lock().unwrap().list_failures = count;
    }

    pub fn delay_lists(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }

    pub fn task_calls(&self, id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .task_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn filters(&self) -> Vec<TaskListFilter> {
        self.state.lock().unwrap().filters.clone()
    }
}

#[async_trait]
impl TaskQuery for FakeQuery {
    async fn fetch_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskDto>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            state.filters.push(filter.clone());
            state.list_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(TaskwatchError::Api {
                code: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(state.listed.clone())
    }

    async fn fetch_task(&self, id: &str) -> Result<TaskDto> {
        let (delay, crashing) = {
            let mut state = self.state.lock().unwrap();
            *state.task_calls.entry(id.to_string()).or_default() += 1;
            (state.task_delays.get(id).copied(), state.crashing.contains(id))
        };
        if crashing {
            panic!("task service crashed while fetching {id}");
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        if let Some(&retry_after) = state.rate_limited.get(id) {
            return Err(TaskwatchError::RateLimit { retry_after });
        }
        if state.failing.contains(id) {
            return Err(TaskwatchError::Api {
                code: 502,
                message: "bad gateway".to_string(),
            });
        }
        state
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskwatchError::NotFound { id: id.to_string() })
    }
}

/// Event channel that records subscriptions and lets tests push events.
#[derive(Debug)]
pub struct FakeChannel {
    events: broadcast::Sender<WsEvent>,
    held: Mutex<BTreeSet<Channel>>,
    subscribes: Mutex<Vec<Channel>>,
    unsubscribes: Mutex<Vec<Channel>>,
}

impl Default for FakeChannel {
    fn default() -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            events,
            held: Mutex::new(BTreeSet::new()),
            subscribes: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: WsEvent) {
        let _ = self.events.send(event);
    }

    pub fn held(&self) -> BTreeSet<Channel> {
        self.held.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self, channel: &Channel) -> usize {
        self.subscribes
            .lock()
            .unwrap()
            .iter()
            .filter(|held| *held == channel)
            .count()
    }

    pub fn unsubscribe_count(&self, channel: &Channel) -> usize {
        self.unsubscribes
            .lock()
            .unwrap()
            .iter()
            .filter(|held| *held == channel)
            .count()
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl EventChannel for FakeChannel {
    async fn subscribe(&self, channel: &Channel) -> Result<()> {
        self.subscribes.lock().unwrap().push(channel.clone());
        self.held.lock().unwrap().insert(channel.clone());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &Channel) -> Result<()> {
        self.unsubscribes.lock().unwrap().push(channel.clone());
        self.held.lock().unwrap().remove(channel);
        Ok(())
    }

    fn listen(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }
}

/// Poll `check` in small steps of (possibly paused) time until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub async fn wait_view(
    view_rx: &watch::Receiver<TaskView>,
    mut check: impl FnMut(&TaskView) -> bool,
) -> TaskView {
    eventually(|| check(&view_rx.borrow())).await;
    view_rx.borrow().clone()
}
