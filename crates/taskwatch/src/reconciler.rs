/*
[INPUT]:  Study id, TaskQuery + EventChannel collaborators, ReconcilerSettings
[OUTPUT]: Live TaskView via `watch` + dismiss / force-clear commands
[POS]:    Execution layer - one worker per activation owns the TaskTracker
[UPDATE]: When changing activation lifecycle, reconciliation cadence or teardown guarantees
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskwatch_adapter::{
    Channel, Result, TaskDto, TaskListFilter, TaskType, TaskwatchError, WsEvent,
};

use crate::ports::{EventChannel, TaskQuery};
use crate::tracker::{DismissError, Effect, TaskTracker, TaskView};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
const FAILED_WITHOUT_MESSAGE: &str = "task failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Cadence of the pull reconciliation
    pub interval: Duration,
    /// Task kinds that block a study
    pub blocking_types: Vec<TaskType>,
    /// Also hold the `study-generation:<study>` channel while active
    pub follow_study_stream: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            blocking_types: vec![
                TaskType::UpgradeStudy,
                TaskType::ThermalClusterSeriesGeneration,
            ],
            follow_study_stream: false,
        }
    }
}

/// Generation of the activation allowed to touch state. Zero means none.
#[derive(Debug, Clone, Default)]
struct Liveness(Arc<AtomicU64>);

impl Liveness {
    fn activate(&self, generation: u64) {
        self.0.store(generation, Ordering::SeqCst);
    }

    fn revoke(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.0.load(Ordering::SeqCst) == generation
    }
}

#[derive(Debug)]
enum Command {
    Dismiss(oneshot::Sender<std::result::Result<(), DismissError>>),
    ForceClear(oneshot::Sender<()>),
}

#[derive(Debug)]
struct Activation {
    generation: u64,
    study_id: String,
    shutdown: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// Tracks the blocking tasks of one study at a time.
///
/// Push events are applied as they arrive; a periodic pull re-fetches every
/// unfinished task so a lost event only delays the view by one interval.
#[derive(Debug)]
pub struct TaskReconciler<Q, C> {
    query: Arc<Q>,
    channel: Arc<C>,
    settings: ReconcilerSettings,
    view_tx: Arc<watch::Sender<TaskView>>,
    liveness: Liveness,
    active: Option<Activation>,
    next_generation: u64,
}

impl<Q, C> TaskReconciler<Q, C>
where
    Q: TaskQuery,
    C: EventChannel,
{
    pub fn new(query: Arc<Q>, channel: Arc<C>, settings: ReconcilerSettings) -> Self {
        let (view_tx, _rx) = watch::channel(TaskView::default());
        Self {
            query,
            channel,
            settings,
            view_tx: Arc::new(view_tx),
            liveness: Liveness::default(),
            active: None,
            next_generation: 0,
        }
    }

    /// Begin tracking `study_id`, tearing down any previous activation first.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&mut self, study_id: impl Into<String>) {
        self.stop().await;

        let study_id = study_id.into();
        self.next_generation += 1;
        let generation = self.next_generation;
        self.liveness.activate(generation);

        let shutdown = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        // Listen before the seed fetch so no event in between is missed.
        let events = self.channel.listen();

        let worker = ReconcileWorker {
            generation,
            liveness: self.liveness.clone(),
            query: Arc::clone(&self.query),
            channel: Arc::clone(&self.channel),
            settings: self.settings.clone(),
            tracker: TaskTracker::new(study_id.clone(), &self.settings.blocking_types),
            seeded: false,
            in_flight: HashMap::new(),
            deferred: HashMap::new(),
            fetches: JoinSet::new(),
            published_revision: None,
            view_tx: Arc::clone(&self.view_tx),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run(events, cmd_rx));

        info!(%study_id, generation, "reconciler started");
        self.active = Some(Activation {
            generation,
            study_id,
            shutdown,
            cmd_tx,
            handle,
        });
    }

    /// Release every held channel, cancel the timer and clear the view.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.liveness.revoke();
        active.shutdown.cancel();
        if let Err(err) = active.handle.await {
            warn!(error = %err, "reconciler worker ended abnormally");
        }
        self.view_tx.send_replace(TaskView::default());
        info!(
            study_id = %active.study_id,
            generation = active.generation,
            "reconciler stopped"
        );
    }

    /// Latest snapshot of the tracked set; always holds a value.
    pub fn view(&self) -> watch::Receiver<TaskView> {
        self.view_tx.subscribe()
    }

    pub fn study_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.study_id.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Clear the tracked set, refused while any task is unresolved.
    pub async fn dismiss(&self) -> std::result::Result<(), DismissError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Dismiss(reply_tx))?;
        reply_rx.await.map_err(|_| DismissError::Inactive)?
    }

    /// Clear the tracked set unconditionally.
    pub async fn force_clear(&self) -> std::result::Result<(), DismissError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::ForceClear(reply_tx))?;
        reply_rx.await.map_err(|_| DismissError::Inactive)
    }

    fn send_command(&self, cmd: Command) -> std::result::Result<(), DismissError> {
        let active = self.active.as_ref().ok_or(DismissError::Inactive)?;
        active.cmd_tx.send(cmd).map_err(|_| DismissError::Inactive)
    }
}

impl<Q, C> Drop for TaskReconciler<Q, C> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // The worker still unsubscribes in the background once it sees the cancel.
            self.liveness.revoke();
            active.shutdown.cancel();
            self.view_tx.send_replace(TaskView::default());
        }
    }
}

#[derive(Debug)]
struct FetchResult {
    generation: u64,
    outcome: FetchOutcome,
}

#[derive(Debug)]
enum FetchOutcome {
    Seed(Result<Vec<TaskDto>>),
    Task { id: String, result: Result<TaskDto> },
}

/// What an in-flight fetch is for. At most one fetch per key runs at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FetchKey {
    Seed,
    Task(String),
}

struct ReconcileWorker<Q, C> {
    generation: u64,
    liveness: Liveness,
    query: Arc<Q>,
    channel: Arc<C>,
    settings: ReconcilerSettings,
    tracker: TaskTracker,
    seeded: bool,
    in_flight: HashMap<Id, FetchKey>,
    deferred: HashMap<FetchKey, Instant>,
    fetches: JoinSet<FetchResult>,
    published_revision: Option<u64>,
    view_tx: Arc<watch::Sender<TaskView>>,
    shutdown: CancellationToken,
}

impl<Q, C> ReconcileWorker<Q, C>
where
    Q: TaskQuery,
    C: EventChannel,
{
    async fn run(
        mut self,
        events: broadcast::Receiver<WsEvent>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut events = Some(events);
        let shutdown = self.shutdown.clone();

        if let Some(channel) = self.study_channel() {
            self.subscribe(&channel).await;
        }
        self.spawn_seed();
        self.publish();

        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                joined = self.fetches.join_next_with_id(), if !self.fetches.is_empty() => {
                    if let Some(joined) = joined {
                        self.handle_joined(joined).await;
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged; reconciling every unfinished task");
                        self.reconcile_unfinished();
                    }
                    Err(RecvError::Closed) => {
                        warn!("event channel closed; relying on periodic reconciliation");
                        events = None;
                    }
                },
                _ = ticker.tick() => self.handle_tick(),
            }
            self.publish();
        }

        self.teardown().await;
    }

    fn study_channel(&self) -> Option<Channel> {
        self.settings
            .follow_study_stream
            .then(|| Channel::study_generation(self.tracker.study_id()))
    }

    async fn handle_event(&mut self, event: WsEvent) {
        let effects = match event {
            WsEvent::TaskAdded {
                id,
                task_type,
                study_id,
                ..
            } => self.tracker.task_added(&id, task_type, study_id.as_deref()),
            WsEvent::TaskRunning { id } => self.tracker.task_running(&id),
            WsEvent::TaskProgress { task_id, progress } => {
                self.tracker.progress(&task_id, progress)
            }
            WsEvent::TaskCompleted { id, .. } => self.tracker.completed(&id),
            WsEvent::TaskFailed { id, message } => {
                let message = if message.is_empty() {
                    FAILED_WITHOUT_MESSAGE.to_string()
                } else {
                    message
                };
                self.tracker.failed(&id, message)
            }
            WsEvent::Other => Vec::new(),
        };
        self.perform(effects).await;
    }

    fn handle_tick(&mut self) {
        if !self.seeded {
            self.spawn_seed();
        }
        if self.tracker.has_unresolved() {
            self.reconcile_unfinished();
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Dismiss(reply) => {
                let outcome = match self.tracker.dismiss() {
                    Ok(effects) => {
                        self.perform(effects).await;
                        info!(study_id = %self.tracker.study_id(), "tracked tasks dismissed");
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(outcome);
            }
            Command::ForceClear(reply) => {
                let effects = self.tracker.force_clear();
                self.perform(effects).await;
                info!(study_id = %self.tracker.study_id(), "tracked tasks force-cleared");
                let _ = reply.send(());
            }
        }
    }

    async fn handle_joined(&mut self, joined: std::result::Result<(Id, FetchResult), JoinError>) {
        let fetched = match joined {
            Ok((task_id, fetched)) => {
                self.in_flight.remove(&task_id);
                fetched
            }
            Err(err) => {
                let key = self.in_flight.remove(&err.id());
                warn!(?key, error = %err, "fetch task ended abnormally; retrying on next tick");
                return;
            }
        };

        if fetched.generation != self.generation || !self.liveness.is_current(fetched.generation) {
            debug!(generation = fetched.generation, "discarding fetch result of a stale activation");
            return;
        }

        match fetched.outcome {
            FetchOutcome::Seed(result) => {
                match result {
                    Ok(tasks) => {
                        debug!(count = tasks.len(), "initial task fetch completed");
                        self.seeded = true;
                        let effects = self.tracker.seed(tasks);
                        self.perform(effects).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "initial task fetch failed; retrying on next tick");
                        self.defer(FetchKey::Seed, &err);
                    }
                }
            }
            FetchOutcome::Task { id, result } => {
                let effects = match result {
                    Ok(dto) if dto.id == id => self.tracker.apply_snapshot(&dto),
                    Ok(dto) => {
                        warn!(task_id = %id, returned_id = %dto.id, "task fetch returned another task");
                        Vec::new()
                    }
                    Err(err) if err.is_not_found() => {
                        info!(task_id = %id, "task no longer exists on the server");
                        self.tracker.not_found(&id)
                    }
                    Err(err) => {
                        if err.is_retryable() {
                            debug!(task_id = %id, error = %err, "task fetch failed; retrying on next tick");
                        } else {
                            warn!(task_id = %id, error = %err, "task fetch failed; retrying on next tick");
                        }
                        self.defer(FetchKey::Task(id), &err);
                        Vec::new()
                    }
                };
                self.perform(effects).await;
            }
        }
    }

    fn is_fetching(&self, key: &FetchKey) -> bool {
        self.in_flight.values().any(|held| held == key)
    }

    /// Holds `key` back until the server's retry-after hint has elapsed.
    fn defer(&mut self, key: FetchKey, err: &TaskwatchError) {
        if let Some(secs) = err.retry_delay() {
            debug!(?key, secs, "server asked to back off");
            self.deferred.insert(key, Instant::now() + Duration::from_secs(secs));
        }
    }

    fn is_deferred(&mut self, key: &FetchKey) -> bool {
        match self.deferred.get(key) {
            Some(until) if *until > Instant::now() => true,
            Some(_) => {
                self.deferred.remove(key);
                false
            }
            None => false,
        }
    }

    fn spawn_seed(&mut self) {
        let key = FetchKey::Seed;
        if self.is_fetching(&key) || self.is_deferred(&key) {
            return;
        }
        let filter = TaskListFilter::unfinished_for_study(
            self.tracker.study_id(),
            &self.settings.blocking_types,
        );
        let query = Arc::clone(&self.query);
        let generation = self.generation;
        let handle = self.fetches.spawn(async move {
            let result = query.fetch_tasks(&filter).await;
            FetchResult {
                generation,
                outcome: FetchOutcome::Seed(result),
            }
        });
        self.in_flight.insert(handle.id(), key);
    }

    fn spawn_task_fetch(&mut self, id: String) {
        let key = FetchKey::Task(id.clone());
        if self.is_fetching(&key) || self.is_deferred(&key) {
            return;
        }
        let query = Arc::clone(&self.query);
        let generation = self.generation;
        let handle = self.fetches.spawn(async move {
            let result = query.fetch_task(&id).await;
            FetchResult {
                generation,
                outcome: FetchOutcome::Task { id, result },
            }
        });
        self.in_flight.insert(handle.id(), key);
    }

    fn reconcile_unfinished(&mut self) {
        for id in self.tracker.pending_ids() {
            self.spawn_task_fetch(id);
        }
    }

    async fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Subscribe(channel) => self.subscribe(&channel).await,
                Effect::Unsubscribe(channel) => self.unsubscribe(&channel).await,
                Effect::Reconcile(id) => self.spawn_task_fetch(id),
            }
        }
    }

    async fn subscribe(&self, channel: &Channel) {
        if let Err(err) = self.channel.subscribe(channel).await {
            warn!(%channel, error = %err, "subscribe failed");
        }
    }

    async fn unsubscribe(&self, channel: &Channel) {
        if let Err(err) = self.channel.unsubscribe(channel).await {
            warn!(%channel, error = %err, "unsubscribe failed");
        }
    }

    fn publish(&mut self) {
        let revision = self.tracker.revision();
        if self.published_revision == Some(revision) || !self.liveness.is_current(self.generation) {
            return;
        }
        self.published_revision = Some(revision);
        self.view_tx.send_replace(self.tracker.view());
    }

    async fn teardown(&mut self) {
        self.fetches.abort_all();
        let mut channels = self.tracker.held_channels();
        channels.extend(self.study_channel());
        for channel in &channels {
            self.unsubscribe(channel).await;
        }
        self.tracker.force_clear();
        debug!(
            generation = self.generation,
            released = channels.len(),
            "reconciler worker torn down"
        );
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<WsEvent>>,
) -> std::result::Result<WsEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
