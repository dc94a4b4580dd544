/*
[INPUT]:  Platform event WebSocket stream + per-channel subscriptions.
[OUTPUT]: Task events fanned out via `broadcast` + connection state via `watch`.
[POS]:    Transport layer - shared event channel (no reconciliation logic).
[UPDATE]: When changing subscription frames, reconnection backoff, or shutdown semantics.
*/

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskwatch_adapter::{Channel, EventStream, Result, TaskwatchError, WsEvent};

use crate::ports::EventChannel;

const DEFAULT_MAX_RETRIES: u32 = 10;
const EVENT_FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected { retry_count: u32 },
    Paused,
}

#[derive(Debug)]
enum HubCommand {
    Subscribe(Channel),
    Unsubscribe(Channel),
    Shutdown,
}

/// Event hub that owns the platform WebSocket and distributes task events.
///
/// The connection is opened on spawn and kept up whether or not any channel
/// is held: task creation events are pushed to every client without a
/// channel. Subscriptions are remembered and replayed after every reconnect.
#[derive(Debug)]
pub struct EventHub {
    events: broadcast::Sender<WsEvent>,
    connection_state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
    #[cfg_attr(not(test), allow(dead_code))]
    cmd_rx: Option<mpsc::UnboundedReceiver<HubCommand>>,
    worker_handle: Option<tokio::task::JoinHandle<()>>,
}

impl EventHub {
    /// Create the hub and start its connection worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(ws_url: impl Into<String>, token: Option<String>) -> Self {
        let mut hub = Self::new_internal();
        if let Some(cmd_rx) = hub.cmd_rx.take() {
            let worker = EventHubWorker::new(
                ws_url.into(),
                token,
                cmd_rx,
                hub.events.clone(),
                hub.connection_state.clone(),
                hub.shutdown.clone(),
            );
            hub.worker_handle = Some(tokio::spawn(worker.run()));
        }
        hub
    }

    #[cfg(test)]
    fn new_for_test() -> Self {
        Self::new_internal()
    }

    fn new_internal() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        let (connection_state, _rx) =
            watch::channel(ConnectionState::Disconnected { retry_count: 0 });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        Self {
            events,
            connection_state,
            shutdown: CancellationToken::new(),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            worker_handle: None,
        }
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// Trigger a graceful shutdown of the internal worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let _ = self.cmd_tx.send(HubCommand::Shutdown);
    }

    /// Shut down and wait for the worker to exit.
    pub async fn shutdown_and_wait(&mut self) {
        self.shutdown();
        if let Some(handle) = self.worker_handle.take()
            && let Err(err) = handle.await
        {
            warn!(error = %err, "event hub worker ended abnormally");
        }
    }

    fn send_command(&self, cmd: HubCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| TaskwatchError::WebSocket("event hub stopped".to_string()))
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl EventChannel for EventHub {
    async fn subscribe(&self, channel: &Channel) -> Result<()> {
        self.send_command(HubCommand::Subscribe(channel.clone()))
    }

    async fn unsubscribe(&self, channel: &Channel) -> Result<()> {
        self.send_command(HubCommand::Unsubscribe(channel.clone()))
    }

    fn listen(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug)]
struct EventHubWorker {
    ws_url: String,
    token: Option<String>,
    channels: BTreeSet<Channel>,
    cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
    events: broadcast::Sender<WsEvent>,
    connection_state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    max_retries: u32,
}

impl EventHubWorker {
    fn new(
        ws_url: String,
        token: Option<String>,
        cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
        events: broadcast::Sender<WsEvent>,
        connection_state: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ws_url,
            token,
            channels: BTreeSet::new(),
            cmd_rx,
            events,
            connection_state,
            shutdown,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    async fn run(mut self) {
        let mut retry_count: u32 = 0;

        'run: loop {
            if self.shutdown.is_cancelled() {
                let _ = self
                    .connection_state
                    .send_replace(ConnectionState::Disconnected { retry_count });
                break 'run;
            }

            let _ = self.connection_state.send_replace(ConnectionState::Paused);

            match self.connect_once().await {
                Ok((ws, mut rx)) => {
                    retry_count = 0;

                    let _ = self.connection_state.send_replace(ConnectionState::Connected);
                    info!(channels = self.channels.len(), "event hub connected");

                    match self.stream_loop(&ws, &mut rx).await {
                        StreamExit::Shutdown => {
                            drop(rx);
                            ws.close().await;
                            let _ = self
                                .connection_state
                                .send_replace(ConnectionState::Disconnected { retry_count });
                            break 'run;
                        }
                        StreamExit::Disconnected => {
                            drop(rx);
                            ws.close().await;
                            let _ = self.connection_state.send_replace(ConnectionState::Paused);
                            continue 'run;
                        }
                    }
                }
                Err(err) => {
                    retry_count = retry_count.saturating_add(1);

                    let _ = self
                        .connection_state
                        .send_replace(ConnectionState::Disconnected { retry_count });

                    if retry_count >= self.max_retries {
                        warn!(retry_count, max_retries = self.max_retries, error = %err, "event hub gave up reconnecting");
                        break 'run;
                    }

                    let backoff = backoff_duration(retry_count);
                    warn!(retry_count, ?backoff, error = %err, "event hub connect failed; retrying with backoff");

                    let sleep = tokio::time::sleep(backoff);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                let _ = self.connection_state.send_replace(ConnectionState::Disconnected { retry_count });
                                break 'run;
                            }
                            _ = &mut sleep => break,
                            cmd = self.cmd_rx.recv() => {
                                if !self.apply_offline(cmd) {
                                    let _ = self.connection_state.send_replace(ConnectionState::Disconnected { retry_count });
                                    break 'run;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Record a command while no connection is up. Returns false on shutdown.
    fn apply_offline(&mut self, cmd: Option<HubCommand>) -> bool {
        match cmd {
            Some(HubCommand::Subscribe(channel)) => {
                self.channels.insert(channel);
                true
            }
            Some(HubCommand::Unsubscribe(channel)) => {
                self.channels.remove(&channel);
                true
            }
            Some(HubCommand::Shutdown) | None => false,
        }
    }

    async fn connect_once(&self) -> Result<(EventStream, mpsc::Receiver<WsEvent>)> {
        let mut ws = EventStream::new();

        info!(ws_url = %self.ws_url, "connecting to event stream");
        ws.connect(&self.ws_url, self.token.as_deref()).await?;
        for channel in &self.channels {
            ws.subscribe(channel).await?;
        }

        let rx = ws.take_receiver().ok_or_else(|| {
            TaskwatchError::WebSocket("event stream receiver already taken".to_string())
        })?;

        Ok((ws, rx))
    }

    async fn stream_loop(
        &mut self,
        ws: &EventStream,
        rx: &mut mpsc::Receiver<WsEvent>,
    ) -> StreamExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("event hub shutdown requested");
                    return StreamExit::Shutdown;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(HubCommand::Subscribe(channel)) => {
                            if self.channels.insert(channel.clone())
                                && let Err(err) = ws.subscribe(&channel).await
                            {
                                warn!(%channel, error = %err, "failed to subscribe while connected");
                                return StreamExit::Disconnected;
                            }
                        }
                        Some(HubCommand::Unsubscribe(channel)) => {
                            if self.channels.remove(&channel)
                                && let Err(err) = ws.unsubscribe(&channel).await
                            {
                                warn!(%channel, error = %err, "failed to unsubscribe while connected");
                                return StreamExit::Disconnected;
                            }
                        }
                        Some(HubCommand::Shutdown) | None => {
                            return StreamExit::Shutdown;
                        }
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(WsEvent::Other) => {}
                        Some(event) => {
                            // No listener is not an error: events are best-effort.
                            let _ = self.events.send(event);
                        }
                        None => {
                            warn!("event stream ended");
                            return StreamExit::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Disconnected,
    Shutdown,
}

fn backoff_duration(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(63);
    let secs = 1u64 << exp;
    Duration::from_secs(secs.min(30))
}
