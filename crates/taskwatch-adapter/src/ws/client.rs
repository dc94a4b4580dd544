/*
[INPUT]:  WebSocket URL and optional access token
[OUTPUT]: Task events via mpsc channel, subscribe/unsubscribe frames
[POS]:    WebSocket layer - real-time event stream handling
[UPDATE]: When adding new event types or changing connection logic
*/

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};
use url::Url;

use crate::http::{Result, TaskwatchError};
use crate::types::TaskType;
use crate::ws::message::{Channel, ProgressPayload, TaskEventPayload};

const EVENT_BUFFER: usize = 100;
const MESSAGE_SAMPLE_LIMIT: usize = 3;
const SUBSCRIPTION_LOG_LIMIT: usize = 10;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static SUBSCRIBE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static OTHER_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Task notifications pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    TaskAdded {
        id: String,
        task_type: Option<TaskType>,
        study_id: Option<String>,
        message: String,
    },
    TaskRunning {
        id: String,
    },
    TaskProgress {
        task_id: String,
        progress: u8,
    },
    TaskCompleted {
        id: String,
        message: String,
    },
    TaskFailed {
        id: String,
        message: String,
    },
    Other,
}

impl WsEvent {
    fn kind(&self) -> &'static str {
        match self {
            WsEvent::TaskAdded { .. } => "task_added",
            WsEvent::TaskRunning { .. } => "task_running",
            WsEvent::TaskProgress { .. } => "task_progress",
            WsEvent::TaskCompleted { .. } => "task_completed",
            WsEvent::TaskFailed { .. } => "task_failed",
            WsEvent::Other => "other",
        }
    }

    /// Parse a text frame; unknown event types yield `WsEvent::Other`.
    pub fn parse(text: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(text)?;
        let event = match raw.event_type.as_str() {
            "TASK_ADDED" => {
                let payload: TaskEventPayload = serde_json::from_value(raw.payload)?;
                WsEvent::TaskAdded {
                    id: payload.id,
                    task_type: payload.task_type,
                    study_id: payload.study_id,
                    message: payload.message,
                }
            }
            "TASK_RUNNING" => {
                let payload: TaskEventPayload = serde_json::from_value(raw.payload)?;
                WsEvent::TaskRunning { id: payload.id }
            }
            "TASK_PROGRESS" | "TS_GENERATION_PROGRESS" => {
                let payload: ProgressPayload = serde_json::from_value(raw.payload)?;
                WsEvent::TaskProgress {
                    progress: payload.percent(),
                    task_id: payload.task_id,
                }
            }
            "TASK_COMPLETED" => {
                let payload: TaskEventPayload = serde_json::from_value(raw.payload)?;
                WsEvent::TaskCompleted {
                    id: payload.id,
                    message: payload.message,
                }
            }
            "TASK_FAILED" => {
                let payload: TaskEventPayload = serde_json::from_value(raw.payload)?;
                WsEvent::TaskFailed {
                    id: payload.id,
                    message: payload.message,
                }
            }
            _ => WsEvent::Other,
        };
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// WebSocket client for the platform event stream
#[derive(Debug)]
pub struct EventStream {
    message_tx: Option<mpsc::Sender<WsEvent>>,
    message_rx: Option<mpsc::Receiver<WsEvent>>,
    outbound_tx: Arc<Mutex<Option<mpsc::Sender<WsMessage>>>>,
}

impl EventStream {
    /// Create a new, unconnected event stream
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            message_tx: Some(tx),
            message_rx: Some(rx),
            outbound_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the event receiver
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<WsEvent>> {
        self.message_rx.take()
    }

    /// Connect to the event stream, passing the token as a query parameter.
    ///
    /// A stream connects once; the receiver yields `None` after the connection ends.
    pub async fn connect(&mut self, url: &str, token: Option<&str>) -> Result<()> {
        let url = stream_url(url, token)?;
        let Some(message_tx) = self.message_tx.take() else {
            return Err(TaskwatchError::WebSocket(
                "event stream already used".to_string(),
            ));
        };
        let (ws_stream, _response) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(err) => {
                self.message_tx = Some(message_tx);
                return Err(TaskwatchError::WebSocket(err.to_string()));
            }
        };
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(EVENT_BUFFER);
        let outbound_state = self.outbound_tx.clone();

        {
            let mut guard = outbound_state.lock().await;
            if guard.is_some() {
                return Err(TaskwatchError::WebSocket(
                    "WebSocket already connected".to_string(),
                ));
            }
            *guard = Some(outbound_tx);
        }

        let outbound_state_for_task = outbound_state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Close(_))) => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(message)) => {
                                if let Some(parsed) = Self::parse_message(message)
                                    && message_tx.send(parsed).await.is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(_)) | None => {
                                break;
                            }
                        }
                    }
                }
            }

            let mut guard = outbound_state_for_task.lock().await;
            *guard = None;
        });

        Ok(())
    }

    /// Close the connection; the background task sends a close frame and exits
    pub async fn close(&self) {
        self.outbound_tx.lock().await.take();
    }

    /// Subscribe to a channel
    pub async fn subscribe(&self, channel: &Channel) -> Result<()> {
        self.send_action("SUBSCRIBE", channel).await
    }

    /// Unsubscribe from a channel
    pub async fn unsubscribe(&self, channel: &Channel) -> Result<()> {
        self.send_action("UNSUBSCRIBE", channel).await
    }

    async fn send_action(&self, action: &'static str, channel: &Channel) -> Result<()> {
        let sender = {
            let guard = self.outbound_tx.lock().await;
            guard
                .clone()
                .ok_or_else(|| TaskwatchError::WebSocket("WebSocket not connected".to_string()))?
        };

        let message = action_frame(action, channel);
        sender
            .send(WsMessage::Text(message.to_string().into()))
            .await
            .map_err(|_| TaskwatchError::WebSocket("WebSocket send channel closed".to_string()))?;

        log_subscription_sent(action, channel);

        Ok(())
    }

    fn parse_message(message: WsMessage) -> Option<WsEvent> {
        let text: String = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok()?,
            _ => return None,
        };

        match WsEvent::parse(&text) {
            Ok(WsEvent::Other) => {
                log_other_message_once(&text);
                Some(WsEvent::Other)
            }
            Ok(parsed) => {
                log_message_sample_once(&parsed);
                Some(parsed)
            }
            Err(err) => {
                log_parse_fail_once(&err, &text);
                None
            }
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

fn stream_url(url: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(url)?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

fn action_frame(action: &str, channel: &Channel) -> serde_json::Value {
    serde_json::json!({
        "action": action,
        "payload": channel.to_string(),
    })
}

fn log_subscription_sent(action: &'static str, channel: &Channel) {
    let count = SUBSCRIBE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= SUBSCRIPTION_LOG_LIMIT {
        debug!(action, %channel, "ws subscription sent");
        return;
    }

    info!(
        sample_index = count + 1,
        sample_limit = SUBSCRIPTION_LOG_LIMIT,
        action,
        %channel,
        "ws subscription sent"
    );
}

fn log_message_sample_once(event: &WsEvent) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= MESSAGE_SAMPLE_LIMIT {
        return;
    }

    info!(
        sample_index = count + 1,
        sample_limit = MESSAGE_SAMPLE_LIMIT,
        kind = event.kind(),
        "ws message sample"
    );
}

fn log_other_message_once(raw: &str) {
    let count = OTHER_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < OTHER_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            "ws message type unrecognized"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message type unrecognized"
        );
    }
}

fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
