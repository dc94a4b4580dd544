/*
[INPUT]:  WebSocket configuration and subscription channels
[OUTPUT]: Real-time task events
[POS]:    WebSocket layer - real-time event streams
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{EventStream, WsEvent};
pub use message::{Channel, ProgressPayload, TaskEventPayload};
