/*
[INPUT]:  Public API exports for the taskwatch crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod event_hub;
pub mod ports;
pub mod reconciler;
pub mod render;
pub mod tracker;

// Re-export main types for convenience
pub use config::TaskwatchConfig;
pub use event_hub::{ConnectionState, EventHub};
pub use ports::{EventChannel, TaskQuery};
pub use reconciler::{ReconcilerSettings, TaskReconciler};
pub use render::render_view;
pub use tracker::{DismissError, Progress, TaskView, TrackedStatus, TrackedTask};
