//! Weapon Sentinel
//!
//! Turns per-frame weapon detections from video sources into stabilized,
//! rate-limited alerts.
//!
//! # Architecture
//!
//! Every stream runs on its own worker thread:
//!
//! 1. **Acquire**: a [`FrameSource`] (file, webcam, network or `stub://`)
//!    yields decoded frames. Missing frames are handled by the stream's
//!    [`ReadFailurePolicy`].
//! 2. **Detect**: a shared [`DetectorBackend`] from the [`BackendRegistry`]
//!    returns candidate boxes.
//! 3. **Stabilize**: the stream's own [`AlertEngine`] applies the geometric
//!    filter, streak, hard-hit, stability and cooldown gates.
//! 4. **Deliver**: the [`AlertSink`] writes the annotated JPEG, indexes it and
//!    notifies the operator.
//!
//! Streams share nothing mutable except the detector and the alert index.
//! Each has its own [`CancellationToken`], so stopping one never touches
//! another.
//!
//! # Module Structure
//!
//! - `engine`: temporal alert stabilization (presets, filter, stability)
//! - `detect`: detection types and detector backends
//! - `ingest`: frame sources
//! - `frame`: frame buffers, annotation and JPEG encoding
//! - `stream` / `supervisor`: per-stream loop and thread management
//! - `alerts` / `notify` / `storage`: artifact persistence, notification, alert index
//! - `preview`: latest annotated frame of a stream, for MJPEG viewers
//! - `config` / `api`: deployment configuration and the loopback control API

pub mod alerts;
pub mod api;
pub mod clock;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod preview;
pub mod storage;
pub mod stream;
pub mod supervisor;

pub use alerts::{AlertSink, SharedAlertIndex};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{PresetSettings, SentinelConfig};
pub use detect::{
    BackendRegistry, BoundingBox, DetectParams, DetectionBox, DetectorBackend, ScriptedBackend,
    SidecarBackend,
};
pub use engine::{AlertEngine, AlertEvent, EngineConfig, EngineState, Preset, Regime};
pub use frame::{AnnotatedFrame, Frame};
pub use ingest::{FrameSource, SourceKind, SourceSpec};
pub use notify::{LogNotifier, Notifier, TelegramNotifier};
pub use preview::{PreviewSlot, PreviewViewer};
pub use storage::{AlertIndex, AlertRecord, DirectoryAlertIndex, InMemoryAlertIndex, SqliteAlertIndex};
pub use stream::{
    CancellationToken, Pipeline, ReadFailurePolicy, RecoverySettings, StreamReport, StreamRequest,
    StreamStatus,
};
pub use supervisor::{StreamInfo, StreamSupervisor};
