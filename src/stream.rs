//! One stream's acquisition loop.
//!
//! A stream owns its source, its engine and its cancellation token. The loop
//! reads a frame, runs the shared detector, feeds the engine and hands any
//! alert to the sink, until the source ends, the token is cancelled or the
//! read-failure policy gives up.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alerts::AlertSink;
use crate::clock::{Clock, MonotonicClock};
use crate::detect::{BackendRegistry, DetectParams, DetectionBox, SharedBackend};
use crate::engine::{AlertEngine, EngineConfig, Preset};
use crate::frame::{encode_jpeg, Frame};
use crate::ingest::{open_source, FrameSource, SourceSpec};
use crate::preview::{PreviewSlot, PREVIEW_JPEG_QUALITY};
use crate::storage::AlertRecord;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Cooperative stop signal for one stream.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns `false`
    /// when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

/// What a stream does when its source yields no frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFailurePolicy {
    /// The source is finite: a missing frame ends the stream.
    EndOfStream,
    /// Wait and read again, indefinitely.
    Retry { delay: Duration },
    /// Release and reopen the source up to `attempts` times.
    Reconnect { attempts: u32, delay: Duration },
}

/// Timing knobs for the read-failure policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverySettings {
    pub reconnect_attempts: u32,
    pub reconnect_wait: Duration,
    pub live_retry: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_wait: Duration::from_secs(2),
            live_retry: Duration::from_millis(500),
        }
    }
}

impl ReadFailurePolicy {
    pub fn for_preset(preset: Preset, recovery: &RecoverySettings) -> Self {
        match preset {
            Preset::FilePlayback => ReadFailurePolicy::EndOfStream,
            Preset::LiveStream => ReadFailurePolicy::Retry {
                delay: recovery.live_retry,
            },
            Preset::Interactive => ReadFailurePolicy::Reconnect {
                attempts: recovery.reconnect_attempts,
                delay: recovery.reconnect_wait,
            },
        }
    }
}

/// Everything needed to start one stream.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub source: SourceSpec,
    pub preset: Option<Preset>,
    pub config: EngineConfig,
    pub policy: ReadFailurePolicy,
    /// Detector backend name; `None` uses the registry default.
    pub detector: Option<String>,
}

impl StreamRequest {
    pub fn new(source: SourceSpec, preset: Preset) -> Self {
        Self {
            source,
            preset: Some(preset),
            config: preset.engine_config(),
            policy: ReadFailurePolicy::for_preset(preset, &RecoverySettings::default()),
            detector: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_detector(mut self, name: impl Into<String>) -> Self {
        self.detector = Some(name.into());
        self
    }
}

/// Terminal (or current) state of a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Running,
    /// The source ran out of frames.
    Completed,
    /// Cancelled through its token.
    Stopped,
    /// The source was lost and could not be reopened.
    Disconnected,
    Failed(String),
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamStatus::Running)
    }
}

/// Outcome of one stream run.
#[derive(Clone, Debug, Serialize)]
pub struct StreamReport {
    pub id: String,
    pub source: String,
    pub frames_processed: u64,
    pub alerts: Vec<AlertRecord>,
    pub status: StreamStatus,
}

/// Shared services every stream worker uses.
#[derive(Clone)]
pub struct Pipeline {
    detectors: Arc<BackendRegistry>,
    sink: Arc<AlertSink>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(detectors: Arc<BackendRegistry>, sink: Arc<AlertSink>) -> Self {
        Self {
            detectors,
            sink,
            clock: Arc::new(MonotonicClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn detectors(&self) -> &Arc<BackendRegistry> {
        &self.detectors
    }

    pub fn sink(&self) -> &Arc<AlertSink> {
        &self.sink
    }

    /// Run a stream to completion on the calling thread, publishing
    /// annotated frames to `preview` while it has viewers. The slot is closed
    /// when the stream ends.
    pub fn run(
        &self,
        id: &str,
        request: &StreamRequest,
        cancel: &CancellationToken,
        preview: &PreviewSlot,
    ) -> StreamReport {
        let report = self.run_inner(id, request, cancel, preview);
        preview.close();
        report
    }

    fn run_inner(
        &self,
        id: &str,
        request: &StreamRequest,
        cancel: &CancellationToken,
        preview: &PreviewSlot,
    ) -> StreamReport {
        let mut report = StreamReport {
            id: id.to_string(),
            source: request.source.to_string(),
            frames_processed: 0,
            alerts: Vec::new(),
            status: StreamStatus::Running,
        };

        let prepared = AlertEngine::new(request.config.clone())
            .and_then(|engine| {
                let detector = self.detectors.resolve(request.detector.as_deref())?;
                Ok((engine, detector))
            })
            .and_then(|(engine, detector)| {
                let mut source = open_source(&request.source)?;
                source.open()?;
                Ok((engine, detector, source))
            });
        let (mut engine, detector, mut source) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("stream {}: failed to start: {:#}", id, e);
                report.status = StreamStatus::Failed(format!("{:#}", e));
                return report;
            }
        };

        log::info!(
            "stream {} started: source={} preset={} policy={:?}",
            id,
            request.source,
            request.preset.map(|p| p.as_str()).unwrap_or("custom"),
            request.policy
        );
        let status = self.drive(
            id,
            request,
            cancel,
            &mut engine,
            &detector,
            source.as_mut(),
            preview,
            &mut report,
        );
        report.status = status;
        source.release();
        log::info!(
            "stream {} finished: {:?} after {} frames, {} alerts",
            id,
            report.status,
            report.frames_processed,
            report.alerts.len()
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        id: &str,
        request: &StreamRequest,
        cancel: &CancellationToken,
        engine: &mut AlertEngine,
        detector: &SharedBackend,
        source: &mut dyn FrameSource,
        preview: &PreviewSlot,
        report: &mut StreamReport,
    ) -> StreamStatus {
        let params = request.config.detect_params();
        let target_class = request.config.target_class;
        let mut last_health_log = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return StreamStatus::Stopped;
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("stream {}: frame read failed: {:#}", id, e);
                    None
                }
            };
            let Some(frame) = frame else {
                match request.policy {
                    ReadFailurePolicy::EndOfStream => return StreamStatus::Completed,
                    ReadFailurePolicy::Retry { delay } => {
                        log::debug!("stream {}: no frame, retrying in {:?}", id, delay);
                        if !cancel.sleep(delay) {
                            return StreamStatus::Stopped;
                        }
                        continue;
                    }
                    ReadFailurePolicy::Reconnect { attempts, delay } => {
                        log::warn!("stream {}: no frame received, reconnecting", id);
                        match reconnect(id, source, cancel, attempts, delay) {
                            Reconnect::Restored => continue,
                            Reconnect::Cancelled => return StreamStatus::Stopped,
                            Reconnect::GaveUp => {
                                log::error!(
                                    "stream {}: could not reconnect after {} attempts",
                                    id,
                                    attempts
                                );
                                return StreamStatus::Disconnected;
                            }
                        }
                    }
                }
            };

            report.frames_processed += 1;
            let boxes = match detect(detector, &frame, &params) {
                Ok(boxes) => boxes,
                Err(e) => {
                    log::warn!("stream {}: detector failed on frame {}: {:#}", id, frame.index, e);
                    continue;
                }
            };

            let now = self.clock.now();
            let event = engine.ingest_with(&boxes, now, |best| {
                frame.annotate(&boxes, target_class, Some(&best.bbox))
            });
            if preview.is_watched() {
                let published = encode_jpeg(
                    &frame.annotate(&boxes, target_class, None),
                    PREVIEW_JPEG_QUALITY,
                )
                .and_then(|jpeg| preview.publish(jpeg));
                if let Err(e) = published {
                    log::debug!("stream {}: preview frame dropped: {:#}", id, e);
                }
            }
            if let Some(event) = event {
                if cancel.is_cancelled() {
                    return StreamStatus::Stopped;
                }
                match self.sink.deliver(id, &event) {
                    Ok(record) => report.alerts.push(record),
                    Err(e) => log::error!("stream {}: failed to persist alert: {:#}", id, e),
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "stream {} health: frames={} alerts={} regime={:?}",
                    id,
                    report.frames_processed,
                    report.alerts.len(),
                    engine.regime()
                );
                last_health_log = Instant::now();
            }
        }
    }
}

fn detect(
    detector: &SharedBackend,
    frame: &Frame,
    params: &DetectParams,
) -> Result<Vec<DetectionBox>> {
    let mut guard = detector
        .lock()
        .map_err(|_| anyhow!("detector lock poisoned"))?;
    guard.detect(frame, params)
}

enum Reconnect {
    Restored,
    Cancelled,
    GaveUp,
}

fn reconnect(
    id: &str,
    source: &mut dyn FrameSource,
    cancel: &CancellationToken,
    attempts: u32,
    delay: Duration,
) -> Reconnect {
    source.release();
    for attempt in 1..=attempts {
        if !cancel.sleep(delay) {
            return Reconnect::Cancelled;
        }
        match source.open() {
            Ok(()) => {
                log::info!("stream {}: reconnected on attempt {}", id, attempt);
                return Reconnect::Restored;
            }
            Err(e) => {
                log::warn!(
                    "stream {}: reconnect attempt {}/{} failed: {:#}",
                    id,
                    attempt,
                    attempts,
                    e
                );
            }
        }
    }
    Reconnect::GaveUp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(1)));
        token.cancel();
        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn presets_choose_policies() {
        let recovery = RecoverySettings::default();
        assert_eq!(
            ReadFailurePolicy::for_preset(Preset::FilePlayback, &recovery),
            ReadFailurePolicy::EndOfStream
        );
        assert_eq!(
            ReadFailurePolicy::for_preset(Preset::LiveStream, &recovery),
            ReadFailurePolicy::Retry {
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(
            ReadFailurePolicy::for_preset(Preset::Interactive, &recovery),
            ReadFailurePolicy::Reconnect {
                attempts: 5,
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn status_serializes_snake_case() -> Result<()> {
        assert_eq!(serde_json::to_string(&StreamStatus::Disconnected)?, "\"disconnected\"");
        assert_eq!(
            serde_json::to_string(&StreamStatus::Failed("boom".into()))?,
            "{\"failed\":\"boom\"}"
        );
        Ok(())
    }
}
