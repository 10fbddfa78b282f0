//! Runs streams on their own threads.
//!
//! Every started stream gets a fresh engine, a fresh source and its own
//! cancellation token. Stopping one stream never touches another.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crate::ingest::SourceKind;
use crate::preview::PreviewSlot;
use crate::stream::{CancellationToken, Pipeline, StreamReport, StreamRequest, StreamStatus};

/// Listing entry for one stream.
#[derive(Clone, Debug, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub kind: SourceKind,
    pub source: String,
    pub preset: Option<String>,
    pub status: StreamStatus,
    pub cancelled: bool,
}

/// Finished streams kept for `status`/`join` before the oldest are dropped.
pub const FINISHED_RETENTION: usize = 32;

struct StreamHandle {
    seq: u64,
    kind: SourceKind,
    source: String,
    preset: Option<String>,
    cancel: CancellationToken,
    preview: PreviewSlot,
    join: Option<JoinHandle<StreamReport>>,
    report: Option<StreamReport>,
}

impl StreamHandle {
    /// Collect the report if the worker has exited.
    fn reap(&mut self, id: &str) {
        if self.report.is_some() {
            return;
        }
        if self.join.as_ref().is_some_and(|join| join.is_finished()) {
            if let Some(join) = self.join.take() {
                self.report = Some(collect(id, &self.source, join));
            }
        }
    }

    fn status(&self) -> StreamStatus {
        self.report
            .as_ref()
            .map(|r| r.status.clone())
            .unwrap_or(StreamStatus::Running)
    }
}

fn collect(id: &str, source: &str, join: JoinHandle<StreamReport>) -> StreamReport {
    join.join().unwrap_or_else(|_| {
        log::error!("stream {} worker panicked", id);
        StreamReport {
            id: id.to_string(),
            source: source.to_string(),
            frames_processed: 0,
            alerts: Vec::new(),
            status: StreamStatus::Failed("stream worker panicked".to_string()),
        }
    })
}

/// Reap exited workers and drop the oldest finished entries beyond `keep`.
fn evict_finished(streams: &mut BTreeMap<String, StreamHandle>, keep: usize) -> usize {
    for (id, handle) in streams.iter_mut() {
        handle.reap(id);
    }
    let mut finished: Vec<(u64, String)> = streams
        .iter()
        .filter(|(_, handle)| handle.report.is_some())
        .map(|(id, handle)| (handle.seq, id.clone()))
        .collect();
    if finished.len() <= keep {
        return 0;
    }
    finished.sort_unstable();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        streams.remove(&id);
    }
    excess
}

pub struct StreamSupervisor {
    pipeline: Pipeline,
    streams: Mutex<BTreeMap<String, StreamHandle>>,
    next_id: AtomicU64,
    finished_retention: usize,
}

impl StreamSupervisor {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            streams: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            finished_retention: FINISHED_RETENTION,
        }
    }

    /// Override how many finished streams stay queryable.
    pub fn with_finished_retention(mut self, keep: usize) -> Self {
        self.finished_retention = keep;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Start a stream on a new thread and return its id.
    pub fn start(&self, request: StreamRequest) -> Result<String> {
        let kind = request.source.kind();
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}", kind.as_str(), n);
        let cancel = CancellationToken::new();
        let preview = PreviewSlot::new();

        let mut handle = StreamHandle {
            seq: n,
            kind,
            source: request.source.to_string(),
            preset: request.preset.map(|p| p.to_string()),
            cancel: cancel.clone(),
            preview: preview.clone(),
            join: None,
            report: None,
        };

        let pipeline = self.pipeline.clone();
        let worker_id = id.clone();
        let join = thread::Builder::new()
            .name(format!("stream-{}", id))
            .spawn(move || pipeline.run(&worker_id, &request, &cancel, &preview))
            .context("spawn stream worker")?;
        handle.join = Some(join);

        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        let evicted = evict_finished(&mut streams, self.finished_retention);
        if evicted > 0 {
            log::debug!("dropped {} finished stream(s) from the table", evicted);
        }
        streams.insert(id.clone(), handle);
        log::info!("stream {} scheduled", id);
        Ok(id)
    }

    /// Cancel one stream. Returns `false` for unknown ids.
    pub fn stop(&self, id: &str) -> Result<bool> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        match streams.get(id) {
            Some(handle) => {
                if !handle.cancel.is_cancelled() {
                    log::info!("stream {} stop requested", id);
                }
                handle.cancel.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel every stream that is still running. Safe to call repeatedly;
    /// returns how many streams were newly cancelled.
    pub fn stop_all(&self) -> Result<usize> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        let mut cancelled = 0;
        for (id, handle) in streams.iter_mut() {
            handle.reap(id);
            if handle.report.is_none() && !handle.cancel.is_cancelled() {
                handle.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            log::info!("stop requested for {} stream(s)", cancelled);
        }
        Ok(cancelled)
    }

    pub fn list(&self) -> Result<Vec<StreamInfo>> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        Ok(streams
            .iter_mut()
            .map(|(id, handle)| {
                handle.reap(id);
                StreamInfo {
                    id: id.clone(),
                    kind: handle.kind,
                    source: handle.source.clone(),
                    preset: handle.preset.clone(),
                    status: handle.status(),
                    cancelled: handle.cancel.is_cancelled(),
                }
            })
            .collect())
    }

    pub fn status(&self, id: &str) -> Result<Option<StreamStatus>> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        Ok(streams.get_mut(id).map(|handle| {
            handle.reap(id);
            handle.status()
        }))
    }

    /// Preview slot of a known stream.
    pub fn preview(&self, id: &str) -> Result<Option<PreviewSlot>> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        Ok(streams.get(id).map(|handle| handle.preview.clone()))
    }

    /// Block until a stream ends and return its report.
    pub fn join(&self, id: &str) -> Result<StreamReport> {
        let (join, source) = {
            let mut streams = self
                .streams
                .lock()
                .map_err(|_| anyhow!("stream table lock poisoned"))?;
            let handle = streams
                .get_mut(id)
                .ok_or_else(|| anyhow!("unknown stream '{}'", id))?;
            if let Some(report) = &handle.report {
                return Ok(report.clone());
            }
            (handle.join.take(), handle.source.clone())
        };
        let join = join.ok_or_else(|| anyhow!("stream '{}' is already being joined", id))?;

        let report = collect(id, &source, join);
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        if let Some(handle) = streams.get_mut(id) {
            handle.report = Some(report.clone());
        }
        Ok(report)
    }

    /// Block until every stream has ended.
    pub fn join_all(&self) -> Result<Vec<StreamReport>> {
        let ids: Vec<String> = {
            let streams = self
                .streams
                .lock()
                .map_err(|_| anyhow!("stream table lock poisoned"))?;
            streams.keys().cloned().collect()
        };
        ids.iter().map(|id| self.join(id)).collect()
    }

    /// Drop finished streams from the table.
    pub fn prune_finished(&self) -> Result<usize> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream table lock poisoned"))?;
        for (id, handle) in streams.iter_mut() {
            handle.reap(id);
        }
        let before = streams.len();
        streams.retain(|_, handle| handle.report.is_none());
        Ok(before - streams.len())
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        if let Ok(streams) = self.streams.get_mut() {
            for handle in streams.values() {
                handle.cancel.cancel();
            }
        }
    }
}
