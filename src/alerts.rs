//! Alert delivery: persist the annotated frame, index it, notify.
//!
//! Order matters. The JPEG artifact is written first so neither an index
//! failure nor a notification failure can lose it; index and notification
//! failures are logged and the stream keeps running.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::engine::AlertEvent;
use crate::frame::{encode_jpeg, AnnotatedFrame, DEFAULT_JPEG_QUALITY};
use crate::notify::{format_alert_message, Notifier};
use crate::storage::{AlertIndex, AlertRecord};

/// Alert index shared by the sink, the supervisor and the API.
pub type SharedAlertIndex = Arc<Mutex<dyn AlertIndex>>;

const DIGEST_PREFIX_LEN: usize = 12;

pub struct AlertSink {
    alert_dir: PathBuf,
    index: SharedAlertIndex,
    notifier: Arc<dyn Notifier>,
    jpeg_quality: u8,
}

impl AlertSink {
    pub fn new<P: AsRef<Path>>(
        alert_dir: P,
        index: SharedAlertIndex,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let alert_dir = alert_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&alert_dir)
            .with_context(|| format!("create alert directory {}", alert_dir.display()))?;
        Ok(Self {
            alert_dir,
            index,
            notifier,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn alert_dir(&self) -> &Path {
        &self.alert_dir
    }

    pub fn index(&self) -> SharedAlertIndex {
        self.index.clone()
    }

    /// Persist, index and announce one alert from `stream`.
    ///
    /// Only a failure to write the artifact is returned as an error.
    pub fn deliver(&self, stream: &str, event: &AlertEvent<AnnotatedFrame>) -> Result<AlertRecord> {
        let jpeg = encode_jpeg(&event.annotated_frame, self.jpeg_quality)?;
        let now = Local::now();
        let name = artifact_name(&now.format("%Y%m%d-%H%M%S").to_string(), &jpeg);
        let path = self.alert_dir.join(&name);
        std::fs::write(&path, &jpeg)
            .with_context(|| format!("write alert image {}", path.display()))?;

        let record = AlertRecord::new(name, now, event.confidence, stream);
        log::warn!(
            "ALERT stream={} confidence={:.2} streak={} stable_hits={} image={}",
            stream,
            event.confidence,
            event.frame_streak,
            event.stable_hits,
            path.display()
        );

        match self.index.lock() {
            Ok(mut index) => {
                if let Err(e) = index.record(&record) {
                    log::error!("alert index write failed for {}: {:#}", record.image, e);
                }
            }
            Err(_) => log::error!("alert index lock poisoned; {} not indexed", record.image),
        }

        let message = format_alert_message(event.confidence, &record.timestamp);
        if let Err(e) = self.notifier.notify(&message, Some(&path)) {
            log::error!(
                "{} notification failed for {}: {:#}",
                self.notifier.name(),
                record.image,
                e
            );
        }

        Ok(record)
    }

    /// Path of a stored artifact, refusing anything that is not a plain file
    /// name inside the alert directory.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        resolve_artifact(&self.alert_dir, name)
    }
}

/// `alert_<stamp>_<sha256 prefix>.jpg`
pub fn artifact_name(stamp: &str, jpeg: &[u8]) -> String {
    let digest = Sha256::digest(jpeg);
    let hex = hex::encode(digest);
    format!("alert_{}_{}.jpg", stamp, &hex[..DIGEST_PREFIX_LEN])
}

pub fn resolve_artifact(alert_dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if !valid {
        return Err(anyhow!("invalid artifact name '{}'", name));
    }
    Ok(alert_dir.join(name))
}
