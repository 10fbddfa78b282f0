use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, TimeZone};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Human-readable alert timestamp layout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted alert as listed to operators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Artifact file name inside the alert directory.
    pub image: String,
    /// Local wall-clock time of the alert, `YYYY-mm-dd HH:MM:SS`.
    pub timestamp: String,
    /// Milliseconds since the Unix epoch; the recency sort key.
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

impl AlertRecord {
    pub fn new(
        image: impl Into<String>,
        at: DateTime<Local>,
        confidence: f32,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            image: image.into(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            created_at_ms: at.timestamp_millis(),
            confidence: Some(confidence),
            stream: Some(stream.into()),
        }
    }
}

/// Where fired alerts are recorded and listed from.
pub trait AlertIndex: Send {
    fn record(&mut self, alert: &AlertRecord) -> Result<()>;

    /// The `limit` most recent alerts, newest first.
    fn recent(&mut self, limit: usize) -> Result<Vec<AlertRecord>>;
}

fn sort_newest_first(records: &mut [AlertRecord]) {
    records.sort_by(|a, b| {
        b.created_at_ms
            .cmp(&a.created_at_ms)
            .then_with(|| b.image.cmp(&a.image))
    });
}

// ----------------------------------------------------------------------------
// In-memory index
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertIndex {
    records: Vec<AlertRecord>,
}

impl InMemoryAlertIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AlertIndex for InMemoryAlertIndex {
    fn record(&mut self, alert: &AlertRecord) -> Result<()> {
        self.records.push(alert.clone());
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<AlertRecord>> {
        let mut out = self.records.clone();
        sort_newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// SQLite index
// ----------------------------------------------------------------------------

pub struct SqliteAlertIndex {
    conn: Connection,
}

impl SqliteAlertIndex {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open alert index {}", db_path))?;
        let mut index = Self { conn };
        index.ensure_schema()?;
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut index = Self {
            conn: Connection::open_in_memory()?,
        };
        index.ensure_schema()?;
        Ok(index)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at_ms INTEGER NOT NULL,
              timestamp TEXT NOT NULL,
              image TEXT NOT NULL,
              confidence REAL,
              stream TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl AlertIndex for SqliteAlertIndex {
    fn record(&mut self, alert: &AlertRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO alerts(created_at_ms, timestamp, image, confidence, stream)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                alert.created_at_ms,
                alert.timestamp,
                alert.image,
                alert.confidence.map(f64::from),
                alert.stream
            ],
        )?;
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<AlertRecord>> {
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit exceeds i64 range"))?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT image, timestamp, created_at_ms, confidence, stream
            FROM alerts ORDER BY created_at_ms DESC, id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let confidence: Option<f64> = row.get(3)?;
            out.push(AlertRecord {
                image: row.get(0)?,
                timestamp: row.get(1)?,
                created_at_ms: row.get(2)?,
                confidence: confidence.map(|c| c as f32),
                stream: row.get(4)?,
            });
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Directory index
// ----------------------------------------------------------------------------

/// Lists image artifacts straight from the alert directory by modification
/// time. Recording is a no-op; the artifact on disk is the record.
pub struct DirectoryAlertIndex {
    dir: PathBuf,
}

impl DirectoryAlertIndex {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

fn is_image_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png")
}

impl AlertIndex for DirectoryAlertIndex {
    fn record(&mut self, _alert: &AlertRecord) -> Result<()> {
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<AlertRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to list {}", self.dir.display())))
            }
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_image_file(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified_ms = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let at = Local
                .timestamp_millis_opt(modified_ms)
                .single()
                .ok_or_else(|| anyhow!("invalid modification time on {}", name))?;
            out.push(AlertRecord {
                image: name,
                timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
                created_at_ms: modified_ms,
                confidence: None,
                stream: None,
            });
        }
        sort_newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }
}
