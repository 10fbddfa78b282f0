use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alerts::{AlertSink, SharedAlertIndex};
use crate::api::ApiConfig;
use crate::detect::{BackendRegistry, ScriptedBackend, SidecarBackend};
use crate::engine::{EngineConfig, EngineOverrides, Preset};
use crate::ingest::SourceSpec;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};
use crate::storage::{DirectoryAlertIndex, SqliteAlertIndex};
use crate::stream::{Pipeline, ReadFailurePolicy, RecoverySettings, StreamRequest};

const DEFAULT_ALERT_DIR: &str = "alerts";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";
const DEFAULT_DETECTOR_BACKEND: &str = "scripted";
const DEFAULT_MODEL_PATH: &str = "models/guns.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_WAIT_SECS: f64 = 2.0;
const DEFAULT_LIVE_RETRY_MS: u64 = 500;

const DETECTOR_BACKENDS: &[&str] = &["scripted", "sidecar", "tract"];

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    alert_dir: Option<PathBuf>,
    index_db_path: Option<String>,
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    notifier: Option<NotifierConfigFile>,
    presets: Option<PresetsConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    live_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    sidecar_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifierConfigFile {
    telegram_token: Option<String>,
    telegram_chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PresetsConfigFile {
    file_playback: Option<EngineOverrides>,
    live_stream: Option<EngineOverrides>,
    interactive: Option<EngineOverrides>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    attempts: Option<u32>,
    wait_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub alert_dir: PathBuf,
    /// SQLite alert index; `None` lists alerts from `alert_dir` instead.
    pub index_db_path: Option<String>,
    pub api_addr: String,
    pub detector: DetectorSettings,
    pub telegram: Option<TelegramSettings>,
    pub presets: PresetSettings,
    pub recovery: RecoverySettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub sidecar_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresetSettings {
    pub file_playback: EngineConfig,
    pub live_stream: EngineConfig,
    pub interactive: EngineConfig,
}

impl Default for PresetSettings {
    fn default() -> Self {
        Self {
            file_playback: EngineConfig::file_playback(),
            live_stream: EngineConfig::live_stream(),
            interactive: EngineConfig::interactive(),
        }
    }
}

impl PresetSettings {
    pub fn get(&self, preset: Preset) -> &EngineConfig {
        match preset {
            Preset::FilePlayback => &self.file_playback,
            Preset::LiveStream => &self.live_stream,
            Preset::Interactive => &self.interactive,
        }
    }

    /// Stream request carrying this deployment's constants for `preset`.
    pub fn stream_request(
        &self,
        source: SourceSpec,
        preset: Preset,
        recovery: &RecoverySettings,
    ) -> StreamRequest {
        StreamRequest::new(source, preset)
            .with_config(self.get(preset).clone())
            .with_policy(ReadFailurePolicy::for_preset(preset, recovery))
    }
}

/// Raw notifier credentials before the both-or-neither check.
struct TelegramCredentials {
    token: Option<String>,
    chat_id: Option<String>,
}

impl SentinelConfig {
    /// Defaults, then the file named by `SENTINEL_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let (mut cfg, mut credentials) = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env(&mut credentials)?;
        cfg.telegram = credentials.resolve()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> (Self, TelegramCredentials) {
        let alert_dir = file
            .alert_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ALERT_DIR));
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            model_path: detector_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            sidecar_path: detector_file.sidecar_path,
        };
        let notifier = file.notifier.unwrap_or_default();
        let credentials = TelegramCredentials {
            token: notifier.telegram_token,
            chat_id: notifier.telegram_chat_id,
        };

        let preset_file = file.presets.unwrap_or_default();
        let defaults = PresetSettings::default();
        let apply = |base: EngineConfig, overrides: Option<EngineOverrides>| match overrides {
            Some(overrides) => base.with_overrides(&overrides),
            None => base,
        };
        let presets = PresetSettings {
            file_playback: apply(defaults.file_playback, preset_file.file_playback),
            live_stream: apply(defaults.live_stream, preset_file.live_stream),
            interactive: apply(defaults.interactive, preset_file.interactive),
        };

        let reconnect = file.reconnect.unwrap_or_default();
        let recovery = RecoverySettings {
            reconnect_attempts: reconnect.attempts.unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
            reconnect_wait: secs_to_duration(
                reconnect.wait_secs.unwrap_or(DEFAULT_RECONNECT_WAIT_SECS),
            ),
            live_retry: Duration::from_millis(file.live_retry_ms.unwrap_or(DEFAULT_LIVE_RETRY_MS)),
        };

        let cfg = Self {
            alert_dir,
            index_db_path: file.index_db_path,
            api_addr,
            detector,
            telegram: None,
            presets,
            recovery,
        };
        (cfg, credentials)
    }

    fn apply_env(&mut self, credentials: &mut TelegramCredentials) -> Result<()> {
        if let Some(dir) = env_non_empty("SENTINEL_ALERT_DIR") {
            self.alert_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_non_empty("SENTINEL_INDEX_DB") {
            self.index_db_path = Some(path);
        }
        if let Some(addr) = env_non_empty("SENTINEL_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = env_non_empty("SENTINEL_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_non_empty("MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("SENTINEL_DETECTIONS") {
            self.detector.sidecar_path = Some(PathBuf::from(path));
        }
        if let Some(token) = env_non_empty("TELEGRAM_TOKEN") {
            credentials.token = Some(token);
        }
        if let Some(chat_id) = env_non_empty("TELEGRAM_CHAT_ID") {
            credentials.chat_id = Some(chat_id);
        }
        if let Some(attempts) = env_non_empty("SENTINEL_RECONNECT_ATTEMPTS") {
            self.recovery.reconnect_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("SENTINEL_RECONNECT_ATTEMPTS must be a non-negative integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !DETECTOR_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {})",
                self.detector.backend,
                DETECTOR_BACKENDS.join(", ")
            ));
        }
        if self.detector.backend == "sidecar" && self.detector.sidecar_path.is_none() {
            return Err(anyhow!(
                "detector backend 'sidecar' requires detector.sidecar_path or SENTINEL_DETECTIONS"
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        if self.api_addr.trim().is_empty() {
            return Err(anyhow!("api.addr must not be empty"));
        }
        for preset in [Preset::FilePlayback, Preset::LiveStream, Preset::Interactive] {
            self.presets
                .get(preset)
                .validate()
                .map_err(|e| anyhow!("invalid {} preset: {}", preset, e))?;
        }
        Ok(())
    }

    pub fn engine_config(&self, preset: Preset) -> &EngineConfig {
        self.presets.get(preset)
    }

    /// Stream request using this deployment's preset constants and recovery
    /// timings.
    pub fn stream_request(&self, source: SourceSpec, preset: Preset) -> StreamRequest {
        self.presets.stream_request(source, preset, &self.recovery)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api_addr.clone(),
            presets: self.presets.clone(),
            recovery: self.recovery,
        }
    }

    /// Load the configured detector into a registry shared by every stream.
    pub fn detector_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        match self.detector.backend.as_str() {
            "scripted" => {
                log::warn!("detector backend 'scripted' with an empty script reports no detections");
                registry.register(ScriptedBackend::default());
            }
            "sidecar" => {
                let path = self
                    .detector
                    .sidecar_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("sidecar backend requires a detections file"))?;
                registry.register(SidecarBackend::open(path)?);
            }
            "tract" => {
                #[cfg(feature = "backend-tract")]
                {
                    registry.register(crate::detect::TractBackend::new(
                        &self.detector.model_path,
                        self.detector.input_size,
                    )?);
                }
                #[cfg(not(feature = "backend-tract"))]
                {
                    return Err(anyhow!(
                        "detector backend 'tract' requires the backend-tract feature"
                    ));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        Ok(registry)
    }

    pub fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        let notifier: Arc<dyn Notifier> = match &self.telegram {
            Some(telegram) => Arc::new(TelegramNotifier::new(
                telegram.token.clone(),
                telegram.chat_id.clone(),
            )?),
            None => Arc::new(LogNotifier),
        };
        log::info!("alert notifier: {}", notifier.name());
        Ok(notifier)
    }

    pub fn alert_index(&self) -> Result<SharedAlertIndex> {
        let index: SharedAlertIndex = match &self.index_db_path {
            Some(path) => Arc::new(Mutex::new(SqliteAlertIndex::open(path)?)),
            None => Arc::new(Mutex::new(DirectoryAlertIndex::new(&self.alert_dir))),
        };
        Ok(index)
    }

    pub fn alert_sink(&self) -> Result<AlertSink> {
        AlertSink::new(&self.alert_dir, self.alert_index()?, self.notifier()?)
    }

    /// Detector, sink and clock wiring for stream workers.
    pub fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(
            Arc::new(self.detector_registry()?),
            Arc::new(self.alert_sink()?),
        ))
    }
}

impl TelegramCredentials {
    fn resolve(self) -> Result<Option<TelegramSettings>> {
        match (self.token, self.chat_id) {
            (Some(token), Some(chat_id)) => Ok(Some(TelegramSettings { token, chat_id })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(anyhow!(
                "TELEGRAM_TOKEN is set but TELEGRAM_CHAT_ID is missing"
            )),
            (None, Some(_)) => Err(anyhow!(
                "TELEGRAM_CHAT_ID is set but TELEGRAM_TOKEN is missing"
            )),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
