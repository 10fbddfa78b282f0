use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::detect::DetectParams;

/// Per-stream engine configuration. Immutable once an engine is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Detector class the engine acts on; every other class is ignored.
    pub target_class: u32,
    /// Confidence the detector is invoked with (detector concern).
    pub conf_soft: f32,
    /// Overlap-suppression threshold the detector is invoked with (detector concern).
    pub iou_nms: f32,
    /// Confidence a qualifying box needs to count as a hard hit.
    pub conf_hard: f32,
    /// Minimum box area in square pixels.
    pub min_area: u32,
    /// Minimum width / height ratio.
    pub min_aspect_ratio: f64,
    pub frame_streak_required: u32,
    /// Combined corner movement (pixels) below which a box counts as stable.
    pub stability_displacement_threshold: u32,
    pub stability_hits_required: u32,
    pub alert_cooldown_seconds: f64,
}

impl EngineConfig {
    /// Uploaded video files: larger boxes, longer streak, tight stability.
    pub fn file_playback() -> Self {
        Self {
            target_class: 0,
            conf_soft: 0.40,
            iou_nms: 0.40,
            conf_hard: 0.55,
            min_area: 2500,
            min_aspect_ratio: 1.1,
            frame_streak_required: 3,
            stability_displacement_threshold: 90,
            stability_hits_required: 2,
            alert_cooldown_seconds: 10.0,
        }
    }

    /// Webcam and network streams started from the control API.
    pub fn live_stream() -> Self {
        Self {
            target_class: 0,
            conf_soft: 0.40,
            iou_nms: 0.40,
            conf_hard: 0.60,
            min_area: 1500,
            min_aspect_ratio: 1.1,
            frame_streak_required: 2,
            stability_displacement_threshold: 200,
            stability_hits_required: 1,
            alert_cooldown_seconds: 10.0,
        }
    }

    /// Foreground testing against a local camera.
    pub fn interactive() -> Self {
        Self {
            target_class: 0,
            conf_soft: 0.40,
            iou_nms: 0.40,
            conf_hard: 0.60,
            min_area: 2500,
            min_aspect_ratio: 1.5,
            frame_streak_required: 5,
            stability_displacement_threshold: 60,
            stability_hits_required: 2,
            alert_cooldown_seconds: 5.0,
        }
    }

    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            conf_soft: self.conf_soft,
            iou_nms: self.iou_nms,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.alert_cooldown_seconds).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("conf_soft", self.conf_soft),
            ("iou_nms", self.iou_nms),
            ("conf_hard", self.conf_hard),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if !self.min_aspect_ratio.is_finite() || self.min_aspect_ratio <= 0.0 {
            return Err(anyhow!(
                "min_aspect_ratio must be a positive number, got {}",
                self.min_aspect_ratio
            ));
        }
        if self.frame_streak_required == 0 {
            return Err(anyhow!("frame_streak_required must be >= 1"));
        }
        if self.stability_hits_required == 0 {
            return Err(anyhow!("stability_hits_required must be >= 1"));
        }
        if !self.alert_cooldown_seconds.is_finite() || self.alert_cooldown_seconds < 0.0 {
            return Err(anyhow!(
                "alert_cooldown_seconds must be a non-negative number, got {}",
                self.alert_cooldown_seconds
            ));
        }
        Ok(())
    }

    /// Return a copy with every field present in `overrides` replaced.
    pub fn with_overrides(&self, overrides: &EngineOverrides) -> Self {
        let mut cfg = self.clone();
        if let Some(v) = overrides.target_class {
            cfg.target_class = v;
        }
        if let Some(v) = overrides.conf_soft {
            cfg.conf_soft = v;
        }
        if let Some(v) = overrides.iou_nms {
            cfg.iou_nms = v;
        }
        if let Some(v) = overrides.conf_hard {
            cfg.conf_hard = v;
        }
        if let Some(v) = overrides.min_area {
            cfg.min_area = v;
        }
        if let Some(v) = overrides.min_aspect_ratio {
            cfg.min_aspect_ratio = v;
        }
        if let Some(v) = overrides.frame_streak_required {
            cfg.frame_streak_required = v;
        }
        if let Some(v) = overrides.stability_displacement_threshold {
            cfg.stability_displacement_threshold = v;
        }
        if let Some(v) = overrides.stability_hits_required {
            cfg.stability_hits_required = v;
        }
        if let Some(v) = overrides.alert_cooldown_seconds {
            cfg.alert_cooldown_seconds = v;
        }
        cfg
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::live_stream()
    }
}

/// Partial engine configuration, as found in config files.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineOverrides {
    pub target_class: Option<u32>,
    pub conf_soft: Option<f32>,
    pub iou_nms: Option<f32>,
    pub conf_hard: Option<f32>,
    pub min_area: Option<u32>,
    pub min_aspect_ratio: Option<f64>,
    pub frame_streak_required: Option<u32>,
    pub stability_displacement_threshold: Option<u32>,
    pub stability_hits_required: Option<u32>,
    pub alert_cooldown_seconds: Option<f64>,
}

/// Named deployment contexts, each with its own constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    FilePlayback,
    LiveStream,
    Interactive,
}

impl Preset {
    pub fn engine_config(self) -> EngineConfig {
        match self {
            Preset::FilePlayback => EngineConfig::file_playback(),
            Preset::LiveStream => EngineConfig::live_stream(),
            Preset::Interactive => EngineConfig::interactive(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::FilePlayback => "file-playback",
            Preset::LiveStream => "live-stream",
            Preset::Interactive => "interactive",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "file-playback" | "file" => Ok(Preset::FilePlayback),
            "live-stream" | "live" => Ok(Preset::LiveStream),
            "interactive" => Ok(Preset::Interactive),
            other => Err(anyhow!(
                "unknown preset '{}'; expected file-playback, live-stream or interactive",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() -> Result<()> {
        for preset in [Preset::FilePlayback, Preset::LiveStream, Preset::Interactive] {
            preset.engine_config().validate()?;
        }
        Ok(())
    }

    #[test]
    fn presets_keep_their_own_constants() {
        let file = EngineConfig::file_playback();
        let live = EngineConfig::live_stream();
        let interactive = EngineConfig::interactive();
        assert_eq!(file.stability_hits_required, 2);
        assert_eq!(live.stability_hits_required, 1);
        assert_eq!(live.min_area, 1500);
        assert_eq!(interactive.frame_streak_required, 5);
        assert_eq!(interactive.cooldown(), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_zero_requirements() {
        let mut cfg = EngineConfig::live_stream();
        cfg.frame_streak_required = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::live_stream();
        cfg.stability_hits_required = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::live_stream();
        cfg.conf_hard = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::live_stream();
        cfg.alert_cooldown_seconds = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_replace_only_present_fields() {
        let overrides = EngineOverrides {
            conf_hard: Some(0.75),
            stability_hits_required: Some(3),
            ..EngineOverrides::default()
        };
        let cfg = EngineConfig::live_stream().with_overrides(&overrides);
        assert_eq!(cfg.conf_hard, 0.75);
        assert_eq!(cfg.stability_hits_required, 3);
        assert_eq!(cfg.min_area, EngineConfig::live_stream().min_area);
    }

    #[test]
    fn preset_parses_aliases() -> Result<()> {
        assert_eq!("file_playback".parse::<Preset>()?, Preset::FilePlayback);
        assert_eq!("LIVE".parse::<Preset>()?, Preset::LiveStream);
        assert!("batch".parse::<Preset>().is_err());
        Ok(())
    }
}
