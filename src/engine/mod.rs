//! Temporal alert stabilization.
//!
//! `AlertEngine` turns one stream's per-frame detections into zero or one
//! alert per frame. An alert fires only when four independent gates hold on
//! the same frame:
//!
//! 1. **Streak**: at least `frame_streak_required` consecutive frames had a
//!    qualifying box.
//! 2. **Hard hit**: a qualifying box in this frame reached `conf_hard`.
//! 3. **Stability**: the best box stayed within the displacement threshold for
//!    at least `stability_hits_required` consecutive frames.
//! 4. **Cooldown**: more than `alert_cooldown_seconds` passed since the last
//!    alert from this engine.
//!
//! Firing does not reset the streak or stability counters; only the cooldown
//! limits how often a sustained detection alerts.
//!
//! An engine is owned by exactly one acquisition loop. `ingest` takes
//! `&mut self`, and no state is shared between instances.

mod config;
mod filter;
mod stability;

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::detect::{BoundingBox, DetectionBox};

pub use config::{EngineConfig, EngineOverrides, Preset};
pub use filter::{assess, is_qualifying, FrameEvidence};
pub use stability::StabilityTracker;

/// Logical regime of the most recent frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Regime {
    /// Streak below the requirement.
    #[default]
    Searching,
    /// Streak satisfied, but hard hit, stability or cooldown is not.
    Armed,
    /// Every gate held on this frame and an alert was produced.
    Alerting,
}

/// Mutable per-stream counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineState {
    frame_streak: u32,
    stability: StabilityTracker,
    last_alert_at: Option<Instant>,
}

impl EngineState {
    pub fn frame_streak(&self) -> u32 {
        self.frame_streak
    }

    pub fn stable_hits(&self) -> u32 {
        self.stability.stable_hits()
    }

    pub fn last_box(&self) -> Option<BoundingBox> {
        self.stability.last_box()
    }

    /// `None` until the first alert.
    pub fn last_alert_at(&self) -> Option<Instant> {
        self.last_alert_at
    }
}

/// Alert produced by the engine. Ownership passes to the caller, which
/// persists the frame and delivers the notification.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent<F> {
    /// Confidence of the best qualifying box in the alerting frame.
    pub confidence: f32,
    pub timestamp: Instant,
    pub bounding_box: BoundingBox,
    pub annotated_frame: F,
    pub frame_streak: u32,
    pub stable_hits: u32,
}

pub struct AlertEngine {
    config: EngineConfig,
    cooldown: Duration,
    state: EngineState,
    regime: Regime,
}

impl AlertEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cooldown: config.cooldown(),
            config,
            state: EngineState::default(),
            regime: Regime::Searching,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Process one frame. `annotated_frame` is moved into the event when an
    /// alert fires and dropped otherwise.
    pub fn ingest<F>(
        &mut self,
        boxes: &[DetectionBox],
        annotated_frame: F,
        now: Instant,
    ) -> Option<AlertEvent<F>> {
        self.ingest_with(boxes, now, |_| annotated_frame)
    }

    /// Like [`AlertEngine::ingest`], but the frame is only produced, from the
    /// winning box, when an alert fires.
    pub fn ingest_with<F>(
        &mut self,
        boxes: &[DetectionBox],
        now: Instant,
        annotate: impl FnOnce(&DetectionBox) -> F,
    ) -> Option<AlertEvent<F>> {
        let evidence = assess(boxes, &self.config);

        self.state.stability.observe(
            evidence.best.map(|b| b.bbox),
            self.config.stability_displacement_threshold,
        );
        self.state.frame_streak = if evidence.detected() {
            self.state.frame_streak.saturating_add(1)
        } else {
            0
        };

        let regime = self.decide(&evidence, now);
        self.transition(regime);
        if regime != Regime::Alerting {
            return None;
        }

        let best = evidence.best?;
        self.state.last_alert_at = Some(now);
        Some(AlertEvent {
            confidence: best.confidence,
            timestamp: now,
            bounding_box: best.bbox,
            annotated_frame: annotate(&best),
            frame_streak: self.state.frame_streak,
            stable_hits: self.state.stable_hits(),
        })
    }

    fn decide(&self, evidence: &FrameEvidence, now: Instant) -> Regime {
        if self.state.frame_streak < self.config.frame_streak_required {
            return Regime::Searching;
        }
        let stable = self.state.stable_hits() >= self.config.stability_hits_required;
        if evidence.hard_hit && stable && self.cooled_down(now) {
            Regime::Alerting
        } else {
            Regime::Armed
        }
    }

    fn cooled_down(&self, now: Instant) -> bool {
        match self.state.last_alert_at {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) > self.cooldown,
        }
    }

    fn transition(&mut self, next: Regime) {
        if next != self.regime {
            log::debug!(
                "engine regime {:?} -> {:?} (streak={}, stable_hits={})",
                self.regime,
                next,
                self.state.frame_streak,
                self.state.stable_hits()
            );
        }
        self.regime = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_config() -> EngineConfig {
        EngineConfig {
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

    fn gun(confidence: f32) -> DetectionBox {
        DetectionBox::new(0, confidence, 100, 100, 220, 160)
    }

    fn gun_at(x: i32, confidence: f32) -> DetectionBox {
        DetectionBox::new(0, confidence, x, 100, x + 120, 160)
    }

    #[test]
    fn alerts_on_second_stable_frame() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();

        assert!(engine.ingest(&[gun(0.7)], "f1", t0).is_none());
        assert_eq!(engine.regime(), Regime::Searching);

        let alert = engine
            .ingest(&[gun(0.7)], "f2", t0 + Duration::from_millis(100))
            .expect("second frame alerts");
        assert_eq!(alert.annotated_frame, "f2");
        assert_eq!(alert.confidence, 0.7);
        assert_eq!(alert.bounding_box, gun(0.7).bbox);
        assert_eq!(alert.frame_streak, 2);
        assert_eq!(alert.stable_hits, 1);
        assert_eq!(engine.regime(), Regime::Alerting);
        Ok(())
    }

    #[test]
    fn cooldown_suppresses_then_releases() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        engine.ingest(&[gun(0.7)], (), t0);
        let first = t0 + Duration::from_secs(1);
        assert!(engine.ingest(&[gun(0.7)], (), first).is_some());

        assert!(engine
            .ingest(&[gun(0.7)], (), first + Duration::from_secs(5))
            .is_none());
        assert_eq!(engine.regime(), Regime::Armed);
        // Exactly at the cooldown boundary is still too early.
        assert!(engine
            .ingest(&[gun(0.7)], (), first + Duration::from_secs(10))
            .is_none());
        assert!(engine
            .ingest(&[gun(0.7)], (), first + Duration::from_secs(11))
            .is_some());
        Ok(())
    }

    #[test]
    fn short_streaks_never_alert() -> Result<()> {
        let mut cfg = reference_config();
        cfg.frame_streak_required = 4;
        let mut engine = AlertEngine::new(cfg)?;
        let mut now = Instant::now();
        for _ in 0..5 {
            for _ in 0..3 {
                assert!(engine.ingest(&[gun(0.95)], (), now).is_none());
                now += Duration::from_secs(30);
            }
            assert!(engine.ingest(&[], (), now).is_none());
            now += Duration::from_secs(30);
        }
        Ok(())
    }

    #[test]
    fn empty_frame_resets_counters() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        for i in 0..4 {
            engine.ingest(&[gun(0.5)], (), t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(engine.state().frame_streak(), 4);
        assert_eq!(engine.state().stable_hits(), 3);

        engine.ingest(&[], (), t0 + Duration::from_secs(1));
        let state = engine.state();
        assert_eq!(state.frame_streak(), 0);
        assert_eq!(state.stable_hits(), 0);
        assert_eq!(state.last_box(), None);
        assert_eq!(engine.regime(), Regime::Searching);
        Ok(())
    }

    #[test]
    fn geometric_rejects_ignore_confidence() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let tiny = DetectionBox::new(0, 1.0, 0, 0, 30, 20);
        let square = DetectionBox::new(0, 1.0, 0, 0, 200, 200);
        let t0 = Instant::now();
        for i in 0..10 {
            let now = t0 + Duration::from_secs(i * 20);
            assert!(engine.ingest(&[tiny, square], (), now).is_none());
            assert_eq!(engine.state().frame_streak(), 0);
        }
        Ok(())
    }

    #[test]
    fn jumping_box_breaks_stability_not_streak() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        for i in 0..6u64 {
            let x = if i % 2 == 0 { 100 } else { 600 };
            let alert = engine.ingest(&[gun_at(x, 0.9)], (), t0 + Duration::from_secs(i));
            assert!(alert.is_none());
            assert_eq!(engine.state().stable_hits(), 0);
            assert_eq!(engine.state().frame_streak(), i as u32 + 1);
        }
        Ok(())
    }

    #[test]
    fn soft_hits_keep_streak_but_do_not_fire() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        for i in 0..5u64 {
            assert!(engine
                .ingest(&[gun(0.55)], (), t0 + Duration::from_secs(i))
                .is_none());
        }
        assert_eq!(engine.regime(), Regime::Armed);
        assert!(engine
            .ingest(&[gun(0.55), gun_at(104, 0.61)], (), t0 + Duration::from_secs(6))
            .is_some());
        Ok(())
    }

    #[test]
    fn firing_keeps_accumulating_counters() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        engine.ingest(&[gun(0.7)], (), t0);
        assert!(engine.ingest(&[gun(0.7)], (), t0 + Duration::from_secs(1)).is_some());
        engine.ingest(&[gun(0.7)], (), t0 + Duration::from_secs(2));
        assert_eq!(engine.state().frame_streak(), 3);
        assert_eq!(engine.state().stable_hits(), 2);
        Ok(())
    }

    #[test]
    fn annotate_runs_only_when_alerting() -> Result<()> {
        let mut engine = AlertEngine::new(reference_config())?;
        let t0 = Instant::now();
        let mut calls = 0;
        engine.ingest_with(&[gun(0.7)], t0, |_| calls += 1);
        assert_eq!(calls, 0);
        let alert = engine.ingest_with(&[gun(0.7)], t0 + Duration::from_secs(1), |best| {
            calls += 1;
            best.bbox
        });
        assert_eq!(calls, 1);
        assert_eq!(alert.map(|a| a.annotated_frame), Some(gun(0.7).bbox));
        Ok(())
    }

    #[test]
    fn identical_engines_produce_identical_alerts() -> Result<()> {
        let t0 = Instant::now();
        let frames: Vec<(u64, Vec<DetectionBox>)> = vec![
            (0, vec![gun(0.7)]),
            (1_000, vec![gun(0.7)]),
            (2_000, vec![]),
            (3_000, vec![gun_at(100, 0.5)]),
            (4_000, vec![gun_at(600, 0.9)]),
            (5_000, vec![gun_at(600, 0.9)]),
            (11_000, vec![gun_at(600, 0.9)]),
            (12_000, vec![gun_at(600, 0.5)]),
            (13_000, vec![gun_at(100, 0.45), gun_at(600, 0.8)]),
            (13_500, vec![]),
            (14_000, vec![gun_at(100, 0.9)]),
            (25_000, vec![gun_at(110, 0.9)]),
            (26_000, vec![gun_at(120, 0.95)]),
        ];

        let mut a = AlertEngine::new(reference_config())?;
        let mut b = AlertEngine::new(reference_config())?;
        let mut alerts_a = Vec::new();
        let mut alerts_b = Vec::new();
        for (i, (offset, boxes)) in frames.iter().enumerate() {
            let now = t0 + Duration::from_millis(*offset);
            if let Some(e) = a.ingest(boxes, i, now) {
                alerts_a.push((e.confidence, e.bounding_box, e.timestamp, e.annotated_frame));
            }
            if let Some(e) = b.ingest(boxes, i, now) {
                alerts_b.push((e.confidence, e.bounding_box, e.timestamp, e.annotated_frame));
            }
            assert_eq!(a.state(), b.state());
            assert_eq!(a.regime(), b.regime());
        }

        assert!(!alerts_a.is_empty());
        assert_eq!(alerts_a, alerts_b);
        assert_eq!(a.state(), b.state());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = reference_config();
        cfg.stability_hits_required = 0;
        assert!(AlertEngine::new(cfg).is_err());
    }
}
