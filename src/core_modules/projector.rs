// THEORY:
// The projector turns a raw `MetadataFrame` into what a threat panel shows.
// It is a pure function: no state, no clock, no clamping of the stored value.
// Clamping happens only in the `display_*` helpers, which exist for renderers
// and are recomputed from the raw score every time.

use serde::Serialize;

use crate::config::DEFAULT_WEAPON_THRESHOLD;
use crate::core_modules::metadata::{MetadataFrame, ThreatLevel};

pub const WEAPON_SIGNAL: &str = "weapon_score";

/// Color tier of the intent readout. Lower bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTier {
    /// intent <= 0.5
    Low,
    /// 0.5 < intent <= 0.8
    Medium,
    /// intent > 0.8
    High,
}

impl ColorTier {
    pub fn for_intent(intent: f64) -> Self {
        if intent > 0.8 {
            Self::High
        } else if intent > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Fill tier of the intent gauge bar (its own, lower cut points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeTier {
    Green,
    Orange,
    Red,
}

impl GaugeTier {
    pub fn for_intent(intent: f64) -> Self {
        if intent > 0.6 {
            Self::Red
        } else if intent > 0.4 {
            Self::Orange
        } else {
            Self::Green
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalEmphasis {
    Normal,
    Elevated,
    Hot,
}

/// One row of the real-time signal list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalReading {
    pub name: String,
    pub label: String,
    pub value: f64,
    pub emphasis: SignalEmphasis,
}

/// `motion_E` -> `MOTION E`.
pub fn signal_label(name: &str) -> String {
    name.replace('_', " ").to_uppercase()
}

/// Display-ready view of the most recent metadata frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedThreatState {
    pub level: ThreatLevel,
    /// Raw score exactly as received.
    pub intent_score: f64,
    pub weapon_detected: bool,
    pub color_tier: ColorTier,
}

impl ProjectedThreatState {
    /// Intent clamped to `0.0..=1.0` for gauges and percentages.
    pub fn display_intent(&self) -> f64 {
        if self.intent_score.is_nan() {
            0.0
        } else {
            self.intent_score.clamp(0.0, 1.0)
        }
    }

    pub fn gauge_tier(&self) -> GaugeTier {
        GaugeTier::for_intent(self.intent_score)
    }

    pub fn is_alarming(&self) -> bool {
        self.level.is_alarming()
    }
}

/// Projects with the default weapon threshold.
pub fn project(meta: &MetadataFrame) -> ProjectedThreatState {
    project_with(meta, DEFAULT_WEAPON_THRESHOLD)
}

pub fn project_with(meta: &MetadataFrame, weapon_threshold: f64) -> ProjectedThreatState {
    ProjectedThreatState {
        level: meta.threat_level.clone(),
        intent_score: meta.intent_score,
        weapon_detected: meta
            .signal(WEAPON_SIGNAL)
            .is_some_and(|score| score > weapon_threshold),
        color_tier: ColorTier::for_intent(meta.intent_score),
    }
}

/// Signal rows in name order, labelled and emphasised for display.
pub fn signal_readings(meta: &MetadataFrame) -> Vec<SignalReading> {
    meta.signals
        .iter()
        .map(|(name, &value)| SignalReading {
            name: name.clone(),
            label: signal_label(name),
            value,
            emphasis: if value > 0.8 {
                SignalEmphasis::Hot
            } else if value > 0.5 {
                SignalEmphasis::Elevated
            } else {
                SignalEmphasis::Normal
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta(intent: f64, level: &str, signals: &[(&str, f64)]) -> MetadataFrame {
        MetadataFrame {
            intent_score: intent,
            threat_level: ThreatLevel::from(level),
            signals: signals
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn suspicious_medium_with_weapon() {
        let out = project(&meta(0.55, "SUSPICIOUS", &[("weapon_score", 0.7)]));
        assert_eq!(out.level, ThreatLevel::Suspicious);
        assert_eq!(out.color_tier, ColorTier::Medium);
        assert!(out.weapon_detected);
        assert_eq!(out.intent_score, 0.55);
    }

    #[test]
    fn missing_weapon_score_is_not_a_weapon() {
        let out = project(&meta(0.2, "NONE", &[("motion_E", 9.0)]));
        assert!(!out.weapon_detected);
        let out = project(&meta(0.2, "NONE", &[("weapon_score", 0.6)]));
        assert!(!out.weapon_detected);
    }

    #[test]
    fn color_tier_boundaries() {
        assert_eq!(ColorTier::for_intent(0.0), ColorTier::Low);
        assert_eq!(ColorTier::for_intent(0.5), ColorTier::Low);
        assert_eq!(ColorTier::for_intent(0.5000001), ColorTier::Medium);
        assert_eq!(ColorTier::for_intent(0.8), ColorTier::Medium);
        assert_eq!(ColorTier::for_intent(0.81), ColorTier::High);
        assert_eq!(ColorTier::for_intent(3.0), ColorTier::High);
        assert_eq!(ColorTier::for_intent(-1.0), ColorTier::Low);
    }

    #[test]
    fn unknown_level_passes_through() {
        let out = project(&meta(0.1, "EVACUATE", &[]));
        assert_eq!(out.level.as_str(), "EVACUATE");
        assert!(!out.is_alarming());
    }

    #[test]
    fn out_of_range_intent_is_only_clamped_for_display() {
        let out = project(&meta(1.4, "THREAT", &[]));
        assert_eq!(out.intent_score, 1.4);
        assert_eq!(out.display_intent(), 1.0);
        assert_eq!(out.gauge_tier(), GaugeTier::Red);
        let out = project(&meta(-0.2, "NONE", &[]));
        assert_eq!(out.display_intent(), 0.0);
        assert_eq!(out.gauge_tier(), GaugeTier::Green);
    }

    #[test]
    fn custom_weapon_threshold() {
        let m = meta(0.1, "NONE", &[("weapon_score", 0.5)]);
        assert!(!project(&m).weapon_detected);
        assert!(project_with(&m, 0.4).weapon_detected);
    }

    #[test]
    fn readings_are_labelled() {
        let rows = signal_readings(&meta(0.1, "NONE", &[("motion_E", 0.9), ("head_yaw_rate", 0.6), ("velocity", 0.1)]));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].label, "HEAD YAW RATE");
        assert_eq!(rows[0].emphasis, SignalEmphasis::Elevated);
        assert_eq!(rows[1].label, "MOTION E");
        assert_eq!(rows[1].emphasis, SignalEmphasis::Hot);
        assert_eq!(rows[2].emphasis, SignalEmphasis::Normal);
    }

    #[test]
    fn serializes_with_lowercase_tier() {
        let json = serde_json::to_value(project(&meta(0.9, "THREAT", &[]))).unwrap();
        assert_eq!(json["color_tier"], "high");
        assert_eq!(json["level"], "THREAT");
    }
}
