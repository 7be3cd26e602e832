// THEORY:
// `MetadataFrame` is the structured half of the stream: one threat assessment
// per backend tick. Decoding is lenient about optional fields and strict only
// where a message could not possibly be metadata:
//
// 1.  `intent_score` is required. A text message without it is not a
//     metadata frame and is reported as unparseable.
// 2.  `threat_level` defaults to WAITING, also when it is not a string, and
//     keeps any string it does not recognise, so new backend levels flow
//     through untouched.
// 3.  `signals` keeps numeric values; booleans become 1.0/0.0 and anything
//     else (labels such as `loitering_type`) is skipped rather than failing
//     the whole frame. A `signals` value that is not an object reads as empty.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// Categorical classification attached to each metadata frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ThreatLevel {
    #[default]
    Waiting,
    None,
    Suspicious,
    Threat,
    /// A level this client does not know yet, kept verbatim.
    Other(String),
}

impl ThreatLevel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Waiting => "WAITING",
            Self::None => "NONE",
            Self::Suspicious => "SUSPICIOUS",
            Self::Threat => "THREAT",
            Self::Other(raw) => raw,
        }
    }

    /// Numeric tier used by the history chart.
    pub fn chart_tier(&self) -> f64 {
        match self {
            Self::Threat => 1.0,
            Self::Suspicious => 0.5,
            _ => 0.0,
        }
    }

    /// THREAT or SUSPICIOUS.
    pub fn is_alarming(&self) -> bool {
        matches!(self, Self::Threat | Self::Suspicious)
    }
}

impl From<&str> for ThreatLevel {
    fn from(raw: &str) -> Self {
        match raw {
            "WAITING" => Self::Waiting,
            "NONE" => Self::None,
            "SUSPICIOUS" => Self::Suspicious,
            "THREAT" => Self::Threat,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ThreatLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ThreatLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Named scalar sub-features contributing to the intent score.
pub type Signals = BTreeMap<String, f64>;

/// One threat assessment received from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFrame {
    pub intent_score: f64,
    #[serde(default, deserialize_with = "lenient_level")]
    pub threat_level: ThreatLevel,
    #[serde(default, deserialize_with = "numeric_signals")]
    pub signals: Signals,
}

impl MetadataFrame {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn signal(&self, name: &str) -> Option<f64> {
        self.signals.get(name).copied()
    }
}

/// Any non-string value (null, number, object) reads as WAITING.
fn lenient_level<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ThreatLevel, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(raw) => ThreatLevel::from(raw.as_str()),
        _ => ThreatLevel::default(),
    })
}

/// Anything other than an object reads as no signals.
fn numeric_signals<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Signals, D::Error> {
    let serde_json::Value::Object(raw) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(Signals::new());
    };
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| {
            let v = match value {
                serde_json::Value::Number(n) => n.as_f64()?,
                serde_json::Value::Bool(b) => {
                    if b {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => return None,
            };
            Some((name, v))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_backend_payload() {
        let frame = MetadataFrame::from_json(
            r#"{"intent_score":0.42,"threat_level":"SUSPICIOUS",
                "signals":{"motion_E":3.5,"loitering_score":0.2,"loitering_type":"pacing",
                           "weapon_confirmed":true,"presence_s":null}}"#,
        )
        .unwrap();
        assert_eq!(frame.intent_score, 0.42);
        assert_eq!(frame.threat_level, ThreatLevel::Suspicious);
        assert_eq!(frame.signal("motion_E"), Some(3.5));
        assert_eq!(frame.signal("weapon_confirmed"), Some(1.0));
        assert_eq!(frame.signal("loitering_type"), None);
        assert_eq!(frame.signal("presence_s"), None);
    }

    #[test]
    fn missing_level_and_signals_default() {
        let frame = MetadataFrame::from_json(r#"{"intent_score":0.1}"#).unwrap();
        assert_eq!(frame.threat_level, ThreatLevel::Waiting);
        assert!(frame.signals.is_empty());

        let frame = MetadataFrame::from_json(r#"{"intent_score":0.1,"threat_level":null,"signals":null}"#).unwrap();
        assert_eq!(frame.threat_level, ThreatLevel::Waiting);
    }

    #[test]
    fn malformed_optional_fields_keep_the_score() {
        let frame = MetadataFrame::from_json(r#"{"intent_score":0.8,"threat_level":3,"signals":[1,2]}"#).unwrap();
        assert_eq!(frame.intent_score, 0.8);
        assert_eq!(frame.threat_level, ThreatLevel::Waiting);
        assert!(frame.signals.is_empty());

        let frame = MetadataFrame::from_json(r#"{"intent_score":0.4,"threat_level":{"x":1},"signals":"none"}"#).unwrap();
        assert_eq!(frame.threat_level, ThreatLevel::Waiting);
        assert!(frame.signals.is_empty());
    }

    #[test]
    fn unknown_level_is_preserved() {
        let frame = MetadataFrame::from_json(r#"{"intent_score":0.9,"threat_level":"LOCKDOWN"}"#).unwrap();
        assert_eq!(frame.threat_level, ThreatLevel::Other("LOCKDOWN".into()));
        assert_eq!(frame.threat_level.to_string(), "LOCKDOWN");
        assert_eq!(serde_json::to_string(&frame.threat_level).unwrap(), "\"LOCKDOWN\"");
    }

    #[test]
    fn intent_score_is_required() {
        assert!(MetadataFrame::from_json(r#"{"threat_level":"NONE"}"#).is_err());
        assert!(MetadataFrame::from_json("{not json").is_err());
    }

    #[test]
    fn chart_tiers() {
        assert_eq!(ThreatLevel::Threat.chart_tier(), 1.0);
        assert_eq!(ThreatLevel::Suspicious.chart_tier(), 0.5);
        assert_eq!(ThreatLevel::None.chart_tier(), 0.0);
        assert_eq!(ThreatLevel::Other("X".into()).chart_tier(), 0.0);
        assert!(ThreatLevel::Suspicious.is_alarming());
        assert!(!ThreatLevel::Waiting.is_alarming());
    }
}
