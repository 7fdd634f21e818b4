//! Telemetry wire frames.
//!
//! Two JSON shapes arrive over the streaming connections:
//!
//! ```text
//! { "type": "jointUpdate",  "data": [ { "name": "shoulder", "degree": 45 }, ... ] }
//! { "type": "CURRENT_DATA", "armA": [ ... ], "armB": [ ... ] }
//! ```
//!
//! Any other `type` decodes to [`TelemetryFrame::Unrecognized`] and is ignored.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Wire tag of joint-angle frames.
pub const JOINT_UPDATE_TYPE: &str = "jointUpdate";
/// Wire tag of per-arm current frames.
pub const CURRENT_DATA_TYPE: &str = "CURRENT_DATA";

/// One joint's reported angle, in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointReading {
    pub name: String,
    pub degree: f64,
}

impl JointReading {
    pub fn new(name: impl Into<String>, degree: f64) -> Self {
        Self {
            name: name.into(),
            degree,
        }
    }
}

/// Latest per-arm current readings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentSample {
    #[serde(rename = "armA")]
    pub arm_a: Vec<f64>,
    #[serde(rename = "armB")]
    pub arm_b: Vec<f64>,
}

/// A decoded telemetry frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryFrame {
    #[serde(rename = "jointUpdate")]
    JointUpdate { data: Vec<JointReading> },

    #[serde(rename = "CURRENT_DATA")]
    Current(CurrentSample),

    #[serde(other)]
    Unrecognized,
}

/// Frame kinds a client can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    JointUpdate,
    Current,
}

impl FrameKind {
    pub fn wire_type(self) -> &'static str {
        match self {
            FrameKind::JointUpdate => JOINT_UPDATE_TYPE,
            FrameKind::Current => CURRENT_DATA_TYPE,
        }
    }
}

impl TelemetryFrame {
    pub fn kind(&self) -> Option<FrameKind> {
        match self {
            TelemetryFrame::JointUpdate { .. } => Some(FrameKind::JointUpdate),
            TelemetryFrame::Current(_) => Some(FrameKind::Current),
            TelemetryFrame::Unrecognized => None,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and floats cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Cheap structural check before a full parse: a frame must be a single
/// JSON object once surrounding whitespace is stripped.
pub fn looks_complete(text: &str) -> bool {
    let text = text.trim();
    text.starts_with('{') && text.ends_with('}')
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<TelemetryFrame, FrameError> {
    if !looks_complete(text) {
        return Err(FrameError::Incomplete);
    }
    Ok(serde_json::from_str(text.trim())?)
}

/// Short prefix of a rejected frame for logging.
pub fn excerpt(text: &str) -> &str {
    const MAX: usize = 50;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_joint_update() {
        let frame =
            parse_frame(r#"{"type":"jointUpdate","data":[{"name":"shoulder","degree":45}]}"#)
                .unwrap();
        assert_eq!(
            frame,
            TelemetryFrame::JointUpdate {
                data: vec![JointReading::new("shoulder", 45.0)]
            }
        );
        assert_eq!(frame.kind(), Some(FrameKind::JointUpdate));
    }

    #[test]
    fn test_parse_current_data() {
        let frame =
            parse_frame(r#" {"type":"CURRENT_DATA","armA":[0.5,1.25],"armB":[2.0]} "#).unwrap();
        assert_eq!(
            frame,
            TelemetryFrame::Current(CurrentSample {
                arm_a: vec![0.5, 1.25],
                arm_b: vec![2.0],
            })
        );
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let frame = parse_frame(r#"{"type":"heartbeat","seq":4}"#).unwrap();
        assert_eq!(frame, TelemetryFrame::Unrecognized);
        assert_eq!(frame.kind(), None);
    }

    #[test]
    fn test_not_json_is_incomplete() {
        assert!(matches!(parse_frame("not json"), Err(FrameError::Incomplete)));
        assert!(matches!(
            parse_frame(r#"{"type":"jointUpdate","data":["#),
            Err(FrameError::Incomplete)
        ));
    }

    #[test]
    fn test_bad_shape_is_json_error() {
        assert!(matches!(
            parse_frame(r#"{"type":"jointUpdate","data":{"name":"x"}}"#),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"data":[]}"#),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn test_to_json_uses_wire_names() {
        let json = TelemetryFrame::Current(CurrentSample {
            arm_a: vec![1.0],
            arm_b: vec![],
        })
        .to_json();
        assert!(json.contains(r#""type":"CURRENT_DATA""#));
        assert!(json.contains(r#""armA":[1.0]"#));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(40);
        let short = excerpt(&text);
        assert!(short.len() <= 50);
        assert!(text.starts_with(short));
    }
}
