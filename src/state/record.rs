//! Overlay state record and its schema check

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::overlay;
use crate::error::ValidationError;

/// Properties every record must carry
const REQUIRED_PROPERTIES: [&str; 6] = ["position", "scale", "opacity", "isHidden", "isLocked", "isInverted"];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Persisted overlay transform and visibility state for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayStateRecord {
    pub position: Position,
    pub scale: f64,
    pub opacity: f64,
    pub is_locked: bool,
    pub is_inverted: bool,
    pub is_hidden: bool,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub original_width: f64,
    #[serde(default)]
    pub original_height: f64,
    /// Write time in milliseconds since the epoch, set by the store
    #[serde(default)]
    pub timestamp: u64,
}

impl Default for OverlayStateRecord {
    fn default() -> Self {
        Self {
            position: Position::default(),
            scale: overlay::DEFAULT_SCALE,
            opacity: overlay::DEFAULT_OPACITY,
            is_locked: false,
            is_inverted: false,
            is_hidden: false,
            image_base64: None,
            original_width: 0.0,
            original_height: 0.0,
            timestamp: 0,
        }
    }
}

impl OverlayStateRecord {
    /// Schema-check untyped JSON and convert it into a record
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        check_schema(&value)?;
        let record: OverlayStateRecord = serde_json::from_value(value)
            .map_err(|e| ValidationError::InvalidTypes(vec![e.to_string()]))?;
        record.validate()?;
        Ok(record)
    }

    /// Range checks on an already typed record
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.position.x.is_finite() {
            return Err(ValidationError::OutOfRange { field: "position.x", value: self.position.x });
        }
        if !self.position.y.is_finite() {
            return Err(ValidationError::OutOfRange { field: "position.y", value: self.position.y });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ValidationError::OutOfRange { field: "scale", value: self.scale });
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ValidationError::OutOfRange { field: "opacity", value: self.opacity });
        }
        Ok(())
    }

    pub(crate) fn stamped(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn check_schema(value: &Value) -> Result<(), ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let missing: Vec<String> = REQUIRED_PROPERTIES
        .iter()
        .filter(|prop| !object.contains_key(**prop))
        .map(|prop| prop.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingProperties(missing));
    }

    let position_ok = object["position"]
        .as_object()
        .is_some_and(|p| p.get("x").is_some_and(Value::is_number) && p.get("y").is_some_and(Value::is_number));

    let checks = [
        ("position", position_ok),
        ("scale", object["scale"].is_number()),
        ("opacity", object["opacity"].is_number()),
        ("isHidden", object["isHidden"].is_boolean()),
        ("isLocked", object["isLocked"].is_boolean()),
        ("isInverted", object["isInverted"].is_boolean()),
    ];
    let invalid: Vec<String> = checks
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.to_string())
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::InvalidTypes(invalid));
    }
    Ok(())
}

/// Non-finite or non-positive scales reset to 1.0
pub fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        overlay::DEFAULT_SCALE
    }
}

/// NaN resets to 0.5, everything else is clamped to [0, 1]
pub fn sanitize_opacity(opacity: f64) -> f64 {
    if opacity.is_nan() {
        overlay::DEFAULT_OPACITY
    } else {
        opacity.clamp(0.0, 1.0)
    }
}

/// Toolbar placement, stored in the fallback store only
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolbarState {
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub timestamp: u64,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
