// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Zone analytics engine: line-zone and polygon-zone state
//! machines that consume per-frame tracked-object sets and emit
//! entry/exit/crossing events with dwell-time tracking.

pub mod dwell;
pub mod line;
pub mod manager;
pub mod polygon;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single tracked object as produced by the (external) detector/tracker
/// pipeline for one processed frame.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub track_id: i64,
    /// Pixel-space bounding box: (x, y, width, height).
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn anchor_point(&self, anchor: Anchor) -> (f32, f32) {
        let (x, y, w, h) = (self.x, self.y, self.width, self.height);
        match anchor {
            Anchor::TopLeft => (x, y),
            Anchor::TopRight => (x + w, y),
            Anchor::BottomLeft => (x, y + h),
            Anchor::BottomRight => (x + w, y + h),
            Anchor::Center | Anchor::CenterOfMass => (x + w / 2.0, y + h / 2.0),
            Anchor::TopCenter => (x + w / 2.0, y),
            Anchor::BottomCenter => (x + w / 2.0, y + h),
            Anchor::CenterLeft => (x, y + h / 2.0),
            Anchor::CenterRight => (x + w, y + h / 2.0),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One of the ten canonical triggering-anchor points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    TopCenter,
    BottomCenter,
    CenterLeft,
    CenterRight,
    CenterOfMass,
}

impl Anchor {
    /// Unrecognised anchor strings fall back to `Center` rather than
    /// silently dropping the detection.
    pub fn parse(s: &str) -> Anchor {
        match s {
            "TOP_LEFT" => Anchor::TopLeft,
            "TOP_RIGHT" => Anchor::TopRight,
            "BOTTOM_LEFT" => Anchor::BottomLeft,
            "BOTTOM_RIGHT" => Anchor::BottomRight,
            "CENTER" => Anchor::Center,
            "TOP_CENTER" => Anchor::TopCenter,
            "BOTTOM_CENTER" => Anchor::BottomCenter,
            "CENTER_LEFT" => Anchor::CenterLeft,
            "CENTER_RIGHT" => Anchor::CenterRight,
            "CENTER_OF_MASS" => Anchor::CenterOfMass,
            _ => Anchor::Center,
        }
    }

    pub fn default_set() -> Vec<Anchor> {
        vec![Anchor::TopLeft, Anchor::TopRight, Anchor::BottomLeft, Anchor::BottomRight]
    }
}

/// A point in normalised [0,1] coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f32,
    pub y: f32,
}

/// Direction/type of a zone event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneEventType {
    LineCrossingIn,
    LineCrossingOut,
    ZoneEntry,
    ZoneExit,
}

/// Emitted for both line and polygon zones.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneEvent {
    pub timestamp: DateTime<Utc>,
    pub object_id: String,
    pub class_name: String,
    pub location: (f32, f32),
    pub zone_id: String,
    #[serde(rename = "type")]
    pub event_type: ZoneEventType,
    pub metadata: ZoneEventMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneEventMetadata {
    pub direction: &'static str,
    pub in_count: u64,
    pub out_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<i64>,
}

/// Frame dimensions in pixels, used to convert normalised geometry to
/// pixel space before per-frame evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl NormPoint {
    pub fn to_pixels(self, frame: FrameSize) -> (f32, f32) {
        (self.x * frame.width as f32, self.y * frame.height as f32)
    }
}

/// A drawing instruction emitted by the annotation pass. The engine
/// never renders pixels itself; it only produces the instruction list an
/// external renderer consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawInstruction {
    Line {
        zone_id: String,
        start: (f32, f32),
        end: (f32, f32),
        direction_arrow: bool,
        endpoint_circles: bool,
        in_count: u64,
        out_count: u64,
    },
    Polygon {
        zone_id: String,
        vertices: Vec<(f32, f32)>,
        fill_opacity: f32,
        in_count: u64,
        out_count: u64,
        current_count: i64,
        track_ids_inside: Vec<String>,
    },
    DwellLabel {
        object_id: String,
        position: (f32, f32),
        /// Pre-formatted `MM:SS`.
        text: String,
    },
}

pub(crate) fn class_id_from_name(class_name: &str) -> i64 {
    // Parses an integer class id out of the class-name string, silently
    // mapping parse failures to class 0 rather than a proper
    // (tenant, class-name) -> id dictionary.
    class_name.parse::<i64>().unwrap_or(0)
}
