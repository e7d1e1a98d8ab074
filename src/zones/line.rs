// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Line-zone geometry and crossing state machine.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use super::{class_id_from_name, Anchor, BoundingBox, FrameSize, NormPoint, TrackedObject, ZoneEvent, ZoneEventMetadata, ZoneEventType};

/// Large magnitude used to erect the region-of-interest limit vectors far
/// enough past the line's endpoints. Matches the original
/// implementation's constant.
const LIMIT_LENGTH: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, Default)]
struct Vec2 {
    x: f32,
    y: f32,
}

impl Vec2 {
    fn sub(self, other: Vec2) -> Vec2 {
        Vec2 { x: self.x - other.x, y: self.y - other.y }
    }

    fn magnitude(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    fn cross(self, other: Vec2) -> f32 {
        self.x * other.y - self.y * other.x
    }
}

#[derive(Debug, Clone)]
pub struct LineZoneConfig {
    pub id: String,
    pub start: NormPoint,
    pub end: NormPoint,
    pub min_crossing_threshold: u32,
    pub triggering_anchors: Vec<Anchor>,
    pub triggering_classes: Vec<String>,
}

/// Per-frame geometry resolved to pixel space, recomputed whenever the
/// frame size or endpoints change.
struct PixelGeometry {
    frame: FrameSize,
    start_px: (f32, f32),
    end_px: (f32, f32),
    /// Region limit erected at `start`, perpendicular to the line.
    start_limit_origin: (f32, f32),
    start_limit_end: (f32, f32),
    end_limit_origin: (f32, f32),
    end_limit_end: (f32, f32),
}

pub struct LineZone {
    pub id: String,
    start: NormPoint,
    end: NormPoint,
    min_crossing_threshold: u32,
    history_length: usize,
    triggering_anchors: Vec<Anchor>,
    triggering_classes: Vec<String>,
    pub in_count: u64,
    pub out_count: u64,
    pub in_count_per_class: HashMap<i64, u64>,
    pub out_count_per_class: HashMap<i64, u64>,
    crossing_history: HashMap<i64, VecDeque<bool>>,
    geometry: Option<PixelGeometry>,
}

impl LineZone {
    /// Fails (returns `None`) for a zero-magnitude vector: a degenerate
    /// line fails initialisation and is skipped.
    pub fn new(config: LineZoneConfig) -> Option<Self> {
        let dx = config.end.x - config.start.x;
        let dy = config.end.y - config.start.y;
        if dx == 0.0 && dy == 0.0 {
            return None;
        }

        let threshold = config.min_crossing_threshold.max(1);
        let anchors = if config.triggering_anchors.is_empty() {
            Anchor::default_set()
        } else {
            config.triggering_anchors
        };

        Some(LineZone {
            id: config.id,
            start: config.start,
            end: config.end,
            min_crossing_threshold: threshold,
            history_length: (threshold as usize + 1).max(2),
            triggering_anchors: anchors,
            triggering_classes: config.triggering_classes,
            in_count: 0,
            out_count: 0,
            in_count_per_class: HashMap::new(),
            out_count_per_class: HashMap::new(),
            crossing_history: HashMap::new(),
            geometry: None,
        })
    }

    pub fn endpoints(&self) -> (NormPoint, NormPoint) {
        (self.start, self.end)
    }

    pub fn class_filter(&self) -> &[String] {
        &self.triggering_classes
    }

    pub fn triggering_anchors(&self) -> &[Anchor] {
        &self.triggering_anchors
    }

    /// In-place update: geometry, threshold, anchors, class filter.
    /// Counters are preserved by construction (we mutate `self`).
    pub fn apply_update(&mut self, config: LineZoneConfig) {
        if config.start != self.start || config.end != self.end {
            self.start = config.start;
            self.end = config.end;
            self.geometry = None;
        }
        self.min_crossing_threshold = config.min_crossing_threshold.max(1);
        self.history_length = (self.min_crossing_threshold as usize + 1).max(2);
        if !config.triggering_anchors.is_empty() {
            self.triggering_anchors = config.triggering_anchors;
        }
        self.triggering_classes = config.triggering_classes;
    }

    /// Geometry match within epsilon, per-endpoint (rename
    /// preservation).
    pub fn matches_geometry(&self, start: NormPoint, end: NormPoint, epsilon: f32) -> bool {
        (self.start.x - start.x).abs() < epsilon
            && (self.start.y - start.y).abs() < epsilon
            && (self.end.x - end.x).abs() < epsilon
            && (self.end.y - end.y).abs() < epsilon
    }

    pub fn rename(&mut self, new_id: String) {
        self.id = new_id;
    }

    fn ensure_geometry(&mut self, frame: FrameSize) {
        if let Some(g) = &self.geometry {
            if g.frame == frame {
                return;
            }
        }
        let start_px = self.start.to_pixels(frame);
        let end_px = self.end.to_pixels(frame);

        let line = Vec2 { x: end_px.0 - start_px.0, y: end_px.1 - start_px.1 };
        let magnitude = line.magnitude();
        // `new()` already rejects zero-magnitude lines; frame scaling cannot
        // reintroduce one.
        let unit = Vec2 { x: line.x / magnitude, y: line.y / magnitude };
        let perp = Vec2 { x: -unit.y, y: unit.x };

        let start_limit_end = (
            start_px.0 + perp.x * LIMIT_LENGTH,
            start_px.1 + perp.y * LIMIT_LENGTH,
        );
        let end_limit_end = (
            end_px.0 - perp.x * LIMIT_LENGTH,
            end_px.1 - perp.y * LIMIT_LENGTH,
        );

        self.geometry = Some(PixelGeometry {
            frame,
            start_px,
            end_px,
            start_limit_origin: start_px,
            start_limit_end,
            end_limit_origin: end_px,
            end_limit_end,
        });
    }

    /// Per-detection evaluation, run once per frame for every
    /// eligible (class-filtered) tracked object. Returns at most one event
    /// per track per frame.
    pub fn process_frame(&mut self, frame: FrameSize, detections: &[&TrackedObject]) -> Vec<ZoneEvent> {
        self.ensure_geometry(frame);
        let geometry = self.geometry.as_ref().expect("geometry computed above");

        let start_limit = Vec2 { x: geometry.start_limit_end.0 - geometry.start_limit_origin.0, y: geometry.start_limit_end.1 - geometry.start_limit_origin.1 };
        let end_limit = Vec2 { x: geometry.end_limit_end.0 - geometry.end_limit_origin.0, y: geometry.end_limit_end.1 - geometry.end_limit_origin.1 };
        let line_vec = Vec2 { x: geometry.end_px.0 - geometry.start_px.0, y: geometry.end_px.1 - geometry.start_px.1 };
        let start_origin = Vec2 { x: geometry.start_limit_origin.0, y: geometry.start_limit_origin.1 };
        let end_origin = Vec2 { x: geometry.end_limit_origin.0, y: geometry.end_limit_origin.1 };
        let line_origin = Vec2 { x: geometry.start_px.0, y: geometry.start_px.1 };

        let mut events = Vec::new();

        for detection in detections {
            if !self.triggering_classes.is_empty() && !self.triggering_classes.iter().any(|c| c == &detection.class_name) {
                continue;
            }

            let mut in_limits = true;
            let mut has_any_left = false;
            let mut has_any_right = false;

            for anchor in &self.triggering_anchors {
                let (ax, ay) = BoundingBox::anchor_point(&detection.bbox, *anchor);
                let point = Vec2 { x: ax, y: ay };

                let cross1 = start_limit.cross(point.sub(start_origin));
                let cross2 = end_limit.cross(point.sub(end_origin));
                let within = (cross1 > 0.0) == (cross2 > 0.0);
                if !within {
                    in_limits = false;
                }

                let cross_line = line_vec.cross(point.sub(line_origin));
                if cross_line < 0.0 {
                    has_any_left = true;
                } else {
                    has_any_right = true;
                }
            }

            if !in_limits || (has_any_left && has_any_right) {
                continue;
            }

            let side = has_any_left;
            let history = self.crossing_history.entry(detection.track_id).or_insert_with(VecDeque::new);
            history.push_back(side);
            while history.len() > self.history_length {
                history.pop_front();
            }
            if history.len() < self.history_length {
                continue;
            }

            let oldest = history[0];
            let oldest_count = history.iter().filter(|s| **s == oldest).count();
            if oldest_count > 1 {
                continue;
            }

            let class_id = class_id_from_name(&detection.class_name);
            let (cx, cy) = detection.bbox.center();

            // The direction assigned to a transition is anchored to the
            // worked example in the crossing-direction scenario: a track
            // observed on the `hasAnyLeft=false` side and then crossing to
            // `hasAnyLeft=true` is an `out` crossing (and the reverse an
            // `in` crossing). For a line oriented top-to-bottom in pixel
            // space, the cross-product's sign convention makes the
            // "left/right" gloss read opposite of screen-left/right, so we
            // branch on the oldest recorded side directly rather than the
            // in/out gloss text.
            if !oldest {
                self.out_count += 1;
                *self.out_count_per_class.entry(class_id).or_insert(0) += 1;
                events.push(ZoneEvent {
                    timestamp: Utc::now(),
                    object_id: detection.track_id.to_string(),
                    class_name: detection.class_name.clone(),
                    location: (cx, cy),
                    zone_id: self.id.clone(),
                    event_type: ZoneEventType::LineCrossingOut,
                    metadata: ZoneEventMetadata {
                        direction: "out",
                        in_count: self.in_count,
                        out_count: self.out_count,
                        current_count: None,
                    },
                });
            } else {
                self.in_count += 1;
                *self.in_count_per_class.entry(class_id).or_insert(0) += 1;
                events.push(ZoneEvent {
                    timestamp: Utc::now(),
                    object_id: detection.track_id.to_string(),
                    class_name: detection.class_name.clone(),
                    location: (cx, cy),
                    zone_id: self.id.clone(),
                    event_type: ZoneEventType::LineCrossingIn,
                    metadata: ZoneEventMetadata {
                        direction: "in",
                        in_count: self.in_count,
                        out_count: self.out_count,
                        current_count: None,
                    },
                });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::BoundingBox;

    fn det(track_id: i64, bottom_center_x: f32, bottom_center_y: f32) -> TrackedObject {
        TrackedObject {
            track_id,
            bbox: BoundingBox { x: bottom_center_x, y: bottom_center_y, width: 0.0, height: 0.0 },
            class_name: "person".to_string(),
            confidence: 0.9,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn zero_magnitude_line_fails_init() {
        let cfg = LineZoneConfig {
            id: "z".into(),
            start: NormPoint { x: 0.5, y: 0.5 },
            end: NormPoint { x: 0.5, y: 0.5 },
            min_crossing_threshold: 1,
            triggering_anchors: vec![Anchor::BottomCenter],
            triggering_classes: vec![],
        };
        assert!(LineZone::new(cfg).is_none());
    }

    #[test]
    fn min_threshold_zero_is_coerced_to_one() {
        let cfg = LineZoneConfig {
            id: "z".into(),
            start: NormPoint { x: 0.5, y: 0.0 },
            end: NormPoint { x: 0.5, y: 1.0 },
            min_crossing_threshold: 0,
            triggering_anchors: vec![Anchor::BottomCenter],
            triggering_classes: vec![],
        };
        let zone = LineZone::new(cfg).unwrap();
        assert_eq!(zone.min_crossing_threshold, 1);
        assert_eq!(zone.history_length, 2);
    }

    /// Line from (0.5,0)-(0.5,1), K=1,
    /// bottom-center anchor, three frames: (400,500),(600,500),(600,500).
    /// Expected: one `line_crossing_out` on frame 2; none on frame 3;
    /// in_count=0, out_count=1.
    #[test]
    fn line_crossing_k1_scenario() {
        let cfg = LineZoneConfig {
            id: "z1".into(),
            start: NormPoint { x: 0.5, y: 0.0 },
            end: NormPoint { x: 0.5, y: 1.0 },
            min_crossing_threshold: 1,
            triggering_anchors: vec![Anchor::BottomCenter],
            triggering_classes: vec![],
        };
        let mut zone = LineZone::new(cfg).unwrap();
        let frame = FrameSize { width: 1000, height: 1000 };

        let frame1 = det(7, 400.0, 500.0);
        let events1 = zone.process_frame(frame, &[&frame1]);
        assert!(events1.is_empty());

        let frame2 = det(7, 600.0, 500.0);
        let events2 = zone.process_frame(frame, &[&frame2]);
        assert_eq!(events2.len(), 1);
        assert_eq!(events2[0].event_type, ZoneEventType::LineCrossingOut);

        let frame3 = det(7, 600.0, 500.0);
        let events3 = zone.process_frame(frame, &[&frame3]);
        assert!(events3.is_empty());

        assert_eq!(zone.in_count, 0);
        assert_eq!(zone.out_count, 1);
    }
}
