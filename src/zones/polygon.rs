// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Polygon-zone rasterised mask and enter/exit state machine.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use super::{class_id_from_name, Anchor, BoundingBox, FrameSize, NormPoint, TrackedObject, ZoneEvent, ZoneEventMetadata, ZoneEventType};

/// Bound on the per-track in-zone boolean history.
const IN_ZONE_HISTORY_CAP: usize = 10;

struct RasterMask {
    frame: FrameSize,
    /// Row-major bitmap, one byte per pixel (0/1); simple and cache-friendly
    /// for the point-in-polygon scan-fill this module performs once per
    /// frame-size/vertex change.
    bits: Vec<u8>,
}

impl RasterMask {
    fn contains(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as u32 >= self.frame.width || y as u32 >= self.frame.height {
            return false;
        }
        let idx = y as usize * self.frame.width as usize + x as usize;
        self.bits.get(idx).copied().unwrap_or(0) != 0
    }
}

/// Standard even-odd scanline rasterisation of a simple polygon into a
/// dense pixel mask, recomputed on vertex or frame-size change.
fn rasterize(vertices: &[(f32, f32)], frame: FrameSize) -> RasterMask {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut bits = vec![0u8; width * height];

    for y in 0..height {
        let yf = y as f32 + 0.5;
        let mut intersections: Vec<f32> = Vec::new();
        let n = vertices.len();
        for i in 0..n {
            let (x1, y1) = vertices[i];
            let (x2, y2) = vertices[(i + 1) % n];
            if (y1 <= yf && y2 > yf) || (y2 <= yf && y1 > yf) {
                let t = (yf - y1) / (y2 - y1);
                intersections.push(x1 + t * (x2 - x1));
            }
        }
        intersections.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut i = 0;
        while i + 1 < intersections.len() {
            let start = intersections[i].round().max(0.0) as usize;
            let end = (intersections[i + 1].round() as i64).clamp(0, width as i64) as usize;
            for x in start.min(width)..end.min(width) {
                bits[y * width + x] = 1;
            }
            i += 2;
        }
    }

    RasterMask { frame, bits }
}

#[derive(Debug, Clone)]
pub struct PolygonZoneConfig {
    pub id: String,
    pub vertices: Vec<NormPoint>,
    pub triggering_anchors: Vec<Anchor>,
    pub triggering_classes: Vec<String>,
}

pub struct PolygonZone {
    pub id: String,
    vertices: Vec<NormPoint>,
    triggering_anchors: Vec<Anchor>,
    triggering_classes: Vec<String>,
    pub in_count: u64,
    pub out_count: u64,
    pub in_count_per_class: HashMap<i64, u64>,
    pub out_count_per_class: HashMap<i64, u64>,
    in_zone_history: HashMap<i64, VecDeque<bool>>,
    mask: Option<RasterMask>,
}

impl PolygonZone {
    /// Fails (returns `None`) for fewer than 3 vertices.
    pub fn new(config: PolygonZoneConfig) -> Option<Self> {
        if config.vertices.len() < 3 {
            return None;
        }
        let anchors = if config.triggering_anchors.is_empty() {
            Anchor::default_set()
        } else {
            config.triggering_anchors
        };
        Some(PolygonZone {
            id: config.id,
            vertices: config.vertices,
            triggering_anchors: anchors,
            triggering_classes: config.triggering_classes,
            in_count: 0,
            out_count: 0,
            in_count_per_class: HashMap::new(),
            out_count_per_class: HashMap::new(),
            in_zone_history: HashMap::new(),
            mask: None,
        })
    }

    pub fn vertices(&self) -> &[NormPoint] {
        &self.vertices
    }

    pub fn class_filter(&self) -> &[String] {
        &self.triggering_classes
    }

    /// In-place update, preserving counters.
    pub fn apply_update(&mut self, config: PolygonZoneConfig) {
        if config.vertices != self.vertices {
            self.vertices = config.vertices;
            self.mask = None;
        }
        if !config.triggering_anchors.is_empty() {
            self.triggering_anchors = config.triggering_anchors;
        }
        self.triggering_classes = config.triggering_classes;
    }

    /// Geometry match within epsilon, per-point. Vertex lists must be the
    /// same length and pairwise within epsilon at the same index —
    /// external editors preserve vertex order on a pure rename.
    pub fn matches_geometry(&self, vertices: &[NormPoint], epsilon: f32) -> bool {
        if self.vertices.len() != vertices.len() {
            return false;
        }
        self.vertices
            .iter()
            .zip(vertices.iter())
            .all(|(a, b)| (a.x - b.x).abs() < epsilon && (a.y - b.y).abs() < epsilon)
    }

    pub fn rename(&mut self, new_id: String) {
        self.id = new_id;
    }

    fn ensure_mask(&mut self, frame: FrameSize) {
        if let Some(mask) = &self.mask {
            if mask.frame == frame {
                return;
            }
        }
        let pixel_vertices: Vec<(f32, f32)> = self.vertices.iter().map(|v| v.to_pixels(frame)).collect();
        self.mask = Some(rasterize(&pixel_vertices, frame));
    }

    /// Per-frame evaluation. Returns zone events and reports the current
    /// in-zone track id set (for dwell tracking and annotation).
    pub fn process_frame(
        &mut self,
        frame: FrameSize,
        detections: &[&TrackedObject],
    ) -> (Vec<ZoneEvent>, std::collections::HashSet<i64>) {
        self.ensure_mask(frame);
        let mask = self.mask.as_ref().expect("mask computed above");

        let mut events = Vec::new();
        let mut currently_inside = std::collections::HashSet::new();

        for detection in detections {
            if !self.triggering_classes.is_empty() && !self.triggering_classes.iter().any(|c| c == &detection.class_name) {
                continue;
            }

            let mut all_inside = true;
            for anchor in &self.triggering_anchors {
                let (ax, ay) = BoundingBox::anchor_point(&detection.bbox, *anchor);
                if !mask.contains(ax.round() as i32, ay.round() as i32) {
                    all_inside = false;
                    break;
                }
            }

            let history = self.in_zone_history.entry(detection.track_id).or_insert_with(VecDeque::new);
            let was_inside = history.back().copied().unwrap_or(false);
            history.push_back(all_inside);
            while history.len() > IN_ZONE_HISTORY_CAP {
                history.pop_front();
            }

            if all_inside {
                currently_inside.insert(detection.track_id);
            }

            if all_inside && !was_inside {
                let class_id = class_id_from_name(&detection.class_name);
                self.in_count += 1;
                *self.in_count_per_class.entry(class_id).or_insert(0) += 1;
                let (cx, cy) = detection.bbox.center();
                events.push(ZoneEvent {
                    timestamp: Utc::now(),
                    object_id: detection.track_id.to_string(),
                    class_name: detection.class_name.clone(),
                    location: (cx, cy),
                    zone_id: self.id.clone(),
                    event_type: ZoneEventType::ZoneEntry,
                    metadata: ZoneEventMetadata {
                        direction: "in",
                        in_count: self.in_count,
                        out_count: self.out_count,
                        current_count: Some(currently_inside.len() as i64),
                    },
                });
            } else if !all_inside && was_inside {
                let class_id = class_id_from_name(&detection.class_name);
                self.out_count += 1;
                *self.out_count_per_class.entry(class_id).or_insert(0) += 1;
                let (cx, cy) = detection.bbox.center();
                events.push(ZoneEvent {
                    timestamp: Utc::now(),
                    object_id: detection.track_id.to_string(),
                    class_name: detection.class_name.clone(),
                    location: (cx, cy),
                    zone_id: self.id.clone(),
                    event_type: ZoneEventType::ZoneExit,
                    metadata: ZoneEventMetadata {
                        direction: "out",
                        in_count: self.in_count,
                        out_count: self.out_count,
                        current_count: Some(currently_inside.len() as i64),
                    },
                });
            }
        }

        (events, currently_inside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn fewer_than_three_vertices_fails_init() {
        let cfg = PolygonZoneConfig {
            id: "p".into(),
            vertices: vec![NormPoint { x: 0.0, y: 0.0 }, NormPoint { x: 1.0, y: 1.0 }],
            triggering_anchors: vec![Anchor::BottomCenter],
            triggering_classes: vec![],
        };
        assert!(PolygonZone::new(cfg).is_none());
    }

    /// A square polygon, a track entering, leaving, and re-entering across
    /// three frames.
    #[test]
    fn square_polygon_entry_and_exit() {
        let cfg = PolygonZoneConfig {
            id: "p".into(),
            vertices: vec![
                NormPoint { x: 0.2, y: 0.2 },
                NormPoint { x: 0.8, y: 0.2 },
                NormPoint { x: 0.8, y: 0.8 },
                NormPoint { x: 0.2, y: 0.8 },
            ],
            triggering_anchors: vec![Anchor::BottomCenter],
            triggering_classes: vec![],
        };
        let mut zone = PolygonZone::new(cfg).unwrap();
        let frame = FrameSize { width: 1000, height: 1000 };

        let (events1, inside1) = zone.process_frame(frame, &[&det(3, 500.0, 500.0)]);
        assert_eq!(events1.len(), 1);
        assert_eq!(events1[0].event_type, ZoneEventType::ZoneEntry);
        assert!(inside1.contains(&3));

        let (events2, inside2) = zone.process_frame(frame, &[&det(3, 100.0, 100.0)]);
        assert_eq!(events2.len(), 1);
        assert_eq!(events2[0].event_type, ZoneEventType::ZoneExit);
        assert!(!inside2.contains(&3));

        let (events3, inside3) = zone.process_frame(frame, &[&det(3, 500.0, 500.0)]);
        assert_eq!(events3.len(), 1);
        assert_eq!(events3[0].event_type, ZoneEventType::ZoneEntry);
        assert!(inside3.contains(&3));

        assert_eq!(zone.in_count, 2);
        assert_eq!(zone.out_count, 1);
    }
}
