// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-stream zone configuration and the per-frame processing pass that
//! drives line zones, polygon zones, dwell tracking and annotation output.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use super::dwell::DwellTracker;
use super::line::{LineZone, LineZoneConfig};
use super::polygon::{PolygonZone, PolygonZoneConfig};
use super::{DrawInstruction, FrameSize, TrackedObject, ZoneEvent};

/// Geometry-match tolerance used to distinguish a rename from a
/// delete-then-add when reconfiguring a stream's zones.
const RENAME_EPSILON: f32 = 1e-4;

/// All zones configured for one camera/stream, plus the dwell tracker
/// shared across its polygon zones.
struct StreamZones {
    lines: HashMap<String, LineZone>,
    polygons: HashMap<String, PolygonZone>,
    dwell: DwellTracker,
}

impl StreamZones {
    fn new() -> Self {
        StreamZones { lines: HashMap::new(), polygons: HashMap::new(), dwell: DwellTracker::new() }
    }
}

/// Owns the zone configuration for every stream known to this gateway and
/// runs the per-frame analytics pass. Reconfiguration and frame processing
/// both take the write lock; the lock is held only for the duration of
/// each call, never across an await point, so the analytics pass stays on
/// the calling task's budget.
pub struct ZoneManager {
    streams: RwLock<HashMap<String, StreamZones>>,
}

impl ZoneManager {
    pub fn new() -> Self {
        ZoneManager { streams: RwLock::new(HashMap::new()) }
    }

    /// Replace a stream's line-zone set. Zones whose geometry matches an
    /// existing zone within epsilon are treated as renames: their counters
    /// and crossing history migrate to the new id rather than resetting.
    pub fn set_line_zones(&self, stream_id: &str, configs: Vec<LineZoneConfig>) {
        let mut streams = self.streams.write();
        let entry = streams.entry(stream_id.to_string()).or_insert_with(StreamZones::new);

        let mut next: HashMap<String, LineZone> = HashMap::new();
        let mut previous = std::mem::take(&mut entry.lines);

        for config in configs {
            let existing_id = config.id.clone();
            if let Some(mut zone) = previous.remove(&existing_id) {
                zone.apply_update(config);
                next.insert(existing_id, zone);
                continue;
            }

            let matched_old_id = previous
                .iter()
                .find(|(_, z)| z.matches_geometry(config.start, config.end, RENAME_EPSILON))
                .map(|(id, _)| id.clone());

            if let Some(old_id) = matched_old_id {
                let mut zone = previous.remove(&old_id).expect("just located by key");
                let new_id = config.id.clone();
                zone.rename(new_id.clone());
                zone.apply_update(config);
                next.insert(new_id, zone);
                continue;
            }

            if let Some(zone) = LineZone::new(config) {
                next.insert(zone.id.clone(), zone);
            }
        }

        entry.lines = next;
    }

    /// Replace a stream's polygon-zone set with the same rename-preserving
    /// semantics as [`set_line_zones`], additionally migrating dwell
    /// records under the matched id.
    pub fn set_polygon_zones(&self, stream_id: &str, configs: Vec<PolygonZoneConfig>) {
        let mut streams = self.streams.write();
        let entry = streams.entry(stream_id.to_string()).or_insert_with(StreamZones::new);

        let mut next: HashMap<String, PolygonZone> = HashMap::new();
        let mut previous = std::mem::take(&mut entry.polygons);

        for config in configs {
            let existing_id = config.id.clone();
            if let Some(mut zone) = previous.remove(&existing_id) {
                zone.apply_update(config);
                next.insert(existing_id, zone);
                continue;
            }

            let matched_old_id = previous
                .iter()
                .find(|(_, z)| z.matches_geometry(&config.vertices, RENAME_EPSILON))
                .map(|(id, _)| id.clone());

            if let Some(old_id) = matched_old_id {
                let mut zone = previous.remove(&old_id).expect("just located by key");
                let new_id = config.id.clone();
                zone.rename(new_id.clone());
                entry.dwell.migrate_zone(&old_id, &new_id);
                zone.apply_update(config);
                next.insert(new_id, zone);
                continue;
            }

            if let Some(zone) = PolygonZone::new(config) {
                next.insert(zone.id.clone(), zone);
            }
        }

        for removed_id in previous.keys() {
            entry.dwell.remove_zone(removed_id);
        }

        entry.polygons = next;
    }

    pub fn remove_stream(&self, stream_id: &str) {
        self.streams.write().remove(stream_id);
    }

    /// Run every zone configured for `stream_id` against one frame's
    /// tracked-object set. Unknown streams produce no events. Dwell times
    /// are folded into `zone_entry`/`zone_exit`-adjacent bookkeeping but
    /// are not themselves emitted as events; callers needing the live
    /// dwell figure should call [`ZoneManager::dwell_seconds`] separately.
    pub fn process_frame(&self, stream_id: &str, frame: FrameSize, detections: &[TrackedObject]) -> Vec<ZoneEvent> {
        let refs: Vec<&TrackedObject> = detections.iter().collect();
        let mut streams = self.streams.write();
        let Some(entry) = streams.get_mut(stream_id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let now = Utc::now();

        for zone in entry.lines.values_mut() {
            events.extend(zone.process_frame(frame, &refs));
        }

        for zone in entry.polygons.values_mut() {
            let class_filtered: Vec<&TrackedObject> = if zone.class_filter().is_empty() {
                refs.clone()
            } else {
                refs.iter().copied().filter(|d| zone.class_filter().iter().any(|c| c == &d.class_name)).collect()
            };
            let (zone_events, currently_inside) = zone.process_frame(frame, &class_filtered);
            events.extend(zone_events);
            entry.dwell.update(&zone.id, now, &currently_inside);
        }

        events
    }

    /// Current dwell seconds for `object_id` inside `zone_id`, if tracked.
    pub fn dwell_seconds(&self, stream_id: &str, zone_id: &str, object_id: i64) -> Option<f64> {
        let streams = self.streams.read();
        let entry = streams.get(stream_id)?;
        entry.dwell.peek(zone_id, object_id, Utc::now())
    }

    /// Draw instructions for every zone on `stream_id`, in the annotation
    /// pass's non-mutating read-only mode.
    pub fn draw_instructions(&self, stream_id: &str, frame: FrameSize) -> Vec<DrawInstruction> {
        let streams = self.streams.read();
        let Some(entry) = streams.get(stream_id) else {
            return Vec::new();
        };

        let mut instructions = Vec::new();

        for zone in entry.lines.values() {
            let (start, end) = zone.endpoints();
            instructions.push(DrawInstruction::Line {
                zone_id: zone.id.clone(),
                start: start.to_pixels(frame),
                end: end.to_pixels(frame),
                direction_arrow: true,
                endpoint_circles: true,
                in_count: zone.in_count,
                out_count: zone.out_count,
            });
        }

        for zone in entry.polygons.values() {
            let vertices: Vec<(f32, f32)> = zone.vertices().iter().map(|v| v.to_pixels(frame)).collect();
            instructions.push(DrawInstruction::Polygon {
                zone_id: zone.id.clone(),
                vertices,
                fill_opacity: 0.15,
                in_count: zone.in_count,
                out_count: zone.out_count,
                current_count: 0,
                track_ids_inside: Vec::new(),
            });
        }

        instructions
    }
}

impl Default for ZoneManager {
    fn default() -> Self {
        ZoneManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::{Anchor, BoundingBox, NormPoint};

    fn det(track_id: i64, x: f32, y: f32) -> TrackedObject {
        TrackedObject {
            track_id,
            bbox: BoundingBox { x, y, width: 0.0, height: 0.0 },
            class_name: "person".to_string(),
            confidence: 0.9,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn line_zone_rename_preserves_counters() {
        let manager = ZoneManager::new();
        let frame = FrameSize { width: 1000, height: 1000 };
        manager.set_line_zones(
            "cam1",
            vec![LineZoneConfig {
                id: "entrance".into(),
                start: NormPoint { x: 0.5, y: 0.0 },
                end: NormPoint { x: 0.5, y: 1.0 },
                min_crossing_threshold: 1,
                triggering_anchors: vec![Anchor::BottomCenter],
                triggering_classes: vec![],
            }],
        );

        manager.process_frame("cam1", frame, &[det(1, 400.0, 500.0)]);
        let events = manager.process_frame("cam1", frame, &[det(1, 600.0, 500.0)]);
        assert_eq!(events.len(), 1);

        // Re-apply with the same geometry under a new id: this must be
        // treated as a rename, not a fresh zone with zero counters.
        manager.set_line_zones(
            "cam1",
            vec![LineZoneConfig {
                id: "front_door".into(),
                start: NormPoint { x: 0.5, y: 0.0 },
                end: NormPoint { x: 0.5, y: 1.0 },
                min_crossing_threshold: 1,
                triggering_anchors: vec![Anchor::BottomCenter],
                triggering_classes: vec![],
            }],
        );

        let streams = manager.streams.read();
        let zone = streams.get("cam1").unwrap().lines.get("front_door").unwrap();
        assert_eq!(zone.out_count, 1);
        assert!(!streams.get("cam1").unwrap().lines.contains_key("entrance"));
    }

    #[test]
    fn unknown_stream_processes_to_no_events() {
        let manager = ZoneManager::new();
        let frame = FrameSize { width: 1000, height: 1000 };
        let events = manager.process_frame("missing", frame, &[det(1, 10.0, 10.0)]);
        assert!(events.is_empty());
    }
}
