//! Builds the spline cache from the track's `fast_lane*.ai` files.
//!
//! Each source file is one lane. Lanes are concatenated in file name order
//! and renumbered densely, so point `n` of the second file has id
//! `len(first) + n`. Junctions in `junctions.json` refer to these ids.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};
use md5::{Digest, Md5};
use protocol::{CarStatusFlags, Vector3};
use serde::Deserialize;

use super::spline::{AiSpline, SplineBlob, SplineJunction, SplinePoint, SPLINE_CACHE_VERSION};
use crate::error::{Error, Result};

const FAST_LANE_VERSION: i32 = 7;
const FAST_LANE_HEADER: usize = 16;
/// Position, length and id.
const FAST_LANE_POINT: usize = 20;
const EXTRA_FLOATS: usize = 18;
const EXTRA_RADIUS: usize = 4;
const EXTRA_CAMBER: usize = 7;
const JUNCTIONS_FILE: &str = "junctions.json";
/// Minimum alignment of two points' directions to count as parallel lanes.
const PARALLEL_DOT: f32 = 0.7;
const MAX_LANES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanePoint {
    pub position: Vector3,
    pub radius: f32,
    pub camber: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FastLane {
    pub points: Vec<LanePoint>,
    pub closed: bool,
}

/// Parses one version 7 `fast_lane.ai` file.
pub fn parse_fast_lane(bytes: &[u8]) -> Result<FastLane> {
    let mut cursor = Cursor::new(bytes);
    let version = cursor.read_i32::<LittleEndian>()?;
    if version != FAST_LANE_VERSION {
        return Err(Error::spline(format!(
            "unsupported fast lane version {}, expected {}",
            version, FAST_LANE_VERSION
        )));
    }
    let count = read_count(&mut cursor, "point")?;
    let _lap_time = cursor.read_i32::<LittleEndian>()?;
    let _sample_count = cursor.read_i32::<LittleEndian>()?;
    let available = bytes.len().saturating_sub(FAST_LANE_HEADER) / FAST_LANE_POINT;
    if count > available {
        return Err(Error::spline(format!(
            "fast lane declares {} points but holds at most {}",
            count, available
        )));
    }

    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let position = read_vector(&mut cursor)?;
        let _length = cursor.read_f32::<LittleEndian>()?;
        let _id = cursor.read_i32::<LittleEndian>()?;
        points.push(LanePoint {
            position,
            radius: 0.0,
            camber: 0.0,
        });
    }

    // Per-point driving hints. Older exports may omit or truncate them.
    if let Ok(extra_count) = cursor.read_i32::<LittleEndian>() {
        if extra_count as usize == count {
            let mut extra = [0f32; EXTRA_FLOATS];
            for point in points.iter_mut() {
                cursor.read_f32_into::<LittleEndian>(&mut extra)?;
                point.radius = extra[EXTRA_RADIUS];
                point.camber = extra[EXTRA_CAMBER];
            }
        } else if extra_count > 0 {
            warn!(
                "Ignoring {} extra records for a lane of {} points",
                extra_count, count
            );
        }
    }

    let closed = is_closed(&points);
    Ok(FastLane { points, closed })
}

fn read_count(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<usize> {
    let count = cursor.read_i32::<LittleEndian>()?;
    usize::try_from(count).map_err(|_| Error::spline(format!("negative {} count {}", what, count)))
}

fn read_vector<R: Read>(reader: &mut R) -> std::io::Result<Vector3> {
    Ok(Vector3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

/// A lane loops when its ends are no further apart than two average segments.
fn is_closed(points: &[LanePoint]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let total: f32 = points
        .windows(2)
        .map(|w| w[0].position.distance(w[1].position))
        .sum();
    let average = total / (points.len() - 1) as f32;
    let (first, last) = (points[0].position, points[points.len() - 1].position);
    first.distance(last) <= average * 2.0
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Indicator {
    #[default]
    None,
    Left,
    Right,
}

impl Indicator {
    fn flags(self) -> CarStatusFlags {
        match self {
            Indicator::None => CarStatusFlags::NONE,
            Indicator::Left => CarStatusFlags(CarStatusFlags::INDICATE_LEFT),
            Indicator::Right => CarStatusFlags(CarStatusFlags::INDICATE_RIGHT),
        }
    }
}

fn default_indicate_pre() -> f32 {
    75.0
}

fn default_indicate_post() -> f32 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
struct JunctionRecord {
    start: i32,
    end: i32,
    probability: f32,
    #[serde(default)]
    indicate_when_taken: Indicator,
    #[serde(default)]
    indicate_when_not_taken: Indicator,
    #[serde(default = "default_indicate_pre")]
    indicate_distance_pre: f32,
    #[serde(default = "default_indicate_post")]
    indicate_distance_post: f32,
}

/// Assembles lanes and junction definitions into a cache blob.
pub struct SplineBuilder {
    lane_width: f32,
    lanes: Vec<FastLane>,
    junctions: Vec<JunctionRecord>,
}

impl SplineBuilder {
    pub fn new(lane_width: f32) -> Self {
        Self {
            lane_width,
            lanes: Vec::new(),
            junctions: Vec::new(),
        }
    }

    pub fn add_lane(&mut self, lane: FastLane) -> &mut Self {
        self.lanes.push(lane);
        self
    }

    pub fn add_junctions_json(&mut self, json: &str) -> Result<&mut Self> {
        let mut records: Vec<JunctionRecord> = serde_json::from_str(json)?;
        self.junctions.append(&mut records);
        Ok(self)
    }

    pub fn build(&self) -> Result<SplineBlob> {
        let mut blob = SplineBlob::default();
        let mut lane_of = Vec::new();

        for (lane_index, lane) in self.lanes.iter().enumerate() {
            let base = blob.points.len() as i32;
            let len = lane.points.len() as i32;
            for (i, raw) in lane.points.iter().enumerate() {
                let i = i as i32;
                let next = if i + 1 < len {
                    base + i + 1
                } else if lane.closed {
                    base
                } else {
                    -1
                };
                let previous = if i > 0 {
                    base + i - 1
                } else if lane.closed {
                    base + len - 1
                } else {
                    -1
                };
                blob.points.push(SplinePoint {
                    id: base + i,
                    position: raw.position,
                    radius: raw.radius,
                    camber: raw.camber,
                    previous_id: previous,
                    next_id: next,
                    ..Default::default()
                });
                lane_of.push(lane_index);
            }
        }

        let lengths: Vec<f32> = blob
            .points
            .iter()
            .map(|p| match blob.points.get(p.next_id as usize) {
                Some(next) if p.next_id >= 0 => p.position.distance(next.position),
                _ => 0.0,
            })
            .collect();
        for (point, length) in blob.points.iter_mut().zip(lengths) {
            point.length = length;
        }

        link_lanes(&mut blob.points, &lane_of, self.lane_width);
        self.add_junctions(&mut blob)?;
        blob.lanes = build_lane_table(&mut blob.points);
        blob.index_points();

        debug!(
            "Built spline: {} lanes, {} points, {} junctions, {} lane words",
            self.lanes.len(),
            blob.points.len(),
            blob.junctions.len(),
            blob.lanes.len()
        );
        Ok(blob)
    }

    fn add_junctions(&self, blob: &mut SplineBlob) -> Result<()> {
        let num_points = blob.points.len() as i32;
        for record in &self.junctions {
            let in_range = |id: i32| id >= 0 && id < num_points;
            if !in_range(record.start) || !in_range(record.end) {
                return Err(Error::spline(format!(
                    "junction {} -> {} references a missing point",
                    record.start, record.end
                )));
            }
            let start = record.start as usize;
            let end = record.end as usize;
            if blob.points[start].junction_start_id >= 0 {
                warn!("Point {} already starts a junction, skipping", record.start);
                continue;
            }

            let id = blob.junctions.len() as i32;
            blob.junctions.push(SplineJunction {
                id,
                start_id: record.start,
                end_id: record.end,
                probability: record.probability.clamp(0.0, 1.0),
                indicate_when_taken: record.indicate_when_taken.flags(),
                indicate_when_not_taken: record.indicate_when_not_taken.flags(),
                indicate_distance_pre: record.indicate_distance_pre,
                indicate_distance_post: record.indicate_distance_post,
            });
            blob.points[start].junction_start_id = id;
            if blob.points[end].junction_end_id < 0 {
                blob.points[end].junction_end_id = id;
            }
        }
        Ok(())
    }
}

fn forward_of(points: &[SplinePoint], index: usize) -> Vector3 {
    let point = &points[index];
    let towards = |id: i32| points.get(usize::try_from(id).ok()?).map(|p| p.position);
    match (towards(point.next_id), towards(point.previous_id)) {
        (Some(next), _) => (next - point.position).normalize(),
        (None, Some(previous)) => (point.position - previous).normalize(),
        (None, None) => Vector3::ZERO,
    }
}

/// Links each point to the closest parallel point of another lane on either side.
fn link_lanes(points: &mut [SplinePoint], lane_of: &[usize], lane_width: f32) {
    if lane_width <= 0.0 {
        return;
    }
    let cell = lane_width * 2.0;
    let key = |p: Vector3| ((p.x / cell).floor() as i64, (p.z / cell).floor() as i64);

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (index, point) in points.iter().enumerate() {
        grid.entry(key(point.position)).or_default().push(index);
    }
    let forwards: Vec<Vector3> = (0..points.len()).map(|i| forward_of(points, i)).collect();

    let mut links = Vec::with_capacity(points.len());
    for (index, point) in points.iter().enumerate() {
        let forward = forwards[index];
        let right = Vector3::UP.cross(forward).normalize();
        let (cx, cz) = key(point.position);
        let mut best_left: Option<(f32, usize)> = None;
        let mut best_right: Option<(f32, usize)> = None;

        for dx in -1..=1 {
            for dz in -1..=1 {
                let candidates = match grid.get(&(cx + dx, cz + dz)) {
                    Some(candidates) => candidates,
                    None => continue,
                };
                for &other in candidates {
                    if lane_of[other] == lane_of[index] || forwards[other].dot(forward) < PARALLEL_DOT {
                        continue;
                    }
                    let offset = points[other].position - point.position;
                    let lateral = offset.dot(right);
                    if offset.dot(forward).abs() > lane_width
                        || offset.y.abs() > lane_width
                        || lateral.abs() < lane_width * 0.5
                        || lateral.abs() > lane_width * 1.5
                    {
                        continue;
                    }
                    let distance = offset.length_squared();
                    let side = if lateral > 0.0 { &mut best_right } else { &mut best_left };
                    if side.map_or(true, |(d, _)| distance < d) {
                        *side = Some((distance, other));
                    }
                }
            }
        }
        links.push((best_left.map(|(_, i)| i), best_right.map(|(_, i)| i)));
    }

    for (point, (left, right)) in points.iter_mut().zip(links) {
        point.left_id = left.map_or(-1, |i| i as i32);
        point.right_id = right.map_or(-1, |i| i as i32);
    }
}

/// Writes `[count, ids...]` groups and sets each point's offset. Points
/// sharing a cross-section share one group.
fn build_lane_table(points: &mut [SplinePoint]) -> Vec<i32> {
    let mut table = Vec::new();
    let mut groups: HashMap<Vec<i32>, i32> = HashMap::new();

    for index in 0..points.len() {
        let point = points[index];
        if point.left_id < 0 && point.right_id < 0 {
            continue;
        }

        let mut leftmost = point.id;
        for _ in 0..MAX_LANES {
            match points.get(leftmost as usize).map(|p| p.left_id) {
                Some(left) if left >= 0 && left != point.id => leftmost = left,
                _ => break,
            }
        }

        let mut lanes = vec![leftmost];
        let mut current = leftmost;
        while lanes.len() < MAX_LANES {
            match points.get(current as usize).map(|p| p.right_id) {
                Some(right) if right >= 0 && !lanes.contains(&right) => {
                    lanes.push(right);
                    current = right;
                }
                _ => break,
            }
        }
        if lanes.len() < 2 || !lanes.contains(&point.id) {
            continue;
        }

        let offset = *groups.entry(lanes.clone()).or_insert_with(|| {
            let offset = table.len() as i32;
            table.push(lanes.len() as i32);
            table.extend_from_slice(&lanes);
            offset
        });
        points[index].lanes_offset = offset;
    }
    table
}

/// Sorted `fast_lane*.ai` files in `dir`.
pub fn find_lane_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_lane = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with("fast_lane") && name.ends_with(".ai"));
        if is_lane && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Opens the cached spline for `source_dir`, rebuilding it when the source
/// content changed or the cached file has an unsupported version.
pub fn load_or_build(source_dir: &Path, cache_dir: &Path, lane_width: f32) -> Result<AiSpline> {
    let files = find_lane_files(source_dir)?;
    if files.is_empty() {
        return Err(Error::spline(format!(
            "no fast_lane*.ai files in {}",
            source_dir.display()
        )));
    }

    let mut hasher = Md5::new();
    hasher.update(SPLINE_CACHE_VERSION.to_le_bytes());
    hasher.update(lane_width.to_le_bytes());
    let mut sources = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = std::fs::read(file)?;
        hasher.update(&bytes);
        sources.push(bytes);
    }
    let junctions_path = source_dir.join(JUNCTIONS_FILE);
    let junctions = if junctions_path.is_file() {
        let text = std::fs::read_to_string(&junctions_path)?;
        hasher.update(text.as_bytes());
        Some(text)
    } else {
        None
    };
    let key = hex::encode(hasher.finalize());
    let cache_path = cache_dir.join(format!("spline_{}.bin", key));

    if cache_path.is_file() {
        match AiSpline::open(&cache_path) {
            Ok(spline) => {
                info!("Using cached spline {}", cache_path.display());
                return Ok(spline);
            }
            Err(e @ (Error::SplineVersion { .. } | Error::Spline(_))) => {
                warn!("Discarding spline cache {}: {}", cache_path.display(), e);
            }
            Err(e) => return Err(e),
        }
    }

    let mut builder = SplineBuilder::new(lane_width);
    for (file, bytes) in files.iter().zip(&sources) {
        let lane = parse_fast_lane(bytes)
            .map_err(|e| Error::spline(format!("{}: {}", file.display(), e)))?;
        builder.add_lane(lane);
    }
    if let Some(json) = &junctions {
        builder.add_junctions_json(json)?;
    }
    let blob = builder.build()?;

    std::fs::create_dir_all(cache_dir)?;
    blob.write_to(&cache_path)?;
    info!(
        "Generated spline cache {} from {} lanes",
        cache_path.display(),
        files.len()
    );
    AiSpline::open(&cache_path)
}

#[cfg(test)]
pub(crate) fn encode_fast_lane(points: &[Vector3], radius: f32) -> Vec<u8> {
    use byteorder::WriteBytesExt;

    let mut out = Vec::new();
    out.write_i32::<LittleEndian>(FAST_LANE_VERSION).unwrap();
    out.write_i32::<LittleEndian>(points.len() as i32).unwrap();
    out.write_i32::<LittleEndian>(0).unwrap();
    out.write_i32::<LittleEndian>(0).unwrap();
    for (i, p) in points.iter().enumerate() {
        for v in [p.x, p.y, p.z, 0.0] {
            out.write_f32::<LittleEndian>(v).unwrap();
        }
        out.write_i32::<LittleEndian>(i as i32).unwrap();
    }
    out.write_i32::<LittleEndian>(points.len() as i32).unwrap();
    for _ in points {
        for k in 0..EXTRA_FLOATS {
            let value = match k {
                EXTRA_RADIUS => radius,
                EXTRA_CAMBER => 0.01,
                _ => 0.0,
            };
            out.write_f32::<LittleEndian>(value).unwrap();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn straight(x: f32, count: usize) -> Vec<Vector3> {
        (0..count)
            .map(|i| Vector3::new(x, 0.0, i as f32 * 5.0))
            .collect()
    }

    fn lane(points: Vec<Vector3>) -> FastLane {
        FastLane {
            closed: false,
            points: points
                .into_iter()
                .map(|position| LanePoint {
                    position,
                    radius: 100.0,
                    camber: 0.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_fast_lane() {
        let bytes = encode_fast_lane(&straight(0.0, 4), 250.0);
        let lane = parse_fast_lane(&bytes).unwrap();
        assert_eq!(lane.points.len(), 4);
        assert!(!lane.closed);
        assert_eq!(lane.points[2].position, Vector3::new(0.0, 0.0, 10.0));
        assert_approx_eq!(lane.points[1].radius, 250.0);
        assert_approx_eq!(lane.points[1].camber, 0.01);
    }

    #[test]
    fn test_parse_rejects_other_versions() {
        let mut bytes = encode_fast_lane(&straight(0.0, 2), 1.0);
        bytes[0] = 6;
        assert!(matches!(parse_fast_lane(&bytes), Err(Error::Spline(_))));
    }

    #[test]
    fn test_parse_without_extra_records() {
        let bytes = encode_fast_lane(&straight(0.0, 3), 1.0);
        // Header + 3 points, no extra section.
        let lane = parse_fast_lane(&bytes[..FAST_LANE_HEADER + 3 * FAST_LANE_POINT]).unwrap();
        assert_eq!(lane.points.len(), 3);
        assert_eq!(lane.points[0].radius, 0.0);
    }

    #[test]
    fn test_parse_truncated_points() {
        let bytes = encode_fast_lane(&straight(0.0, 3), 1.0);
        assert!(parse_fast_lane(&bytes[..16 + 30]).is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_point_count() {
        let mut bytes = encode_fast_lane(&straight(0.0, 3), 1.0);
        bytes[4..8].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(parse_fast_lane(&bytes), Err(Error::Spline(_))));
    }

    #[test]
    fn test_closed_loop_detection() {
        let square: Vec<Vector3> = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 10.0),
            Vector3::new(0.0, 0.0, 10.0),
        ];
        let bytes = encode_fast_lane(&square, 1.0);
        assert!(parse_fast_lane(&bytes).unwrap().closed);

        let blob = SplineBuilder::new(3.0)
            .add_lane(parse_fast_lane(&bytes).unwrap())
            .build()
            .unwrap();
        assert_eq!(blob.points[3].next_id, 0);
        assert_eq!(blob.points[0].previous_id, 3);
        assert_approx_eq!(blob.points[3].length, 10.0);
    }

    #[test]
    fn test_build_links_parallel_lanes() {
        let mut builder = SplineBuilder::new(3.0);
        builder.add_lane(lane(straight(0.0, 5)));
        builder.add_lane(lane(straight(3.0, 5)));
        builder.add_lane(lane(straight(40.0, 5)));
        let blob = builder.build().unwrap();

        assert_eq!(blob.points.len(), 15);
        // Travelling +z, +x is to the right.
        assert_eq!(blob.points[2].right_id, 7);
        assert_eq!(blob.points[7].left_id, 2);
        assert_eq!(blob.points[2].left_id, -1);
        assert_eq!(blob.points[12].left_id, -1);
        assert_eq!(blob.points[4].next_id, -1);
        assert_approx_eq!(blob.points[0].length, 5.0);
        assert_eq!(blob.points[4].length, 0.0);

        let spline = AiSpline::from_blob(&blob).unwrap();
        assert_eq!(spline.lanes(2), vec![2, 7]);
        assert_eq!(spline.lanes(7), vec![2, 7]);
        assert!(spline.lanes(12).is_empty());
        assert_eq!(spline.world_to_spline(Vector3::new(3.0, 0.0, 10.0)), (7, 0.0));
    }

    #[test]
    fn test_opposite_directions_are_not_linked() {
        let mut reversed = straight(3.0, 5);
        reversed.reverse();
        let mut builder = SplineBuilder::new(3.0);
        builder.add_lane(lane(straight(0.0, 5)));
        builder.add_lane(lane(reversed));
        let blob = builder.build().unwrap();
        assert!(blob.points.iter().all(|p| p.left_id < 0 && p.right_id < 0));
    }

    #[test]
    fn test_junctions_json() {
        let mut builder = SplineBuilder::new(3.0);
        builder.add_lane(lane(straight(0.0, 5)));
        builder.add_lane(lane(straight(20.0, 5)));
        builder
            .add_junctions_json(r#"[{"start": 2, "end": 6, "probability": 0.25, "indicate_when_taken": "right"}]"#)
            .unwrap();
        let blob = builder.build().unwrap();

        assert_eq!(blob.junctions.len(), 1);
        let junction = blob.junctions[0];
        assert_eq!((junction.start_id, junction.end_id), (2, 6));
        assert_approx_eq!(junction.probability, 0.25);
        assert!(junction.indicate_when_taken.contains(CarStatusFlags::INDICATE_RIGHT));
        assert_eq!(junction.indicate_when_not_taken, CarStatusFlags::NONE);
        assert_approx_eq!(junction.indicate_distance_pre, 75.0);
        assert_eq!(blob.points[2].junction_start_id, 0);
        assert_eq!(blob.points[6].junction_end_id, 0);
    }

    #[test]
    fn test_junction_with_missing_point() {
        let mut builder = SplineBuilder::new(3.0);
        builder.add_lane(lane(straight(0.0, 3)));
        builder
            .add_junctions_json(r#"[{"start": 1, "end": 9, "probability": 1.0}]"#)
            .unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_load_or_build_uses_cache() {
        let source = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(
            source.path().join("fast_lane.ai"),
            encode_fast_lane(&straight(0.0, 10), 500.0),
        )
        .unwrap();
        std::fs::write(
            source.path().join("fast_lane_2.ai"),
            encode_fast_lane(&straight(3.0, 10), 500.0),
        )
        .unwrap();
        std::fs::write(source.path().join("readme.txt"), "ignored").unwrap();

        let spline = load_or_build(source.path(), cache.path(), 3.0).unwrap();
        assert_eq!(spline.num_points(), 20);
        assert_eq!(spline.lanes(4), vec![4, 14]);

        let cached: Vec<_> = std::fs::read_dir(cache.path()).unwrap().collect();
        assert_eq!(cached.len(), 1);

        // Same sources map the same cache file.
        let again = load_or_build(source.path(), cache.path(), 3.0).unwrap();
        assert_eq!(again.num_points(), 20);
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 1);

        // Changed sources produce a new key.
        std::fs::write(
            source.path().join("fast_lane_2.ai"),
            encode_fast_lane(&straight(3.0, 12), 500.0),
        )
        .unwrap();
        let changed = load_or_build(source.path(), cache.path(), 3.0).unwrap();
        assert_eq!(changed.num_points(), 22);
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_stale_cache_version_is_rebuilt() {
        let source = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(
            source.path().join("fast_lane.ai"),
            encode_fast_lane(&straight(0.0, 6), 500.0),
        )
        .unwrap();
        load_or_build(source.path(), cache.path(), 3.0).unwrap();

        let cached = std::fs::read_dir(cache.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut bytes = std::fs::read(&cached).unwrap();
        bytes[0] = 1;
        std::fs::write(&cached, bytes).unwrap();

        let spline = load_or_build(source.path(), cache.path(), 3.0).unwrap();
        assert_eq!(spline.header().version, SPLINE_CACHE_VERSION);
    }

    #[test]
    fn test_missing_sources() {
        let source = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_or_build(source.path(), cache.path(), 3.0),
            Err(Error::Spline(_))
        ));
    }
}
