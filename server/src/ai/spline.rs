//! Read-only view over the AI spline cache file.
//!
//! Layout (little-endian):
//!
//! ```text
//! header     version:i32 num_points:i32 num_junctions:i32 num_kd_points:i32
//! points     num_points    x 56 bytes
//! junctions  num_junctions x 32 bytes
//! kd tree    num_kd_points x 16 bytes  (x, y, z, point_id)
//! lanes      i32 words to end of file: [count, id, id, ...] groups
//! ```
//!
//! Point and junction ids are their indices in the respective tables.

use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;
use memmap2::Mmap;
use protocol::{CarStatusFlags, Vector3};
use rand::Rng;

use super::kdtree::{self, KdNode, KdNodes};
use crate::error::{Error, Result};

pub const SPLINE_CACHE_VERSION: i32 = 3;

const HEADER_SIZE: usize = 16;
const POINT_SIZE: usize = 56;
const JUNCTION_SIZE: usize = 32;
const KD_NODE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplinePoint {
    pub id: i32,
    pub position: Vector3,
    pub radius: f32,
    pub camber: f32,
    /// Distance to the next point.
    pub length: f32,
    pub previous_id: i32,
    pub next_id: i32,
    pub left_id: i32,
    pub right_id: i32,
    pub junction_start_id: i32,
    pub junction_end_id: i32,
    /// Word offset into the lane table, or -1.
    pub lanes_offset: i32,
}

impl Default for SplinePoint {
    fn default() -> Self {
        Self {
            id: -1,
            position: Vector3::ZERO,
            radius: 0.0,
            camber: 0.0,
            length: 0.0,
            previous_id: -1,
            next_id: -1,
            left_id: -1,
            right_id: -1,
            junction_start_id: -1,
            junction_end_id: -1,
            lanes_offset: -1,
        }
    }
}

impl SplinePoint {
    fn decode(b: &[u8]) -> Self {
        let i = |at: usize| LittleEndian::read_i32(&b[at..at + 4]);
        let f = |at: usize| LittleEndian::read_f32(&b[at..at + 4]);
        SplinePoint {
            id: i(0),
            position: Vector3::new(f(4), f(8), f(12)),
            radius: f(16),
            camber: f(20),
            length: f(24),
            previous_id: i(28),
            next_id: i(32),
            left_id: i(36),
            right_id: i(40),
            junction_start_id: i(44),
            junction_end_id: i(48),
            lanes_offset: i(52),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.id)?;
        write_vector(out, self.position)?;
        out.write_f32::<LittleEndian>(self.radius)?;
        out.write_f32::<LittleEndian>(self.camber)?;
        out.write_f32::<LittleEndian>(self.length)?;
        for link in [
            self.previous_id,
            self.next_id,
            self.left_id,
            self.right_id,
            self.junction_start_id,
            self.junction_end_id,
            self.lanes_offset,
        ] {
            out.write_i32::<LittleEndian>(link)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineJunction {
    pub id: i32,
    pub start_id: i32,
    pub end_id: i32,
    /// Chance in `[0, 1]` that a car takes the branch.
    pub probability: f32,
    pub indicate_when_taken: CarStatusFlags,
    pub indicate_when_not_taken: CarStatusFlags,
    pub indicate_distance_pre: f32,
    pub indicate_distance_post: f32,
}

impl SplineJunction {
    fn decode(b: &[u8]) -> Self {
        let i = |at: usize| LittleEndian::read_i32(&b[at..at + 4]);
        let u = |at: usize| LittleEndian::read_u32(&b[at..at + 4]);
        let f = |at: usize| LittleEndian::read_f32(&b[at..at + 4]);
        SplineJunction {
            id: i(0),
            start_id: i(4),
            end_id: i(8),
            probability: f(12),
            indicate_when_taken: CarStatusFlags(u(16)),
            indicate_when_not_taken: CarStatusFlags(u(20)),
            indicate_distance_pre: f(24),
            indicate_distance_post: f(28),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.id)?;
        out.write_i32::<LittleEndian>(self.start_id)?;
        out.write_i32::<LittleEndian>(self.end_id)?;
        out.write_f32::<LittleEndian>(self.probability)?;
        out.write_u32::<LittleEndian>(self.indicate_when_taken.0)?;
        out.write_u32::<LittleEndian>(self.indicate_when_not_taken.0)?;
        out.write_f32::<LittleEndian>(self.indicate_distance_pre)?;
        out.write_f32::<LittleEndian>(self.indicate_distance_post)?;
        Ok(())
    }
}

fn write_vector(out: &mut Vec<u8>, v: Vector3) -> std::io::Result<()> {
    out.write_f32::<LittleEndian>(v.x)?;
    out.write_f32::<LittleEndian>(v.y)?;
    out.write_f32::<LittleEndian>(v.z)
}

/// In-memory form of the cache file, produced by the builder.
#[derive(Debug, Clone, Default)]
pub struct SplineBlob {
    pub points: Vec<SplinePoint>,
    pub junctions: Vec<SplineJunction>,
    pub kd_nodes: Vec<KdNode>,
    pub lanes: Vec<i32>,
}

impl SplineBlob {
    /// Builds the k-d tree from the current points, replacing any existing one.
    pub fn index_points(&mut self) {
        self.kd_nodes = self
            .points
            .iter()
            .map(|p| KdNode {
                position: p.position,
                point_id: p.id,
            })
            .collect();
        kdtree::build(&mut self.kd_nodes);
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE
                + self.points.len() * POINT_SIZE
                + self.junctions.len() * JUNCTION_SIZE
                + self.kd_nodes.len() * KD_NODE_SIZE
                + self.lanes.len() * 4,
        );
        out.write_i32::<LittleEndian>(SPLINE_CACHE_VERSION)?;
        out.write_i32::<LittleEndian>(count_i32(self.points.len())?)?;
        out.write_i32::<LittleEndian>(count_i32(self.junctions.len())?)?;
        out.write_i32::<LittleEndian>(count_i32(self.kd_nodes.len())?)?;

        for point in &self.points {
            point.encode(&mut out)?;
        }
        for junction in &self.junctions {
            junction.encode(&mut out)?;
        }
        for node in &self.kd_nodes {
            write_vector(&mut out, node.position)?;
            out.write_i32::<LittleEndian>(node.point_id)?;
        }
        for word in &self.lanes {
            out.write_i32::<LittleEndian>(*word)?;
        }
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn count_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::spline(format!("table of {} entries is too large", len)))
}

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Storage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Storage::Mapped(map) => map,
            Storage::Owned(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplineHeader {
    pub version: i32,
    pub num_points: usize,
    pub num_junctions: usize,
    pub num_kd_points: usize,
}

/// Spline graph backed by a read-only memory map (or an owned buffer in tests).
pub struct AiSpline {
    storage: Storage,
    header: SplineHeader,
    points_at: usize,
    junctions_at: usize,
    kd_at: usize,
    lanes_at: usize,
    lane_words: usize,
}

impl AiSpline {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: cache files are written to a temporary name and renamed into
        // place, so a mapped file is never modified afterwards.
        let map = unsafe { Mmap::map(&file)? };
        let spline = Self::parse(Storage::Mapped(map))?;
        debug!(
            "Mapped spline cache {} ({} points, {} junctions)",
            path.display(),
            spline.header.num_points,
            spline.header.num_junctions
        );
        Ok(spline)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::parse(Storage::Owned(bytes))
    }

    pub fn from_blob(blob: &SplineBlob) -> Result<Self> {
        Self::from_bytes(blob.encode()?)
    }

    fn parse(storage: Storage) -> Result<Self> {
        if storage.len() < HEADER_SIZE {
            return Err(Error::spline("file shorter than header"));
        }
        let word = |at: usize| LittleEndian::read_i32(&storage[at..at + 4]);
        let version = word(0);
        if version != SPLINE_CACHE_VERSION {
            return Err(Error::SplineVersion {
                found: version,
                expected: SPLINE_CACHE_VERSION,
            });
        }

        let count = |at: usize, what: &str| {
            usize::try_from(word(at)).map_err(|_| Error::spline(format!("negative {} count", what)))
        };
        let header = SplineHeader {
            version,
            num_points: count(4, "point")?,
            num_junctions: count(8, "junction")?,
            num_kd_points: count(12, "k-d tree")?,
        };

        let points_at = HEADER_SIZE;
        let junctions_at = points_at + header.num_points * POINT_SIZE;
        let kd_at = junctions_at + header.num_junctions * JUNCTION_SIZE;
        let lanes_at = kd_at + header.num_kd_points * KD_NODE_SIZE;
        if storage.len() < lanes_at || (storage.len() - lanes_at) % 4 != 0 {
            return Err(Error::spline(format!(
                "file size {} does not match header {:?}",
                storage.len(),
                header
            )));
        }
        let lane_words = (storage.len() - lanes_at) / 4;

        Ok(AiSpline {
            storage,
            header,
            points_at,
            junctions_at,
            kd_at,
            lanes_at,
            lane_words,
        })
    }

    pub fn header(&self) -> SplineHeader {
        self.header
    }

    pub fn num_points(&self) -> usize {
        self.header.num_points
    }

    pub fn num_junctions(&self) -> usize {
        self.header.num_junctions
    }

    pub fn point(&self, id: i32) -> Option<SplinePoint> {
        let index = usize::try_from(id).ok().filter(|&i| i < self.header.num_points)?;
        let at = self.points_at + index * POINT_SIZE;
        Some(SplinePoint::decode(&self.storage[at..at + POINT_SIZE]))
    }

    pub fn junction(&self, id: i32) -> Option<SplineJunction> {
        let index = usize::try_from(id).ok().filter(|&i| i < self.header.num_junctions)?;
        let at = self.junctions_at + index * JUNCTION_SIZE;
        Some(SplineJunction::decode(&self.storage[at..at + JUNCTION_SIZE]))
    }

    fn lane_word(&self, index: usize) -> Option<i32> {
        if index >= self.lane_words {
            return None;
        }
        let at = self.lanes_at + index * 4;
        Some(LittleEndian::read_i32(&self.storage[at..at + 4]))
    }

    /// Nearest spline point to `position` as `(point_id, distance_squared)`.
    /// `(-1, f32::INFINITY)` when the spline is empty.
    pub fn world_to_spline(&self, position: Vector3) -> (i32, f32) {
        kdtree::nearest(self, position)
    }

    /// Every lane at this cross-section, left to right, including `point_id`.
    /// Empty when the point has no parallel lanes.
    pub fn lanes(&self, point_id: i32) -> Vec<i32> {
        let offset = match self.point(point_id).map(|p| p.lanes_offset) {
            Some(offset) if offset >= 0 => offset as usize,
            _ => return Vec::new(),
        };
        let count = match self.lane_word(offset) {
            Some(count) if count > 0 => count as usize,
            _ => return Vec::new(),
        };
        (0..count)
            .map_while(|i| self.lane_word(offset + 1 + i))
            .collect()
    }

    /// Uniformly picks one lane at the cross-section of `point_id`.
    pub fn random_lane<R: Rng + ?Sized>(&self, point_id: i32, rng: &mut R) -> i32 {
        let lanes = self.lanes(point_id);
        if lanes.is_empty() {
            return point_id;
        }
        lanes[rng.gen_range(0..lanes.len())]
    }

    /// Unit vector from a point towards its successor.
    pub fn forward(&self, point_id: i32) -> Vector3 {
        let point = match self.point(point_id) {
            Some(point) => point,
            None => return Vector3::ZERO,
        };
        if let Some(next) = self.point(point.next_id) {
            return (next.position - point.position).normalize();
        }
        match self.point(point.previous_id) {
            Some(previous) => (point.position - previous.position).normalize(),
            None => Vector3::ZERO,
        }
    }
}

impl KdNodes for AiSpline {
    fn node_count(&self) -> usize {
        self.header.num_kd_points
    }

    fn node(&self, index: usize) -> Option<KdNode> {
        if index >= self.header.num_kd_points {
            return None;
        }
        let at = self.kd_at + index * KD_NODE_SIZE;
        let b = &self.storage[at..at + KD_NODE_SIZE];
        Some(KdNode {
            position: Vector3::new(
                LittleEndian::read_f32(&b[0..4]),
                LittleEndian::read_f32(&b[4..8]),
                LittleEndian::read_f32(&b[8..12]),
            ),
            point_id: LittleEndian::read_i32(&b[12..16]),
        })
    }
}

/// Straight single-lane test fixture: `count` points `spacing` apart along +z.
#[cfg(test)]
pub(crate) fn straight_blob(count: usize, spacing: f32) -> SplineBlob {
    let mut blob = SplineBlob::default();
    for i in 0..count {
        blob.points.push(SplinePoint {
            id: i as i32,
            position: Vector3::new(0.0, 0.0, i as f32 * spacing),
            radius: 1000.0,
            length: spacing,
            previous_id: i as i32 - 1,
            next_id: if i + 1 < count { i as i32 + 1 } else { -1 },
            ..Default::default()
        });
    }
    blob.index_points();
    blob
}
