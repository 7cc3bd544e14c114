//! Triangle/edge records and the TriangulationExtraction stage
//!
//! Every boundary pixel looks at the seeds claiming its 3x3 neighborhood.
//! Two distinct seeds there make an edge of the dual graph; three make a
//! triangle; four (a cell corner shared by four cells) make the two
//! triangles of their quad, split along the diagonal whose triangles have
//! empty circumcircles.
//! Thousands of boundary pixels see the same pair, so each candidate record
//! must first win its key in the [`EdgeAdjacencyMap`] before it is emitted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::prelude::*;

use super::bindings::GridDispatch;
use super::seeds::SeedPoint;
use super::voronoi::CellularMap;
use crate::arena::{AppendList, Packed};
use crate::grid::Grid;

const ID_BITS: u32 = 21;
const ID_MASK: u64 = (1 << ID_BITS) - 1;
/// Third id slot of an edge record
const NONE: u64 = ID_MASK;

/// One record of the approximate Delaunay triangulation
///
/// Ids index the seed list and are always stored in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriangleRecord {
    Edge([u32; 2]),
    Triangle([u32; 3]),
}

impl TriangleRecord {
    /// Seed ids of the record
    pub fn seeds(&self) -> &[u32] {
        match self {
            TriangleRecord::Edge(ids) => ids.as_slice(),
            TriangleRecord::Triangle(ids) => ids.as_slice(),
        }
    }
}

impl Packed for TriangleRecord {
    fn pack(self) -> u64 {
        let (a, b, c) = match self {
            TriangleRecord::Edge([a, b]) => (a as u64, b as u64, NONE),
            TriangleRecord::Triangle([a, b, c]) => (a as u64, b as u64, c as u64),
        };
        a | b << ID_BITS | c << (2 * ID_BITS)
    }

    fn unpack(bits: u64) -> Self {
        let a = (bits & ID_MASK) as u32;
        let b = (bits >> ID_BITS & ID_MASK) as u32;
        let c = bits >> (2 * ID_BITS) & ID_MASK;
        if c == NONE {
            TriangleRecord::Edge([a, b])
        } else {
            TriangleRecord::Triangle([a, b, c as u32])
        }
    }
}

/// Result of claiming a key in the adjacency map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First claim this frame; the caller emits the record
    Claimed,
    /// Someone already claimed the key
    Taken,
    /// No free slot left; the candidate is dropped
    Full,
}

/// First-claim-wins set of records emitted this frame
///
/// Open addressing over packed record keys with linear probing. A packed
/// record is never zero, so zero marks an empty slot.
pub struct EdgeAdjacencyMap {
    slots: Box<[AtomicU64]>,
    mask: usize,
    overflowed: AtomicBool,
}

const EMPTY: u64 = 0;

#[inline]
fn mix(mut key: u64) -> u64 {
    key ^= key >> 33;
    key = key.wrapping_mul(0xff51_afd7_ed55_8ccd);
    key ^= key >> 33;
    key = key.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    key ^ key >> 33
}

impl EdgeAdjacencyMap {
    /// Allocate a map sized for `max_records` distinct keys
    pub fn new(max_records: usize) -> Self {
        let len = (max_records.max(1) * 4).next_power_of_two();
        Self {
            slots: (0..len).map(|_| AtomicU64::new(EMPTY)).collect(),
            mask: len - 1,
            overflowed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Forget every key
    pub(crate) fn reset(&mut self) {
        self.slots
            .par_iter_mut()
            .for_each(|slot| *slot.get_mut() = EMPTY);
        *self.overflowed.get_mut() = false;
    }

    /// Record that a claim found no free slot
    ///
    /// Returns true only for the first overflow since the last reset.
    fn mark_overflowed(&self) -> bool {
        !self.overflowed.swap(true, Ordering::AcqRel)
    }

    /// Whether any claim found the map full since the last reset
    #[inline]
    pub fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    /// Claim the key of `record`
    pub fn claim(&self, record: TriangleRecord) -> ClaimOutcome {
        let key = record.pack();
        let mut index = mix(key) as usize & self.mask;
        for _ in 0..self.slots.len() {
            match self.slots[index].compare_exchange(
                EMPTY,
                key,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ClaimOutcome::Claimed,
                Err(existing) if existing == key => return ClaimOutcome::Taken,
                Err(_) => index = (index + 1) & self.mask,
            }
        }
        ClaimOutcome::Full
    }

    /// Number of claimed keys
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) != EMPTY)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EdgeAdjacencyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeAdjacencyMap")
            .field("capacity", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// Distinct claiming seeds around a pixel, ascending, at most four
fn neighborhood_seeds(cellular: &CellularMap, x: i64, y: i64) -> ([u32; 4], usize) {
    let mut ids = [0u32; 4];
    let mut len = 0;
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            let Some(seed) = cellular.seed_at(nx, ny) else {
                continue;
            };
            if ids[..len].contains(&seed) {
                continue;
            }
            if len == ids.len() {
                break;
            }
            ids[len] = seed;
            len += 1;
        }
    }
    ids[..len].sort_unstable();
    (ids, len)
}

fn emit(record: TriangleRecord, adjacency: &EdgeAdjacencyMap, records: &AppendList<TriangleRecord>) {
    match adjacency.claim(record) {
        ClaimOutcome::Claimed => {
            // Full list: counted as dropped
            let _ = records.push(record);
        }
        // Counted once per frame
        ClaimOutcome::Full => {
            if adjacency.mark_overflowed() {
                records.note_dropped();
            }
        }
        ClaimOutcome::Taken => {}
    }
}

type Point = (i64, i64);

fn orient(a: Point, b: Point, c: Point) -> i128 {
    let (abx, aby) = ((b.0 - a.0) as i128, (b.1 - a.1) as i128);
    let (acx, acy) = ((c.0 - a.0) as i128, (c.1 - a.1) as i128);
    abx * acy - aby * acx
}

/// Positive when `d` lies inside the circle through `a`, `b`, `c`
fn in_circle(a: Point, b: Point, c: Point, d: Point) -> i128 {
    let lift = |p: Point| {
        let (dx, dy) = ((p.0 - d.0) as i128, (p.1 - d.1) as i128);
        (dx, dy, dx * dx + dy * dy)
    };
    let (adx, ady, al) = lift(a);
    let (bdx, bdy, bl) = lift(b);
    let (cdx, cdy, cl) = lift(c);
    let det = adx * (bdy * cl - cdy * bl) - ady * (bdx * cl - cdx * bl)
        + al * (bdx * cdy - cdx * bdy);
    det * orient(a, b, c).signum()
}

/// Both triangles of a split have area and wind the same way
fn tiles(first: [Point; 3], second: [Point; 3]) -> bool {
    let a = orient(first[0], first[1], first[2]).signum();
    a != 0 && a == orient(second[0], second[1], second[2]).signum()
}

fn sorted(mut ids: [u32; 3]) -> [u32; 3] {
    ids.sort_unstable();
    ids
}

/// Split the quad of four seeds meeting at a cell corner
///
/// Corners are ordered by angle around their centroid. Of the two
/// diagonals, the one whose triangles tile the quad is used; when both do,
/// the Delaunay one wins, and cocircular corners keep the first diagonal.
/// Returns `None` for degenerate quads.
fn split_quad(ids: [u32; 4], seeds: &AppendList<SeedPoint>) -> Option<[[u32; 3]; 2]> {
    let mut corners = [(0u32, (0i64, 0i64)); 4];
    for (corner, &id) in corners.iter_mut().zip(&ids) {
        let seed = seeds.get(id as usize)?;
        *corner = (id, (seed.x as i64, seed.y as i64));
    }
    let (sx, sy) = corners
        .iter()
        .fold((0, 0), |(sx, sy), (_, (x, y))| (sx + x, sy + y));
    // Angles around 4x the centroid keep everything integral until atan2
    let angle = |(x, y): Point| ((4 * y - sy) as f32).atan2((4 * x - sx) as f32);
    corners.sort_unstable_by(|a, b| angle(a.1).total_cmp(&angle(b.1)).then(a.0.cmp(&b.0)));

    let [q0, q1, q2, q3] = corners;
    let first = ([q0, q1, q2], [q0, q2, q3]);
    let second = ([q1, q2, q3], [q1, q3, q0]);
    let points = |tri: [(u32, Point); 3]| tri.map(|(_, p)| p);
    let first_ok = tiles(points(first.0), points(first.1));
    let second_ok = tiles(points(second.0), points(second.1));

    let (t0, t1) = match (first_ok, second_ok) {
        (true, true) if in_circle(q0.1, q1.1, q2.1, q3.1) > 0 => second,
        (true, _) => first,
        (false, true) => second,
        (false, false) => return None,
    };
    Some([sorted(t0.map(|(id, _)| id)), sorted(t1.map(|(id, _)| id))])
}

/// Emit one record per distinct seed pair, triple or quad seen at boundaries
pub(crate) fn extract(
    dispatch: GridDispatch,
    boundary: &Grid<f32>,
    cellular: &CellularMap,
    seeds: &AppendList<SeedPoint>,
    adjacency: &EdgeAdjacencyMap,
    records: &AppendList<TriangleRecord>,
) {
    let (width, height) = (boundary.width(), boundary.height());
    (0..dispatch.groups_y).into_par_iter().for_each(|group| {
        let rows = group * dispatch.block..((group + 1) * dispatch.block).min(height);
        for y in rows {
            for x in 0..width {
                if *boundary.at(x, y) <= 0.5 {
                    continue;
                }
                match neighborhood_seeds(cellular, x as i64, y as i64) {
                    ([a, b, ..], 2) => emit(TriangleRecord::Edge([a, b]), adjacency, records),
                    ([a, b, c, _], 3) => {
                        emit(TriangleRecord::Triangle([a, b, c]), adjacency, records)
                    }
                    (quad, 4) => {
                        for triangle in split_quad(quad, seeds).into_iter().flatten() {
                            emit(TriangleRecord::Triangle(triangle), adjacency, records);
                        }
                    }
                    _ => {}
                }
            }
        }
    });
}
