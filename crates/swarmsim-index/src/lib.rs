//! Geometry primitives and spatial indexing for flock neighborhood queries.
//!
//! The index is rebuilt from scratch every simulation tick: no incremental
//! update, deletion, or move operation exists. A tick's tree is therefore an
//! immutable snapshot of agent positions, which keeps every steering query in
//! that tick consistent. Callers that have no tree available can fall back to
//! [`FlatScan`], a linear filter over the same position slice, behind the
//! shared [`SpatialQuery`] trait.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use thiserror::Error;

/// Errors emitted by spatial index construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., zero capacity).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// 2D vector used for positions, velocities, and steering forces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Squared length, cheaper when only comparisons are needed.
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Counter-clockwise perpendicular vector.
    #[must_use]
    pub const fn perp(self) -> Self {
        Self {
            x: -self.y,
            y: self.x,
        }
    }

    /// Unit vector in the same direction, or zero when the length is zero.
    #[must_use]
    pub fn normalized_or_zero(self) -> Self {
        let len = self.length();
        if len > 0.0 { self * (1.0 / len) } else { Self::ZERO }
    }

    /// Rescale to exactly `len`, or zero when the vector has no direction.
    #[must_use]
    pub fn with_length(self, len: f32) -> Self {
        self.normalized_or_zero() * len
    }

    /// Shorten to at most `max` while preserving direction.
    #[must_use]
    pub fn clamped_length(self, max: f32) -> Self {
        let len = self.length();
        if len > max { self * (max / len) } else { self }
    }

    /// Whether both components are finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle with half-open extents.
///
/// A point on the minimum edge is inside; a point on the maximum edge is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    /// Construct a new rectangle from its minimum corner and extents.
    #[must_use]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Square query window of side `2 * radius` centred on `center`.
    #[must_use]
    pub fn around(center: Vec2, radius: f32) -> Self {
        Self::new(center.x - radius, center.y - radius, radius * 2.0, radius * 2.0)
    }

    /// Centre point of the rectangle.
    #[must_use]
    pub fn center(self) -> Vec2 {
        Vec2::new(self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    /// Half-open containment test: inclusive minimum, exclusive maximum.
    #[must_use]
    pub fn contains(self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x < self.x + self.w
            && point.y >= self.y
            && point.y < self.y + self.h
    }

    /// Symmetric overlap test over the half-open extents: the rectangles
    /// intersect iff the overlap interval is non-empty on both axes, so a
    /// degenerate zero-width or zero-height rectangle intersects nothing.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.x.max(other.x) < (self.x + self.w).min(other.x + other.w)
            && self.y.max(other.y) < (self.y + self.h).min(other.y + other.h)
    }

    /// Nearest point on or inside the rectangle, by per-axis clamping.
    #[must_use]
    pub fn clamp_point(self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x.clamp(self.x, self.x + self.w),
            point.y.clamp(self.y, self.y + self.h),
        )
    }
}

/// Range-query capability shared by the quadtree and the flat-scan fallback.
///
/// Implementations append the indices of every stored point that satisfies
/// the half-open containment test of `range`.
pub trait SpatialQuery {
    /// Collect indices of points inside `range` into `out`.
    fn query_range(&self, range: Rect, out: &mut Vec<usize>);
}

/// Recursive four-way spatial partition over point indices.
///
/// Leaves hold up to `capacity` points; on overflow a leaf splits into four
/// equal quadrants and redistributes its holdings, after which the parent
/// holds none directly. Midline ties resolve "less than midpoint goes
/// west/north", consistently between insertion and redistribution.
#[derive(Debug, Clone)]
pub struct QuadTree {
    bounds: Rect,
    capacity: usize,
    depth: u8,
    points: Vec<(usize, Vec2)>,
    children: Option<Box<[QuadTree; 4]>>,
    len: usize,
}

/// Nodes at this depth stop subdividing and hold points beyond capacity.
/// Bounds halve per level, so coincident points cannot recurse forever.
const MAX_DEPTH: u8 = 16;

impl QuadTree {
    /// Create an empty tree covering `bounds`.
    pub fn new(bounds: Rect, capacity: usize) -> Result<Self, IndexError> {
        if capacity == 0 {
            return Err(IndexError::InvalidConfig("capacity must be non-zero"));
        }
        if !(bounds.w > 0.0 && bounds.h > 0.0) {
            return Err(IndexError::InvalidConfig("bounds must have positive extent"));
        }
        Ok(Self {
            bounds,
            capacity,
            depth: 0,
            points: Vec::new(),
            children: None,
            len: 0,
        })
    }

    /// Build a fresh tree from a slice of positions, one insert per index.
    ///
    /// This is the per-tick rebuild: the previous tick's tree is discarded
    /// wholesale. Positions outside `bounds` are skipped, exactly as a failed
    /// [`QuadTree::insert`] would be; callers size the root to cover the
    /// whole arena so nothing is lost.
    pub fn build(bounds: Rect, capacity: usize, positions: &[Vec2]) -> Result<Self, IndexError> {
        let mut tree = Self::new(bounds, capacity)?;
        for (idx, &pos) in positions.iter().enumerate() {
            let _ = tree.insert(idx, pos);
        }
        Ok(tree)
    }

    /// Bounds this node covers.
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Number of points successfully inserted under this node.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree holds no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a point, returning `false` (tree untouched) when `position`
    /// falls outside this node's half-open bounds.
    pub fn insert(&mut self, idx: usize, position: Vec2) -> bool {
        if !self.bounds.contains(position) {
            return false;
        }
        if self.children.is_none() {
            if self.points.len() < self.capacity || self.depth >= MAX_DEPTH {
                self.points.push((idx, position));
                self.len += 1;
                return true;
            }
            self.subdivide();
        }
        let inserted = self.insert_into_child(idx, position);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Quadrant for `position`: 0 NW, 1 NE, 2 SW, 3 SE.
    fn quadrant(&self, position: Vec2) -> usize {
        let mid_x = self.bounds.x + self.bounds.w * 0.5;
        let mid_y = self.bounds.y + self.bounds.h * 0.5;
        let east = position.x >= mid_x;
        let south = position.y >= mid_y;
        (south as usize) * 2 + east as usize
    }

    fn insert_into_child(&mut self, idx: usize, position: Vec2) -> bool {
        let quadrant = self.quadrant(position);
        if let Some(children) = self.children.as_mut() {
            children[quadrant].insert(idx, position)
        } else {
            false
        }
    }

    fn subdivide(&mut self) {
        let Rect { x, y, w, h } = self.bounds;
        let hw = w * 0.5;
        let hh = h * 0.5;
        let child = |cx, cy| Self {
            bounds: Rect::new(cx, cy, hw, hh),
            capacity: self.capacity,
            depth: self.depth + 1,
            points: Vec::new(),
            children: None,
            len: 0,
        };
        self.children = Some(Box::new([
            child(x, y),
            child(x + hw, y),
            child(x, y + hh),
            child(x + hw, y + hh),
        ]));
        // Redistribute direct holdings; a subdivided node keeps none.
        let held = std::mem::take(&mut self.points);
        for (idx, position) in held {
            let _ = self.insert_into_child(idx, position);
        }
    }

    /// Collect the indices of every point inside `range`.
    pub fn query(&self, range: Rect, out: &mut Vec<usize>) {
        if !self.bounds.intersects(range) {
            return;
        }
        for &(idx, position) in &self.points {
            if range.contains(position) {
                out.push(idx);
            }
        }
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query(range, out);
            }
        }
    }
}

impl SpatialQuery for QuadTree {
    fn query_range(&self, range: Rect, out: &mut Vec<usize>) {
        self.query(range, out);
    }
}

/// Degraded fallback: a linear filter over a raw position slice.
#[derive(Debug, Clone, Copy)]
pub struct FlatScan<'a> {
    positions: &'a [Vec2],
}

impl<'a> FlatScan<'a> {
    /// Wrap a position slice for linear range queries.
    #[must_use]
    pub const fn new(positions: &'a [Vec2]) -> Self {
        Self { positions }
    }
}

impl SpatialQuery for FlatScan<'_> {
    fn query_range(&self, range: Rect, out: &mut Vec<usize>) {
        for (idx, &position) in self.positions.iter().enumerate() {
            if range.contains(position) {
                out.push(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use std::collections::HashSet;

    fn collect(query: &impl SpatialQuery, range: Rect) -> HashSet<usize> {
        let mut out = Vec::new();
        query.query_range(range, &mut out);
        let unique: HashSet<usize> = out.iter().copied().collect();
        assert_eq!(unique.len(), out.len(), "query must not report duplicates");
        unique
    }

    #[test]
    fn rect_containment_is_half_open() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(rect.contains(Vec2::new(0.0, 0.0)));
        assert!(rect.contains(Vec2::new(9.999, 9.999)));
        assert!(!rect.contains(Vec2::new(10.0, 5.0)));
        assert!(!rect.contains(Vec2::new(5.0, 10.0)));
        assert!(!rect.contains(Vec2::new(-0.001, 5.0)));
    }

    #[test]
    fn degenerate_ranges_intersect_nothing() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);
        // An empty range strictly inside the bounds still intersects nothing,
        // in either orientation of the call.
        assert!(!bounds.intersects(Rect::new(50.0, 50.0, 0.0, 10.0)));
        assert!(!bounds.intersects(Rect::new(50.0, 50.0, 10.0, 0.0)));
        assert!(!Rect::new(50.0, 50.0, 0.0, 10.0).intersects(bounds));
        assert!(bounds.intersects(Rect::new(99.0, 99.0, 5.0, 5.0)));
        assert!(!bounds.intersects(Rect::new(100.0, 0.0, 5.0, 5.0)));
    }

    #[test]
    fn clamp_point_finds_nearest_boundary_point() {
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert_eq!(rect.clamp_point(Vec2::new(0.0, 15.0)), Vec2::new(10.0, 15.0));
        assert_eq!(rect.clamp_point(Vec2::new(40.0, 40.0)), Vec2::new(30.0, 30.0));
        assert_eq!(rect.clamp_point(Vec2::new(15.0, 15.0)), Vec2::new(15.0, 15.0));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = QuadTree::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0).unwrap_err();
        assert_eq!(err, IndexError::InvalidConfig("capacity must be non-zero"));
        assert!(QuadTree::new(Rect::new(0.0, 0.0, 0.0, 10.0), 4).is_err());
    }

    #[test]
    fn insert_outside_root_returns_false_and_preserves_contents() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);
        let mut tree = QuadTree::new(bounds, 4).expect("tree");
        assert!(tree.insert(0, Vec2::new(10.0, 10.0)));
        assert!(!tree.insert(1, Vec2::new(150.0, 50.0)));
        assert!(!tree.insert(2, Vec2::new(100.0, 50.0)), "max edge is exclusive");
        assert_eq!(tree.len(), 1);
        let found = collect(&tree, bounds);
        assert_eq!(found, HashSet::from([0]));
    }

    #[test]
    fn subdivision_redistributes_and_query_stays_exact() {
        let bounds = Rect::new(0.0, 0.0, 64.0, 64.0);
        let mut tree = QuadTree::new(bounds, 2).expect("tree");
        let points = [
            Vec2::new(1.0, 1.0),
            Vec2::new(60.0, 1.0),
            Vec2::new(1.0, 60.0),
            Vec2::new(60.0, 60.0),
            Vec2::new(32.0, 32.0), // exactly on both midlines: goes south-east
            Vec2::new(31.999, 32.0),
        ];
        for (idx, &p) in points.iter().enumerate() {
            assert!(tree.insert(idx, p));
        }
        assert_eq!(tree.len(), points.len());
        let all = collect(&tree, bounds);
        let expected: HashSet<usize> = (0..points.len()).collect();
        assert_eq!(all, expected);

        // Querying only the south-east quadrant picks up the midline point.
        let se = collect(&tree, Rect::new(32.0, 32.0, 32.0, 32.0));
        assert_eq!(se, HashSet::from([3, 4]));
    }

    #[test]
    fn query_matches_brute_force_regardless_of_insertion_order() {
        let bounds = Rect::new(0.0, 0.0, 200.0, 200.0);
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let positions: Vec<Vec2> = (0..400)
            .map(|_| Vec2::new(rng.random_range(0.0..200.0), rng.random_range(0.0..200.0)))
            .collect();

        let forward = QuadTree::build(bounds, 8, &positions).expect("forward");
        let mut reversed = QuadTree::new(bounds, 8).expect("reversed");
        for (idx, &p) in positions.iter().enumerate().rev() {
            assert!(reversed.insert(idx, p));
        }

        let flat = FlatScan::new(&positions);
        for _ in 0..50 {
            let range = Rect::new(
                rng.random_range(-20.0..180.0),
                rng.random_range(-20.0..180.0),
                rng.random_range(0.0..90.0),
                rng.random_range(0.0..90.0),
            );
            let expected: HashSet<usize> = positions
                .iter()
                .enumerate()
                .filter(|&(_, &p)| range.contains(p))
                .map(|(idx, _)| idx)
                .collect();
            assert_eq!(collect(&forward, range), expected);
            assert_eq!(collect(&reversed, range), expected);
            assert_eq!(collect(&flat, range), expected);
        }
    }

    #[test]
    fn duplicate_positions_exceeding_capacity_are_retained() {
        // All points identical: subdivision can never separate them, so they
        // pile up in the deepest matching leaf chain without loss.
        let bounds = Rect::new(0.0, 0.0, 16.0, 16.0);
        let positions = vec![Vec2::new(3.0, 3.0); 20];
        let tree = QuadTree::build(bounds, 2, &positions).expect("tree");
        assert_eq!(tree.len(), 20);
        let found = collect(&tree, Rect::around(Vec2::new(3.0, 3.0), 1.0));
        assert_eq!(found.len(), 20);
    }
}
