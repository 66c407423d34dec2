//! Core simulation state and per-tick pipeline for the team-flocking arena.
//!
//! Each tick runs over one immutable snapshot of the flock: effects are
//! folded onto the agents, the spatial index is rebuilt from the snapshot
//! positions, defection decisions are drawn against that snapshot and
//! committed together, steering forces for every agent are computed in
//! parallel against the same snapshot, and finally velocities and positions
//! are integrated and committed serially. No agent ever observes a neighbor
//! that has already moved within the same tick.

use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;
use std::fmt;
use swarmsim_index::{FlatScan, QuadTree, Rect, SpatialQuery, Vec2};
use thiserror::Error;
use tracing::{debug, error, warn};

new_key_type! {
    /// Stable generational handle for boids in a [`BoidArena`].
    pub struct BoidId;
}

/// Speed given to a velocity recovered from a non-finite state.
const VELOCITY_RECOVERY_SPEED: f32 = 0.25;

/// Distance boids are kept from the arena edges when spawned.
const SPAWN_INSET: f32 = 10.0;

/// Team membership; the valid set is `0..team_count` from [`SwarmConfig`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TeamId(pub u32);

/// Simulation clock in ticks processed since boot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Sanitize a multiplier the way the effect layer treats "falsy" values:
/// zero, negative, or non-finite multipliers fall back to 1.
fn positive_or_one(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

/// One flocking agent.
///
/// Multipliers and the frozen flag are transient: they are reset and
/// re-derived from the active effect list at the start of every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boid {
    pub position: Vec2,
    pub velocity: Vec2,
    pub team: TeamId,
    pub speed_multiplier: f32,
    pub size_multiplier: f32,
    pub strength_multiplier: f32,
    pub frozen: bool,
    /// Recent positions, oldest first; capacity enforced by the integrator.
    pub trail: VecDeque<Vec2>,
    /// Steering cap fixed at creation.
    pub max_force: f32,
}

impl Boid {
    /// Create a boid with neutral multipliers and an empty trail.
    #[must_use]
    pub fn new(position: Vec2, velocity: Vec2, team: TeamId, max_force: f32) -> Self {
        Self {
            position,
            velocity,
            team,
            speed_multiplier: 1.0,
            size_multiplier: 1.0,
            strength_multiplier: 1.0,
            frozen: false,
            trail: VecDeque::new(),
            max_force,
        }
    }

    /// Weighted contribution of this boid to a local team vote.
    #[must_use]
    pub fn influence(&self) -> f32 {
        let product = self.size_multiplier * self.strength_multiplier;
        if product.is_finite() { product } else { 1.0 }
    }

    /// Reset-then-fold the active effect list onto this boid.
    ///
    /// A `TimeFreeze` scoped to any other team freezes the boid; one scoped
    /// to the boid's own team lifts the freeze regardless of list order.
    /// `Regroup` applies an immediate velocity impulse toward its centre.
    pub fn apply_effects(&mut self, effects: &[Effect]) {
        self.speed_multiplier = 1.0;
        self.size_multiplier = 1.0;
        self.strength_multiplier = 1.0;
        self.frozen = false;

        for effect in effects {
            if effect.kind == EffectKind::TimeFreeze && effect.team != self.team {
                self.frozen = true;
            }
        }

        for effect in effects.iter().filter(|effect| effect.team == self.team) {
            match effect.kind {
                EffectKind::TimeFreeze => self.frozen = false,
                EffectKind::Speed => self.speed_multiplier = positive_or_one(effect.multiplier),
                EffectKind::Size => self.size_multiplier = positive_or_one(effect.multiplier),
                EffectKind::Strength => {
                    self.strength_multiplier = positive_or_one(effect.multiplier);
                }
                EffectKind::Regroup => {
                    if let Some(center) = effect.center {
                        let impulse = (center - self.position).with_length(self.max_force);
                        self.velocity += impulse * positive_or_one(effect.multiplier);
                    }
                }
            }
        }
    }

    /// Record the current position, evicting the oldest entry at capacity.
    fn record_trail(&mut self, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.trail.len() >= capacity {
            let _ = self.trail.pop_front();
        }
        self.trail.push_back(self.position);
    }
}

/// Dense boid storage addressed by generational handles.
///
/// The core itself never removes boids mid-episode; removal exists for the
/// calling layer's elimination semantics.
#[derive(Debug, Default)]
pub struct BoidArena {
    lookup: SlotMap<BoidId, usize>,
    order: Vec<BoidId>,
    boids: Vec<Boid>,
}

impl BoidArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live boids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boids.len()
    }

    /// Returns true when no boids are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boids.is_empty()
    }

    /// Insert a boid and return its handle.
    pub fn insert(&mut self, boid: Boid) -> BoidId {
        let index = self.boids.len();
        let id = self.lookup.insert(index);
        self.order.push(id);
        self.boids.push(boid);
        id
    }

    /// Remove a boid by handle; the last dense row swaps into its slot.
    pub fn remove(&mut self, id: BoidId) -> Option<Boid> {
        let index = self.lookup.remove(id)?;
        let removed = self.boids.swap_remove(index);
        let _ = self.order.swap_remove(index);
        if let Some(&moved) = self.order.get(index) {
            self.lookup[moved] = index;
        }
        Some(removed)
    }

    /// Dense index for a handle, if alive.
    #[must_use]
    pub fn index_of(&self, id: BoidId) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    /// Whether the handle refers to a live boid.
    #[must_use]
    pub fn contains(&self, id: BoidId) -> bool {
        self.lookup.contains_key(id)
    }

    /// Borrow a boid by handle.
    #[must_use]
    pub fn get(&self, id: BoidId) -> Option<&Boid> {
        self.index_of(id).map(|index| &self.boids[index])
    }

    /// Mutably borrow a boid by handle.
    #[must_use]
    pub fn get_mut(&mut self, id: BoidId) -> Option<&mut Boid> {
        let index = self.index_of(id)?;
        Some(&mut self.boids[index])
    }

    /// Handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = BoidId> + '_ {
        self.order.iter().copied()
    }

    /// Dense slice of boids.
    #[must_use]
    pub fn boids(&self) -> &[Boid] {
        &self.boids
    }

    /// Mutable dense slice of boids.
    #[must_use]
    pub fn boids_mut(&mut self) -> &mut [Boid] {
        &mut self.boids
    }
}

/// Axis of a sliding door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// Static wall rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub rect: Rect,
}

impl Obstacle {
    /// Construct a wall from its rectangle.
    #[must_use]
    pub const fn new(rect: Rect) -> Self {
        Self { rect }
    }
}

/// A door opening in a wall; behaves as an obstacle only while closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Door {
    pub rect: Rect,
    pub id: u32,
    pub orientation: Orientation,
}

/// Cyclic open/close schedule shared by every door.
///
/// Open/closed state is a pure function of simulated time, so door behavior
/// is deterministic and replayable. Even-numbered doors may open during the
/// first half of each cycle, odd-numbered doors during the second half; a
/// door is open while its half-cycle progress is below `open_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorSchedule {
    pub cycle_ms: u64,
    pub open_ms: u64,
}

impl Default for DoorSchedule {
    fn default() -> Self {
        Self {
            cycle_ms: 5_000,
            open_ms: 2_500,
        }
    }
}

impl DoorSchedule {
    /// Whether `door_id` is open at `sim_time_ms`.
    #[must_use]
    pub fn is_open(&self, door_id: u32, sim_time_ms: u64) -> bool {
        if self.cycle_ms == 0 {
            return false;
        }
        let elapsed = sim_time_ms % self.cycle_ms;
        let half = self.cycle_ms / 2;
        if half == 0 {
            return false;
        }
        let even_phase = elapsed < half;
        let progress = elapsed % half;
        let open_phase = progress < self.open_ms;
        if door_id % 2 == 0 {
            even_phase && open_phase
        } else {
            !even_phase && open_phase
        }
    }
}

/// Generator for the silo arena: a grid of sectors separated by walls, each
/// divider pierced by one centred sliding door.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorLayout {
    pub cols: u32,
    pub rows: u32,
    pub sector_w: f32,
    pub sector_h: f32,
    pub wall_thickness: f32,
    pub door_width: f32,
}

impl Default for SectorLayout {
    fn default() -> Self {
        Self {
            cols: 4,
            rows: 4,
            sector_w: 800.0,
            sector_h: 800.0,
            wall_thickness: 40.0,
            door_width: 200.0,
        }
    }
}

impl SectorLayout {
    /// Arena extent implied by the grid.
    #[must_use]
    pub fn arena_size(&self) -> Vec2 {
        Vec2::new(
            self.cols as f32 * self.sector_w,
            self.rows as f32 * self.sector_h,
        )
    }

    /// Emit the static wall segments and the doors between them.
    ///
    /// Door ids are assigned sequentially, vertical dividers first, which
    /// interleaves them across the even/odd halves of the door schedule.
    #[must_use]
    pub fn generate(&self) -> (Vec<Obstacle>, Vec<Door>) {
        let mut walls = Vec::new();
        let mut doors = Vec::new();
        let mut door_id = 0u32;

        for col in 1..self.cols {
            let wall_x = col as f32 * self.sector_w - self.wall_thickness * 0.5;
            for row in 0..self.rows {
                let top = row as f32 * self.sector_h;
                let door_y = top + self.sector_h * 0.5 - self.door_width * 0.5;
                if door_y > top {
                    walls.push(Obstacle::new(Rect::new(
                        wall_x,
                        top,
                        self.wall_thickness,
                        door_y - top,
                    )));
                }
                doors.push(Door {
                    rect: Rect::new(wall_x, door_y, self.wall_thickness, self.door_width),
                    id: door_id,
                    orientation: Orientation::Vertical,
                });
                door_id += 1;
                let below = door_y + self.door_width;
                if below < top + self.sector_h {
                    walls.push(Obstacle::new(Rect::new(
                        wall_x,
                        below,
                        self.wall_thickness,
                        top + self.sector_h - below,
                    )));
                }
            }
        }

        for row in 1..self.rows {
            let wall_y = row as f32 * self.sector_h - self.wall_thickness * 0.5;
            for col in 0..self.cols {
                let left = col as f32 * self.sector_w;
                let door_x = left + self.sector_w * 0.5 - self.door_width * 0.5;
                if door_x > left {
                    walls.push(Obstacle::new(Rect::new(
                        left,
                        wall_y,
                        door_x - left,
                        self.wall_thickness,
                    )));
                }
                doors.push(Door {
                    rect: Rect::new(door_x, wall_y, self.door_width, self.wall_thickness),
                    id: door_id,
                    orientation: Orientation::Horizontal,
                });
                door_id += 1;
                let right = door_x + self.door_width;
                if right < left + self.sector_w {
                    walls.push(Obstacle::new(Rect::new(
                        right,
                        wall_y,
                        left + self.sector_w - right,
                        self.wall_thickness,
                    )));
                }
            }
        }

        (walls, doors)
    }
}

/// Kinds of transient effect the caller can apply to a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Speed,
    Size,
    Strength,
    TimeFreeze,
    Regroup,
}

/// Externally produced transient modifier, consumed read-only each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub kind: EffectKind,
    pub team: TeamId,
    pub multiplier: f32,
    /// Regroup rally point.
    pub center: Option<Vec2>,
    /// Optional per-team scaling of the separation force weight this tick.
    pub separation_multiplier: Option<f32>,
    /// Optional per-team scaling of the cohesion force weight this tick.
    pub cohesion_multiplier: Option<f32>,
}

impl Effect {
    /// Effect with a neutral multiplier and no optional fields.
    #[must_use]
    pub const fn new(kind: EffectKind, team: TeamId) -> Self {
        Self {
            kind,
            team,
            multiplier: 1.0,
            center: None,
            separation_multiplier: None,
            cohesion_multiplier: None,
        }
    }
}

/// Named scalar weight for each steering force.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceWeights {
    pub separation: f32,
    pub alignment: f32,
    pub cohesion: f32,
    pub cross_team: f32,
    pub point: f32,
    pub obstacle: f32,
    pub border: f32,
}

impl Default for ForceWeights {
    fn default() -> Self {
        Self {
            separation: 2.0,
            alignment: 1.5,
            cohesion: 1.2,
            cross_team: 0.5,
            point: 1.0,
            obstacle: 1.0,
            border: 1.0,
        }
    }
}

/// External attraction/repulsion point (player cursor or target).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSettings {
    pub active: bool,
    pub position: Vec2,
    pub radius: f32,
    /// Team drawn toward the point; every other team is pushed away.
    pub attract_team: Option<TeamId>,
}

impl Default for PointerSettings {
    fn default() -> Self {
        Self {
            active: false,
            position: Vec2::ZERO,
            radius: 100.0,
            attract_team: None,
        }
    }
}

/// Parameters of the team-defection vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefectionSettings {
    /// Scales the switch probability upward.
    pub peer_pressure: f32,
    /// Neighborhood radius of the local vote.
    pub peer_radius: f32,
    /// Scales the switch probability downward; 1 means never switch.
    pub loyalty_factor: f32,
}

impl Default for DefectionSettings {
    fn default() -> Self {
        Self {
            peer_pressure: 0.1,
            peer_radius: 50.0,
            loyalty_factor: 0.25,
        }
    }
}

/// Obstacle and arena-border avoidance tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvoidanceSettings {
    /// Obstacles further than this exert no force.
    pub detect_radius: f32,
    /// Inside this radius the repulsion strengthens and gains a tangential
    /// component so agents slide along walls instead of stalling flush.
    pub urgent_radius: f32,
    /// Multiplier applied inside the urgent radius/margin.
    pub urgent_scale: f32,
    /// Obstacle force cap as a multiple of `max_force`; kept above every
    /// other force so avoidance dominates when close.
    pub obstacle_scale: f32,
    /// Distance from an arena edge at which the inward push begins.
    pub border_margin: f32,
    /// Edge distance under which the push strengthens.
    pub border_urgent_margin: f32,
    /// Border force cap as a multiple of `max_force`.
    pub border_scale: f32,
}

impl Default for AvoidanceSettings {
    fn default() -> Self {
        Self {
            detect_radius: 60.0,
            urgent_radius: 25.0,
            urgent_scale: 3.0,
            obstacle_scale: 2.0,
            border_margin: 50.0,
            border_urgent_margin: 15.0,
            border_scale: 1.5,
        }
    }
}

/// What happens to a boid that leaves the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BoundaryPolicy {
    /// Reappear at the opposite edge; the trail is cleared so no streak is
    /// drawn across the arena.
    #[default]
    Wrap,
    /// Pin the position to `[0, width] x [0, height]`.
    Clamp,
}

/// Errors raised when constructing a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a simulation world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub arena_width: f32,
    pub arena_height: f32,
    pub boundary: BoundaryPolicy,
    /// Boids created by [`WorldState::populate`].
    pub population: usize,
    /// Valid teams are `TeamId(0)..TeamId(team_count)`.
    pub team_count: u32,
    /// Leaf capacity of the per-tick quadtree.
    pub quadtree_capacity: usize,
    pub weights: ForceWeights,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Steering cap handed to every spawned boid.
    pub max_force: f32,
    /// Radius for alignment, cohesion, and cross-team repulsion.
    pub neighbor_radius: f32,
    /// Radius under which separation repels.
    pub separation_radius: f32,
    pub pointer: PointerSettings,
    pub defection: DefectionSettings,
    pub avoidance: AvoidanceSettings,
    /// Ring capacity of each boid's position trail.
    pub trail_capacity: usize,
    /// Simulated milliseconds per tick; drives the door schedule.
    pub tick_ms: u64,
    pub door_schedule: DoorSchedule,
    /// Optional RNG seed for reproducible episodes.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            arena_width: 3_200.0,
            arena_height: 3_200.0,
            boundary: BoundaryPolicy::Wrap,
            population: 150,
            team_count: 2,
            quadtree_capacity: 32,
            weights: ForceWeights::default(),
            min_speed: 2.0,
            max_speed: 4.0,
            max_force: 0.8,
            neighbor_radius: 30.0,
            separation_radius: 25.0,
            pointer: PointerSettings::default(),
            defection: DefectionSettings::default(),
            avoidance: AvoidanceSettings::default(),
            trail_capacity: 5,
            tick_ms: 16,
            door_schedule: DoorSchedule::default(),
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl SwarmConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.arena_width > 0.0 && self.arena_height > 0.0)
            || !self.arena_width.is_finite()
            || !self.arena_height.is_finite()
        {
            return Err(WorldError::InvalidConfig(
                "arena dimensions must be positive and finite",
            ));
        }
        if self.team_count == 0 {
            return Err(WorldError::InvalidConfig("team_count must be non-zero"));
        }
        if self.quadtree_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "quadtree_capacity must be non-zero",
            ));
        }
        if !(self.max_force > 0.0) || !self.max_force.is_finite() {
            return Err(WorldError::InvalidConfig("max_force must be positive"));
        }
        if self.min_speed < 0.0 || self.max_speed < self.min_speed {
            return Err(WorldError::InvalidConfig(
                "speed bounds must satisfy 0 <= min_speed <= max_speed",
            ));
        }
        if !(self.neighbor_radius > 0.0 && self.separation_radius > 0.0) {
            return Err(WorldError::InvalidConfig(
                "steering radii must be positive",
            ));
        }
        if !(self.defection.peer_radius > 0.0) {
            return Err(WorldError::InvalidConfig("peer_radius must be positive"));
        }
        if !(self.avoidance.detect_radius > 0.0)
            || self.avoidance.urgent_radius > self.avoidance.detect_radius
        {
            return Err(WorldError::InvalidConfig(
                "avoidance radii must satisfy 0 < urgent_radius <= detect_radius",
            ));
        }
        if !(self.avoidance.border_margin > 0.0)
            || self.avoidance.border_urgent_margin > self.avoidance.border_margin
        {
            return Err(WorldError::InvalidConfig(
                "border margins must satisfy 0 < urgent_margin <= margin",
            ));
        }
        if self.trail_capacity == 0 {
            return Err(WorldError::InvalidConfig("trail_capacity must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Immutable per-tick view of the flock shared by steering and defection.
#[derive(Debug, Clone, Copy)]
pub struct FlockView<'a> {
    pub positions: &'a [Vec2],
    pub velocities: &'a [Vec2],
    pub teams: &'a [TeamId],
    pub frozen: &'a [bool],
    /// Per-boid vote weight (`size_multiplier * strength_multiplier`).
    pub influence: &'a [f32],
    pub strengths: &'a [f32],
}

/// Owned tick-start snapshot backing a [`FlockView`].
#[derive(Debug, Default)]
struct FlockSnapshot {
    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    teams: Vec<TeamId>,
    frozen: Vec<bool>,
    sizes: Vec<f32>,
    strengths: Vec<f32>,
    influence: Vec<f32>,
}

impl FlockSnapshot {
    fn capture(boids: &[Boid]) -> Self {
        Self {
            positions: boids.iter().map(|b| b.position).collect(),
            velocities: boids.iter().map(|b| b.velocity).collect(),
            teams: boids.iter().map(|b| b.team).collect(),
            frozen: boids.iter().map(|b| b.frozen).collect(),
            sizes: boids.iter().map(|b| positive_or_one(b.size_multiplier)).collect(),
            strengths: boids.iter().map(|b| b.strength_multiplier).collect(),
            influence: boids.iter().map(Boid::influence).collect(),
        }
    }

    fn view(&self) -> FlockView<'_> {
        FlockView {
            positions: &self.positions,
            velocities: &self.velocities,
            teams: &self.teams,
            frozen: &self.frozen,
            influence: &self.influence,
            strengths: &self.strengths,
        }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }
}

/// Indices of all boids other than `idx` strictly within `radius`.
fn neighbors_within(
    query: &impl SpatialQuery,
    positions: &[Vec2],
    idx: usize,
    radius: f32,
) -> Vec<usize> {
    let mut found = Vec::new();
    if !(radius > 0.0) {
        return found;
    }
    let center = positions[idx];
    query.query_range(Rect::around(center, radius), &mut found);
    found.retain(|&other| other != idx && positions[other].distance(center) < radius);
    found
}

/// Separation: repulsion from every neighbor closer than `radius`, scaled by
/// `1 - d/radius`, averaged, then rescaled to `max_force`.
pub fn separation_force(
    view: &FlockView<'_>,
    query: &impl SpatialQuery,
    idx: usize,
    radius: f32,
    max_force: f32,
) -> Vec2 {
    let position = view.positions[idx];
    let mut steer = Vec2::ZERO;
    let mut count = 0u32;
    for other in neighbors_within(query, view.positions, idx, radius) {
        let offset = position - view.positions[other];
        let distance = offset.length();
        if distance > 0.0 {
            steer += offset * ((1.0 - distance / radius) / distance);
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (steer * (1.0 / count as f32)).with_length(max_force)
}

/// Alignment: steer toward the mean velocity of same-team neighbors.
pub fn alignment_force(
    view: &FlockView<'_>,
    query: &impl SpatialQuery,
    idx: usize,
    radius: f32,
    max_force: f32,
) -> Vec2 {
    let team = view.teams[idx];
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for other in neighbors_within(query, view.positions, idx, radius) {
        if view.teams[other] == team {
            sum += view.velocities[other];
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (sum * (1.0 / count as f32)).with_length(max_force)
}

/// Cohesion: steer toward the centroid of same-team neighbors.
pub fn cohesion_force(
    view: &FlockView<'_>,
    query: &impl SpatialQuery,
    idx: usize,
    radius: f32,
    max_force: f32,
) -> Vec2 {
    let team = view.teams[idx];
    let mut centroid = Vec2::ZERO;
    let mut count = 0u32;
    for other in neighbors_within(query, view.positions, idx, radius) {
        if view.teams[other] == team {
            centroid += view.positions[other];
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    let centroid = centroid * (1.0 / count as f32);
    (centroid - view.positions[idx]).with_length(max_force)
}

/// Cross-team repulsion: separation-style push away from different-team
/// neighbors within `radius`.
pub fn cross_team_force(
    view: &FlockView<'_>,
    query: &impl SpatialQuery,
    idx: usize,
    radius: f32,
    max_force: f32,
) -> Vec2 {
    let position = view.positions[idx];
    let team = view.teams[idx];
    let mut steer = Vec2::ZERO;
    let mut any = false;
    for other in neighbors_within(query, view.positions, idx, radius) {
        if view.teams[other] == team {
            continue;
        }
        let offset = position - view.positions[other];
        let distance = offset.length();
        if distance > 0.0 {
            steer += offset * ((1.0 - distance / radius) / distance);
            any = true;
        }
    }
    if !any {
        return Vec2::ZERO;
    }
    steer.with_length(max_force)
}

/// External point force: the configured team is attracted, every other team
/// repelled, with magnitude linear in proximity and capped at `max_force`.
pub fn point_force(
    view: &FlockView<'_>,
    idx: usize,
    pointer: &PointerSettings,
    max_force: f32,
) -> Vec2 {
    if !pointer.active || !(pointer.radius > 0.0) {
        return Vec2::ZERO;
    }
    let offset = view.positions[idx] - pointer.position;
    let distance = offset.length();
    if distance <= 0.0 || distance >= pointer.radius {
        return Vec2::ZERO;
    }
    let strength = (pointer.radius - distance) / pointer.radius;
    let outward = offset * (1.0 / distance);
    let direction = if pointer.attract_team == Some(view.teams[idx]) {
        -outward
    } else {
        outward
    };
    direction * (max_force * strength)
}

/// Obstacle avoidance against the nearest rectangle boundary point.
///
/// Repulsion strength grows inversely with distance inside `detect_radius`;
/// inside `urgent_radius` it is multiplied up and blended with a tangential
/// component chosen to continue the agent's current motion along the wall.
/// The result is capped at `obstacle_scale * max_force`, which is kept above
/// every other force cap.
pub fn obstacle_force(
    position: Vec2,
    velocity: Vec2,
    obstacles: &[Rect],
    avoid: &AvoidanceSettings,
    max_force: f32,
) -> Vec2 {
    let nearest = obstacles
        .iter()
        .map(|&rect| {
            let point = rect.clamp_point(position);
            (position.distance(point), point, rect)
        })
        .min_by_key(|&(distance, _, _)| OrderedFloat(distance));
    let Some((distance, point, rect)) = nearest else {
        return Vec2::ZERO;
    };
    if distance >= avoid.detect_radius {
        return Vec2::ZERO;
    }

    let steer = if distance <= f32::EPSILON {
        // Inside the obstacle; escape through the nearest face.
        let away = (position - rect.center()).normalized_or_zero();
        let away = if away == Vec2::ZERO {
            Vec2::new(1.0, 0.0)
        } else {
            away
        };
        away * (avoid.urgent_scale * avoid.detect_radius)
    } else {
        let away = (position - point) * (1.0 / distance);
        let mut strength = avoid.detect_radius / distance - 1.0;
        if distance < avoid.urgent_radius {
            strength *= avoid.urgent_scale;
            let tangent = away.perp();
            let tangent = if velocity.dot(tangent) >= 0.0 {
                tangent
            } else {
                -tangent
            };
            away * strength + tangent * (strength * 0.5)
        } else {
            away * strength
        }
    };
    (steer * max_force).clamped_length(avoid.obstacle_scale * max_force)
}

fn edge_push(edge_distance: f32, avoid: &AvoidanceSettings) -> f32 {
    if edge_distance >= avoid.border_margin {
        return 0.0;
    }
    let mut strength = 1.0 - edge_distance.max(0.0) / avoid.border_margin;
    if edge_distance < avoid.border_urgent_margin {
        strength *= avoid.urgent_scale;
    }
    strength
}

/// Arena-border avoidance: proportional inward push within `border_margin`
/// of each edge, strengthened inside `border_urgent_margin`, capped at
/// `border_scale * max_force`.
pub fn border_force(
    position: Vec2,
    arena_width: f32,
    arena_height: f32,
    avoid: &AvoidanceSettings,
    max_force: f32,
) -> Vec2 {
    let mut steer = Vec2::ZERO;
    steer.x += edge_push(position.x, avoid);
    steer.x -= edge_push(arena_width - position.x, avoid);
    steer.y += edge_push(position.y, avoid);
    steer.y -= edge_push(arena_height - position.y, avoid);
    if steer == Vec2::ZERO {
        return Vec2::ZERO;
    }
    (steer * max_force).clamped_length(avoid.border_scale * max_force)
}

/// Evaluate the defection vote for one non-frozen boid.
///
/// Returns the team the boid switches to, or `None`. Neighbors weight the
/// tally by their influence; frozen neighbors abstain. The switch requires a
/// strict weighted majority for a team other than the boid's own, and fires
/// with probability `peer_pressure * (1 - loyalty_factor * strength)`.
pub fn defection_decision(
    view: &FlockView<'_>,
    query: &impl SpatialQuery,
    idx: usize,
    settings: &DefectionSettings,
    rng: &mut impl Rng,
) -> Option<TeamId> {
    if view.frozen[idx] {
        return None;
    }
    let peers = neighbors_within(query, view.positions, idx, settings.peer_radius);
    let mut tallies: HashMap<TeamId, f32> = HashMap::new();
    let mut total = 0.0f32;
    for other in peers {
        if view.frozen[other] {
            continue;
        }
        let influence = view.influence[other];
        if !influence.is_finite() {
            warn!(neighbor = other, "skipping non-finite peer influence");
            continue;
        }
        *tallies.entry(view.teams[other]).or_default() += influence;
        total += influence;
    }
    if tallies.is_empty() || !(total > 0.0) {
        return None;
    }

    // Highest tally wins; equal tallies break toward the lower team id so
    // the dominant team is independent of hash-map iteration order.
    let mut ordered: Vec<(TeamId, f32)> = tallies.into_iter().collect();
    ordered.sort_by_key(|&(team, tally)| (Reverse(OrderedFloat(tally)), team));
    let (dominant, tally) = ordered[0];

    let own = view.teams[idx];
    if dominant == own || tally <= total * 0.5 {
        return None;
    }
    let strength = view.strengths[idx];
    let effective_loyalty = if strength.is_finite() && strength != 0.0 {
        settings.loyalty_factor * strength
    } else {
        settings.loyalty_factor
    };
    let probability = (settings.peer_pressure * (1.0 - effective_loyalty)).clamp(0.0, 1.0);
    if rng.random::<f32>() < probability {
        Some(dominant)
    } else {
        None
    }
}

/// Per-boid result of the parallel force phase.
#[derive(Debug, Clone, Copy, Default)]
struct ForceOutcome {
    acceleration: Vec2,
    discarded: u32,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvents {
    pub tick: Tick,
    pub defections: usize,
    /// Steering contributions discarded for being non-finite.
    pub forces_discarded: usize,
    pub velocity_recoveries: usize,
    pub position_resets: usize,
}

/// Summary retained in the world's bounded history after each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    /// Weighted remaining-strength tally per team, sorted by team id.
    pub team_strength: Vec<(TeamId, f32)>,
    pub defections: usize,
    pub numeric_recoveries: usize,
}

/// Aggregate simulation state: configuration, agents, obstacles, the
/// per-tick spatial index, and a bounded run history.
pub struct WorldState {
    config: SwarmConfig,
    tick: Tick,
    sim_time_ms: u64,
    rng: SmallRng,
    arena: BoidArena,
    walls: Vec<Obstacle>,
    doors: Vec<Door>,
    index: Option<QuadTree>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("sim_time_ms", &self.sim_time_ms)
            .field("boid_count", &self.arena.len())
            .field("wall_count", &self.walls.len())
            .field("door_count", &self.doors.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate an empty world (no boids, no obstacles).
    pub fn new(config: SwarmConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            sim_time_ms: 0,
            rng,
            arena: BoidArena::new(),
            walls: Vec::new(),
            doors: Vec::new(),
            index: None,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Instantiate a world with walls and doors generated from `layout`.
    pub fn with_layout(config: SwarmConfig, layout: &SectorLayout) -> Result<Self, WorldError> {
        let mut world = Self::new(config)?;
        let (walls, doors) = layout.generate();
        world.walls = walls;
        world.doors = doors;
        Ok(world)
    }

    /// Spawn `config.population` boids at random positions inset from the
    /// edges, headings uniform, speeds in `[min_speed, max_speed]`, teams
    /// assigned round-robin.
    pub fn populate(&mut self) {
        let width = self.config.arena_width;
        let height = self.config.arena_height;
        let inset = SPAWN_INSET.min(width * 0.25).min(height * 0.25);
        let team_count = self.config.team_count;
        for i in 0..self.config.population {
            let position = Vec2::new(
                inset + self.rng.random::<f32>() * (width - 2.0 * inset),
                inset + self.rng.random::<f32>() * (height - 2.0 * inset),
            );
            let angle = self.rng.random_range(0.0..TAU);
            let speed = self.config.min_speed
                + self.rng.random::<f32>() * (self.config.max_speed - self.config.min_speed);
            let velocity = Vec2::new(angle.cos(), angle.sin()) * speed;
            let team = TeamId(i as u32 % team_count);
            let boid = Boid::new(position, velocity, team, self.config.max_force);
            let _ = self.arena.insert(boid);
        }
    }

    /// Insert a boid, returning its handle.
    pub fn spawn_boid(&mut self, boid: Boid) -> BoidId {
        self.arena.insert(boid)
    }

    /// Remove a boid; elimination semantics belong to the caller.
    pub fn remove_boid(&mut self, id: BoidId) -> Option<Boid> {
        self.arena.remove(id)
    }

    /// Randomly reassign every boid's team and clear its trail.
    pub fn shuffle_teams(&mut self) {
        let team_count = self.config.team_count;
        let rng = &mut self.rng;
        for boid in self.arena.boids_mut() {
            boid.team = TeamId(rng.random_range(0..team_count));
            boid.trail.clear();
        }
    }

    /// Borrow the world configuration.
    #[must_use]
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Mutable configuration access (pointer position, weights, radii).
    #[must_use]
    pub fn config_mut(&mut self) -> &mut SwarmConfig {
        &mut self.config
    }

    /// Current tick counter.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Simulated milliseconds elapsed since boot.
    #[must_use]
    pub const fn sim_time_ms(&self) -> u64 {
        self.sim_time_ms
    }

    /// Borrow the agent arena.
    #[must_use]
    pub fn arena(&self) -> &BoidArena {
        &self.arena
    }

    /// Mutable arena access.
    #[must_use]
    pub fn arena_mut(&mut self) -> &mut BoidArena {
        &mut self.arena
    }

    /// Static walls.
    #[must_use]
    pub fn walls(&self) -> &[Obstacle] {
        &self.walls
    }

    /// Doors (open or closed).
    #[must_use]
    pub fn doors(&self) -> &[Door] {
        &self.doors
    }

    /// Replace the obstacle set.
    pub fn set_obstacles(&mut self, walls: Vec<Obstacle>, doors: Vec<Door>) {
        self.walls = walls;
        self.doors = doors;
    }

    /// Whether `door_id` is open at the current simulated time.
    #[must_use]
    pub fn is_door_open(&self, door_id: u32) -> bool {
        self.config.door_schedule.is_open(door_id, self.sim_time_ms)
    }

    /// The spatial index built for the most recent tick, for the caller's
    /// own rendering or bookkeeping queries. `None` before the first tick.
    #[must_use]
    pub fn index(&self) -> Option<&QuadTree> {
        self.index.as_ref()
    }

    /// Recent tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Weighted remaining-strength tally per team, sorted by team id.
    #[must_use]
    pub fn team_strength(&self) -> Vec<(TeamId, f32)> {
        let mut tallies: HashMap<TeamId, f32> = HashMap::new();
        for boid in self.arena.boids() {
            *tallies.entry(boid.team).or_default() += boid.influence();
        }
        let mut ordered: Vec<(TeamId, f32)> = tallies.into_iter().collect();
        ordered.sort_by_key(|&(team, _)| team);
        ordered
    }

    /// Rectangles that currently block movement: every wall plus every
    /// closed door.
    #[must_use]
    pub fn obstacle_rects(&self) -> Vec<Rect> {
        let mut rects: Vec<Rect> = self.walls.iter().map(|wall| wall.rect).collect();
        rects.extend(
            self.doors
                .iter()
                .filter(|door| !self.is_door_open(door.id))
                .map(|door| door.rect),
        );
        rects
    }

    /// Advance the simulation one tick under the supplied effect list.
    pub fn step(&mut self, effects: &[Effect]) -> TickEvents {
        let next_tick = self.tick.next();

        self.stage_effects(effects);
        let mut snapshot = FlockSnapshot::capture(self.arena.boids());
        self.rebuild_index(&snapshot.positions);
        let defections = self.stage_defection(&mut snapshot);
        let obstacles = self.obstacle_rects();
        let weight_scales = team_weight_scales(effects);
        let outcomes = self.stage_forces(&snapshot, &obstacles, &weight_scales);
        let forces_discarded = outcomes
            .iter()
            .map(|outcome| outcome.discarded as usize)
            .sum();
        let (velocity_recoveries, position_resets) = self.stage_integrate(&outcomes);

        self.sim_time_ms = self.sim_time_ms.saturating_add(self.config.tick_ms);
        self.tick = next_tick;

        let events = TickEvents {
            tick: next_tick,
            defections,
            forces_discarded,
            velocity_recoveries,
            position_resets,
        };
        self.push_summary(&events);
        events
    }

    fn stage_effects(&mut self, effects: &[Effect]) {
        for boid in self.arena.boids_mut() {
            boid.apply_effects(effects);
        }
    }

    fn rebuild_index(&mut self, positions: &[Vec2]) {
        // Root padded by one unit: boundary handling can pin a boid exactly
        // onto the far edge, which half-open bounds would otherwise exclude.
        let bounds = Rect::new(
            0.0,
            0.0,
            self.config.arena_width + 1.0,
            self.config.arena_height + 1.0,
        );
        self.index = match QuadTree::build(bounds, self.config.quadtree_capacity, positions) {
            Ok(tree) => Some(tree),
            Err(err) => {
                error!(%err, "quadtree rebuild failed; steering falls back to flat scan");
                None
            }
        };
    }

    /// Draw defection decisions for every boid against the tick-start
    /// snapshot, then commit them together so no decision observes another.
    fn stage_defection(&mut self, snapshot: &mut FlockSnapshot) -> usize {
        let decisions: Vec<Option<TeamId>> = {
            let Self {
                config, rng, index, ..
            } = self;
            let view = snapshot.view();
            let settings = &config.defection;
            match index.as_ref() {
                Some(tree) => (0..snapshot.len())
                    .map(|idx| defection_decision(&view, tree, idx, settings, rng))
                    .collect(),
                None => {
                    let flat = FlatScan::new(&snapshot.positions);
                    (0..snapshot.len())
                        .map(|idx| defection_decision(&view, &flat, idx, settings, rng))
                        .collect()
                }
            }
        };

        let mut defections = 0;
        let boids = self.arena.boids_mut();
        for (idx, decision) in decisions.iter().enumerate() {
            if let Some(team) = decision {
                boids[idx].team = *team;
                snapshot.teams[idx] = *team;
                defections += 1;
                debug!(agent = idx, team = team.0, "boid defected to local majority");
            }
        }
        defections
    }

    fn stage_forces(
        &self,
        snapshot: &FlockSnapshot,
        obstacles: &[Rect],
        weight_scales: &HashMap<TeamId, (f32, f32)>,
    ) -> Vec<ForceOutcome> {
        match self.index.as_ref() {
            Some(tree) => self.compute_forces(snapshot, tree, obstacles, weight_scales),
            None => {
                let flat = FlatScan::new(&snapshot.positions);
                self.compute_forces(snapshot, &flat, obstacles, weight_scales)
            }
        }
    }

    /// Parallel, read-only force aggregation over the snapshot: every boid's
    /// seven steering contributions are weighted and summed, with non-finite
    /// contributions discarded so one bad force never corrupts the total.
    fn compute_forces<Q: SpatialQuery + Sync>(
        &self,
        snapshot: &FlockSnapshot,
        query: &Q,
        obstacles: &[Rect],
        weight_scales: &HashMap<TeamId, (f32, f32)>,
    ) -> Vec<ForceOutcome> {
        let view = snapshot.view();
        let config = &self.config;
        (0..snapshot.len())
            .into_par_iter()
            .map(|idx| {
                let mut outcome = ForceOutcome::default();
                if view.frozen[idx] {
                    return outcome;
                }
                let weights = &config.weights;
                let max_force = config.max_force;
                let size = snapshot.sizes[idx];
                let strength = positive_or_one(view.strengths[idx]);
                let (sep_scale, coh_scale) = weight_scales
                    .get(&view.teams[idx])
                    .copied()
                    .unwrap_or((1.0, 1.0));
                let position = view.positions[idx];
                let velocity = view.velocities[idx];

                let mut add = |force: Vec2, weight: f32, label: &'static str| {
                    let contribution = force * weight;
                    if contribution.is_finite() {
                        outcome.acceleration += contribution;
                    } else {
                        outcome.discarded += 1;
                        warn!(
                            agent = idx,
                            force = label,
                            "discarding non-finite steering contribution"
                        );
                    }
                };

                add(
                    separation_force(&view, query, idx, config.separation_radius * size, max_force),
                    weights.separation * sep_scale * strength,
                    "separation",
                );
                add(
                    alignment_force(&view, query, idx, config.neighbor_radius * size, max_force),
                    weights.alignment * strength,
                    "alignment",
                );
                add(
                    cohesion_force(&view, query, idx, config.neighbor_radius * size, max_force),
                    weights.cohesion * coh_scale * strength,
                    "cohesion",
                );
                add(
                    cross_team_force(&view, query, idx, config.neighbor_radius * size, max_force),
                    weights.cross_team * strength,
                    "cross_team",
                );
                add(
                    point_force(&view, idx, &config.pointer, max_force),
                    weights.point,
                    "point",
                );
                add(
                    obstacle_force(position, velocity, obstacles, &config.avoidance, max_force),
                    weights.obstacle,
                    "obstacle",
                );
                add(
                    border_force(
                        position,
                        config.arena_width,
                        config.arena_height,
                        &config.avoidance,
                        max_force,
                    ),
                    weights.border,
                    "border",
                );
                outcome
            })
            .collect()
    }

    /// Serial velocity/position commit with numeric recovery and boundary
    /// handling. Returns `(velocity_recoveries, position_resets)`.
    fn stage_integrate(&mut self, outcomes: &[ForceOutcome]) -> (usize, usize) {
        let width = self.config.arena_width;
        let height = self.config.arena_height;
        let min_speed = self.config.min_speed;
        let max_speed = self.config.max_speed;
        let policy = self.config.boundary;
        let trail_capacity = self.config.trail_capacity;
        let center = Vec2::new(width * 0.5, height * 0.5);

        let mut velocity_recoveries = 0;
        let mut position_resets = 0;
        for (idx, outcome) in outcomes.iter().enumerate() {
            let boid = &mut self.arena.boids[idx];
            if boid.frozen {
                boid.record_trail(trail_capacity);
                continue;
            }

            boid.velocity += outcome.acceleration;

            let multiplier = positive_or_one(boid.speed_multiplier);
            let floor = min_speed * multiplier;
            let cap = max_speed * multiplier;
            let speed = boid.velocity.length();
            if speed > 0.0 {
                if speed > cap {
                    boid.velocity = boid.velocity * (cap / speed);
                } else if speed < floor {
                    boid.velocity = boid.velocity * (floor / speed);
                }
            }

            if !boid.velocity.is_finite() {
                let angle = self.rng.random_range(0.0..TAU);
                boid.velocity = Vec2::new(angle.cos(), angle.sin()) * VELOCITY_RECOVERY_SPEED;
                velocity_recoveries += 1;
                warn!(agent = idx, "recovered non-finite velocity");
            }

            boid.position += boid.velocity;

            if !boid.position.is_finite() {
                boid.position = center;
                boid.velocity = Vec2::ZERO;
                position_resets += 1;
                error!(agent = idx, "reset non-finite position to arena centre");
            }

            match policy {
                BoundaryPolicy::Wrap => {
                    let mut wrapped = false;
                    if boid.position.x > width {
                        boid.position.x = 0.0;
                        wrapped = true;
                    } else if boid.position.x < 0.0 {
                        boid.position.x = width;
                        wrapped = true;
                    }
                    if boid.position.y > height {
                        boid.position.y = 0.0;
                        wrapped = true;
                    } else if boid.position.y < 0.0 {
                        boid.position.y = height;
                        wrapped = true;
                    }
                    if wrapped {
                        boid.trail.clear();
                    }
                }
                BoundaryPolicy::Clamp => {
                    boid.position.x = boid.position.x.clamp(0.0, width);
                    boid.position.y = boid.position.y.clamp(0.0, height);
                }
            }

            boid.record_trail(trail_capacity);
        }
        (velocity_recoveries, position_resets)
    }

    fn push_summary(&mut self, events: &TickEvents) {
        let summary = TickSummary {
            tick: events.tick,
            population: self.arena.len(),
            team_strength: self.team_strength(),
            defections: events.defections,
            numeric_recoveries: events.velocity_recoveries + events.position_resets,
        };
        self.history.push_back(summary);
        while self.history.len() > self.config.history_capacity {
            let _ = self.history.pop_front();
        }
    }
}

/// Fold per-team separation/cohesion weight scales out of the effect list.
fn team_weight_scales(effects: &[Effect]) -> HashMap<TeamId, (f32, f32)> {
    let mut scales: HashMap<TeamId, (f32, f32)> = HashMap::new();
    for effect in effects {
        if effect.separation_multiplier.is_none() && effect.cohesion_multiplier.is_none() {
            continue;
        }
        let entry = scales.entry(effect.team).or_insert((1.0, 1.0));
        if let Some(separation) = effect.separation_multiplier {
            if separation.is_finite() && separation > 0.0 {
                entry.0 = separation;
            }
        }
        if let Some(cohesion) = effect.cohesion_multiplier {
            if cohesion.is_finite() && cohesion > 0.0 {
                entry.1 = cohesion;
            }
        }
    }
    scales
}
