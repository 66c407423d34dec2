//! End-to-end pipeline tests: determinism, obstacle and door behavior, and
//! defection observed through full ticks rather than isolated stages.

use swarmsim_core::{
    Boid, BoundaryPolicy, DefectionSettings, Door, ForceWeights, Orientation, SectorLayout,
    SwarmConfig, TeamId, WorldState,
};
use swarmsim_index::{Rect, Vec2};

fn small_config() -> SwarmConfig {
    SwarmConfig {
        arena_width: 400.0,
        arena_height: 400.0,
        population: 0,
        rng_seed: Some(42),
        ..SwarmConfig::default()
    }
}

fn obstacle_only_weights() -> ForceWeights {
    ForceWeights {
        separation: 0.0,
        alignment: 0.0,
        cohesion: 0.0,
        cross_team: 0.0,
        point: 0.0,
        obstacle: 1.0,
        border: 0.0,
    }
}

#[test]
fn same_seed_replays_identically() {
    let build = |seed: u64| {
        let mut world = WorldState::new(SwarmConfig {
            population: 60,
            rng_seed: Some(seed),
            ..small_config()
        })
        .unwrap();
        world.populate();
        for _ in 0..50 {
            let _ = world.step(&[]);
        }
        world
    };

    let a = build(42);
    let b = build(42);
    for (x, y) in a.arena().boids().iter().zip(b.arena().boids()) {
        assert_eq!(x.position, y.position);
        assert_eq!(x.velocity, y.velocity);
        assert_eq!(x.team, y.team);
    }

    let c = build(43);
    let diverged = a
        .arena()
        .boids()
        .iter()
        .zip(c.arena().boids())
        .any(|(x, y)| x.position != y.position);
    assert!(diverged);
}

#[test]
fn avoidance_keeps_a_charging_boid_out_of_a_wall() {
    let config = SwarmConfig {
        weights: obstacle_only_weights(),
        min_speed: 0.0,
        boundary: BoundaryPolicy::Clamp,
        ..small_config()
    };
    let wall = Rect::new(200.0, 0.0, 40.0, 400.0);
    let mut world = WorldState::new(config).unwrap();
    world.set_obstacles(vec![swarmsim_core::Obstacle::new(wall)], Vec::new());
    world.spawn_boid(Boid::new(
        Vec2::new(195.0, 200.0),
        Vec2::new(3.0, 0.0),
        TeamId(0),
        0.8,
    ));

    for _ in 0..50 {
        let _ = world.step(&[]);
        let position = world.arena().boids()[0].position;
        assert!(
            !wall.contains(position),
            "boid penetrated the wall at {position:?}"
        );
    }
}

#[test]
fn a_closed_door_blocks_like_a_wall() {
    let config = SwarmConfig {
        weights: obstacle_only_weights(),
        min_speed: 0.0,
        boundary: BoundaryPolicy::Clamp,
        ..small_config()
    };
    let rect = Rect::new(200.0, 0.0, 40.0, 400.0);
    let mut world = WorldState::new(config).unwrap();
    // Odd door id: closed for the whole first half-cycle, and 50 ticks of
    // 16 ms stay well inside it.
    world.set_obstacles(
        Vec::new(),
        vec![Door {
            rect,
            id: 1,
            orientation: Orientation::Vertical,
        }],
    );
    world.spawn_boid(Boid::new(
        Vec2::new(195.0, 200.0),
        Vec2::new(3.0, 0.0),
        TeamId(0),
        0.8,
    ));

    for _ in 0..50 {
        assert!(!world.is_door_open(1));
        let _ = world.step(&[]);
        let position = world.arena().boids()[0].position;
        assert!(!rect.contains(position));
    }
}

#[test]
fn an_open_door_lets_boids_through() {
    let config = SwarmConfig {
        weights: obstacle_only_weights(),
        min_speed: 0.0,
        boundary: BoundaryPolicy::Clamp,
        ..small_config()
    };
    let rect = Rect::new(200.0, 0.0, 40.0, 400.0);
    let mut world = WorldState::new(config).unwrap();
    world.set_obstacles(
        Vec::new(),
        vec![Door {
            rect,
            id: 0,
            orientation: Orientation::Vertical,
        }],
    );
    world.spawn_boid(Boid::new(
        Vec2::new(195.0, 200.0),
        Vec2::new(3.0, 0.0),
        TeamId(0),
        0.8,
    ));

    for _ in 0..50 {
        assert!(world.is_door_open(0));
        let _ = world.step(&[]);
    }
    let position = world.arena().boids()[0].position;
    assert!(position.x > rect.x + rect.w);
}

#[test]
fn surrounded_boid_defects_to_the_local_majority() {
    let config = SwarmConfig {
        weights: ForceWeights {
            obstacle: 0.0,
            ..obstacle_only_weights()
        },
        min_speed: 0.0,
        defection: DefectionSettings {
            peer_pressure: 1.0,
            peer_radius: 50.0,
            loyalty_factor: 0.0,
        },
        ..small_config()
    };
    let mut world = WorldState::new(config).unwrap();
    let lone = world.spawn_boid(Boid::new(
        Vec2::new(200.0, 200.0),
        Vec2::ZERO,
        TeamId(0),
        0.8,
    ));
    for i in 0..5 {
        world.spawn_boid(Boid::new(
            Vec2::new(205.0 + i as f32 * 4.0, 200.0),
            Vec2::ZERO,
            TeamId(1),
            0.8,
        ));
    }

    let events = world.step(&[]);
    assert!(events.defections >= 1);
    assert_eq!(world.arena().get(lone).unwrap().team, TeamId(1));
}

#[test]
fn silo_world_runs_and_stays_in_bounds() {
    let layout = SectorLayout::default();
    let arena = layout.arena_size();
    let config = SwarmConfig {
        arena_width: arena.x,
        arena_height: arena.y,
        population: 200,
        team_count: 4,
        rng_seed: Some(9),
        ..SwarmConfig::default()
    };
    let mut world = WorldState::with_layout(config, &layout).unwrap();
    world.populate();

    for _ in 0..10 {
        let events = world.step(&[]);
        assert_eq!(events.position_resets, 0);
    }

    assert_eq!(world.history().count(), 10);
    for boid in world.arena().boids() {
        assert!(boid.position.is_finite());
        assert!(boid.position.x >= 0.0 && boid.position.x <= arena.x);
        assert!(boid.position.y >= 0.0 && boid.position.y <= arena.y);
    }
    let strength = world.team_strength();
    assert_eq!(strength.len(), 4);
    assert!(strength.iter().all(|&(_, tally)| tally > 0.0));
}
