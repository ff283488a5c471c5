//! Scalability benchmarks: world generation, capture advance at cluster
//! scale, and projectile sweeps under load.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hashbrown::HashMap;
use std::f32::consts::PI;
use uuid::Uuid;

use adlands_server::game::capture;
use adlands_server::game::constants::tick::DT;
use adlands_server::game::constants::world::RADIUS;
use adlands_server::game::projectile::ProjectileEngine;
use adlands_server::game::spatial::{SurfaceGrid, TankProxy};
use adlands_server::game::state::{
    ActorId, Cluster, ClusterPresence, Faction, PresenceMap,
};
use adlands_server::util::sphere::{self, SurfacePos};
use adlands_server::worldgen::{icosphere, GeneratedWorld, WorldParams};

fn bench_worldgen(c: &mut Criterion) {
    c.bench_function("icosphere_build_sub4", |b| {
        b.iter(|| icosphere::build(black_box(4)))
    });

    c.bench_function("worldgen_sub3", |b| {
        b.iter(|| {
            GeneratedWorld::generate(WorldParams {
                world_seed: 42,
                terrain_seed: 7,
                subdivision: 3,
            })
            .unwrap()
        })
    });
}

fn bench_capture(c: &mut Criterion) {
    // 160 contested clusters, three factions everywhere
    let make_clusters = || -> Vec<Cluster> {
        (0..160u16)
            .map(|id| {
                let mut cluster = Cluster::new(id, (0..16).collect(), None);
                cluster.tics = [4.0, 3.0, 2.0];
                cluster
            })
            .collect()
    };
    let mut presence: PresenceMap = HashMap::new();
    for id in 0..160u16 {
        let mut p = ClusterPresence::default();
        p.add_human(Faction::Rust, Uuid::from_u128(id as u128 + 1));
        p.add_bot(Faction::Cobalt);
        p.add_bot(Faction::Viridian);
        presence.insert(id, p);
    }

    c.bench_function("capture_advance_160_contested", |b| {
        let mut clusters = make_clusters();
        b.iter(|| {
            capture::advance(black_box(&mut clusters), black_box(&presence), DT);
        })
    });
}

fn bench_projectiles(c: &mut Criterion) {
    c.bench_function("projectile_sweep_200_shells_100_tanks", |b| {
        let mut grid = SurfaceGrid::new();
        for i in 0..100 {
            let theta = (i as f32 * 0.37) % (2.0 * PI);
            let phi = 0.4 + (i as f32 * 0.021) % 2.2;
            grid.insert(TankProxy {
                actor: ActorId::Bot(i),
                faction: Faction::from_index((i % 3) as usize).unwrap(),
                pos: SurfacePos::new(theta, phi),
                heading: 0.0,
                targetable: true,
            });
        }

        // Spawn + one sweep per iteration: hits and expiries drain the
        // engine, so the population is rebuilt each round
        b.iter(|| {
            let mut engine = ProjectileEngine::new();
            for i in 0..200u64 {
                let pos = SurfacePos::new((i as f32 * 0.17) % (2.0 * PI), 1.3);
                // Synthetic owners keep the per-owner cap out of the way
                let owner = ActorId::Human(Uuid::from_u128(i as u128));
                engine.spawn(i, owner, Faction::Rust, pos, (i % 6) as f32, 5.0);
            }
            let hits = engine.advance(black_box(&mut grid), DT, |_| false);
            black_box(hits);
        })
    });

    c.bench_function("sphere_step_chain", |b| {
        let mut pos = SurfacePos::new(1.0, 1.2);
        b.iter(|| {
            pos = sphere::step(black_box(pos), 0.7, 2.0, RADIUS);
            black_box(pos)
        })
    });
}

criterion_group!(benches, bench_worldgen, bench_capture, bench_projectiles);
criterion_main!(benches);
