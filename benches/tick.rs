//! Benchmarks for the per-tick hot paths
//!
//! Run with: cargo bench --bench tick

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use party_actor_core::actor::authority::ActorKind;
use party_actor_core::actor::state::Actor;
use party_actor_core::actor::world::World;
use party_actor_core::config::{ActorConfig, CoreConfig};
use party_actor_core::movement::{self, FlatGround, MoveInput};
use party_actor_core::net::inbox::CoreEvent;
use party_actor_core::net::protocol::{ReplicationSnapshot, SnapshotEnvelope, WireMessage};
use party_actor_core::net::reconcile::reconcile_all;
use party_actor_core::net::replication::SnapshotTargets;
use party_actor_core::session::Session;
use party_actor_core::spawn::coordinator::SpawnCoordinator;
use party_actor_core::spawn::duplicates::sweep;
use party_actor_core::spawn::level::LevelChange;
use party_actor_core::util::vec3::Vec3;
use rand::Rng;
use uuid::Uuid;

/// World with `count` observed replicas, each with a pending target
fn world_with_replicas(count: usize) -> (World, SnapshotTargets) {
    let mut world = World::new(Uuid::new_v4());
    let mut targets = SnapshotTargets::new();
    let config = Arc::new(ActorConfig::default());
    let mut rng = rand::thread_rng();

    for _ in 0..count {
        let owner = Uuid::new_v4();
        let position = Vec3::new(rng.gen_range(-50.0..50.0), 0.0, rng.gen_range(-50.0..50.0));
        let id = world.insert(Actor::new(
            Uuid::new_v4(),
            Some(owner),
            ActorKind::Participant,
            position,
            0.0,
            config.clone(),
        ));
        targets.accept(&SnapshotEnvelope {
            actor_id: id,
            owner,
            sequence: 1,
            tick: 1,
            snapshot: ReplicationSnapshot {
                position: position + Vec3::new(rng.gen_range(-1.0..1.0), 0.0, 0.0),
                yaw: rng.gen_range(0.0..std::f32::consts::TAU),
                velocity: Vec3::new(1.0, 0.0, 0.0),
                grounded: true,
                anim_speed: 1.0,
                anim: Default::default(),
            },
        });
    }
    (world, targets)
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    group.sample_size(50);
    let dt = CoreConfig::default().dt();

    for count in [8, 64, 256, 1024] {
        let (mut world, targets) = world_with_replicas(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("parallel", count), &count, |b, _| {
            b.iter(|| black_box(reconcile_all(&mut world, &targets, black_box(dt))))
        });
    }
    group.finish();
}

fn bench_movement_step(c: &mut Criterion) {
    let config = CoreConfig::default();
    let ground = FlatGround { height: 0.0 };
    let mut actor = Actor::new(
        Uuid::new_v4(),
        Some(Uuid::new_v4()),
        ActorKind::Participant,
        Vec3::ZERO,
        0.0,
        Arc::new(config.actor.clone()),
    );
    let input = MoveInput::new(0.7, 0.7, false);
    let dt = config.dt();
    let mut now = 0.0f64;

    c.bench_function("movement_step", |b| {
        b.iter(|| {
            now += f64::from(dt);
            black_box(movement::step(
                &mut actor,
                &input,
                &ground,
                Vec3::ZERO,
                now,
                dt,
            ))
        })
    });
}

/// Full session tick with a live local actor and `count` replicas receiving snapshots
fn bench_session_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_tick");
    group.sample_size(30);
    let ground = FlatGround { height: 0.0 };

    for count in [8, 64, 256] {
        let config = CoreConfig {
            settle_delay_ticks: 1,
            ..CoreConfig::default()
        };
        let mut session = Session::new(config, Uuid::new_v4());
        let sender = session.sender();
        let _ = sender.try_send(CoreEvent::LocalConnected);
        let _ = sender.try_send(CoreEvent::LevelChanged(LevelChange::new(None, "Arena")));

        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let owner = Uuid::new_v4();
            let actor_id = Uuid::new_v4();
            let position = Vec3::new(rng.gen_range(-50.0..50.0), 0.0, rng.gen_range(-50.0..50.0));
            let _ = sender.try_send(CoreEvent::Wire(WireMessage::ActorSpawned {
                actor_id,
                owner,
                position,
                yaw: 0.0,
            }));
            let _ = sender.try_send(CoreEvent::Wire(WireMessage::Snapshot(SnapshotEnvelope {
                actor_id,
                owner,
                sequence: 1,
                tick: 1,
                snapshot: ReplicationSnapshot {
                    position: position + Vec3::new(0.5, 0.0, 0.0),
                    yaw: 0.0,
                    velocity: Vec3::new(1.0, 0.0, 0.0),
                    grounded: true,
                    anim_speed: 1.0,
                    anim: Default::default(),
                },
            })));
        }
        let input = MoveInput::new(0.3, 0.9, false);
        for _ in 0..5 {
            session.tick(&input, &ground);
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("replicas", count), &count, |b, _| {
            b.iter(|| black_box(session.tick(&input, &ground)))
        });
    }
    group.finish();
}

fn bench_duplicate_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_sweep");
    group.sample_size(50);

    for count in [8, 64, 256] {
        let (mut world, _) = world_with_replicas(count);
        let coordinator = SpawnCoordinator::new(world.local_participant());
        let local = world.local_participant();
        world.insert(Actor::new(
            Uuid::new_v4(),
            Some(local),
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            Arc::new(ActorConfig::default()),
        ));

        group.bench_with_input(BenchmarkId::new("clean", count), &count, |b, _| {
            b.iter(|| black_box(sweep(&mut world, &coordinator)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_reconcile,
    bench_movement_step,
    bench_session_tick,
    bench_duplicate_sweep
);
criterion_main!(benches);
