use std::time::Duration;

use criterion::*;
use dynarch::{View, World};
use rand::Rng;

struct PositionX(f64);
struct PositionY(f64);
struct PositionZ(f64);
struct VelocityX(f64);
struct VelocityY(f64);
struct VelocityZ(f64);

fn iter_entity_add_individual_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("iter entity (a += b)");
    group.measurement_time(Duration::from_secs(10));

    for log_entities in (4..=16).step_by(4) {
        let num_entities = 1 << log_entities;
        group.throughput(Throughput::Elements(num_entities));
        group.bench_with_input(
            BenchmarkId::new("individual/view", format!("{num_entities} entities")),
            &num_entities,
            |b, &num_entities| {
                let mut world = World::new();
                let mut rng = rand::thread_rng();
                for _ in 0..num_entities {
                    world
                        .entity()
                        .add(PositionX(rng.gen_range(-65536.0..=65536.0)))
                        .add(PositionY(rng.gen_range(-65536.0..=65536.0)))
                        .add(PositionZ(rng.gen_range(-65536.0..=65536.0)))
                        .add(VelocityX(rng.gen_range(-65536.0..=65536.0)))
                        .add(VelocityY(rng.gen_range(-65536.0..=65536.0)))
                        .add(VelocityZ(rng.gen_range(-65536.0..=65536.0)))
                        .apply();
                }
                let view = View::new();
                b.iter(|| {
                    view.for_each(
                        &mut world,
                        |px: &mut PositionX,
                         py: &mut PositionY,
                         pz: &mut PositionZ,
                         vx: &VelocityX,
                         vy: &VelocityY,
                         vz: &VelocityZ| {
                            px.0 += vx.0;
                            py.0 += vy.0;
                            pz.0 += vz.0;
                        },
                    );
                })
            },
        );
    }
}

#[derive(dynarch::Event)]
struct Tick;

struct PositionArray([f64; 3]);
struct VelocityArray([f64; 3]);

fn iter_entity_add_array_system(c: &mut Criterion) {
    let mut group = c.benchmark_group("iter entity (a += b)");
    group.measurement_time(Duration::from_secs(10));

    for log_entities in (4..=16).step_by(4) {
        let num_entities = 1 << log_entities;
        group.throughput(Throughput::Elements(num_entities));
        group.bench_with_input(
            BenchmarkId::new("array/system", format!("{num_entities} entities")),
            &num_entities,
            |b, &num_entities| {
                let mut world = World::new();
                world.system("add").on_event::<Tick>().for_each(
                    |p: &mut PositionArray, v: &VelocityArray| {
                        for i in 0..3 {
                            p.0[i] += v.0[i];
                        }
                    },
                );
                world.order_systems();

                let mut rng = rand::thread_rng();
                for _ in 0..num_entities {
                    world
                        .entity()
                        .add(PositionArray([
                            rng.gen_range(-65536.0..=65536.0),
                            rng.gen_range(-65536.0..=65536.0),
                            rng.gen_range(-65536.0..=65536.0),
                        ]))
                        .add(VelocityArray([
                            rng.gen_range(-65536.0..=65536.0),
                            rng.gen_range(-65536.0..=65536.0),
                            rng.gen_range(-65536.0..=65536.0),
                        ]))
                        .apply();
                }
                b.iter(|| world.emit_immediately(Tick))
            },
        );
    }
}

criterion_group!(individual_view, iter_entity_add_individual_view);
criterion_group!(array_system, iter_entity_add_array_system);
criterion_main!(individual_view, array_system);
