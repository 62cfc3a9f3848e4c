use criterion::*;
use dynarch::test_util::CompN;
use dynarch::World;

fn create_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("create entity");

    macro_rules! create_entity_batch {
        ($num_comps:literal; $($comps:expr),* $(,)?) => {
            for log_entities in (0..=8).step_by(4) {
                let entities = 1 << log_entities;
                group.throughput(Throughput::Elements(entities));
                group.bench_with_input(BenchmarkId::new(format!("{} components", $num_comps), format!("{entities} entities")), &entities, |b, &entities| {
                    b.iter_batched(
                        World::new,
                        |mut world| {
                            for _ in 0..entities {
                                world.entity()$(.add($comps))*.apply();
                            }
                            world
                        },
                        BatchSize::SmallInput,
                    );
                });
            }
        }
    }

    create_entity_batch!(0; );
    create_entity_batch!(1; CompN::<1>(1));
    create_entity_batch!(2; CompN::<1>(1), CompN::<2>(2));
    create_entity_batch!(4; CompN::<1>(1), CompN::<2>(2), CompN::<3>(3), CompN::<4>(4));
    create_entity_batch!(8; CompN::<1>(1), CompN::<2>(2), CompN::<3>(3), CompN::<4>(4), CompN::<5>(5), CompN::<6>(6), CompN::<7>(7), CompN::<8>(8));
    create_entity_batch!(16; CompN::<1>(1), CompN::<2>(2), CompN::<3>(3), CompN::<4>(4), CompN::<5>(5), CompN::<6>(6), CompN::<7>(7), CompN::<8>(8), CompN::<9>(9), CompN::<10>(10), CompN::<11>(11), CompN::<12>(12), CompN::<13>(13), CompN::<14>(14), CompN::<15>(15), CompN::<16>(16));
}

criterion_group!(benches, create_entity);
criterion_main!(benches);
