use criterion::*;
use std::hint::black_box;

mod common;
use common::*;

use archetype_ecs::RegistryMode;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    group.bench_function("create_100k", |b| {
        b.iter_batched(
            || make_registry(RegistryMode::Sequential),
            |registry| {
                populate(&registry, ENTITIES_MED).unwrap();
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("create_erase_churn_10k", |b| {
        b.iter_batched(
            || {
                let registry = make_registry(RegistryMode::Sequential);
                let handles = populate(&registry, ENTITIES_SMALL).unwrap();
                (registry, handles)
            },
            |(registry, handles)| {
                for handle in &handles {
                    registry.erase(*handle).unwrap();
                }
                let handles = populate(&registry, ENTITIES_SMALL).unwrap();
                black_box((registry, handles));
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("migrate_add_remove_10k", |b| {
        b.iter_batched(
            || {
                let registry = make_registry(RegistryMode::Sequential);
                let handles = populate(&registry, ENTITIES_SMALL).unwrap();
                (registry, handles)
            },
            |(registry, handles)| {
                for handle in &handles {
                    registry.put(*handle, (0u64,)).unwrap();
                }
                for handle in &handles {
                    registry.remove::<(u64,)>(*handle).unwrap();
                }
                black_box((registry, handles));
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
