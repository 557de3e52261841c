use criterion::*;
use std::hint::black_box;

mod common;
use common::*;

use archetype_ecs::RegistryMode;

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    group.bench_function("read_position_velocity_100k", |b| {
        b.iter_batched(
            || {
                let registry = make_registry(RegistryMode::Sequential);
                populate(&registry, ENTITIES_MED).unwrap();
                registry
            },
            |registry| {
                let view = registry.view::<(Position, Velocity)>().unwrap();
                let mut sum = 0.0f32;
                view.for_each(|_handle, (position, velocity)| {
                    sum += position.x + velocity.dx;
                });
                black_box(sum);
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("write_position_100k", |b| {
        b.iter_batched(
            || {
                let registry = make_registry(RegistryMode::Sequential);
                populate(&registry, ENTITIES_MED).unwrap();
                registry
            },
            |registry| {
                let mut view = registry.view_mut::<(Position, Velocity)>().unwrap();
                view.for_each(|_handle, (position, velocity)| {
                    position.x += velocity.dx;
                    position.y += velocity.dy;
                });
                drop(view);
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("par_write_position_100k", |b| {
        b.iter_batched(
            || {
                let registry = make_registry(RegistryMode::Parallel);
                populate(&registry, ENTITIES_MED).unwrap();
                registry
            },
            |registry| {
                let mut view = registry.view_mut::<(Position, Velocity)>().unwrap();
                view.par_for_each(rayon::current_num_threads(), |_handle, (position, velocity)| {
                    position.x += velocity.dx;
                    position.y += velocity.dy;
                });
                drop(view);
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
