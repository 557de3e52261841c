// Views: matching, completeness, split partitioning, mutable and parallel
// iteration, and invalidation behavior.
//
// Run: cargo test --test views

use std::collections::{HashMap, HashSet};

use archetype_ecs::{
    EcsError, EcsResult, Handle, Registry, RegistryConfig, RegistryMode,
};

fn parallel_registry() -> Registry {
    Registry::new(RegistryConfig { mode: RegistryMode::Parallel, ..RegistryConfig::default() })
}

#[test]
fn view_yields_exactly_the_matching_entities() -> EcsResult<()> {
    let registry = Registry::default();

    let h3 = registry.create((1i32, 10.0f32, 10.0f64))?;
    let h4 = registry.create((2i32, 20.0f32))?;
    let h5 = registry.create((3i32, 30.0f64, String::from("A")))?;

    let view = registry.view::<(i32, f32)>()?;
    let mut seen: HashMap<Handle, (i32, f32)> = HashMap::new();
    for (handle, (i, f)) in view.iter() {
        let previous = seen.insert(handle, (*i, *f));
        assert!(previous.is_none(), "handle yielded twice");
    }

    let expected: HashMap<Handle, (i32, f32)> =
        [(h3, (1, 10.0f32)), (h4, (2, 20.0f32))].into_iter().collect();
    assert_eq!(seen, expected);
    assert!(!seen.contains_key(&h5));
    Ok(())
}

#[test]
fn view_completeness_across_archetypes() -> EcsResult<()> {
    let registry = Registry::default();

    let mut expected = HashSet::new();
    for i in 0..10i32 {
        expected.insert(registry.create((i,))?);
        expected.insert(registry.create((i, i as f32))?);
        expected.insert(registry.create((i, i as f64, String::from("s")))?);
        registry.create((i as f32,))?; // no i32; must not match
    }

    let view = registry.view::<(i32,)>()?;
    assert_eq!(view.len(), expected.len());

    let mut seen = HashSet::new();
    for (handle, (_value,)) in view.iter() {
        assert!(seen.insert(handle), "handle yielded twice");
    }
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn view_over_absent_type_is_empty() -> EcsResult<()> {
    #[derive(Clone, Copy)]
    struct NeverStored(u8);

    let registry = Registry::default();
    registry.create((1i32,))?;

    let view = registry.view::<(NeverStored,)>()?;
    assert!(view.is_empty());
    assert_eq!(view.iter().count(), 0);
    Ok(())
}

#[test]
fn split_partitions_the_view() -> EcsResult<()> {
    let registry = Registry::default();

    let mut expected = HashSet::new();
    for i in 0..23i32 {
        expected.insert(registry.create((i,))?);
        expected.insert(registry.create((i, i as f32))?);
    }

    let view = registry.view::<(i32,)>()?;
    for parts in [1usize, 2, 3, 7, 100] {
        let ranges = view.split(parts);
        assert!(ranges.len() <= parts);
        assert_eq!(ranges.iter().map(|range| range.len()).sum::<usize>(), view.len());

        // Union equals the full view; pairwise intersections are empty.
        let mut seen = HashSet::new();
        for range in &ranges {
            view.for_each_in(range, |handle, _item| {
                assert!(seen.insert(handle), "row covered by two sub-ranges");
            });
        }
        assert_eq!(seen, expected);
    }
    Ok(())
}

#[test]
fn split_windows_carry_archetype_and_rows() -> EcsResult<()> {
    let registry = Registry::default();
    for i in 0..8i32 {
        registry.create((i,))?;
    }

    let view = registry.view::<(i32,)>()?;
    let ranges = view.split(3);
    for range in &ranges {
        for window in &range.windows {
            assert!(window.start < window.end);
        }
    }
    Ok(())
}

#[test]
fn view_mut_writes_are_visible() -> EcsResult<()> {
    let registry = Registry::default();

    let handles: Vec<Handle> =
        (0..10i32).map(|i| registry.create((i, 0.5f32))).collect::<EcsResult<_>>()?;

    {
        let mut view = registry.view_mut::<(i32,)>()?;
        view.for_each(|_handle, (value,)| {
            *value *= 2;
        });
    }

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(registry.get::<i32>(*handle)?, (i as i32) * 2);
    }
    Ok(())
}

#[test]
fn view_mut_iter_yields_each_row_once() -> EcsResult<()> {
    let registry = Registry::default();
    for i in 0..6i32 {
        registry.create((i, i as f64))?;
    }

    let mut view = registry.view_mut::<(f64,)>()?;
    let mut seen = HashSet::new();
    for (handle, (value,)) in view.iter_mut() {
        *value += 1.0;
        assert!(seen.insert(handle));
    }
    assert_eq!(seen.len(), 6);
    Ok(())
}

#[test]
fn par_for_each_writes_disjoint_rows() -> EcsResult<()> {
    let registry = parallel_registry();

    let handles: Vec<Handle> = (0..1000u64)
        .map(|i| {
            if i % 2 == 0 {
                registry.create((i, i as f32))
            } else {
                registry.create((i, String::from("odd")))
            }
        })
        .collect::<EcsResult<_>>()?;

    {
        let mut view = registry.view_mut::<(u64,)>()?;
        view.par_for_each(4, |_handle, (value,)| {
            *value += 1;
        });
    }

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(registry.get::<u64>(*handle)?, i as u64 + 1);
    }
    Ok(())
}

#[test]
fn new_archetype_mid_iteration_fuses_the_iterator() -> EcsResult<()> {
    #[derive(Clone, Copy)]
    struct Fresh(u8);

    let registry = Registry::default();
    for i in 0..4i32 {
        registry.create((i,))?;
    }

    let view = registry.view::<(i32,)>()?;
    let mut iter = view.iter();
    assert!(iter.next().is_some());

    // Creating an entity with a never-seen type set allocates a new
    // archetype, which invalidates outstanding iterators.
    registry.create((Fresh(1),))?;

    assert!(iter.next().is_none());
    assert!(iter.invalidated());
    Ok(())
}

#[test]
fn sequential_mode_rejects_mutation_under_a_view() -> EcsResult<()> {
    let registry = Registry::default();

    let a = registry.create((1i32,))?;
    let b = registry.create((2.0f64,))?;

    {
        let view = registry.view::<(i32,)>()?;

        // The locked archetype rejects structural calls with a typed error.
        assert_eq!(registry.erase(a), Err(EcsError::IterationActive));
        assert_eq!(registry.create((3i32,)).unwrap_err(), EcsError::IterationActive);

        // Archetypes outside the view are unaffected.
        registry.erase(b)?;
        assert_eq!(view.len(), 1);
    }

    // Dropping the view releases the lock.
    registry.erase(a)?;
    Ok(())
}

#[test]
fn parallel_mode_blocks_instead_of_rejecting() -> EcsResult<()> {
    let registry = parallel_registry();

    let handle = registry.create((1i32,))?;
    {
        let view = registry.view::<(i32,)>()?;
        assert_eq!(view.len(), 1);
        // Reads coexist with the shared view lock.
        assert_eq!(registry.get::<i32>(handle)?, 1);
    }
    registry.erase(handle)?;
    Ok(())
}

#[test]
fn concurrent_readers_and_writers() -> EcsResult<()> {
    let registry = parallel_registry();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let registry = &registry;
            scope.spawn(move || {
                let mut mine = Vec::new();
                for i in 0..250u64 {
                    let value = worker * 1_000 + i;
                    let handle = registry.create((value,)).unwrap();
                    mine.push((handle, value));
                }
                for (handle, value) in &mine {
                    assert_eq!(registry.get::<u64>(*handle).unwrap(), *value);
                }
                for (handle, _) in mine.drain(..).step_by(2).collect::<Vec<_>>() {
                    registry.erase(handle).unwrap();
                }
            });
        }
    });

    assert_eq!(registry.len(), 500);
    let view = registry.view::<(u64,)>()?;
    assert_eq!(view.iter().count(), 500);
    Ok(())
}
