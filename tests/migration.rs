// Archetype migration: put with new types, component removal, swap-erase
// backfill, and preservation of untouched values.
//
// Run: cargo test --test migration

use archetype_ecs::{EcsError, EcsResult, Registry};

#[derive(Clone, PartialEq, Debug)]
struct Name(String);

#[test]
fn put_new_type_migrates_and_preserves() -> EcsResult<()> {
    let registry = Registry::default();

    let h3 = registry.create((1i32, 10.0f32, 10.0f64))?;
    let h4 = registry.create((2i32, 20.0f32))?;

    // h4 moves to the {i32, f32, f64} archetype; existing values ride along.
    registry.put(h4, (40.0f64,))?;
    assert_eq!(registry.get::<i32>(h4)?, 2);
    assert_eq!(registry.get::<f32>(h4)?, 20.0);
    assert_eq!(registry.get::<f64>(h4)?, 40.0);

    // The entity that stayed put is untouched.
    assert_eq!(registry.fetch::<(i32, f32, f64)>(h3)?, (1, 10.0f32, 10.0f64));
    Ok(())
}

#[test]
fn migration_to_new_then_back_to_existing_archetype() -> EcsResult<()> {
    let registry = Registry::default();

    let a = registry.create((1i32,))?;
    let b = registry.create((2i32,))?;

    // First migration creates the {i32, f32} archetype.
    registry.put(a, (1.5f32,))?;
    assert_eq!(registry.get::<f32>(a)?, 1.5);

    // Removing f32 moves `a` back into the pre-existing {i32} archetype,
    // alongside `b`.
    registry.remove::<(f32,)>(a)?;
    assert!(!registry.has::<f32>(a));
    assert_eq!(registry.get::<i32>(a)?, 1);
    assert_eq!(registry.get::<i32>(b)?, 2);
    Ok(())
}

#[test]
fn put_mixing_present_and_absent_types() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((2i32, 20.0f32))?;

    // i32 is overwritten during the same migration that adds f64.
    registry.put(handle, (7i32, 40.0f64))?;
    assert_eq!(registry.get::<i32>(handle)?, 7);
    assert_eq!(registry.get::<f32>(handle)?, 20.0);
    assert_eq!(registry.get::<f64>(handle)?, 40.0);
    Ok(())
}

#[test]
fn remove_drops_values_and_keeps_the_rest() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((5i32, 6.9f32, 7.3f64))?;

    registry.remove::<(i32, f32)>(handle)?;
    assert!(!registry.has::<i32>(handle));
    assert!(!registry.has::<f32>(handle));
    assert!(registry.has::<f64>(handle));
    assert_eq!(registry.get::<f64>(handle)?, 7.3);

    match registry.remove::<(f32,)>(handle) {
        Err(EcsError::MissingComponent { .. }) => {}
        other => panic!("expected MissingComponent, got {:?}", other),
    }
    Ok(())
}

#[test]
fn removing_the_final_component_keeps_the_entity() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((7.3f64,))?;
    registry.remove::<(f64,)>(handle)?;

    // The entity persists in the empty archetype.
    assert!(registry.exists(handle));
    assert!(registry.types(handle)?.is_empty());
    assert_eq!(registry.len(), 1);

    // And can grow components again.
    registry.put(handle, (11i32,))?;
    assert_eq!(registry.get::<i32>(handle)?, 11);

    registry.erase(handle)?;
    assert!(!registry.exists(handle));
    Ok(())
}

#[test]
fn erase_middle_row_backfills_and_reindexes() -> EcsResult<()> {
    let registry = Registry::default();

    let first = registry.create((1i32, 100u64))?;
    let middle = registry.create((2i32, 200u64))?;
    let last = registry.create((3i32, 300u64))?;

    // Erasing the middle row moves the last row into its place; the moved
    // entity's handle must still resolve to its original values.
    registry.erase(middle)?;
    assert!(!registry.exists(middle));
    assert_eq!(registry.fetch::<(i32, u64)>(first)?, (1, 100));
    assert_eq!(registry.fetch::<(i32, u64)>(last)?, (3, 300));
    Ok(())
}

#[test]
fn erase_last_row_has_no_backfill() -> EcsResult<()> {
    let registry = Registry::default();

    let first = registry.create((1i32,))?;
    let last = registry.create((2i32,))?;

    registry.erase(last)?;
    assert!(registry.exists(first));
    assert_eq!(registry.get::<i32>(first)?, 1);
    assert_eq!(registry.len(), 1);
    Ok(())
}

#[test]
fn migration_of_a_non_last_row_reindexes_the_backfilled_entity() -> EcsResult<()> {
    let registry = Registry::default();

    let a = registry.create((1i32, 10.0f32))?;
    let b = registry.create((2i32, 20.0f32))?;
    let c = registry.create((3i32, 30.0f32))?;

    // Migrating `a` out swap-erases its row; `c` backfills it.
    registry.put(a, (1.0f64,))?;

    assert_eq!(registry.fetch::<(i32, f32)>(b)?, (2, 20.0f32));
    assert_eq!(registry.fetch::<(i32, f32)>(c)?, (3, 30.0f32));
    assert_eq!(registry.get::<f64>(a)?, 1.0);
    assert_eq!(registry.get::<i32>(a)?, 1);
    Ok(())
}

#[test]
fn heap_owning_components_survive_migration() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((Name(String::from("alpha")), 1i32))?;
    registry.put(handle, (2.0f64,))?;
    assert_eq!(registry.get::<Name>(handle)?, Name(String::from("alpha")));

    registry.remove::<(i32,)>(handle)?;
    assert_eq!(registry.get::<Name>(handle)?, Name(String::from("alpha")));
    assert_eq!(registry.get::<f64>(handle)?, 2.0);

    registry.erase(handle)?;
    Ok(())
}

#[test]
fn duplicate_types_in_remove_rejected() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((1i32, 2.0f32))?;
    match registry.remove::<(i32, i32)>(handle) {
        Err(EcsError::DuplicateComponent { .. }) => {}
        other => panic!("expected DuplicateComponent, got {:?}", other),
    }
    // Nothing was removed.
    assert!(registry.has::<i32>(handle));
    Ok(())
}

#[test]
fn repeated_migrations_stay_consistent() -> EcsResult<()> {
    let registry = Registry::default();

    let handle = registry.create((0u64,))?;
    for round in 1..50u64 {
        registry.put(handle, (round, round as f32))?;
        registry.remove::<(f32,)>(handle)?;
        assert_eq!(registry.get::<u64>(handle)?, round);
    }
    assert_eq!(registry.types(handle)?.len(), 1);
    Ok(())
}
