#![allow(dead_code)]

use archetype_ecs::{EcsResult, Handle, Registry, RegistryConfig, RegistryMode};

pub const ENTITIES_SMALL: usize = 10_000;
pub const ENTITIES_MED: usize = 100_000;
pub const ENTITIES_LARGE: usize = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy)]
pub struct Mass {
    pub value: f32,
}

pub fn make_registry(mode: RegistryMode) -> Registry {
    Registry::new(RegistryConfig { mode, ..RegistryConfig::default() })
}

pub fn populate(registry: &Registry, count: usize) -> EcsResult<Vec<Handle>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let position = Position { x: i as f32, y: 0.0 };
        let velocity = Velocity { dx: 1.0, dy: 0.5 };
        // A third of the population carries an extra component so iteration
        // spans more than one archetype.
        let handle = if i % 3 == 0 {
            registry.create((position, velocity, Mass { value: 1.0 }))?
        } else {
            registry.create((position, velocity))?
        };
        handles.push(handle);
    }
    Ok(handles)
}
