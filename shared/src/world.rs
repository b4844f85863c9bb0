//! Minimal entity store implementing [`Simulation`].
//!
//! Entities are points that move while their input mask holds a direction.
//! Both peers run the same `step`, so a client's local motion matches the
//! server's until the next authoritative position arrives.

use crate::{
    EntityId, IdAllocator, IdError, InputMask, Position, Simulation, ENTITY_SPEED, WORLD_HEIGHT,
    WORLD_WIDTH,
};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Entity {
    pub position: Position,
    pub input: InputMask,
}

impl Entity {
    fn velocity(&self) -> (f32, f32) {
        let mut vx = 0.0;
        let mut vy = 0.0;
        if self.input.contains(InputMask::LEFT) {
            vx -= ENTITY_SPEED;
        }
        if self.input.contains(InputMask::RIGHT) {
            vx += ENTITY_SPEED;
        }
        if self.input.contains(InputMask::UP) {
            vy -= ENTITY_SPEED;
        }
        if self.input.contains(InputMask::DOWN) {
            vy += ENTITY_SPEED;
        }
        (vx, vy)
    }
}

#[derive(Debug)]
pub struct World {
    entities: HashMap<EntityId, Entity>,
    allocator: IdAllocator,
    spawned: BTreeSet<EntityId>,
    avatar: Option<EntityId>,
}

impl World {
    fn with_allocator(allocator: IdAllocator) -> Self {
        Self {
            entities: HashMap::new(),
            allocator,
            spawned: BTreeSet::new(),
            avatar: None,
        }
    }

    /// World for the server or an offline client.
    pub fn authoritative() -> Self {
        Self::with_allocator(IdAllocator::authoritative())
    }

    /// World for a client connected to a server; local spawns are provisional.
    pub fn networked_client() -> Self {
        Self::with_allocator(IdAllocator::provisional())
    }

    pub fn is_authoritative(&self) -> bool {
        self.allocator.is_authoritative()
    }

    /// Creates a locally owned entity with a freshly allocated id.
    pub fn spawn(&mut self, position: Position) -> Result<EntityId, IdError> {
        let entity = self.allocator.next()?;
        self.entities.insert(
            entity,
            Entity {
                position,
                input: InputMask::NONE,
            },
        );
        self.spawned.insert(entity);
        debug!("Spawned {} at ({}, {})", entity, position.x, position.y);
        Ok(entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<&Entity> {
        self.entities.get(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn avatar(&self) -> Option<EntityId> {
        self.avatar
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Provisional entities this peer spawned and still holds.
    pub fn provisional_entities(&self) -> Vec<EntityId> {
        self.spawned
            .iter()
            .copied()
            .filter(|e| e.is_provisional())
            .collect()
    }

    /// Advances every entity by `dt` seconds and returns the ones that moved.
    pub fn step(&mut self, dt: f32) -> Vec<EntityId> {
        let mut moved = Vec::new();

        for (id, entity) in self.entities.iter_mut() {
            let (vx, vy) = entity.velocity();
            if vx == 0.0 && vy == 0.0 {
                continue;
            }

            let before = entity.position;
            entity.position.x = (entity.position.x + vx * dt).clamp(0.0, WORLD_WIDTH);
            entity.position.y = (entity.position.y + vy * dt).clamp(0.0, WORLD_HEIGHT);

            if entity.position != before {
                moved.push(*id);
            }
        }

        moved.sort();
        moved
    }
}

impl Simulation for World {
    fn create_entity(&mut self, entity: EntityId, position: Position) {
        self.entities.entry(entity).or_default().position = position;
    }

    fn destroy_entity(&mut self, entity: EntityId) -> bool {
        self.spawned.remove(&entity);
        if self.avatar == Some(entity) {
            self.avatar = None;
        }
        self.entities.remove(&entity).is_some()
    }

    fn set_input(&mut self, entity: EntityId, mask: InputMask) -> bool {
        match self.entities.get_mut(&entity) {
            Some(e) => {
                e.input = mask;
                true
            }
            None => false,
        }
    }

    fn set_position(&mut self, entity: EntityId, position: Position) -> bool {
        match self.entities.get_mut(&entity) {
            Some(e) => {
                e.position = position;
                true
            }
            None => false,
        }
    }

    fn assign_avatar(&mut self, entity: EntityId) {
        info!("Now controlling {}", entity);
        self.avatar = Some(entity);
    }

    fn input_of(&self, entity: EntityId) -> Option<InputMask> {
        self.entities.get(&entity).map(|e| e.input)
    }

    fn position_of(&self, entity: EntityId) -> Option<Position> {
        self.entities.get(&entity).map(|e| e.position)
    }

    fn owned_entities(&self) -> Vec<EntityId> {
        let mut owned = self.spawned.clone();
        if let Some(avatar) = self.avatar {
            owned.insert(avatar);
        }
        owned
            .into_iter()
            .filter(|e| self.entities.contains_key(e))
            .collect()
    }
}
