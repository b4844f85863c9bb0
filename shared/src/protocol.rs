//! Command wire format and dispatch.
//!
//! One datagram carries exactly one command laid out as a kind byte followed by
//! a bincode body:
//!
//! | kind | command        | body                     |
//! |------|----------------|--------------------------|
//! | 1    | `CreateEntity` | `(EntityId, Position)`   |
//! | 2    | `DestroyEntity`| `EntityId`               |
//! | 3    | `UpdateInput`  | `(EntityId, InputMask)`  |
//! | 4    | `SetPosition`  | `(EntityId, Position)`   |
//! | 5    | `AssignAvatar` | `EntityId`               |
//!
//! Kinds this build does not know decode to [`Command::Unknown`] so that a
//! newer peer can never knock an older one over. Commands only ever carry
//! absolute values, never deltas, so a lost or repeated datagram is harmless.

use crate::{CommandError, EntityId, Message, MessageQueue, Peer, MAX_DATAGRAM_SIZE};
use bincode::{DefaultOptions, Options};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::BitOr;

const KIND_CREATE_ENTITY: u8 = 1;
const KIND_DESTROY_ENTITY: u8 = 2;
const KIND_UPDATE_INPUT: u8 = 3;
const KIND_SET_POSITION: u8 = 4;
const KIND_ASSIGN_AVATAR: u8 = 5;

// Fixed-width integers as in plain `bincode::serialize`, but a body with bytes
// left over after the value is malformed.
fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CommandError> {
    Ok(DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .serialize(value)?)
}

fn deserialize<T: DeserializeOwned>(body: &[u8]) -> Result<T, CommandError> {
    Ok(DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .deserialize(body)?)
}

fn is_known_kind(kind: u8) -> bool {
    (KIND_CREATE_ENTITY..=KIND_ASSIGN_AVATAR).contains(&kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bit set of held controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputMask(pub u32);

impl InputMask {
    pub const NONE: InputMask = InputMask(0);
    pub const LEFT: InputMask = InputMask(0b00001);
    pub const RIGHT: InputMask = InputMask(0b00010);
    pub const UP: InputMask = InputMask(0b00100);
    pub const DOWN: InputMask = InputMask(0b01000);
    pub const FIRE: InputMask = InputMask(0b10000);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: InputMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: InputMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: InputMask) {
        self.0 &= !other.0;
    }
}

impl BitOr for InputMask {
    type Output = InputMask;

    fn bitor(self, rhs: InputMask) -> InputMask {
        InputMask(self.0 | rhs.0)
    }
}

/// One self-contained mutation of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateEntity { entity: EntityId, position: Position },
    DestroyEntity { entity: EntityId },
    UpdateInput { entity: EntityId, mask: InputMask },
    SetPosition { entity: EntityId, position: Position },
    /// Tells a client which entity its local input drives.
    AssignAvatar { entity: EntityId },
    /// A kind byte this build does not understand, kept verbatim. Encoding
    /// one that carries a known kind byte fails with `ReservedKind`.
    Unknown { kind: u8, body: Vec<u8> },
}

impl Command {
    pub fn kind(&self) -> u8 {
        match self {
            Command::CreateEntity { .. } => KIND_CREATE_ENTITY,
            Command::DestroyEntity { .. } => KIND_DESTROY_ENTITY,
            Command::UpdateInput { .. } => KIND_UPDATE_INPUT,
            Command::SetPosition { .. } => KIND_SET_POSITION,
            Command::AssignAvatar { .. } => KIND_ASSIGN_AVATAR,
            Command::Unknown { kind, .. } => *kind,
        }
    }

    /// Entity the command targets, if it is one this build understands.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Command::CreateEntity { entity, .. }
            | Command::DestroyEntity { entity }
            | Command::UpdateInput { entity, .. }
            | Command::SetPosition { entity, .. }
            | Command::AssignAvatar { entity } => Some(*entity),
            Command::Unknown { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let body = match self {
            Command::CreateEntity { entity, position } => serialize(&(entity, position))?,
            Command::DestroyEntity { entity } => serialize(entity)?,
            Command::UpdateInput { entity, mask } => serialize(&(entity, mask))?,
            Command::SetPosition { entity, position } => serialize(&(entity, position))?,
            Command::AssignAvatar { entity } => serialize(entity)?,
            Command::Unknown { kind, .. } if is_known_kind(*kind) => {
                return Err(CommandError::ReservedKind(*kind));
            }
            Command::Unknown { body, .. } => body.clone(),
        };

        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(self.kind());
        bytes.extend_from_slice(&body);

        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(CommandError::Oversized {
                len: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Command, CommandError> {
        let (&kind, body) = bytes.split_first().ok_or(CommandError::Empty)?;

        let command = match kind {
            KIND_CREATE_ENTITY => {
                let (entity, position) = deserialize(body)?;
                Command::CreateEntity { entity, position }
            }
            KIND_DESTROY_ENTITY => Command::DestroyEntity {
                entity: deserialize(body)?,
            },
            KIND_UPDATE_INPUT => {
                let (entity, mask) = deserialize(body)?;
                Command::UpdateInput { entity, mask }
            }
            KIND_SET_POSITION => {
                let (entity, position) = deserialize(body)?;
                Command::SetPosition { entity, position }
            }
            KIND_ASSIGN_AVATAR => Command::AssignAvatar {
                entity: deserialize(body)?,
            },
            _ => Command::Unknown {
                kind,
                body: body.to_vec(),
            },
        };

        Ok(command)
    }

    /// Applies an already-decoded command.
    pub fn apply<S: Simulation + ?Sized>(&self, sim: &mut S) -> Result<(), CommandError> {
        match *self {
            Command::CreateEntity { entity, position } => {
                sim.create_entity(entity, position);
                Ok(())
            }
            Command::DestroyEntity { entity } => {
                // Already gone is fine; the destroy may have been delivered twice.
                sim.destroy_entity(entity);
                Ok(())
            }
            Command::UpdateInput { entity, mask } => sim
                .set_input(entity, mask)
                .then_some(())
                .ok_or(CommandError::UnknownEntity(entity)),
            Command::SetPosition { entity, position } => sim
                .set_position(entity, position)
                .then_some(())
                .ok_or(CommandError::UnknownEntity(entity)),
            Command::AssignAvatar { entity } => {
                sim.assign_avatar(entity);
                Ok(())
            }
            Command::Unknown { kind, .. } => Err(CommandError::UnknownKind(kind)),
        }
    }
}

/// Decodes one buffer and applies it. A failure only affects this buffer.
pub fn execute<S: Simulation + ?Sized>(bytes: &[u8], sim: &mut S) -> Result<Command, CommandError> {
    let command = Command::decode(bytes)?;
    command.apply(sim)?;
    debug!("Applied {:?}", command);
    Ok(command)
}

/// Encodes `command` and queues it for `peer`. Failures are logged and
/// reported as `false`; the command is dropped.
pub fn enqueue_command(queue: &MessageQueue, peer: Peer, command: &Command) -> bool {
    let payload = match command.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode {:?}: {}", command, e);
            return false;
        }
    };

    match queue.enqueue(Message::new(payload, peer)) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to queue {:?} for {:?}: {}", command, peer, e);
            false
        }
    }
}

/// The entity store the replication layer reads from and writes into.
pub trait Simulation {
    /// Creates the entity, or moves it if it already exists.
    fn create_entity(&mut self, entity: EntityId, position: Position);

    fn destroy_entity(&mut self, entity: EntityId) -> bool;

    fn set_input(&mut self, entity: EntityId, mask: InputMask) -> bool;

    fn set_position(&mut self, entity: EntityId, position: Position) -> bool;

    fn assign_avatar(&mut self, entity: EntityId);

    fn input_of(&self, entity: EntityId) -> Option<InputMask>;

    fn position_of(&self, entity: EntityId) -> Option<Position>;

    /// Entities whose authoritative owner is this peer, in ascending id order.
    fn owned_entities(&self) -> Vec<EntityId>;
}

/// Produces one `UpdateInput` per owned entity whose mask changed since the
/// last call.
#[derive(Debug, Default)]
pub struct InputReplicator {
    last_sent: HashMap<EntityId, InputMask>,
}

impl InputReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect<S: Simulation + ?Sized>(&mut self, sim: &S) -> Vec<Command> {
        let owned = sim.owned_entities();
        self.last_sent.retain(|entity, _| owned.contains(entity));

        let mut commands = Vec::new();
        for entity in owned {
            let Some(mask) = sim.input_of(entity) else {
                continue;
            };

            let previous = self.last_sent.get(&entity).copied().unwrap_or_default();
            if previous != mask {
                self.last_sent.insert(entity, mask);
                commands.push(Command::UpdateInput { entity, mask });
            }
        }

        commands
    }

    /// Forces the next [`collect`](Self::collect) to resend this entity's mask.
    pub fn invalidate(&mut self, entity: EntityId) {
        self.last_sent.remove(&entity);
    }
}
