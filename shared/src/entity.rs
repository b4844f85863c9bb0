//! Entity identifiers partitioned by authority.
//!
//! Authoritative peers (the server, or a client playing offline) count up from
//! zero. Networked clients count down from `u32::MAX`. Neither allocator may
//! cross [`PROVISIONAL_SPLIT`], so ids minted independently on either side of a
//! connection never collide and no round trip is needed before spawning.

use crate::IdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First id of the provisional (client-allocated) half of the id space.
pub const PROVISIONAL_SPLIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// True for ids minted by a networked client that still await an
    /// authoritative replacement from the server.
    pub fn is_provisional(self) -> bool {
        self.0 >= PROVISIONAL_SPLIT
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_provisional() {
            write!(f, "#{}p", self.0)
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

/// Private monotonic counter over one half of the id space.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: Option<u32>,
    direction: Direction,
}

impl IdAllocator {
    /// Allocator for the peer whose entities are canonical.
    pub fn authoritative() -> Self {
        Self {
            next: Some(0),
            direction: Direction::Ascending,
        }
    }

    /// Allocator for a networked client's locally predicted entities.
    pub fn provisional() -> Self {
        Self {
            next: Some(u32::MAX),
            direction: Direction::Descending,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.direction == Direction::Ascending
    }

    pub fn next(&mut self) -> Result<EntityId, IdError> {
        let id = self.next.ok_or(IdError::Exhausted)?;

        self.next = match self.direction {
            Direction::Ascending => id.checked_add(1).filter(|n| *n < PROVISIONAL_SPLIT),
            Direction::Descending => id.checked_sub(1).filter(|n| *n >= PROVISIONAL_SPLIT),
        };

        Ok(EntityId(id))
    }
}
