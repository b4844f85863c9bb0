//! Building blocks shared by the replication server and client.
//!
//! - [`queue`]: the bounded hand-off queue between the network thread and the
//!   simulation thread
//! - [`transport`]: the UDP socket wrapper both network loops sit on
//! - [`protocol`]: the command wire format and its dispatch into a [`Simulation`]
//! - [`entity`]: entity ids and the partitioned allocators
//! - [`world`]: a small reference simulation used by the binaries and tests

pub mod entity;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod signal;
pub mod transport;
pub mod world;

use std::time::Duration;

pub use entity::{EntityId, IdAllocator};
pub use error::{CommandError, IdError, NetError, QueueError};
pub use protocol::{Command, InputMask, InputReplicator, Position, Simulation};
pub use queue::{Message, MessageQueue, Peer};
pub use transport::{ErrorClass, LoopState, Transport};
pub use world::World;

/// Identifier the server hands out per remote address.
pub type ClientId = u32;

/// Id under which a client registers its single recipient, the server.
pub const SERVER_ID: ClientId = 0;

/// Largest payload carried in one datagram.
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// How long a network loop waits for inbound data before flushing outbound traffic.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(2);

/// Pending messages each queue holds before refusing new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub const ENTITY_SPEED: f32 = 300.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
