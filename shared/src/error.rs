use crate::EntityId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures opening or associating a socket.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server {server} unreachable: {source}")]
    Unreachable {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to start network runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to spawn network thread: {0}")]
    Thread(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reasons a message was not accepted by a [`MessageQueue`](crate::MessageQueue).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue has been stopped")]
    Stopped,

    #[error("queue is full ({capacity} pending messages)")]
    Full { capacity: usize },

    #[error("refusing to enqueue an empty payload")]
    EmptyPayload,

    #[error("payload of {len} bytes exceeds the {max} byte datagram limit")]
    Oversized { len: usize, max: usize },
}

/// Failures decoding or applying a single command buffer.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command buffer")]
    Empty,

    #[error("unknown command kind {0}")]
    UnknownKind(u8),

    #[error("kind {0} belongs to a known command and cannot be sent as unknown")]
    ReservedKind(u8),

    #[error("malformed command body: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("encoded command is {len} bytes, limit is {max}")]
    Oversized { len: usize, max: usize },

    #[error("no entity {0}")]
    UnknownEntity(EntityId),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IdError {
    #[error("entity id range exhausted")]
    Exhausted,
}
