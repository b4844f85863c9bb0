//! # Replication Client Library
//!
//! Client side of the replication layer: a network thread that talks to a
//! single server, and a simulation that applies what the server says while
//! replicating the local player's input back.
//!
//! ## Architecture Overview
//!
//! The client mirrors the server's split. A dedicated network thread owns the
//! connected UDP socket and moves datagrams between it and two bounded
//! queues. The simulation thread never touches the socket; it drains the
//! incoming queue once per tick and pushes commands onto the outgoing one.
//!
//! ### Online and Offline Play
//! With a server address the client runs a [`network::ClientSession`] and a
//! world that allocates provisional ids from the top of the id space, so
//! anything it spawns can never collide with the server's ids. Without one it
//! runs the same simulation against an offline session: the world is
//! authoritative, nothing is sent and nothing arrives.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - `ClientConfig` and the `ClientLoop` run on the network thread
//! - `ClientSession`, the simulation thread's handle to the connection
//!
//! ### Game Module (`game`)
//! - Applies server commands to the local world
//! - Drives the avatar from the input source and spawns entities on fire
//! - Replicates changed input masks to the server
//!
//! ### Input Module (`input`)
//! - A seeded, headless input script standing in for a player
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientGame;
//! use client::input::InputManager;
//! use client::network::{ClientConfig, ClientSession};
//!
//! let session = ClientSession::connect(ClientConfig::new("127.0.0.1", 8080))?;
//! let mut game = ClientGame::new(session.is_online());
//! let mut input = InputManager::new(1);
//!
//! for _ in 0..600 {
//!     game.tick(&session, input.update(), 1.0 / 60.0);
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//!
//! session.shutdown();
//! # Ok::<(), shared::NetError>(())
//! ```

pub mod game;
pub mod input;
pub mod network;
