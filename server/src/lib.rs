//! # Replication Server Library
//!
//! This library provides the authoritative side of the replication layer. It
//! accepts datagrams from any number of clients, attributes each one to a
//! client id, and fans outbound commands out to every registered client.
//!
//! ## Architecture Design
//!
//! ### Two Threads, Two Queues
//! The simulation runs on the caller's thread. A single dedicated network
//! thread owns the UDP socket and the client registry. The only state the two
//! threads share is a pair of bounded message queues: the network thread fills
//! the incoming queue and drains the outgoing one, the simulation does the
//! reverse once per tick and never blocks on network I/O.
//!
//! ### Polling Loop
//! The network thread alternates between waiting briefly for an inbound
//! datagram and flushing the outgoing queue. The wait is a couple of
//! milliseconds, which bounds both the latency of outbound traffic and the time
//! it takes the thread to notice a shutdown.
//!
//! ### Lazy Client Registration
//! There is no handshake. The first datagram from an unknown address registers
//! it under the next client id and makes it a broadcast recipient. Clients that
//! go quiet, or send an empty datagram, are evicted.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Address-to-id registry with a hard capacity and idle eviction.
//!
//! ### Network Module (`network`)
//! The network loop and the [`network::NetworkServer`] handle that starts,
//! feeds and stops it.
//!
//! ### Game Module (`game`)
//! A tick driver that applies inbound commands to a [`shared::World`], spawns
//! an avatar per client, promotes client-created provisional entities and
//! replicates authoritative changes back out.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::ServerGame;
//! use server::network::{NetworkServer, ServerConfig};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = NetworkServer::start(ServerConfig {
//!         bind_addr: "0.0.0.0:8080".parse()?,
//!         max_clients: 16,
//!         ..ServerConfig::default()
//!     })?;
//!
//!     let mut game = ServerGame::new();
//!     loop {
//!         game.tick(server.incoming(), server.outgoing(), 1.0 / 30.0);
//!         std::thread::sleep(Duration::from_millis(33));
//!     }
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod network;
