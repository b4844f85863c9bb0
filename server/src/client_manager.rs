//! Address-to-client-id registry for the server's network thread
//!
//! Every datagram the server receives is attributed to a client id through
//! this registry. An address seen for the first time is registered on the spot
//! and added to the outgoing queue's recipients, so broadcasts reach it from
//! the next flush onwards. The registry is owned by the network thread alone;
//! the simulation thread only ever sees the ids it hands out.

use log::info;
use shared::{ClientId, MessageQueue};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client registry is full ({capacity} clients)")]
    Full { capacity: usize },
}

/// One registered peer
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// Id assigned on first contact
    pub id: ClientId,
    /// Address datagrams are sent back to
    pub addr: SocketAddr,
    /// Textual form of `addr`, used in logs
    pub key: String,
    /// Last time a datagram arrived from this address
    pub last_seen: Instant,
}

impl ClientEntry {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            key: addr.to_string(),
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing has been heard from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Capacity-bounded table of known peers
///
/// Ids are handed out densely from zero in order of first contact and are
/// never reused, so an evicted address that comes back gets a fresh id.
/// Lookups scan linearly; the table holds at most `max_clients` entries and is
/// consulted once per inbound datagram.
pub struct ClientRegistry {
    entries: Vec<ClientEntry>,
    next_client_id: ClientId,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_clients),
            next_client_id: 0,
            max_clients,
        }
    }

    /// Returns the id for `addr`, registering it as a new client if needed
    ///
    /// A new client is also registered as a recipient on `outgoing`. Fails
    /// without touching any state when the registry is at capacity.
    pub fn resolve(
        &mut self,
        addr: SocketAddr,
        outgoing: &MessageQueue,
    ) -> Result<ClientId, RegistryError> {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.addr == addr) {
            entry.last_seen = Instant::now();
            return Ok(entry.id);
        }

        if self.entries.len() >= self.max_clients {
            return Err(RegistryError::Full {
                capacity: self.max_clients,
            });
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let entry = ClientEntry::new(client_id, addr);
        info!("Client {} connected from {}", client_id, entry.key);
        self.entries.push(entry);
        outgoing.add_recipient(client_id);

        Ok(client_id)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.entries
            .iter()
            .find(|entry| entry.addr == addr)
            .map(|entry| entry.id)
    }

    pub fn addr_of(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.entries
            .iter()
            .find(|entry| entry.id == client_id)
            .map(|entry| entry.addr)
    }

    /// Removes a client and stops fanning messages out to it
    pub fn remove(&mut self, client_id: ClientId, outgoing: &MessageQueue) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != client_id);
        outgoing.remove_recipient(client_id);

        let removed = self.entries.len() != before;
        if removed {
            info!("Client {} disconnected", client_id);
        }
        removed
    }

    /// Evicts every client silent for longer than `timeout` and returns their ids
    pub fn evict_idle(&mut self, timeout: Duration, outgoing: &MessageQueue) -> Vec<ClientId> {
        let timed_out: Vec<ClientId> = self
            .entries
            .iter()
            .filter(|entry| entry.is_timed_out(timeout))
            .map(|entry| entry.id)
            .collect();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.remove(*client_id, outgoing);
        }

        timed_out
    }

    pub fn entries(&self) -> &[ClientEntry] {
        &self.entries
    }

    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
