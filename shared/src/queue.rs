//! Bounded hand-off queue between the network thread and the simulation thread.
//!
//! Each peer owns two of these: an incoming queue filled by the network loop and
//! drained by the simulation tick, and an outgoing queue filled by the
//! simulation and drained by the network loop. The outgoing queue also carries
//! the set of recipients that broadcast messages fan out to.

use crate::{ClientId, QueueError};
use log::trace;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which peer a message came from or is going to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// Every recipient registered at the moment the message is sent.
    All,
    Client(ClientId),
}

/// One datagram payload plus its peer tag. The payload is moved through the
/// queue, so exactly one side owns it at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub peer: Peer,
}

impl Message {
    pub fn new(payload: Vec<u8>, peer: Peer) -> Self {
        Self { payload, peer }
    }

    pub fn broadcast(payload: Vec<u8>) -> Self {
        Self::new(payload, Peer::All)
    }

    pub fn to_client(client_id: ClientId, payload: Vec<u8>) -> Self {
        Self::new(payload, Peer::Client(client_id))
    }
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Message>,
    recipients: Vec<ClientId>,
    stopped: bool,
}

/// Thread-safe FIFO of owned payloads with cooperative shutdown.
///
/// Blocking reads wake up when a message arrives or when [`stop`](Self::stop)
/// is called, so a stopped queue never strands a reader. `None` is the
/// "nothing available" sentinel for every dequeue variant.
#[derive(Debug)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity.min(1024)),
                recipients: Vec::new(),
                stopped: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    // A panicking holder cannot leave the state half-written, so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, message: Message) -> Result<(), QueueError> {
        if message.payload.is_empty() {
            return Err(QueueError::EmptyPayload);
        }

        let mut state = self.state();
        if state.stopped {
            return Err(QueueError::Stopped);
        }
        if state.pending.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        state.pending.push_back(message);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a message is available or the queue is stopped and drained.
    pub fn dequeue(&self) -> Option<Message> {
        let state = self.state();
        let mut state = self
            .available
            .wait_while(state, |s| s.pending.is_empty() && !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.pending.pop_front()
    }

    /// Like [`dequeue`](Self::dequeue) but gives up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Message> {
        let state = self.state();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.pending.is_empty() && !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.pending.pop_front()
    }

    /// Returns immediately with the next message, if any.
    pub fn try_dequeue(&self) -> Option<Message> {
        self.state().pending.pop_front()
    }

    /// Yields pending messages until the queue is momentarily empty.
    pub fn drain(&self) -> impl Iterator<Item = Message> + '_ {
        std::iter::from_fn(move || self.try_dequeue())
    }

    pub fn add_recipient(&self, client_id: ClientId) {
        let mut state = self.state();
        if !state.recipients.contains(&client_id) {
            trace!("Recipient {} registered", client_id);
            state.recipients.push(client_id);
        }
    }

    pub fn remove_recipient(&self, client_id: ClientId) -> bool {
        let mut state = self.state();
        let before = state.recipients.len();
        state.recipients.retain(|id| *id != client_id);
        state.recipients.len() != before
    }

    /// Snapshot of the registered recipients. Recipients added while the
    /// iterator is alive are not observed by it.
    pub fn recipients(&self) -> impl Iterator<Item = ClientId> {
        self.state().recipients.clone().into_iter()
    }

    pub fn has_recipient(&self, client_id: ClientId) -> bool {
        self.state().recipients.contains(&client_id)
    }

    /// Marks the queue terminal and wakes every blocked reader.
    pub fn stop(&self) {
        self.state().stopped = true;
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(crate::DEFAULT_QUEUE_CAPACITY)
    }
}
