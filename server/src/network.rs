//! Server network thread: moves datagrams between the UDP socket and the two message queues

use crate::client_manager::ClientRegistry;
use log::{debug, error, info, trace, warn};
use shared::{
    ClientId, ErrorClass, LoopState, Message, MessageQueue, NetError, Peer, QueueError, Transport,
    DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY, MAX_DATAGRAM_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Builder;

const EVICTION_INTERVAL: Duration = Duration::from_secs(1);
const FATAL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Startup parameters for [`NetworkServer`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    /// Longest the loop waits for inbound data before flushing outbound traffic
    pub poll_timeout: Duration,
    pub queue_capacity: usize,
    /// Clients silent for this long are evicted; `None` keeps them forever
    pub client_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_clients: 32,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            client_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// State owned by the server's network thread
pub struct ServerLoop {
    transport: Transport,
    registry: ClientRegistry,
    incoming: Arc<MessageQueue>,
    outgoing: Arc<MessageQueue>,
    config: ServerConfig,
    // One byte larger than the datagram limit so oversized datagrams are detectable
    buffer: Vec<u8>,
    last_eviction: Instant,
}

impl ServerLoop {
    pub fn new(
        transport: Transport,
        incoming: Arc<MessageQueue>,
        outgoing: Arc<MessageQueue>,
        config: ServerConfig,
    ) -> Self {
        Self {
            transport,
            registry: ClientRegistry::new(config.max_clients),
            incoming,
            outgoing,
            config,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE + 1],
            last_eviction: Instant::now(),
        }
    }

    /// Runs until either queue is stopped
    pub async fn run(mut self) {
        debug!("Server network loop running");

        loop {
            let state = self.step().await;
            trace!("Server loop state: {:?}", state);
            if state == LoopState::Stopped {
                break;
            }
        }

        info!(
            "Server network loop stopped ({} clients registered)",
            self.registry.len()
        );
    }

    /// One poll / read / flush iteration
    pub async fn step(&mut self) -> LoopState {
        let readable = self.poll_inbound().await;
        let writable = self.flush_outbound().await;
        self.evict_idle_clients();

        if self.incoming.is_stopped() || self.outgoing.is_stopped() {
            return LoopState::Stopped;
        }

        LoopState::from_activity(readable, writable)
    }

    async fn poll_inbound(&mut self) -> bool {
        let received = self
            .transport
            .recv_from_timeout(&mut self.buffer, self.config.poll_timeout)
            .await;

        match received {
            Ok(None) => false,
            Ok(Some((0, addr))) => {
                self.handle_disconnect(addr);
                true
            }
            Ok(Some((len, addr))) if len > MAX_DATAGRAM_SIZE => {
                warn!("Dropping oversized datagram from {}", addr);
                true
            }
            Ok(Some((len, addr))) => {
                self.handle_datagram(len, addr);
                true
            }
            Err(e) => {
                Self::report_io_error("receiving datagram", &e).await;
                false
            }
        }
    }

    /// An empty datagram is the peer's way of saying it is going away
    fn handle_disconnect(&mut self, addr: SocketAddr) {
        match self.registry.find_client_by_addr(addr) {
            Some(client_id) => {
                debug!("Empty datagram from client {}, treating as disconnect", client_id);
                self.registry.remove(client_id, &self.outgoing);
            }
            None => debug!("Empty datagram from unregistered {}", addr),
        }
    }

    fn handle_datagram(&mut self, len: usize, addr: SocketAddr) {
        let client_id = match self.registry.resolve(addr, &self.outgoing) {
            Ok(client_id) => client_id,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        let payload = self.buffer[..len].to_vec();
        match self.incoming.enqueue(Message::to_client(client_id, payload)) {
            Ok(()) => trace!("Queued {} bytes from client {}", len, client_id),
            Err(QueueError::Stopped) => debug!("Incoming queue stopped, dropping datagram"),
            Err(e) => warn!("Dropping datagram from client {}: {}", client_id, e),
        }
    }

    /// Sends everything queued by the simulation; returns whether anything was queued
    async fn flush_outbound(&mut self) -> bool {
        let mut flushed = false;

        while let Some(message) = self.outgoing.try_dequeue() {
            flushed = true;

            match message.peer {
                Peer::All => {
                    for client_id in self.outgoing.recipients() {
                        self.send_to_client(client_id, &message.payload).await;
                    }
                }
                Peer::Client(client_id) => {
                    self.send_to_client(client_id, &message.payload).await;
                }
            }
        }

        flushed
    }

    async fn send_to_client(&self, client_id: ClientId, payload: &[u8]) {
        let Some(addr) = self.registry.addr_of(client_id) else {
            debug!("Dropping message for unknown client {}", client_id);
            return;
        };

        if let Err(e) = self.transport.send_to(payload, addr).await {
            Self::report_io_error("sending datagram", &e).await;
        }
    }

    fn evict_idle_clients(&mut self) {
        let Some(timeout) = self.config.client_timeout else {
            return;
        };
        if self.last_eviction.elapsed() < EVICTION_INTERVAL {
            return;
        }

        self.last_eviction = Instant::now();
        self.registry.evict_idle(timeout, &self.outgoing);
    }

    async fn report_io_error(context: &str, error: &io::Error) {
        match Transport::classify(error) {
            ErrorClass::Transient => debug!("Transient error {}: {}", context, error),
            ErrorClass::Fatal => {
                error!("Error {}: {}", context, error);
                tokio::time::sleep(FATAL_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Handle to a running server network thread
///
/// The simulation thread talks to the network thread only through the two
/// queues exposed here. Dropping the handle stops the queues and joins the
/// thread; the socket is released as the thread exits.
pub struct NetworkServer {
    incoming: Arc<MessageQueue>,
    outgoing: Arc<MessageQueue>,
    local_addr: SocketAddr,
    worker: Option<thread::JoinHandle<()>>,
}

impl NetworkServer {
    /// Binds the socket and starts the network thread
    ///
    /// Bind failures are returned before any thread is spawned. Must be called
    /// from outside an async runtime.
    pub fn start(config: ServerConfig) -> Result<Self, NetError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(NetError::Runtime)?;

        let transport = runtime.block_on(Transport::bind(config.bind_addr))?;
        let local_addr = transport.local_addr()?;
        info!(
            "Server listening on {} (max {} clients)",
            local_addr, config.max_clients
        );

        let incoming = Arc::new(MessageQueue::new(config.queue_capacity));
        let outgoing = Arc::new(MessageQueue::new(config.queue_capacity));

        let server_loop = ServerLoop::new(
            transport,
            Arc::clone(&incoming),
            Arc::clone(&outgoing),
            config,
        );

        let worker = thread::Builder::new()
            .name("server-network".into())
            .spawn(move || runtime.block_on(server_loop.run()))
            .map_err(NetError::Thread)?;

        Ok(Self {
            incoming,
            outgoing,
            local_addr,
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn incoming(&self) -> &MessageQueue {
        &self.incoming
    }

    pub fn outgoing(&self) -> &MessageQueue {
        &self.outgoing
    }

    /// Queues a payload for every client registered when it is flushed
    pub fn broadcast(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        check_size(&payload)?;
        self.outgoing.enqueue(Message::broadcast(payload))
    }

    pub fn send_to(&self, client_id: ClientId, payload: Vec<u8>) -> Result<(), QueueError> {
        check_size(&payload)?;
        self.outgoing.enqueue(Message::to_client(client_id, payload))
    }

    pub fn poll_incoming(&self) -> Option<Message> {
        self.incoming.try_dequeue()
    }

    pub fn drain_incoming(&self) -> impl Iterator<Item = Message> + '_ {
        self.incoming.drain()
    }

    /// Ids of the clients currently receiving broadcasts
    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.outgoing.recipients().collect()
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.outgoing.stop();
        self.incoming.stop();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Server network thread panicked");
            }
        }
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn check_size(payload: &[u8]) -> Result<(), QueueError> {
    if payload.len() > MAX_DATAGRAM_SIZE {
        return Err(QueueError::Oversized {
            len: payload.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    fn client_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(value) = poll() {
                return Some(value);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_clients, 32);
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert!(config.poll_timeout < Duration::from_millis(10));
        assert_eq!(config.client_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_bind_conflict_fails_at_startup() {
        let first = NetworkServer::start(test_config()).unwrap();

        let config = ServerConfig {
            bind_addr: first.local_addr(),
            ..test_config()
        };
        assert!(matches!(
            NetworkServer::start(config),
            Err(NetError::Bind { .. })
        ));
    }

    #[test]
    fn test_inbound_datagrams_are_tagged_with_client_ids() {
        let server = NetworkServer::start(test_config()).unwrap();
        let alice = client_socket();
        let bob = client_socket();

        alice.send_to(b"one", server.local_addr()).unwrap();
        let first = wait_for(|| server.poll_incoming()).unwrap();
        bob.send_to(b"two", server.local_addr()).unwrap();
        let second = wait_for(|| server.poll_incoming()).unwrap();
        alice.send_to(b"three", server.local_addr()).unwrap();
        let third = wait_for(|| server.poll_incoming()).unwrap();

        assert_eq!(first, Message::to_client(0, b"one".to_vec()));
        assert_eq!(second, Message::to_client(1, b"two".to_vec()));
        assert_eq!(third, Message::to_client(0, b"three".to_vec()));
        assert_eq!(server.connected_clients(), vec![0, 1]);
    }

    #[test]
    fn test_broadcast_and_targeted_send() {
        let server = NetworkServer::start(test_config()).unwrap();
        let alice = client_socket();
        let bob = client_socket();

        alice.send_to(b"hi", server.local_addr()).unwrap();
        wait_for(|| server.poll_incoming()).unwrap();
        bob.send_to(b"hi", server.local_addr()).unwrap();
        wait_for(|| server.poll_incoming()).unwrap();

        server.broadcast(b"everyone".to_vec()).unwrap();
        server.send_to(1, b"bob only".to_vec()).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = alice.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"everyone");

        let (len, _) = bob.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"everyone");
        let (len, _) = bob.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"bob only");

        alice
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(alice.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_send_rejected() {
        let server = NetworkServer::start(test_config()).unwrap();
        let result = server.broadcast(vec![1; MAX_DATAGRAM_SIZE + 1]);
        assert_eq!(
            result,
            Err(QueueError::Oversized {
                len: MAX_DATAGRAM_SIZE + 1,
                max: MAX_DATAGRAM_SIZE
            })
        );
    }

    #[test]
    fn test_full_registry_drops_new_clients() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let server = NetworkServer::start(config).unwrap();
        let alice = client_socket();
        let bob = client_socket();

        alice.send_to(b"a", server.local_addr()).unwrap();
        wait_for(|| server.poll_incoming()).unwrap();

        bob.send_to(b"b", server.local_addr()).unwrap();
        alice.send_to(b"c", server.local_addr()).unwrap();

        let next = wait_for(|| server.poll_incoming()).unwrap();
        assert_eq!(next, Message::to_client(0, b"c".to_vec()));
        assert_eq!(server.connected_clients(), vec![0]);
    }

    #[test]
    fn test_idle_clients_are_evicted() {
        let config = ServerConfig {
            client_timeout: Some(Duration::from_millis(100)),
            ..test_config()
        };
        let server = NetworkServer::start(config).unwrap();
        let alice = client_socket();

        alice.send_to(b"a", server.local_addr()).unwrap();
        wait_for(|| server.poll_incoming()).unwrap();
        assert_eq!(server.connected_clients(), vec![0]);

        let evicted = wait_for(|| server.connected_clients().is_empty().then_some(()));
        assert!(evicted.is_some());

        alice.send_to(b"back", server.local_addr()).unwrap();
        let message = wait_for(|| server.poll_incoming()).unwrap();
        assert_eq!(message.peer, Peer::Client(1));
    }

    #[test]
    fn test_shutdown_joins_network_thread() {
        let server = NetworkServer::start(test_config()).unwrap();
        let addr = server.local_addr();
        server.shutdown();

        // The socket was released when the thread exited.
        let rebound = UdpSocket::bind(addr);
        assert!(rebound.is_ok());
    }
}
