use log::{debug, error, info, trace, warn};
use shared::protocol::enqueue_command;
use shared::{
    Command, ErrorClass, LoopState, Message, MessageQueue, NetError, Peer, QueueError, Transport,
    DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY, MAX_DATAGRAM_SIZE, SERVER_ID,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Builder;

const FATAL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub poll_timeout: Duration,
    pub queue_capacity: usize,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Parses `host:port`; the port is taken after the last colon.
    pub fn parse(server: &str) -> Option<Self> {
        let (host, port) = server.rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }
}

/// State owned by the client's network thread. Same shape as the server loop,
/// but the only peer is the server.
pub struct ClientLoop {
    transport: Transport,
    incoming: Arc<MessageQueue>,
    outgoing: Arc<MessageQueue>,
    poll_timeout: Duration,
    buffer: Vec<u8>,
}

impl ClientLoop {
    pub fn new(
        transport: Transport,
        incoming: Arc<MessageQueue>,
        outgoing: Arc<MessageQueue>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            incoming,
            outgoing,
            poll_timeout,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE + 1],
        }
    }

    pub async fn run(mut self) {
        debug!("Client network loop running");

        while self.step().await != LoopState::Stopped {}

        // An empty datagram tells the server we are leaving.
        if let Err(e) = self.transport.send(&[]).await {
            debug!("Failed to send goodbye: {}", e);
        }
        info!("Client network loop stopped");
    }

    pub async fn step(&mut self) -> LoopState {
        let readable = self.poll_inbound().await;
        let writable = self.flush_outbound().await;

        if self.incoming.is_stopped() || self.outgoing.is_stopped() {
            return LoopState::Stopped;
        }

        LoopState::from_activity(readable, writable)
    }

    async fn poll_inbound(&mut self) -> bool {
        let received = self
            .transport
            .recv_from_timeout(&mut self.buffer, self.poll_timeout)
            .await;

        match received {
            Ok(None) => false,
            Ok(Some((0, _))) => {
                warn!("Server sent an empty datagram, treating as disconnect");
                true
            }
            Ok(Some((len, _))) if len > MAX_DATAGRAM_SIZE => {
                warn!("Dropping oversized datagram from server");
                true
            }
            Ok(Some((len, _))) => {
                let payload = self.buffer[..len].to_vec();
                match self.incoming.enqueue(Message::to_client(SERVER_ID, payload)) {
                    Ok(()) => trace!("Queued {} bytes from server", len),
                    Err(QueueError::Stopped) => debug!("Incoming queue stopped, dropping datagram"),
                    Err(e) => warn!("Dropping datagram from server: {}", e),
                }
                true
            }
            Err(e) => {
                report_io_error("receiving datagram", &e).await;
                false
            }
        }
    }

    async fn flush_outbound(&mut self) -> bool {
        let mut flushed = false;

        while let Some(message) = self.outgoing.try_dequeue() {
            flushed = true;

            let deliver = match message.peer {
                Peer::All => self.outgoing.has_recipient(SERVER_ID),
                Peer::Client(id) => id == SERVER_ID,
            };
            if !deliver {
                debug!("Dropping message for {:?}", message.peer);
                continue;
            }

            if let Err(e) = self.transport.send(&message.payload).await {
                report_io_error("sending datagram", &e).await;
            }
        }

        flushed
    }
}

async fn report_io_error(context: &str, error: &io::Error) {
    match Transport::classify(error) {
        // Refused just means nobody is listening yet.
        ErrorClass::Transient => debug!("Transient error {}: {}", context, error),
        ErrorClass::Fatal => {
            error!("Error {}: {}", context, error);
            tokio::time::sleep(FATAL_ERROR_BACKOFF).await;
        }
    }
}

/// A client's connection to the server, or a stand-in for offline play.
///
/// Offline sessions have no network thread: sends are accepted and dropped and
/// nothing ever arrives.
pub struct ClientSession {
    incoming: Arc<MessageQueue>,
    outgoing: Arc<MessageQueue>,
    server_addr: Option<SocketAddr>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ClientSession {
    /// Resolves the server and starts the network thread. Must be called from
    /// outside an async runtime.
    pub fn connect(config: ClientConfig) -> Result<Self, NetError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(NetError::Runtime)?;

        let transport = runtime.block_on(Transport::connect(&config.host, config.port))?;
        let server_addr = transport.peer_addr()?;
        info!(
            "Connected to {} from {}",
            server_addr,
            transport.local_addr()?
        );

        let incoming = Arc::new(MessageQueue::new(config.queue_capacity));
        let outgoing = Arc::new(MessageQueue::new(config.queue_capacity));
        // Register the server up front so sends work before it has said anything.
        outgoing.add_recipient(SERVER_ID);

        let client_loop = ClientLoop::new(
            transport,
            Arc::clone(&incoming),
            Arc::clone(&outgoing),
            config.poll_timeout,
        );

        let worker = thread::Builder::new()
            .name("client-network".into())
            .spawn(move || runtime.block_on(client_loop.run()))
            .map_err(NetError::Thread)?;

        Ok(Self {
            incoming,
            outgoing,
            server_addr: Some(server_addr),
            worker: Some(worker),
        })
    }

    pub fn offline() -> Self {
        let incoming = Arc::new(MessageQueue::new(1));
        let outgoing = Arc::new(MessageQueue::new(1));
        incoming.stop();
        outgoing.stop();

        Self {
            incoming,
            outgoing,
            server_addr: None,
            worker: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.worker.is_some()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    pub fn incoming(&self) -> &MessageQueue {
        &self.incoming
    }

    pub fn outgoing(&self) -> &MessageQueue {
        &self.outgoing
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        if !self.is_online() {
            return Ok(());
        }
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(QueueError::Oversized {
                len: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.outgoing
            .enqueue(Message::to_client(SERVER_ID, payload))
    }

    /// Encodes and queues a command for the server; `false` if it was dropped.
    pub fn send_command(&self, command: &Command) -> bool {
        if !self.is_online() {
            return true;
        }
        enqueue_command(&self.outgoing, Peer::Client(SERVER_ID), command)
    }

    pub fn poll_incoming(&self) -> Option<Message> {
        self.incoming.try_dequeue()
    }

    pub fn drain_incoming(&self) -> impl Iterator<Item = Message> + '_ {
        self.incoming.drain()
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.outgoing.stop();
        self.incoming.stop();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Client network thread panicked");
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::EntityId;
    use std::net::UdpSocket;
    use std::time::Instant;

    fn fake_server() -> (UdpSocket, ClientConfig) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, ClientConfig::new("127.0.0.1", port))
    }

    fn wait_for_message(session: &ClientSession) -> Option<Message> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(message) = session.poll_incoming() {
                return Some(message);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_parse_server_address() {
        let config = ClientConfig::parse("127.0.0.1:8080").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);

        let config = ClientConfig::parse("[::1]:9000").unwrap();
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 9000);

        assert!(ClientConfig::parse("localhost").is_none());
        assert!(ClientConfig::parse("localhost:http").is_none());
        assert!(ClientConfig::parse(":8080").is_none());
    }

    #[test]
    fn test_sends_reach_server_before_it_speaks() {
        let (server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();
        assert!(session.is_online());
        assert_eq!(session.outgoing().recipients().collect::<Vec<_>>(), vec![SERVER_ID]);

        session.send(b"ping".to_vec()).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ping");
    }

    #[test]
    fn test_inbound_is_tagged_as_server() {
        let (server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();

        session.send(b"hello".to_vec()).unwrap();
        let mut buf = [0u8; 64];
        let (_, client_addr) = server.recv_from(&mut buf).unwrap();

        server.send_to(b"welcome", client_addr).unwrap();

        let message = wait_for_message(&session).unwrap();
        assert_eq!(message, Message::to_client(SERVER_ID, b"welcome".to_vec()));
    }

    #[test]
    fn test_empty_datagram_from_server_is_not_fatal() {
        let (server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();

        session.send(b"hello".to_vec()).unwrap();
        let mut buf = [0u8; 64];
        let (_, client_addr) = server.recv_from(&mut buf).unwrap();

        server.send_to(&[], client_addr).unwrap();
        server.send_to(b"still here", client_addr).unwrap();

        let message = wait_for_message(&session).unwrap();
        assert_eq!(message.payload, b"still here".to_vec());
    }

    #[test]
    fn test_send_command_encodes() {
        let (server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();
        let command = Command::DestroyEntity {
            entity: EntityId(u32::MAX),
        };

        assert!(session.send_command(&command));

        let mut buf = [0u8; 64];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(Command::decode(&buf[..len]).unwrap(), command);
    }

    #[test]
    fn test_shutdown_sends_goodbye() {
        let (server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();
        session.shutdown();

        let mut buf = [0u8; 64];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_offline_session_is_a_stub() {
        let session = ClientSession::offline();
        assert!(!session.is_online());
        assert_eq!(session.server_addr(), None);

        assert!(session.send(b"dropped".to_vec()).is_ok());
        assert!(session.send_command(&Command::AssignAvatar { entity: EntityId(0) }));
        assert!(session.poll_incoming().is_none());
        assert_eq!(session.drain_incoming().count(), 0);
        session.shutdown();
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (_server, config) = fake_server();
        let session = ClientSession::connect(config).unwrap();
        assert!(matches!(
            session.send(vec![0; MAX_DATAGRAM_SIZE + 1]),
            Err(QueueError::Oversized { .. })
        ));
    }
}
