//! UDP socket wrapper used by both network loops.

use crate::NetError;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

/// How a failed socket operation should be treated by a network loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Skip the packet and keep going.
    Transient,
    /// The socket itself is in trouble; log loudly and back off.
    Fatal,
}

/// What one network loop iteration found to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Readable,
    Writable,
    Both,
    Stopped,
}

impl LoopState {
    pub fn from_activity(readable: bool, writable: bool) -> Self {
        match (readable, writable) {
            (false, false) => LoopState::Idle,
            (true, false) => LoopState::Readable,
            (false, true) => LoopState::Writable,
            (true, true) => LoopState::Both,
        }
    }
}

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Opens an endpoint that receives from any peer.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetError::Bind { addr, source })?;
        Ok(Self { socket })
    }

    /// Resolves `host` and associates an ephemeral local endpoint with it.
    pub async fn connect(host: &str, port: u16) -> Result<Self, NetError> {
        let server = format!("{}:{}", host, port);
        let unreachable = |source| NetError::Unreachable {
            server: server.clone(),
            source,
        };

        let remote = lookup_host((host, port))
            .await
            .map_err(unreachable)?
            .next()
            .ok_or_else(|| {
                unreachable(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;

        let local: SocketAddr = if remote.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(unreachable)?;
        socket.connect(remote).await.map_err(unreachable)?;

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(bytes, dest).await
    }

    /// Sends to the connected peer.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send(bytes).await
    }

    /// Waits up to `wait` for one datagram. `Ok(None)` means nothing arrived.
    pub async fn recv_from_timeout(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match timeout(wait, self.socket.recv_from(buf)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    pub fn classify(error: &io::Error) -> ErrorClass {
        match error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_and_exchange() {
        block_on(async {
            let server = Transport::bind(loopback()).await.unwrap();
            let server_addr = server.local_addr().unwrap();

            let client = Transport::connect("127.0.0.1", server_addr.port())
                .await
                .unwrap();
            assert_eq!(client.peer_addr().unwrap(), server_addr);

            client.send(b"hello").await.unwrap();

            let mut buf = [0u8; 64];
            let (len, from) = server
                .recv_from_timeout(&mut buf, Duration::from_millis(500))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..len], b"hello");
            assert_eq!(from, client.local_addr().unwrap());

            server.send_to(b"back", from).await.unwrap();
            let (len, from) = client
                .recv_from_timeout(&mut buf, Duration::from_millis(500))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..len], b"back");
            assert_eq!(from, server_addr);
        });
    }

    #[test]
    fn test_recv_times_out_without_data() {
        block_on(async {
            let server = Transport::bind(loopback()).await.unwrap();
            let mut buf = [0u8; 16];
            let result = server
                .recv_from_timeout(&mut buf, Duration::from_millis(5))
                .await
                .unwrap();
            assert!(result.is_none());
        });
    }

    #[test]
    fn test_bind_in_use_is_reported() {
        block_on(async {
            let first = Transport::bind(loopback()).await.unwrap();
            let taken = first.local_addr().unwrap();

            match Transport::bind(taken).await {
                Err(NetError::Bind { addr, .. }) => assert_eq!(addr, taken),
                Err(other) => panic!("unexpected error: {}", other),
                Ok(_) => panic!("second bind to {} should fail", taken),
            }
        });
    }

    #[test]
    fn test_unresolvable_host_is_unreachable() {
        block_on(async {
            match Transport::connect("host.invalid", 9).await {
                Err(NetError::Unreachable { server, .. }) => assert_eq!(server, "host.invalid:9"),
                Err(other) => panic!("unexpected error: {}", other),
                Ok(_) => panic!("connect to an invalid host should fail"),
            }
        });
    }

    #[test]
    fn test_loop_state_from_activity() {
        assert_eq!(LoopState::from_activity(false, false), LoopState::Idle);
        assert_eq!(LoopState::from_activity(true, false), LoopState::Readable);
        assert_eq!(LoopState::from_activity(false, true), LoopState::Writable);
        assert_eq!(LoopState::from_activity(true, true), LoopState::Both);
    }

    #[test]
    fn test_error_classification() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);

        assert_eq!(Transport::classify(&reset), ErrorClass::Transient);
        assert_eq!(Transport::classify(&refused), ErrorClass::Transient);
        assert_eq!(Transport::classify(&denied), ErrorClass::Fatal);
    }
}
