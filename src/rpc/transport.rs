//! Server side transport: where a node receives requests and sends replies.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::net::{
    Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use super::socket::{read_frame, write_frame};
use crate::common::Frame;
use crate::{Error, Result};

const ROUTING_ID_SIZE: usize = 5;
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long an accepted connection may stay silent, or sit on a partial
/// frame, before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A duplex request/response channel a node serves requests from.
///
/// The node never opens or closes its transport, it is handed one by the
/// hosting system which keeps ownership of it.
pub trait Transport: Send + Sync + Debug {
    /// Waits up to `timeout` for the next inbound frame.
    ///
    /// Multiplexing transports prefix the frame with the routing address of
    /// the client it came from, and expect that address back as the first
    /// part of the reply passed to [Transport::send]. The address may be any
    /// bytes, `Chord` included.
    ///
    /// Returns [Error::TransportClosed] once no more frames can arrive.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>>;

    fn send(&self, frame: Frame) -> Result<()>;
}

/// A routing TCP endpoint.
///
/// Every accepted connection gets a 5 byte routing address which prefixes all
/// frames read from it; replies are routed back to the connection by that
/// address. Connections idle for longer than the idle timeout are dropped.
/// Closed when dropped.
#[derive(Debug)]
pub struct TcpTransport {
    local_addr: SocketAddr,
    inbox: Receiver<Frame>,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    idle_timeout: Duration,
    closed: AtomicBool,
    next_id: AtomicU32,
    connections: Mutex<HashMap<u32, TcpStream>>,
}

impl TcpTransport {
    pub fn bind<A: ToSocketAddrs>(address: A) -> Result<Self> {
        Self::bind_with_idle_timeout(address, DEFAULT_IDLE_TIMEOUT)
    }

    /// Same as [TcpTransport::bind], dropping connections that stay silent
    /// for `idle_timeout`.
    pub fn bind_with_idle_timeout<A: ToSocketAddrs>(
        address: A,
        idle_timeout: Duration,
    ) -> Result<Self> {
        if idle_timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "idle timeout must not be zero",
            )
            .into());
        }

        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;

        let (sender, inbox) = flume::unbounded();
        let shared = Arc::new(Shared {
            idle_timeout,
            closed: AtomicBool::new(false),
            next_id: AtomicU32::new(0),
            connections: Mutex::new(HashMap::new()),
        });

        let acceptor = {
            let shared = shared.clone();

            thread::Builder::new()
                .name(format!("chord-transport-{}", local_addr.port()))
                .spawn(move || accept_loop(listener, sender, shared))?
        };

        debug!(?local_addr, "Chord transport listening");

        Ok(Self {
            local_addr,
            inbox,
            shared,
            acceptor: Some(acceptor),
        })
    }

    // === Getters ===

    /// Returns the address the transport is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    // === Public Methods ===

    /// Stops accepting connections and disconnects every client.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wake up the blocking accept.
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
            });
        }
        let _ = TcpStream::connect_timeout(&wake, WRITE_TIMEOUT);

        for stream in lock(&self.shared.connections).values() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        debug!(local_addr = ?self.local_addr, "Chord transport closed");
    }
}

impl Transport for TcpTransport {
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::TransportClosed),
        }
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let (address, parts) = frame.split_first().ok_or(Error::EmptyFrame)?;

        let id = parse_routing_id(address).ok_or_else(|| Error::UnknownClient(address.to_vec()))?;

        let mut stream = lock(&self.shared.connections)
            .get(&id)
            .map(TcpStream::try_clone)
            .transpose()?
            .ok_or_else(|| Error::UnknownClient(address.to_vec()))?;

        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        write_frame(&mut stream, parts)?;

        trace!(context = "transport_sent", client = id, parts = parts.len());

        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn accept_loop(listener: TcpListener, sender: Sender<Frame>, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                debug!(?error, "Failed to accept connection");
                continue;
            }
        };

        if let Err(error) = stream.set_read_timeout(Some(shared.idle_timeout)) {
            debug!(?error, "Failed to set idle timeout on accepted connection");
            continue;
        }

        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(error) => {
                debug!(?error, "Failed to clone accepted connection");
                continue;
            }
        };

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&shared.connections).insert(id, writer);

        // Closed while this connection was being registered.
        if shared.closed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let spawned = {
            let sender = sender.clone();
            let shared = shared.clone();

            thread::Builder::new()
                .name(format!("chord-client-{id}"))
                .spawn(move || read_loop(id, stream, sender, shared))
        };

        if let Err(error) = spawned {
            debug!(?error, "Failed to spawn connection reader");
            lock(&shared.connections).remove(&id);
        }
    }
}

fn read_loop(id: u32, mut stream: TcpStream, sender: Sender<Frame>, shared: Arc<Shared>) {
    let address = routing_id(id);

    loop {
        match read_frame(&mut stream) {
            Ok(frame) => {
                trace!(context = "transport_received", client = id, parts = frame.len());

                let mut routed = Vec::with_capacity(frame.len() + 1);
                routed.push(address.clone());
                routed.extend(frame);

                if sender.send(routed).is_err() {
                    break;
                }
            }
            Err(error) => {
                if error.kind() != io::ErrorKind::UnexpectedEof {
                    trace!(context = "transport_error", client = id, ?error);
                }
                break;
            }
        }
    }

    lock(&shared.connections).remove(&id);
}

fn routing_id(id: u32) -> Bytes {
    let mut address = [0; ROUTING_ID_SIZE];
    address[1..].copy_from_slice(&id.to_be_bytes());

    Bytes::copy_from_slice(&address)
}

fn parse_routing_id(address: &[u8]) -> Option<u32> {
    match *address {
        [0, a, b, c, d] => Some(u32::from_be_bytes([a, b, c, d])),
        _ => None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::time::Instant;

    use super::*;
    use crate::rpc::socket::RequestSocket;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn routing_ids() {
        assert_eq!(routing_id(7).as_ref(), &[0, 0, 0, 0, 7]);
        assert_eq!(parse_routing_id(&routing_id(u32::MAX)), Some(u32::MAX));
        assert_eq!(parse_routing_id(b"Chord"), None);
        assert_eq!(parse_routing_id(&[0, 1]), None);
    }

    #[test]
    fn routes_replies_to_the_requesting_client() {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
        let port = transport.local_addr().port();

        let mut first = RequestSocket::connect("127.0.0.1", port, TIMEOUT).unwrap();
        let mut second = RequestSocket::connect("127.0.0.1", port, TIMEOUT).unwrap();

        first.send(&[Bytes::from_static(b"first")]).unwrap();
        let first_frame = transport.recv(TIMEOUT).unwrap().unwrap();

        second.send(&[Bytes::from_static(b"second")]).unwrap();
        let second_frame = transport.recv(TIMEOUT).unwrap().unwrap();

        assert_eq!(first_frame.len(), 2);
        assert_eq!(first_frame[1].as_ref(), b"first");
        assert_ne!(first_frame[0], second_frame[0]);

        transport
            .send(vec![second_frame[0].clone(), Bytes::from_static(b"to second")])
            .unwrap();
        transport
            .send(vec![first_frame[0].clone(), Bytes::from_static(b"to first")])
            .unwrap();

        assert_eq!(first.recv().unwrap(), vec![Bytes::from_static(b"to first")]);
        assert_eq!(second.recv().unwrap(), vec![Bytes::from_static(b"to second")]);
    }

    #[test]
    fn recv_times_out_without_traffic() {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();

        assert!(transport
            .recv(Duration::from_millis(20))
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_client() {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();

        assert!(matches!(
            transport.send(vec![routing_id(42), Bytes::new()]),
            Err(Error::UnknownClient(_))
        ));
        assert!(matches!(
            transport.send(vec![Bytes::from_static(b"Chord")]),
            Err(Error::UnknownClient(_))
        ));
        assert!(matches!(transport.send(vec![]), Err(Error::EmptyFrame)));
    }

    #[test]
    fn idle_connections_are_dropped() {
        let transport =
            TcpTransport::bind_with_idle_timeout("127.0.0.1:0", Duration::from_millis(200))
                .unwrap();
        let port = transport.local_addr().port();

        let mut clients = Vec::new();
        for _ in 0..20 {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            // Half of a part count.
            stream.write_all(&[0, 0]).unwrap();
            clients.push(stream);
        }

        let start = Instant::now();
        while lock(&transport.shared.connections).len() < 20 {
            assert!(start.elapsed() < TIMEOUT, "connections should be accepted");
            thread::sleep(Duration::from_millis(10));
        }

        let start = Instant::now();
        while !lock(&transport.shared.connections).is_empty() {
            assert!(start.elapsed() < TIMEOUT * 2, "idle connections should be dropped");
            thread::sleep(Duration::from_millis(20));
        }

        // Still serving new clients.
        let mut client = RequestSocket::connect("127.0.0.1", port, TIMEOUT).unwrap();
        client.send(&[Bytes::from_static(b"Ping")]).unwrap();
        let frame = transport.recv(TIMEOUT).unwrap().unwrap();
        assert_eq!(frame[1].as_ref(), b"Ping");
    }

    #[test]
    fn close_disconnects() {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
        let port = transport.local_addr().port();

        let _client = RequestSocket::connect("127.0.0.1", port, TIMEOUT).unwrap();

        transport.close();
        transport.close();

        let start = Instant::now();
        loop {
            match transport.recv(Duration::from_millis(20)) {
                Err(Error::TransportClosed) => break,
                _ => assert!(start.elapsed() < TIMEOUT, "transport should close"),
            }
        }
    }
}
