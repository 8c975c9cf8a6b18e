//! Set of listeners the monitor is broadcasting to
//!
//! One mutex guards membership and every write to a member, so a chunk is
//! fanned out and failed members pruned as a single step.

use parking_lot::Mutex;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};

/// An accepted listener socket
pub struct ClientConnection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { id: 0, peer, stream }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(payload)
    }

    /// Consumes the connection so it cannot be closed twice
    fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Result of one broadcast
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Members the payload was written to
    pub delivered: usize,
    /// Members removed because their write failed
    pub evicted: Vec<SocketAddr>,
    /// Members left after pruning
    pub remaining: usize,
}

/// Thread-safe listener set
#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Members>,
}

#[derive(Default)]
struct Members {
    clients: Vec<ClientConnection>,
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an accepted connection, returning its registry id
    pub fn add(&self, mut connection: ClientConnection) -> u64 {
        let mut members = self.inner.lock();
        members.next_id += 1;
        connection.id = members.next_id;
        members.clients.push(connection);
        members.next_id
    }

    /// Write `payload` to every member, closing and removing those that fail
    pub fn broadcast(&self, payload: &[u8]) -> BroadcastOutcome {
        let mut members = self.inner.lock();
        let mut outcome = BroadcastOutcome::default();

        let mut kept = Vec::with_capacity(members.clients.len());
        for mut client in members.clients.drain(..) {
            match client.send(payload) {
                Ok(()) => {
                    outcome.delivered += 1;
                    kept.push(client);
                }
                Err(e) => {
                    tracing::warn!("Client {} disconnected: {}", client.peer, e);
                    outcome.evicted.push(client.peer);
                    client.close();
                }
            }
        }
        members.clients = kept;
        outcome.remaining = members.clients.len();
        outcome
    }

    /// Close and remove one member
    pub fn remove(&self, id: u64) -> bool {
        let mut members = self.inner.lock();
        match members.clients.iter().position(|c| c.id == id) {
            Some(index) => {
                members.clients.remove(index).close();
                true
            }
            None => false,
        }
    }

    /// Close and remove every member, returning how many there were
    pub fn clear(&self) -> usize {
        let mut members = self.inner.lock();
        let count = members.clients.len();
        for client in members.clients.drain(..) {
            client.close();
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.lock().clients.iter().map(|c| c.peer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Duration;

    /// Returns (server side, client side) of a loopback connection
    fn socket_pair(listener: &TcpListener) -> (ClientConnection, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (ClientConnection::new(server, peer), client)
    }

    fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_broadcast_to_empty_registry() {
        let registry = ClientRegistry::new();
        let outcome = registry.broadcast(b"abc");
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.evicted.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_write_evicts_only_that_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();

        let (good, mut good_client) = socket_pair(&listener);
        let (bad, _bad_client) = socket_pair(&listener);
        let bad_peer = bad.peer();
        // Writing to a socket whose send side is shut down fails immediately
        bad.stream.shutdown(Shutdown::Write).unwrap();

        registry.add(good);
        registry.add(bad);
        assert_eq!(registry.len(), 2);

        let outcome = registry.broadcast(b"chunk");
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.evicted, vec![bad_peer]);
        assert_eq!(outcome.remaining, 1);
        assert_eq!(registry.len(), 1);

        assert_eq!(read_exact(&mut good_client, 5), b"chunk");

        // The survivor keeps receiving
        let outcome = registry.broadcast(b"next");
        assert_eq!(outcome.delivered, 1);
        assert_eq!(read_exact(&mut good_client, 4), b"next");
    }

    #[test]
    fn test_client_added_after_broadcast_misses_it() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();

        let (first, mut first_client) = socket_pair(&listener);
        registry.add(first);
        registry.broadcast(b"one");

        let (second, mut second_client) = socket_pair(&listener);
        registry.add(second);
        registry.broadcast(b"two");

        assert_eq!(read_exact(&mut first_client, 6), b"onetwo");
        assert_eq!(read_exact(&mut second_client, 3), b"two");
    }

    #[test]
    fn test_clear_closes_everyone() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();

        let (a, mut a_client) = socket_pair(&listener);
        let (b, _b_client) = socket_pair(&listener);
        registry.add(a);
        registry.add(b);

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());

        // Closed from the server side: the listener sees end-of-stream
        let mut buf = [0u8; 1];
        assert_eq!(a_client.read(&mut buf).unwrap(), 0);

        assert_eq!(registry.clear(), 0);
    }

    #[test]
    fn test_remove_by_id() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();

        let (a, _a_client) = socket_pair(&listener);
        let (b, _b_client) = socket_pair(&listener);
        let b_peer = b.peer();
        let a_id = registry.add(a);
        registry.add(b);

        assert!(registry.remove(a_id));
        assert!(!registry.remove(a_id));
        assert_eq!(registry.peers(), vec![b_peer]);
    }
}
