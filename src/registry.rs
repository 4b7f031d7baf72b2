// kissmux - downstream client registry
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{RelayError, Result};

pub type ClientId = u64;

/// Write half of a client connection as held by the registry
pub trait ClientSink: Write + Send {
    /// Called once when a failed send drops the client
    fn close(&mut self) {}
}

impl ClientSink for TcpStream {
    // Shutting down both directions wakes the thread blocked reading this
    // client, so it tears down instead of forwarding for a dead client.
    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

struct ClientEntry<W> {
    peer: String,
    writer: W,
}

/// Outcome of one broadcast
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Clients dropped because their send failed
    pub removed: Vec<(ClientId, String)>,
}

impl BroadcastReport {
    /// True when there were clients but none of them took the data
    pub fn undelivered(&self) -> bool {
        self.delivered == 0 && !self.removed.is_empty()
    }
}

/// The set of connected downstream clients.
///
/// All access goes through one lock. Each entry holds the write half of a
/// client connection; the read half stays with the thread serving it.
pub struct ClientRegistry<W: ClientSink = TcpStream> {
    clients: Mutex<BTreeMap<ClientId, ClientEntry<W>>>,
    next_id: AtomicU64,
}

impl<W: ClientSink> Default for ClientRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: ClientSink> ClientRegistry<W> {
    pub fn new() -> Self {
        ClientRegistry {
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // A panic elsewhere cannot leave the map half-updated, so membership
    // changes carry on through a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, ClientEntry<W>>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, peer: impl Into<String>, writer: W) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, ClientEntry { peer: peer.into(), writer });
        id
    }

    /// Removes a client. Returns false if it was already gone, e.g. dropped
    /// by a failed broadcast.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Sends `data` to every client. A failed send removes that client after
    /// the pass and never stops delivery to the rest.
    pub fn broadcast(&self, data: &[u8]) -> Result<BroadcastReport> {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.clients.clear_poison();
                return Err(RelayError::RegistryPoisoned);
            }
        };

        let mut report = BroadcastReport::default();
        if data.is_empty() {
            return Ok(report);
        }

        let mut failed = Vec::new();
        for (&id, entry) in clients.iter_mut() {
            match entry.writer.write_all(data).and_then(|_| entry.writer.flush()) {
                Ok(()) => report.delivered += 1,
                Err(_) => failed.push(id),
            }
        }

        for id in failed {
            if let Some(mut entry) = clients.remove(&id) {
                entry.writer.close();
                report.removed.push((id, entry.peer));
            }
        }
        Ok(report)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().contains_key(&id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    /// In-memory client: records what it receives, or fails every write
    #[derive(Clone, Default)]
    pub(crate) struct FakeClient {
        pub received: Arc<Mutex<Vec<u8>>>,
        pub closes: Arc<AtomicUsize>,
        pub broken: bool,
    }

    impl FakeClient {
        pub fn broken() -> Self {
            FakeClient { broken: true, ..Default::default() }
        }

        pub fn bytes(&self) -> Vec<u8> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Write for FakeClient {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"));
            }
            self.received.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ClientSink for FakeClient {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failed_client_removed_once() {
        let registry = ClientRegistry::new();
        let first = FakeClient::default();
        let third = FakeClient::default();
        let second = FakeClient::broken();
        registry.register("one", first.clone());
        let second_id = registry.register("two", second.clone());
        registry.register("three", third.clone());

        let report = registry.broadcast(b"\xc0\x00data\xc0").unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![(second_id, "two".to_string())]);
        assert!(!report.undelivered());
        assert_eq!(first.bytes(), b"\xc0\x00data\xc0");
        assert_eq!(third.bytes(), b"\xc0\x00data\xc0");
        assert_eq!(registry.len(), 2);
        assert_eq!(second.closes.load(Ordering::SeqCst), 1);
        assert_eq!(first.closes.load(Ordering::SeqCst), 0);

        // Owning thread's teardown finds it already gone
        assert!(!registry.unregister(second_id));

        let report = registry.broadcast(b"more").unwrap();
        assert_eq!(report.delivered, 2);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_all_sends_failed_is_undelivered() {
        let registry = ClientRegistry::new();
        registry.register("a", FakeClient::broken());
        registry.register("b", FakeClient::broken());
        let report = registry.broadcast(b"x").unwrap();
        assert!(report.undelivered());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_clients_is_not_undelivered() {
        let registry: ClientRegistry<FakeClient> = ClientRegistry::new();
        let report = registry.broadcast(b"x").unwrap();
        assert_eq!(report, BroadcastReport::default());
        assert!(!report.undelivered());
    }

    #[test]
    fn test_closing_tcp_writer_ends_reader() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        let mut writer = stream;

        writer.close();

        // The serving thread holds the read half; it sees EOF and tears down
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(remote.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_unregister() {
        let registry = ClientRegistry::new();
        let id = registry.register("a", FakeClient::default());
        assert!(registry.contains(id));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register() {
        let registry = Arc::new(ClientRegistry::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.register(format!("client{}", i), FakeClient::default()))
            })
            .collect();

        let mut ids: Vec<ClientId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(registry.len(), 32);
        assert!(ids.iter().all(|&id| registry.contains(id)));
    }
}
