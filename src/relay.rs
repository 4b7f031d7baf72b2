// kissmux - client side of the relay
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Every accepted client gets its own thread. Raw bytes read from a client go
// straight to VARA as they arrive; framing runs alongside purely so completed
// frames can be logged.

use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use crate::error::{RelayError, Result};
use crate::kiss::FrameAssembler;
use crate::logger::{Logger, LOG_DEBUG, LOG_ERROR, LOG_NOTICE, LOG_WARN};
use crate::monitor::{Direction, Monitor};
use crate::registry::{ClientId, ClientRegistry, ClientSink};
use crate::upstream::UpstreamHandle;

pub struct Relay<W: ClientSink = TcpStream> {
    registry: Arc<ClientRegistry<W>>,
    upstream: Arc<UpstreamHandle>,
    monitor: Arc<Monitor>,
}

impl<W: ClientSink> Relay<W> {
    pub fn new(registry: Arc<ClientRegistry<W>>, upstream: Arc<UpstreamHandle>, monitor: Arc<Monitor>) -> Self {
        Relay { registry, upstream, monitor }
    }

    fn logger(&self) -> &Logger {
        self.monitor.logger()
    }

    /// Sends client bytes to VARA. With no upstream link the bytes are
    /// dropped, not queued. Returns whether they were sent.
    pub fn forward_to_upstream(&self, data: &[u8]) -> bool {
        let Some(link) = self.upstream.current() else {
            self.logger().log(&format!("VARA unavailable, dropped {} bytes", data.len()), LOG_DEBUG);
            return false;
        };
        match link.send(data) {
            Ok(()) => true,
            Err(e) => {
                self.logger().log(&format!("Error forwarding to VARA {}: {}", link.peer(), e), LOG_WARN);
                false
            }
        }
    }

    /// Receive loop for one registered client. Returns when the client closes
    /// or fails, after removing it from the registry.
    pub fn serve_client<R: Read>(&self, id: ClientId, peer: &str, mut reader: R) {
        let mut assembler = FrameAssembler::new();
        let mut buffer = [0u8; 1024];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    self.logger().log(&format!("No more data from client {}, closing connection", peer), LOG_NOTICE);
                    break;
                }
                Ok(n) => {
                    let data = &buffer[..n];
                    self.forward_to_upstream(data);
                    for frame in assembler.add_bytes(data) {
                        self.monitor.observe(Direction::ToVara, &frame);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.logger().log(&format!("Error receiving from client {}: {}", peer, e), LOG_ERROR);
                    break;
                }
            }
        }

        self.registry.unregister(id);
        self.logger().log(&format!("Client {} disconnected, {} remaining", peer, self.registry.len()), LOG_NOTICE);
    }
}

impl Relay<TcpStream> {
    /// Registers an accepted connection and starts its receive thread
    pub fn handle_client(self: &Arc<Self>, stream: TcpStream) -> Result<ClientId> {
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        let writer = stream.try_clone()?;
        let id = self.registry.register(peer.clone(), writer);

        let relay = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("client-{}", id))
            .spawn(move || relay.serve_client(id, &peer, stream));

        if let Err(e) = spawned {
            self.registry.unregister(id);
            return Err(e.into());
        }
        Ok(id)
    }

    /// Accept loop. Runs until the process exits.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    self.logger().log(&format!("Accepted connection from {}", addr), LOG_NOTICE);
                    if let Err(e) = self.handle_client(stream) {
                        self.logger().log(&format!("Failed to start client {}: {}", addr, e), LOG_ERROR);
                    }
                }
                Err(e) => {
                    self.logger().log(&format!("Accept error: {}", e), LOG_ERROR);
                }
            }
        }
    }
}

pub fn bind(address: &str, port: u16) -> Result<TcpListener> {
    let bind_address = format!("{}:{}", address, port);
    TcpListener::bind(&bind_address).map_err(|source| RelayError::Bind { address: bind_address, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ax25::{build_frame, encode_address};
    use crate::kiss::encode_frame;
    use crate::registry::tests::FakeClient;
    use crate::upstream::tests::FakeLink;
    use crate::upstream::{Link, ReconnectPolicy, TcpConnector, UpstreamSupervisor};
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn quiet_monitor() -> Arc<Monitor> {
        Arc::new(Monitor::new(Arc::new(Logger::silent()), false, None))
    }

    /// Reader that hands out one chunk per read
    struct Chunks(Vec<Vec<u8>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_forward_without_upstream_drops() {
        let relay: Relay<FakeClient> = Relay::new(
            Arc::new(ClientRegistry::new()),
            Arc::new(UpstreamHandle::new()),
            quiet_monitor(),
        );
        assert!(!relay.forward_to_upstream(b"data"));
    }

    #[test]
    fn test_forward_send_failure_is_contained() {
        let handle = Arc::new(UpstreamHandle::new());
        let link = Arc::new(FakeLink::failing());
        handle.replace(Some(link as Arc<dyn Link>));
        let relay: Relay<FakeClient> = Relay::new(Arc::new(ClientRegistry::new()), handle, quiet_monitor());
        assert!(!relay.forward_to_upstream(b"data"));
    }

    #[test]
    fn test_serve_client_forwards_raw_chunks_and_unregisters() {
        let handle = Arc::new(UpstreamHandle::new());
        let link = Arc::new(FakeLink::default());
        handle.replace(Some(Arc::clone(&link) as Arc<dyn Link>));

        let registry = Arc::new(ClientRegistry::new());
        let relay = Relay::new(Arc::clone(&registry), handle, quiet_monitor());
        let id = registry.register("c1", FakeClient::default());

        let frame = encode_frame(&build_frame(
            encode_address("CQ", 0, 0x60),
            encode_address("N0CALL", 0, 0x61),
            &[],
            b"hi",
        ));
        // Split mid-frame: the first half goes out before the frame completes
        let (head, tail) = frame.split_at(5);
        relay.serve_client(id, "c1", Chunks(vec![head.to_vec(), tail.to_vec()]));

        assert_eq!(link.sent(), frame);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_bind_failure_reports_address() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        match bind("127.0.0.1", port) {
            Err(RelayError::Bind { address, .. }) => assert_eq!(address, format!("127.0.0.1:{}", port)),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_end_to_end_over_loopback() {
        let vara_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let vara_port = vara_listener.local_addr().unwrap().port();

        let monitor = quiet_monitor();
        let registry: Arc<ClientRegistry<TcpStream>> = Arc::new(ClientRegistry::new());
        let supervisor = Arc::new(UpstreamSupervisor::new(
            Box::new(TcpConnector::new("127.0.0.1", vara_port)),
            Arc::clone(&registry),
            Arc::clone(&monitor),
            ReconnectPolicy::Fixed(Duration::from_millis(10)),
            4096,
        ));
        assert!(supervisor.initialize());
        let (mut vara, _) = vara_listener.accept().unwrap();
        vara.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        supervisor.spawn().unwrap();

        let relay = Arc::new(Relay::new(Arc::clone(&registry), supervisor.handle(), monitor));
        let listener = bind("127.0.0.1", 0).unwrap();
        let relay_port = listener.local_addr().unwrap().port();
        let server = Arc::clone(&relay);
        thread::spawn(move || server.serve(listener));

        let mut client = TcpStream::connect(("127.0.0.1", relay_port)).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(registry.len(), 1);

        let downlink = encode_frame(&build_frame(
            encode_address("CQ", 0, 0x60),
            encode_address("N0CALL", 0, 0x61),
            &[],
            b"from vara",
        ));
        vara.write_all(&downlink).unwrap();
        let mut received = vec![0u8; downlink.len()];
        client.read_exact(&mut received).unwrap();
        assert_eq!(received, downlink);

        let uplink = encode_frame(&[0x00, 0x01, 0xC0, 0xDB, 0x02]);
        client.write_all(&uplink).unwrap();
        let mut forwarded = vec![0u8; uplink.len()];
        vara.read_exact(&mut forwarded).unwrap();
        assert_eq!(forwarded, uplink);

        supervisor.shutdown();
    }
}
