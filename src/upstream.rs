// kissmux - upstream (VARA) connection supervision
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// One TCP connection to the VARA KISS port is kept alive for the lifetime of
// the process. The connection lives in an `UpstreamHandle` that client threads
// consult before every send; only the supervisor installs or clears it.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::kiss::FrameAssembler;
use crate::logger::{Logger, LOG_DEBUG, LOG_ERROR, LOG_INFO, LOG_NOTICE, LOG_WARN};
use crate::monitor::{Direction, Monitor};
use crate::registry::{ClientId, ClientRegistry, ClientSink};

/// A live bidirectional byte link. Reads come from a single thread; sends may
/// come from any thread.
pub trait Link: Send + Sync {
    fn send(&self, data: &[u8]) -> io::Result<()>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn peer(&self) -> &str;
}

pub struct TcpLink {
    reader: TcpStream,
    // Serializes whole sends so frames from different clients never interleave
    writer: Mutex<TcpStream>,
    peer: String,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        let writer = stream.try_clone()?;
        Ok(TcpLink { reader: stream, writer: Mutex::new(writer), peer })
    }
}

impl Link for TcpLink {
    fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(data)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.reader).read(buf)
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// Opens new upstream links
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Link>>;
    fn describe(&self) -> String;
}

pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        TcpConnector { address: format!("{}:{}", host, port) }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Arc<dyn Link>> {
        let connect_err = |source| RelayError::Connect { address: self.address.clone(), source };
        let stream = TcpStream::connect(&self.address).map_err(connect_err)?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(TcpLink::new(stream)?))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

/// The current upstream link, or none while VARA is unreachable
#[derive(Default)]
pub struct UpstreamHandle {
    slot: RwLock<Option<Arc<dyn Link>>>,
}

impl UpstreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<dyn Link>> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Installs `link` (or nothing) and returns what was there before
    pub fn replace(&self, link: Option<Arc<dyn Link>>) -> Option<Arc<dyn Link>> {
        let mut slot = self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, link)
    }

    /// Clears the handle only if it still holds `link`
    pub fn clear_if(&self, link: &Arc<dyn Link>) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, link) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner()).is_some()
    }
}

/// Wait between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// Doubles per consecutive failure, starting at `initial`, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failed attempts. Zero failures
    /// gives the base interval.
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(interval) => interval,
            ReconnectPolicy::Exponential { initial, max } => {
                let doublings = failures.saturating_sub(1).min(16);
                initial.saturating_mul(1 << doublings).min(max.max(initial))
            }
        }
    }
}

/// Bytes that could not be delivered to any client, oldest first
#[derive(Debug)]
pub struct OutageBuffer {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    limit: usize,
}

impl OutageBuffer {
    pub fn new(limit: usize) -> Self {
        OutageBuffer { chunks: VecDeque::new(), total: 0, limit }
    }

    /// Appends a chunk, discarding the oldest bytes beyond the limit.
    /// Returns the number of bytes discarded.
    pub fn push(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        self.chunks.push_back(data.to_vec());
        self.total += data.len();

        let mut discarded = 0;
        while self.total > self.limit {
            let Some(front) = self.chunks.front_mut() else { break };
            let excess = self.total - self.limit;
            if front.len() <= excess {
                discarded += front.len();
                self.total -= front.len();
                self.chunks.pop_front();
            } else {
                front.drain(..excess);
                discarded += excess;
                self.total -= excess;
            }
        }
        discarded
    }

    /// Empties the buffer, returning its contents in arrival order
    pub fn take(&mut self) -> Vec<u8> {
        self.total = 0;
        self.chunks.drain(..).flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Result of one read from the upstream link
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveStep {
    Relayed,
    /// Read interrupted, try again
    Idle,
    Disconnected,
    /// There is no upstream link to read from
    Absent,
}

pub struct UpstreamSupervisor<W: ClientSink = TcpStream> {
    handle: Arc<UpstreamHandle>,
    connector: Box<dyn Connector>,
    registry: Arc<ClientRegistry<W>>,
    monitor: Arc<Monitor>,
    policy: ReconnectPolicy,
    outage: Mutex<OutageBuffer>,
    connect_lock: Mutex<()>,
    failures: AtomicU32,
    running: AtomicBool,
}

impl<W: ClientSink + 'static> UpstreamSupervisor<W> {
    pub fn new(
        connector: Box<dyn Connector>,
        registry: Arc<ClientRegistry<W>>,
        monitor: Arc<Monitor>,
        policy: ReconnectPolicy,
        outage_limit: usize,
    ) -> Self {
        UpstreamSupervisor {
            handle: Arc::new(UpstreamHandle::new()),
            connector,
            registry,
            monitor,
            policy,
            outage: Mutex::new(OutageBuffer::new(outage_limit)),
            connect_lock: Mutex::new(()),
            failures: AtomicU32::new(0),
            running: AtomicBool::new(true),
        }
    }

    pub fn handle(&self) -> Arc<UpstreamHandle> {
        Arc::clone(&self.handle)
    }

    fn logger(&self) -> &Logger {
        self.monitor.logger()
    }

    fn outage(&self) -> MutexGuard<'_, OutageBuffer> {
        self.outage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub fn buffered_bytes(&self) -> usize {
        self.outage().len()
    }

    /// One connection attempt. On success any buffered outage data is
    /// broadcast before the new link is installed, so it reaches clients
    /// ahead of anything read from that link.
    pub fn initialize(&self) -> bool {
        let _guard = self.connect_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.connect_locked()
    }

    /// Connects only if there is no link. Both reconnection paths go through
    /// here so they never replace each other's fresh connection.
    pub fn ensure_connected(&self) -> bool {
        let _guard = self.connect_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.handle.is_connected() {
            return true;
        }
        self.connect_locked()
    }

    fn connect_locked(&self) -> bool {
        match self.connector.connect() {
            Ok(link) => {
                self.logger().log(&format!("VARA socket connected: {}", link.peer()), LOG_NOTICE);
                self.failures.store(0, Ordering::Relaxed);
                self.flush_outage();
                self.handle.replace(Some(link));
                true
            }
            Err(e) => {
                self.logger().log(&format!("Error initializing VARA socket: {}", e), LOG_ERROR);
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.handle.replace(None);
                false
            }
        }
    }

    fn flush_outage(&self) {
        let data = {
            let mut outage = self.outage();
            if outage.is_empty() {
                return;
            }
            outage.take()
        };
        match self.registry.broadcast(&data) {
            Ok(report) if !report.undelivered() => {
                self.log_removed(&report.removed);
                self.logger().log(
                    &format!("Flushed {} buffered bytes to {} clients", data.len(), report.delivered),
                    LOG_NOTICE,
                );
            }
            Ok(report) => {
                self.log_removed(&report.removed);
                self.buffer(&data);
            }
            Err(e) => {
                self.logger().log(&format!("Error flushing buffered data: {}", e), LOG_ERROR);
                self.buffer(&data);
            }
        }
    }

    fn buffer(&self, data: &[u8]) {
        let (discarded, held) = {
            let mut outage = self.outage();
            (outage.push(data), outage.len())
        };
        if discarded > 0 {
            self.logger().log(
                &format!("Outage buffer full, discarded {} oldest bytes ({} held)", discarded, held),
                LOG_WARN,
            );
        }
    }

    fn log_removed(&self, removed: &[(ClientId, String)]) {
        for (_, peer) in removed {
            self.logger().log(&format!("Removing closed client {}", peer), LOG_NOTICE);
        }
    }

    /// Broadcasts bytes read from VARA. Data no client accepted is kept for
    /// the next successful reconnect.
    pub fn relay_to_clients(&self, data: &[u8]) {
        match self.registry.broadcast(data) {
            Ok(report) => {
                self.log_removed(&report.removed);
                if report.undelivered() {
                    self.logger().log(
                        &format!("Broadcast of {} bytes reached no client, buffering", data.len()),
                        LOG_WARN,
                    );
                    self.buffer(data);
                }
            }
            Err(e) => {
                self.logger().log(&format!("Error broadcasting data to clients: {}", e), LOG_ERROR);
                self.buffer(data);
            }
        }
    }

    /// Reads once from the current link, relays what arrived and logs any
    /// frames it completed. A closed or failed link clears the handle.
    pub fn receive_once(&self, assembler: &mut FrameAssembler, buf: &mut [u8]) -> ReceiveStep {
        let Some(link) = self.handle.current() else {
            return ReceiveStep::Absent;
        };

        match link.recv(buf) {
            Ok(0) => {
                self.logger().log("No more data from VARA socket", LOG_NOTICE);
                self.handle.clear_if(&link);
                assembler.clear();
                ReceiveStep::Disconnected
            }
            Ok(n) => {
                let data = &buf[..n];
                self.relay_to_clients(data);
                for frame in assembler.add_bytes(data) {
                    self.monitor.observe(Direction::FromVara, &frame);
                }
                ReceiveStep::Relayed
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => ReceiveStep::Idle,
            Err(e) => {
                self.logger().log(&format!("Error in receive from VARA: {}", e), LOG_ERROR);
                self.handle.clear_if(&link);
                assembler.clear();
                ReceiveStep::Disconnected
            }
        }
    }

    /// Upstream read loop. A lost link is followed by one policy interval of
    /// quiet before the inline reconnect.
    pub fn run_receive_loop(&self) {
        let mut assembler = FrameAssembler::new();
        let mut buf = [0u8; 1024];

        while self.is_running() {
            match self.receive_once(&mut assembler, &mut buf) {
                ReceiveStep::Relayed | ReceiveStep::Idle => {}
                ReceiveStep::Disconnected => {
                    let delay = self.policy.delay(self.failures.load(Ordering::Relaxed));
                    self.logger().log(&format!("VARA link lost, reconnecting in {:?}", delay), LOG_INFO);
                    thread::sleep(delay);
                    if self.is_running() {
                        self.reconnect_inline();
                    }
                }
                ReceiveStep::Absent => self.reconnect_inline(),
            }
        }
    }

    fn reconnect_inline(&self) {
        self.logger().log("Attempting reconnection to VARA...", LOG_INFO);
        if self.ensure_connected() {
            self.logger().log("Reconnection successful", LOG_INFO);
        } else {
            let delay = self.policy.delay(self.failures.load(Ordering::Relaxed));
            self.logger().log(&format!("Reconnection attempt failed, waiting {:?}", delay), LOG_DEBUG);
            thread::sleep(delay);
        }
    }

    /// Background reconnection: checks the handle once per interval and
    /// connects whenever it is absent.
    pub fn run_reconnect_task(&self) {
        while self.is_running() {
            if !self.handle.is_connected() {
                self.logger().log(
                    &format!("Reconnecting to VARA server at {}...", self.connector.describe()),
                    LOG_INFO,
                );
                self.ensure_connected();
            }
            thread::sleep(self.policy.delay(self.failures.load(Ordering::Relaxed)));
        }
    }

    /// Starts the receive loop and the reconnection task on their own threads
    pub fn spawn(self: &Arc<Self>) -> io::Result<Vec<thread::JoinHandle<()>>> {
        let receiver = Arc::clone(self);
        let receive_thread = thread::Builder::new()
            .name("vara-rx".to_string())
            .spawn(move || receiver.run_receive_loop())?;

        let reconnector = Arc::clone(self);
        let reconnect_thread = thread::Builder::new()
            .name("vara-reconnect".to_string())
            .spawn(move || reconnector.run_reconnect_task())?;

        Ok(vec![receive_thread, reconnect_thread])
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops both loops after their current iteration
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
