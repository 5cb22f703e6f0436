//! Shared fakes for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rpc_endpoint::config::RpcOptions;
use rpc_endpoint::dispatch::{InboundCall, ServiceHandler};
use rpc_endpoint::net::{AcceptedConnection, ConnectionHandler, ListeningHandle, Transport, TransportError};

/// First port handed out when a fake handle is asked for port 0.
pub const FIRST_FAKE_PORT: u16 = 50_000;

#[derive(Default)]
struct FakeState {
    created: Vec<SocketAddr>,
    started: Vec<SocketAddr>,
    stopped: Vec<SocketAddr>,
    fail_create: HashSet<SocketAddr>,
    fail_start: HashSet<SocketAddr>,
    assigned_ports: u16,
}

/// In-memory transport that records every call and fails on request.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_listening_handle` fail for `addr`.
    pub fn fail_create(&self, addr: SocketAddr) {
        self.state.lock().unwrap().fail_create.insert(addr);
    }

    /// Make `start` fail for the handle bound to `addr`.
    pub fn fail_start(&self, addr: SocketAddr) {
        self.state.lock().unwrap().fail_start.insert(addr);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_create.clear();
        state.fail_start.clear();
    }

    /// Addresses passed to `create_listening_handle`, including failed ones.
    pub fn created(&self) -> Vec<SocketAddr> {
        self.state.lock().unwrap().created.clone()
    }

    /// Bound addresses of handles that started successfully.
    pub fn started(&self) -> Vec<SocketAddr> {
        self.state.lock().unwrap().started.clone()
    }

    /// Bound addresses of handles that were stopped.
    pub fn stopped(&self) -> Vec<SocketAddr> {
        self.state.lock().unwrap().stopped.clone()
    }
}

impl Transport for FakeTransport {
    fn create_listening_handle(
        &self,
        addr: SocketAddr,
    ) -> Result<Box<dyn ListeningHandle>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.created.push(addr);
        if state.fail_create.contains(&addr) {
            return Err(TransportError::Bind {
                addr,
                source: io::Error::new(io::ErrorKind::AddrInUse, "injected bind failure"),
            });
        }
        let mut bound = addr;
        if bound.port() == 0 {
            bound.set_port(FIRST_FAKE_PORT + state.assigned_ports);
            state.assigned_ports += 1;
        }
        Ok(Box::new(FakeHandle {
            bound,
            running: false,
            stopped: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeHandle {
    bound: SocketAddr,
    running: bool,
    stopped: bool,
    state: Arc<Mutex<FakeState>>,
}

impl ListeningHandle for FakeHandle {
    fn start(&mut self, acceptors: usize) -> Result<(), TransportError> {
        if self.stopped {
            return Err(TransportError::Stopped { addr: self.bound });
        }
        if self.running {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if acceptors == 0 || state.fail_start.contains(&self.bound) {
            return Err(TransportError::Start {
                addr: self.bound,
                reason: "injected start failure".to_string(),
            });
        }
        state.started.push(self.bound);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.running = false;
            self.state.lock().unwrap().stopped.push(self.bound);
        }
    }

    fn bound_address(&self) -> Result<SocketAddr, TransportError> {
        if self.stopped {
            return Err(TransportError::Stopped { addr: self.bound });
        }
        Ok(self.bound)
    }
}

/// Service that records every call it handles.
pub struct RecordingService {
    name: String,
    calls: Arc<Mutex<Vec<InboundCall>>>,
}

impl RecordingService {
    pub fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<InboundCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(Self {
            name: name.to_string(),
            calls: Arc::clone(&calls),
        });
        (service, calls)
    }
}

impl ServiceHandler for RecordingService {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn handle(&self, call: InboundCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Connection handler that drops every connection immediately.
pub struct DropConnections;

impl ConnectionHandler for DropConnections {
    fn handle(&self, _connection: AcceptedConnection) {}
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

pub fn options(bind: &str) -> RpcOptions {
    RpcOptions {
        bind_addresses: bind.to_string(),
        service_threads: 2,
        ..RpcOptions::default()
    }
}
