//! RPC server lifecycle controller.
//!
//! # Responsibilities
//! - Resolve configured address lists and apply the port policy (init)
//! - Create one listening handle per bind and proxied address (bind)
//! - Start accept tasks and open the service router (start)
//! - Stop listeners and unregister services (shutdown)
//! - Answer bound and advertised address queries
//!
//! # Data Flow
//! ```text
//! RpcOptions
//!     → init: resolver::resolve per role
//!     → register_service: ServicePool → ServiceRouter
//!     → bind: Transport::create_listening_handle per address
//!     → start: ListeningHandle::start, router.mark_open
//!     → shutdown: ListeningHandle::stop, router.unregister_all
//! ```
//!
//! # Design Decisions
//! - Setup runs on one thread; every mutating operation takes `&mut self`
//! - Bind is all-or-nothing: handles from a failed attempt are stopped and
//!   the server stays Initialized
//! - A failed start leaves the server Bound so start can be retried

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use thiserror::Error;

use crate::config::RpcOptions;
use crate::dispatch::{DispatchError, ServiceHandler, ServicePool, ServiceRouter};
use crate::lifecycle::state::ServerState;
use crate::net::address::{AddressError, AddressRole, HostPort, ResolvedAddress};
use crate::net::resolver;
use crate::net::transport::{ListeningHandle, Transport, TransportError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("bad state: RPC server is {state}, listening addresses not available")]
    NotReady { state: ServerState },
}

struct TooBusyHook(Box<dyn Fn(&str) + Send + Sync>);

/// Lifecycle controller for an RPC server endpoint.
pub struct RpcServer {
    state: ServerState,
    options: RpcOptions,
    transport: Arc<dyn Transport>,
    router: Arc<ServiceRouter>,
    bind_addresses: Vec<ResolvedAddress>,
    advertised_addresses: Vec<ResolvedAddress>,
    proxied_addresses: Vec<ResolvedAddress>,
    proxy_advertised_addresses: Vec<HostPort>,
    listeners: Vec<Box<dyn ListeningHandle>>,
    too_busy_hook: Arc<ArcSwapOption<TooBusyHook>>,
}

impl RpcServer {
    pub fn new(options: RpcOptions, transport: Arc<dyn Transport>, router: Arc<ServiceRouter>) -> Self {
        Self {
            state: ServerState::Uninitialized,
            options,
            transport,
            router,
            bind_addresses: Vec::new(),
            advertised_addresses: Vec::new(),
            proxied_addresses: Vec::new(),
            proxy_advertised_addresses: Vec::new(),
            listeners: Vec::new(),
            too_busy_hook: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Resolve every configured address list.
    ///
    /// On error nothing is committed and the server stays Uninitialized.
    ///
    /// # Panics
    /// If not Uninitialized, or on an ephemeral port the role does not allow.
    pub fn init(&mut self) -> Result<(), ServerError> {
        self.state.require(&[ServerState::Uninitialized], "init");
        let opts = &self.options;
        let allow_ephemeral = opts.allow_ephemeral_ports;

        let bind = resolver::resolve(
            AddressRole::Bind,
            &opts.bind_addresses,
            opts.default_port,
            allow_ephemeral,
        )?;
        let advertised = resolve_optional(AddressRole::Advertised, &opts.advertised_addresses, opts.default_port, false)?;
        let proxied = resolve_optional(AddressRole::Proxied, &opts.proxied_addresses, opts.default_port, allow_ephemeral)?;
        let proxy_advertised =
            resolver::parse_proxy_advertised(&opts.proxy_advertised_addresses, opts.default_port)?;

        tracing::info!(
            bind = %join(&bind),
            advertised = %join(&advertised),
            proxied = %join(&proxied),
            proxy_advertised = %join(&proxy_advertised),
            "RPC server initialized"
        );

        self.bind_addresses = bind;
        self.advertised_addresses = advertised;
        self.proxied_addresses = proxied;
        self.proxy_advertised_addresses = proxy_advertised;
        self.state.advance(ServerState::Initialized);
        Ok(())
    }

    /// Append a bind address after init. No policy checks are applied.
    pub fn add_bind_address(&mut self, addr: SocketAddr) {
        self.state.require(&[ServerState::Initialized], "add_bind_address");
        self.bind_addresses.push(ResolvedAddress::new(AddressRole::Bind, addr));
    }

    /// Create a worker pool for `handler` and register it with the router.
    ///
    /// A duplicate service name fails and leaves the existing registration
    /// in place.
    pub fn register_service(&mut self, handler: Arc<dyn ServiceHandler>) -> Result<(), ServerError> {
        self.state
            .require(&[ServerState::Initialized, ServerState::Bound], "register_service");

        let mut pool = ServicePool::new(handler, self.options.service_queue_length);
        pool.init(self.options.service_threads)?;
        let hook = Arc::clone(&self.too_busy_hook);
        pool.set_too_busy_hook(move |pool| {
            if let Some(hook) = &*hook.load() {
                (hook.0)(pool.service_name());
            }
        });

        let name = pool.service_name().to_string();
        self.router.register(Arc::new(pool))?;
        tracing::debug!(
            service = %name,
            threads = self.options.service_threads,
            queue_length = self.options.service_queue_length,
            "Service pool registered"
        );
        Ok(())
    }

    /// Install the callback fired with the service name whenever a service
    /// queue overflows. Applies to pools registered before and after.
    ///
    /// The callback runs on the caller's thread and must not block.
    pub fn set_too_busy_hook<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.too_busy_hook.store(Some(Arc::new(TooBusyHook(Box::new(hook)))));
    }

    /// Create listening handles for all bind and proxied addresses.
    ///
    /// Proxied addresses are replaced with the concrete addresses the
    /// transport bound. All-or-nothing: on error every handle created by this
    /// attempt is stopped and the server stays Initialized.
    pub fn bind(&mut self) -> Result<(), ServerError> {
        self.state.require(&[ServerState::Initialized], "bind");

        let mut listeners = Vec::with_capacity(self.bind_addresses.len() + self.proxied_addresses.len());
        let bound_proxied = match self.create_listeners(&mut listeners) {
            Ok(bound_proxied) => bound_proxied,
            Err(e) => {
                for listener in &mut listeners {
                    listener.stop();
                }
                tracing::warn!(error = %e, "RPC server bind failed");
                return Err(e);
            }
        };

        self.proxied_addresses = bound_proxied;
        self.listeners = listeners;
        metrics::record_listeners_bound(self.listeners.len());
        self.state.advance(ServerState::Bound);
        Ok(())
    }

    fn create_listeners(
        &self,
        listeners: &mut Vec<Box<dyn ListeningHandle>>,
    ) -> Result<Vec<ResolvedAddress>, ServerError> {
        for addr in &self.bind_addresses {
            listeners.push(self.transport.create_listening_handle(addr.addr())?);
        }
        let mut bound_proxied = Vec::with_capacity(self.proxied_addresses.len());
        for addr in &self.proxied_addresses {
            let handle = self.transport.create_listening_handle(addr.addr())?;
            let bound = handle.bound_address();
            listeners.push(handle);
            bound_proxied.push(ResolvedAddress::new(AddressRole::Proxied, bound?));
        }
        Ok(bound_proxied)
    }

    /// Begin accepting. Binds first when still Initialized.
    ///
    /// A failure leaves the server Bound with its handles intact.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Initialized {
            self.bind()?;
        }
        self.state.require(&[ServerState::Bound], "start");

        for listener in &mut self.listeners {
            listener.start(self.options.acceptors_per_address)?;
        }

        let bound = self.bound_addresses()?;
        tracing::info!(
            addresses = %join(&bound),
            acceptors_per_address = self.options.acceptors_per_address,
            "RPC server started"
        );
        self.router.mark_open();
        self.state.advance(ServerState::Started);
        Ok(())
    }

    /// Stop all listeners and unregister every service. Safe in any state
    /// and idempotent. The lifecycle state is left unchanged.
    pub fn shutdown(&mut self) {
        let stopped = self.listeners.len();
        for mut listener in self.listeners.drain(..) {
            listener.stop();
        }
        self.router.unregister_all();
        if stopped > 0 {
            metrics::record_listeners_bound(0);
            tracing::info!(listeners = stopped, "RPC server shut down");
        }
    }

    /// Concrete addresses of every listening handle, bind then proxied.
    pub fn bound_addresses(&self) -> Result<Vec<SocketAddr>, ServerError> {
        self.ensure_bound()?;
        self.listeners
            .iter()
            .map(|listener| listener.bound_address().map_err(ServerError::from))
            .collect()
    }

    /// Addresses peers should use to reach this server.
    ///
    /// The explicitly configured advertised list wins. Otherwise this is
    /// every bound address except the proxied ones.
    pub fn advertised_addresses(&self) -> Result<Vec<SocketAddr>, ServerError> {
        self.ensure_bound()?;
        if !self.advertised_addresses.is_empty() {
            return Ok(self.advertised_addresses.iter().map(ResolvedAddress::addr).collect());
        }
        let proxied: HashSet<SocketAddr> = self.proxied_addresses.iter().map(ResolvedAddress::addr).collect();
        Ok(self
            .bound_addresses()?
            .into_iter()
            .filter(|addr| !proxied.contains(addr))
            .collect())
    }

    pub fn bound_host_ports(&self) -> Result<Vec<HostPort>, ServerError> {
        Ok(self.bound_addresses()?.into_iter().map(HostPort::from_addr).collect())
    }

    pub fn advertised_host_ports(&self) -> Result<Vec<HostPort>, ServerError> {
        Ok(self
            .advertised_addresses()?
            .into_iter()
            .map(HostPort::from_addr)
            .collect())
    }

    /// Externally visible endpoints for proxied clients. Never bound.
    pub fn proxy_advertised_host_ports(&self) -> &[HostPort] {
        debug_assert_ne!(self.state, ServerState::Uninitialized);
        &self.proxy_advertised_addresses
    }

    /// Proxied listening addresses; the concrete bound ones once Bound.
    pub fn rpc_proxied_addresses(&self) -> Vec<SocketAddr> {
        debug_assert_ne!(self.state, ServerState::Uninitialized);
        self.proxied_addresses.iter().map(ResolvedAddress::addr).collect()
    }

    pub fn service_pool(&self, name: &str) -> Option<Arc<ServicePool>> {
        self.router.service(name)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn options(&self) -> &RpcOptions {
        &self.options
    }

    pub fn router(&self) -> &Arc<ServiceRouter> {
        &self.router
    }

    fn ensure_bound(&self) -> Result<(), ServerError> {
        if self.state.is_bound() {
            Ok(())
        } else {
            Err(ServerError::NotReady { state: self.state })
        }
    }
}

/// Bind addresses: the raw configured list before init, resolved afterwards.
impl fmt::Display for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state == ServerState::Uninitialized {
            f.write_str(&self.options.bind_addresses)
        } else {
            f.write_str(&join(&self.bind_addresses))
        }
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("listeners", &self.listeners.len())
            .field("services", &self.router.service_names())
            .finish()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_optional(
    role: AddressRole,
    list: &str,
    default_port: u16,
    allow_ephemeral: bool,
) -> Result<Vec<ResolvedAddress>, AddressError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    resolver::resolve(role, list, default_port, allow_ephemeral)
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InboundCall;
    use std::sync::Mutex;

    /// Transport that hands out handles reporting a fixed port offset.
    #[derive(Default)]
    struct StubTransport {
        created: Mutex<Vec<SocketAddr>>,
    }

    struct StubHandle {
        addr: SocketAddr,
        started: bool,
    }

    impl Transport for StubTransport {
        fn create_listening_handle(
            &self,
            addr: SocketAddr,
        ) -> Result<Box<dyn ListeningHandle>, TransportError> {
            let mut created = self.created.lock().unwrap();
            created.push(addr);
            let mut bound = addr;
            if bound.port() == 0 {
                bound.set_port(40_000 + created.len() as u16);
            }
            Ok(Box::new(StubHandle {
                addr: bound,
                started: false,
            }))
        }
    }

    impl ListeningHandle for StubHandle {
        fn start(&mut self, _acceptors: usize) -> Result<(), TransportError> {
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) {}

        fn bound_address(&self) -> Result<SocketAddr, TransportError> {
            Ok(self.addr)
        }
    }

    struct Echo;

    impl ServiceHandler for Echo {
        fn service_name(&self) -> &str {
            "test.Echo"
        }

        fn handle(&self, _call: InboundCall) {}
    }

    fn server(options: RpcOptions) -> RpcServer {
        RpcServer::new(options, Arc::new(StubTransport::default()), Arc::new(ServiceRouter::new()))
    }

    fn options(bind: &str) -> RpcOptions {
        RpcOptions {
            bind_addresses: bind.to_string(),
            ..RpcOptions::default()
        }
    }

    #[test]
    fn start_auto_binds_and_opens_router() {
        let mut server = server(options("127.0.0.1:7051"));
        server.init().unwrap();
        server.register_service(Arc::new(Echo)).unwrap();
        assert!(!server.router().is_open());

        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Started);
        assert!(server.router().is_open());
        assert_eq!(
            server.bound_addresses().unwrap(),
            vec!["127.0.0.1:7051".parse::<SocketAddr>().unwrap()]
        );
        assert!(server.service_pool("test.Echo").is_some());
    }

    #[test]
    fn queries_before_bind_are_not_ready() {
        let mut server = server(options("127.0.0.1:7051"));
        assert!(matches!(
            server.bound_addresses(),
            Err(ServerError::NotReady { state: ServerState::Uninitialized })
        ));
        server.init().unwrap();
        assert!(matches!(
            server.advertised_addresses(),
            Err(ServerError::NotReady { state: ServerState::Initialized })
        ));
    }

    #[test]
    fn failed_init_commits_nothing() {
        let mut server = server(options(" , "));
        assert!(matches!(
            server.init(),
            Err(ServerError::Address(AddressError::Empty { role: AddressRole::Bind }))
        ));
        assert_eq!(server.state(), ServerState::Uninitialized);
    }

    #[test]
    fn display_shows_bind_addresses() {
        let mut opts = options("127.0.0.1:7051, 127.0.0.1");
        opts.default_port = 7050;
        let mut server = server(opts);
        assert_eq!(server.to_string(), "127.0.0.1:7051, 127.0.0.1");
        server.init().unwrap();
        assert_eq!(server.to_string(), "127.0.0.1:7051,127.0.0.1:7050");
    }

    /// Blocks each call until released.
    struct Gated {
        started: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ServiceHandler for Gated {
        fn service_name(&self) -> &str {
            "test.Gated"
        }

        fn handle(&self, _call: InboundCall) {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
        }
    }

    #[test]
    fn too_busy_hook_reports_service_name() {
        let mut opts = options("127.0.0.1:7051");
        opts.service_queue_length = 0;
        opts.service_threads = 1;
        let mut server = server(opts);
        server.init().unwrap();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        server
            .register_service(Arc::new(Gated {
                started: Mutex::new(started_tx),
                release: Mutex::new(release_rx),
            }))
            .unwrap();

        // Installed after registration; still reaches the existing pool.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        server.set_too_busy_hook(move |service| sink.lock().unwrap().push(service.to_string()));

        let pool = server.service_pool("test.Gated").unwrap();
        // Rendezvous queue: the first call lands once the worker is parked.
        let mut accepted = false;
        for _ in 0..1_000 {
            if pool.queue_call(InboundCall::new("Hold", vec![])).is_ok() {
                accepted = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(accepted);
        started_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        seen.lock().unwrap().clear();

        let err = pool.queue_call(InboundCall::new("Ping", vec![])).unwrap_err();
        assert!(matches!(err, DispatchError::TooBusy { .. }));
        assert_eq!(*seen.lock().unwrap(), vec!["test.Gated".to_string()]);

        release_tx.send(()).unwrap();
        drop(pool);
        server.shutdown();
    }

    #[test]
    #[should_panic(expected = "bad state: bind called while uninitialized")]
    fn bind_before_init_panics() {
        let mut server = server(options("127.0.0.1:7051"));
        let _ = server.bind();
    }
}
