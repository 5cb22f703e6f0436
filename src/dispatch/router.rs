//! Service name → pool routing table.
//!
//! # Responsibilities
//! - Register service pools by unique name
//! - Route inbound calls to the owning pool
//! - Refuse calls until the server reports that registration is complete
//! - Drop and shut down every pool on server shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::dispatch::pool::{InboundCall, ServicePool};
use crate::dispatch::DispatchError;

/// Routing table shared between the server controller and the transport.
#[derive(Debug, Default)]
pub struct ServiceRouter {
    services: DashMap<String, Arc<ServicePool>>,
    services_registered: AtomicBool,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `pool` under its service name. An existing entry is left untouched.
    pub fn register(&self, pool: Arc<ServicePool>) -> Result<(), DispatchError> {
        let name = pool.service_name().to_string();
        match self.services.entry(name) {
            Entry::Occupied(existing) => Err(DispatchError::DuplicateService(existing.key().clone())),
            Entry::Vacant(slot) => {
                tracing::info!(service = %slot.key(), "Service registered");
                slot.insert(pool);
                Ok(())
            }
        }
    }

    /// Remove every service and shut down its pool.
    pub fn unregister_all(&self) {
        self.services_registered.store(false, Ordering::SeqCst);
        let names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, pool)) = self.services.remove(&name) {
                pool.shutdown();
                tracing::debug!(service = %name, "Service unregistered");
            }
        }
    }

    /// Allow calls through. Invoked once the server has started.
    pub fn mark_open(&self) {
        self.services_registered.store(true, Ordering::SeqCst);
        tracing::debug!(services = self.services.len(), "Service router open");
    }

    pub fn is_open(&self) -> bool {
        self.services_registered.load(Ordering::SeqCst)
    }

    /// Queue `call` on the pool for `service`.
    pub fn dispatch(&self, service: &str, call: InboundCall) -> Result<(), DispatchError> {
        if !self.is_open() {
            return Err(DispatchError::ServicesNotRegistered);
        }
        // Clone out of the map so the shard lock is not held across the hook.
        let pool = self
            .service(service)
            .ok_or_else(|| DispatchError::NoSuchService(service.to_string()))?;
        pool.queue_call(call)
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServicePool>> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
