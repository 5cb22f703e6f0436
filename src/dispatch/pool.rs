//! Bounded-queue worker pool for one service.
//!
//! # Responsibilities
//! - Own a fixed set of named worker threads for one service
//! - Queue inbound calls in a bounded channel
//! - Reject immediately when the queue is full and fire the too-busy hook
//! - Drain queued calls on shutdown
//!
//! # Design Decisions
//! - Enqueue never blocks: overload is returned to the caller synchronously
//! - A queue length of 0 is a rendezvous: calls are accepted only while a
//!   worker is idle

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::dispatch::DispatchError;
use crate::observability::metrics;

/// One inbound call, already decoded by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    pub method: String,
    pub payload: Vec<u8>,
}

impl InboundCall {
    pub fn new(method: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            payload: payload.into(),
        }
    }
}

/// Request-handling implementation for one service.
///
/// `handle` runs on the pool's worker threads.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Name the service is registered under. Must be unique per router.
    fn service_name(&self) -> &str;

    fn handle(&self, call: InboundCall);
}

type PoolHook = Box<dyn Fn(&ServicePool) + Send + Sync>;

/// Bounded queue plus fixed worker threads for a single service.
pub struct ServicePool {
    service_name: String,
    handler: Arc<dyn ServiceHandler>,
    queue_length: usize,
    calls_tx: Sender<InboundCall>,
    calls_rx: Receiver<InboundCall>,
    /// Dropped to tell workers to drain and exit.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    rejected_calls: AtomicU64,
    too_busy_hook: Option<PoolHook>,
}

impl ServicePool {
    /// Create a pool with no workers. Call [`ServicePool::init`] to start them.
    pub fn new(handler: Arc<dyn ServiceHandler>, queue_length: usize) -> Self {
        let (calls_tx, calls_rx) = channel::bounded(queue_length);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        Self {
            service_name: handler.service_name().to_string(),
            handler,
            queue_length,
            calls_tx,
            calls_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            workers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            rejected_calls: AtomicU64::new(0),
            too_busy_hook: None,
        }
    }

    /// Spawn `num_threads` workers.
    pub fn init(&mut self, num_threads: usize) -> Result<(), DispatchError> {
        if num_threads == 0 {
            return Err(DispatchError::InvalidWorkerCount {
                service: self.service_name.clone(),
            });
        }

        let mut spawned = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let handler = Arc::clone(&self.handler);
            let calls = self.calls_rx.clone();
            let shutdown = self.shutdown_rx.clone();
            let spawn = thread::Builder::new()
                .name(format!("rpc-worker-{}-{index}", self.service_name))
                .spawn(move || worker_loop(handler.as_ref(), &calls, &shutdown));
            match spawn {
                Ok(worker) => spawned.push(worker),
                Err(source) => {
                    self.workers_mut().extend(spawned);
                    self.shutdown();
                    return Err(DispatchError::SpawnWorker {
                        service: self.service_name.clone(),
                        source,
                    });
                }
            }
        }
        self.workers_mut().extend(spawned);

        tracing::debug!(
            service = %self.service_name,
            num_threads,
            queue_length = self.queue_length,
            "Service pool started"
        );
        Ok(())
    }

    /// Install the callback fired each time a call is rejected as too busy.
    pub fn set_too_busy_hook<F>(&mut self, hook: F)
    where
        F: Fn(&ServicePool) + Send + Sync + 'static,
    {
        self.too_busy_hook = Some(Box::new(hook));
    }

    /// Enqueue a call without blocking.
    pub fn queue_call(&self, call: InboundCall) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown {
                service: self.service_name.clone(),
            });
        }
        match self.calls_tx.try_send(call) {
            Ok(()) => {
                metrics::record_call_dispatched(&self.service_name);
                Ok(())
            }
            Err(TrySendError::Full(call)) => {
                let rejected = self.rejected_calls.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_queue_overflow(&self.service_name);
                tracing::warn!(
                    service = %self.service_name,
                    method = %call.method,
                    queue_length = self.queue_length,
                    rejected,
                    "Service queue full, rejecting call"
                );
                if let Some(hook) = &self.too_busy_hook {
                    hook(self);
                }
                Err(DispatchError::TooBusy {
                    service: self.service_name.clone(),
                    queue_length: self.queue_length,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::ShuttingDown {
                service: self.service_name.clone(),
            }),
        }
    }

    /// Stop accepting calls, let workers drain the queue, and join them.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let signal = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if signal.is_none() {
            return;
        }
        drop(signal);

        let workers = std::mem::take(&mut *self.workers_mut());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(service = %self.service_name, "Service worker panicked");
            }
        }
        tracing::debug!(service = %self.service_name, "Service pool stopped");
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    /// Calls waiting for a worker.
    pub fn queued_calls(&self) -> usize {
        self.calls_tx.len()
    }

    /// Calls rejected because the queue was full.
    pub fn rejected_calls(&self) -> u64 {
        self.rejected_calls.load(Ordering::Relaxed)
    }

    pub fn num_workers(&self) -> usize {
        self.workers_mut().len()
    }

    fn workers_mut(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ServicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePool")
            .field("service_name", &self.service_name)
            .field("queue_length", &self.queue_length)
            .field("rejected_calls", &self.rejected_calls())
            .field("too_busy_hook", &self.too_busy_hook.is_some())
            .finish()
    }
}

impl Drop for ServicePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(handler: &dyn ServiceHandler, calls: &Receiver<InboundCall>, shutdown: &Receiver<()>) {
    loop {
        crossbeam::select! {
            recv(calls) -> call => match call {
                Ok(call) => handler.handle(call),
                Err(_) => return,
            },
            recv(shutdown) -> _ => break,
        }
    }
    for call in calls.try_iter() {
        handler.handle(call);
    }
}
