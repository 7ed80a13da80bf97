//! The dispatcher: a pub/sub registry keyed by message type.
//!
//! Domain services subscribe a closure per payload type. The network
//! layer publishes `(sender, envelope)` pairs. Someone then has to run
//! the handlers, and there are two ways:
//!
//! - **Drain mode** ([`Dispatcher::distribute`]): the owner calls it from
//!   its own loop (the client's per-frame tick). Single-threaded.
//! - **Worker mode** ([`Dispatcher::start`]): a fixed pool of OS threads
//!   blocks on the queue and dispatches items as they arrive (the server).
//!
//! # Locking
//!
//! ```text
//! subscribers: RwLock   ← subscribe/unsubscribe write, dispatch reads
//! queue:       Mutex    ← publish/dequeue/clear
//! wake:        Condvar  ← one notify per published item
//! ```
//!
//! Handler lists are cloned out of the read lock before any handler
//! runs, so a handler may itself subscribe, unsubscribe, or publish.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::thread::{self, JoinHandle};

use gamelink_protocol::{Envelope, Message};
use tracing::{debug, error, info, warn};

use crate::{DispatchError, HandlerError};

/// Smallest worker pool [`Dispatcher::start`] will run.
pub const MIN_WORKERS: usize = 1;

/// Largest worker pool [`Dispatcher::start`] will run.
pub const MAX_WORKERS: usize = 1000;

// ---------------------------------------------------------------------------
// Identity & stats
// ---------------------------------------------------------------------------

/// Handle returned by [`Dispatcher::subscribe`]; pass it back to
/// [`Dispatcher::unsubscribe`]. Closures have no identity of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages delivered to at least one handler.
    pub dispatched: u64,
    /// Messages dropped because nothing was subscribed to their type.
    pub unhandled: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

type ErasedHandler<S> =
    dyn Fn(&S, &Envelope) -> Result<(), HandlerError> + Send + Sync;

struct Subscriber<S> {
    id: SubscriptionId,
    handler: Arc<ErasedHandler<S>>,
}

/// State shared between the `Dispatcher` handle and its worker threads.
struct Shared<S> {
    subscribers: RwLock<HashMap<&'static str, Vec<Subscriber<S>>>>,
    queue: Mutex<VecDeque<(S, Envelope)>>,
    /// Signalled once per published item, and broadcast on stop.
    wake: Condvar,
    /// Signalled whenever a worker starts or exits.
    workers_changed: Condvar,
    running: AtomicBool,
    active_workers: AtomicUsize,
    strict: AtomicBool,
    next_id: AtomicU64,
    dispatched: AtomicU64,
    unhandled: AtomicU64,
    handler_failures: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: Send + 'static> Shared<S> {
    fn read_subscribers(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<&'static str, Vec<Subscriber<S>>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_subscribers(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<&'static str, Vec<Subscriber<S>>>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every handler subscribed to the envelope's payload type.
    ///
    /// Every handler runs even if an earlier one fails. Failures are
    /// logged here; the first one is returned so drain mode can surface
    /// it under the strict flag.
    fn dispatch(
        &self,
        sender: &S,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let message_type = envelope.message_type();
        let handlers: Vec<Arc<ErasedHandler<S>>> = self
            .read_subscribers()
            .get(message_type)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            warn!(message_type, "no handler subscribed, message dropped");
            return Ok(());
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let mut first_failure = None;
        for handler in handlers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handler(sender, envelope)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => {
                    error!(message_type, error = %source, "message handler failed");
                    DispatchError::HandlerFailed {
                        message_type,
                        source,
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(message_type, panic = %message, "message handler panicked");
                    DispatchError::HandlerPanicked {
                        message_type,
                        message,
                    }
                }
            };
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
            first_failure.get_or_insert(failure);
        }

        first_failure.map_or(Ok(()), Err)
    }

    fn worker_loop(self: Arc<Self>) {
        let _active = ActiveWorker::enter(&self);

        loop {
            let (sender, envelope) = {
                let mut queue = lock(&self.queue);
                loop {
                    if !self.running.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(item) = queue.pop_front() {
                        break item;
                    }
                    queue = self
                        .wake
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            // Already logged inside dispatch; a worker has nobody to
            // re-raise to.
            let _ = self.dispatch(&sender, &envelope);
        }
    }
}

/// Counts a worker as active for as long as it lives.
struct ActiveWorker<'a, S: Send + 'static> {
    shared: &'a Shared<S>,
}

impl<'a, S: Send + 'static> ActiveWorker<'a, S> {
    fn enter(shared: &'a Shared<S>) -> Self {
        let _queue = lock(&shared.queue);
        shared.active_workers.fetch_add(1, Ordering::AcqRel);
        shared.workers_changed.notify_all();
        debug!("dispatch worker started");
        Self { shared }
    }
}

impl<S: Send + 'static> Drop for ActiveWorker<'_, S> {
    fn drop(&mut self) {
        let _queue = lock(&self.shared.queue);
        self.shared.active_workers.fetch_sub(1, Ordering::AcqRel);
        self.shared.workers_changed.notify_all();
        debug!("dispatch worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes published envelopes to the handlers subscribed to their type.
///
/// `S` is the sender identity handed to every handler alongside the
/// payload: the server uses its connection handle so handlers can reply,
/// the client uses the server's address.
///
/// Share it as `Arc<Dispatcher<S>>` between the network layer (which
/// publishes) and the domain services (which subscribe).
///
/// ```rust
/// use gamelink_dispatch::Dispatcher;
/// use gamelink_protocol::{Envelope, FirstTestRequest};
///
/// let dispatcher: Dispatcher<u32> = Dispatcher::new();
/// dispatcher.subscribe::<FirstTestRequest, _>(|sender, req| {
///     println!("{sender} says {}", req.helloworld);
///     Ok(())
/// });
///
/// dispatcher.publish(7, Envelope::from(FirstTestRequest { helloworld: "hi".into() }));
/// assert_eq!(dispatcher.distribute().unwrap(), 1);
/// ```
pub struct Dispatcher<S: Send + 'static> {
    shared: Arc<Shared<S>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Send + 'static> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: RwLock::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                workers_changed: Condvar::new(),
                running: AtomicBool::new(false),
                active_workers: AtomicUsize::new(0),
                strict: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                dispatched: AtomicU64::new(0),
                unhandled: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    // -- Subscriptions ----------------------------------------------------

    /// Appends `handler` to the list for `T`. Handlers for one type run
    /// in subscription order.
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionId
    where
        T: Message,
        F: Fn(&S, &T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let erased: Arc<ErasedHandler<S>> =
            Arc::new(move |sender: &S, envelope: &Envelope| {
                match T::from_envelope(envelope) {
                    Some(msg) => handler(sender, msg),
                    None => Ok(()),
                }
            });

        self.shared
            .write_subscribers()
            .entry(T::NAME)
            .or_default()
            .push(Subscriber {
                id,
                handler: erased,
            });
        debug!(message_type = T::NAME, %id, "handler subscribed");
        id
    }

    /// Removes one handler for `T`. Returns `false` (and does nothing) if
    /// `id` is not subscribed to `T`.
    pub fn unsubscribe<T: Message>(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.write_subscribers();
        let Some(list) = subscribers.get_mut(T::NAME) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(T::NAME);
        }
        if removed {
            debug!(message_type = T::NAME, %id, "handler unsubscribed");
        }
        removed
    }

    /// Number of handlers currently subscribed to `T`.
    pub fn subscriber_count<T: Message>(&self) -> usize {
        self.shared
            .read_subscribers()
            .get(T::NAME)
            .map_or(0, Vec::len)
    }

    // -- Queue ------------------------------------------------------------

    /// Enqueues one envelope and wakes one idle worker.
    pub fn publish(&self, sender: S, envelope: Envelope) {
        let mut queue = lock(&self.shared.queue);
        queue.push_back((sender, envelope));
        self.shared.wake.notify_one();
    }

    /// Drops every queued item; subscriptions are untouched.
    /// Returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.shared.queue);
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    // -- Drain mode -------------------------------------------------------

    /// Dispatches everything queued at the moment of the call.
    ///
    /// Items published by handlers during the drain wait for the next
    /// call. Returns how many items were processed.
    ///
    /// # Errors
    /// In strict mode, the first handler failure is returned once the
    /// remaining handlers for that message have run. Items not yet
    /// processed are put back at the front of the queue in order.
    /// Outside strict mode failures are only logged.
    pub fn distribute(&self) -> Result<usize, DispatchError> {
        let batch = std::mem::take(&mut *lock(&self.shared.queue));
        let mut items = batch.into_iter();
        let mut processed = 0;

        while let Some((sender, envelope)) = items.next() {
            let result = self.shared.dispatch(&sender, &envelope);
            processed += 1;
            if let Err(e) = result {
                if self.is_strict() {
                    let mut queue = lock(&self.shared.queue);
                    for item in items.rev() {
                        queue.push_front(item);
                    }
                    return Err(e);
                }
            }
        }

        Ok(processed)
    }

    /// Re-raise handler failures from [`distribute`](Self::distribute).
    pub fn set_strict(&self, strict: bool) {
        self.shared.strict.store(strict, Ordering::Relaxed);
    }

    pub fn is_strict(&self) -> bool {
        self.shared.strict.load(Ordering::Relaxed)
    }

    // -- Worker mode ------------------------------------------------------

    /// Spawns the worker pool and blocks until every worker is active.
    ///
    /// `worker_count` is clamped to [`MIN_WORKERS`]..=[`MAX_WORKERS`].
    /// Returns the number of workers actually started.
    ///
    /// # Errors
    /// - [`DispatchError::AlreadyRunning`] if the pool is running.
    /// - [`DispatchError::SpawnFailed`] if a thread could not be spawned;
    ///   any workers already spawned are stopped again.
    pub fn start(&self, worker_count: usize) -> Result<usize, DispatchError> {
        let count = worker_count.clamp(MIN_WORKERS, MAX_WORKERS);
        if count != worker_count {
            warn!(requested = worker_count, clamped = count, "worker count out of range");
        }
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyRunning);
        }

        {
            let mut workers = lock(&self.workers);
            for i in 0..count {
                let shared = Arc::clone(&self.shared);
                let spawned = thread::Builder::new()
                    .name(format!("dispatch-{i}"))
                    .spawn(move || shared.worker_loop());
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        drop(workers);
                        self.stop();
                        return Err(DispatchError::SpawnFailed(e));
                    }
                }
            }
        }

        let mut queue = lock(&self.shared.queue);
        while self.shared.active_workers.load(Ordering::Acquire) < count {
            queue = self
                .shared
                .workers_changed
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(queue);

        info!(workers = count, "dispatcher started");
        Ok(count)
    }

    /// Stops the pool: clears the queue, wakes every worker, and waits
    /// for all of them to exit. Safe to call repeatedly.
    ///
    /// Must not be called from inside a handler running on a worker.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        let dropped = {
            let mut queue = lock(&self.shared.queue);
            let dropped = queue.len();
            queue.clear();
            self.shared.wake.notify_all();
            dropped
        };

        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if handle.join().is_err() {
                warn!("dispatch worker exited by panic");
            }
        }

        if was_running {
            info!(dropped, "dispatcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            unhandled: self.shared.unhandled.load(Ordering::Relaxed),
            handler_failures: self.shared.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl<S: Send + 'static> Drop for Dispatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =========================================================================
// Tests
// =========================================================================
