//! Demand-driven event source over one channel.
//!
//! The source owns the channel lifecycle: build, register listeners,
//! subscribe, deliver, unsubscribe. Nothing is built until the first
//! [`ChannelEventSource::start`], and nothing is built twice.
//!
//! Transport callbacks only hold weak references to the lifecycle and to the
//! channel, and check the lifecycle state before doing anything, so frames
//! that arrive after cancellation are dropped and a cancelled source can be
//! reclaimed while the transport still holds its listeners.

use crate::error::{EffectError, Result};
use crate::mapper::OutputMapper;
use crate::transport::Channel;
use crate::types::RawMessage;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;
const CANCELLED: u8 = 2;
const ENDED: u8 = 3;

/// Lifecycle of an event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not requested yet.
    Idle,
    /// Channel built (or being built), subscribed or auto-subscribing.
    Active,
    /// Cancelled by the consumer. Terminal.
    Cancelled,
    /// Ended on its own: no channel, or a transport failure. Terminal.
    Ended,
}

impl SubscriptionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => SubscriptionState::Idle,
            ACTIVE => SubscriptionState::Active,
            CANCELLED => SubscriptionState::Cancelled,
            _ => SubscriptionState::Ended,
        }
    }
}

type ChannelFactory<C> = Box<dyn Fn() -> Option<Arc<C>> + Send + Sync>;
type ValueSink<T> = Box<dyn Fn(T) + Send + Sync>;
type EndSink = Box<dyn FnOnce(Result<()>) + Send>;

struct Subscriber<T> {
    on_value: ValueSink<T>,
    on_end: Mutex<Option<EndSink>>,
}

/// Tracks which threads are inside `on_value` right now.
///
/// Teardown waits on this instead of holding a lock across delivery, so a
/// callback can cancel its own source or trigger a failure without
/// deadlocking.
struct DeliveryGate {
    in_flight: Mutex<Vec<ThreadId>>,
    drained: Condvar,
}

struct Delivery<'a> {
    gate: &'a DeliveryGate,
    thread: ThreadId,
}

impl DeliveryGate {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(Vec::new()),
            drained: Condvar::new(),
        }
    }

    fn enter(&self) -> Delivery<'_> {
        let thread = thread::current().id();
        self.in_flight.lock().push(thread);
        Delivery { gate: self, thread }
    }

    /// Block until no other thread is delivering. Returns at once when the
    /// caller is itself inside a delivery.
    fn wait_idle(&self) {
        let me = thread::current().id();
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(&me) {
            return;
        }
        while !in_flight.is_empty() {
            self.drained.wait(&mut in_flight);
        }
    }
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.gate.in_flight.lock();
        if let Some(pos) = in_flight.iter().position(|t| *t == self.thread) {
            in_flight.swap_remove(pos);
        }
        if in_flight.is_empty() {
            self.gate.drained.notify_all();
        }
    }
}

/// Shared lifecycle state. Everything in here is reachable from transport
/// threads through weak references.
struct Lifecycle<C, T> {
    state: AtomicU8,
    /// Set by the first teardown so later cancels do nothing.
    released: AtomicBool,
    builds: AtomicUsize,
    channel: Mutex<Option<Arc<C>>>,
    subscriber: RwLock<Option<Arc<Subscriber<T>>>>,
    deliveries: DeliveryGate,
}

impl<C: Channel, T: 'static> Lifecycle<C, T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            released: AtomicBool::new(false),
            builds: AtomicUsize::new(0),
            channel: Mutex::new(None),
            subscriber: RwLock::new(None),
            deliveries: DeliveryGate::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    fn has_subscriber(&self) -> bool {
        self.subscriber.read().is_some()
    }

    /// Install the subscriber unless the source was cancelled in the meantime.
    fn install(&self, subscriber: Subscriber<T>) {
        let mut slot = self.subscriber.write();
        if self.is_active() {
            *slot = Some(Arc::new(subscriber));
        }
    }

    /// Enter the gate before the state check: teardown flips the state first
    /// and then waits for the gate, so a delivery that sees `Active` here
    /// finishes before `cancel` returns.
    fn emit(&self, value: T) {
        let _delivery = self.deliveries.enter();
        let subscriber = self.subscriber.read().clone();
        if let Some(subscriber) = subscriber {
            if self.is_active() {
                (subscriber.on_value)(value);
            }
        }
    }

    /// `Active -> Ended`, notifying the subscriber once.
    ///
    /// Leaves the channel slot alone: this can run on a transport thread
    /// while the build still holds it. The channel is released by `cancel`.
    fn finish(&self, result: Result<()>) {
        if self
            .state
            .compare_exchange(ACTIVE, ENDED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.deliveries.wait_idle();
        let subscriber = self.subscriber.write().take();
        let on_end = subscriber.and_then(|s| {
            let mut slot = s.on_end.lock();
            slot.take()
        });
        match &result {
            Ok(()) => debug!("event source ended without error"),
            Err(err) => debug!(error = %err, "event source ended with error"),
        }
        if let Some(on_end) = on_end {
            on_end(result);
        }
    }
}

/// Cancellation entry point shared by [`CancelHandle`] clones.
trait Cancellable: Send + Sync {
    fn cancel(&self);
    fn state(&self) -> SubscriptionState;
}

impl<C: Channel, T: 'static> Cancellable for Lifecycle<C, T> {
    fn cancel(&self) {
        // Idle and Active become Cancelled; Ended stays Ended.
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                matches!(s, IDLE | ACTIVE).then_some(CANCELLED)
            });
        self.deliveries.wait_idle();

        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            let name = &channel.descriptor().name;
            match channel.unsubscribe() {
                Ok(()) => debug!(channel = %name, "unsubscribed"),
                Err(err) => warn!(channel = %name, error = %err, "unsubscribe failed during teardown"),
            }
        }

        self.subscriber.write().take();
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState::from_raw(self.state.load(Ordering::SeqCst))
    }
}

/// Cancels the event source it came from. Clones cancel the same source.
#[derive(Clone)]
pub struct CancelHandle {
    target: Arc<dyn Cancellable>,
}

impl CancelHandle {
    /// True if both handles cancel the same source.
    pub fn same_as(&self, other: &CancelHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.target), Arc::as_ptr(&other.target))
    }

    /// Cancel the subscription. Safe to call repeatedly and from any thread.
    pub fn cancel(&self) {
        self.target.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.target.state() == SubscriptionState::Cancelled
    }

    pub fn state(&self) -> SubscriptionState {
        self.target.state()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Lazily-built producer of typed outputs from one channel.
pub struct ChannelEventSource<C, M>
where
    M: OutputMapper,
{
    factory: ChannelFactory<C>,
    mapper: Arc<M>,
    lifecycle: Arc<Lifecycle<C, M::Output>>,
}

impl<C, M> ChannelEventSource<C, M>
where
    C: Channel,
    M: OutputMapper<Input = RawMessage>,
    M::Output: Send + 'static,
{
    /// Create an idle source. `factory` runs on the first `start`.
    pub fn new<F>(factory: F, mapper: M) -> Self
    where
        F: Fn() -> Option<Arc<C>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            mapper: Arc::new(mapper),
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    /// Signal demand.
    ///
    /// The first call builds and subscribes the channel; `on_value` then
    /// receives every mapped output and `on_end` fires at most once, with
    /// `Ok(())` when the factory has no channel or `Err` when the transport
    /// fails. Neither fires once `cancel` has returned. Later calls only
    /// return another handle to the same subscription and drop their closures.
    ///
    /// `on_value` runs on transport threads. It may cancel this source; that
    /// cancel returns without waiting for deliveries on other threads.
    pub fn start<V, E>(&self, on_value: V, on_end: E) -> CancelHandle
    where
        V: Fn(M::Output) + Send + Sync + 'static,
        E: FnOnce(Result<()>) + Send + 'static,
    {
        let handle = self.cancel_handle();

        if self
            .lifecycle
            .state
            .compare_exchange(IDLE, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(state = ?self.state(), "event source already started");
            return handle;
        }

        self.lifecycle.install(Subscriber {
            on_value: Box::new(on_value),
            on_end: Mutex::new(Some(Box::new(on_end))),
        });
        self.activate();

        handle
    }

    /// Handle that cancels this source, whether or not it has started.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            target: self.lifecycle.clone(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.lifecycle.state()
    }

    /// How many times the channel factory has run.
    pub fn build_count(&self) -> usize {
        self.lifecycle.builds.load(Ordering::SeqCst)
    }

    fn activate(&self) {
        let lifecycle = &self.lifecycle;
        lifecycle.builds.fetch_add(1, Ordering::SeqCst);

        let Some(channel) = (self.factory)() else {
            debug!("channel factory returned no channel");
            lifecycle.finish(Ok(()));
            return;
        };

        let result = {
            let mut slot = lifecycle.channel.lock();
            if !lifecycle.is_active() {
                let name = &channel.descriptor().name;
                debug!(channel = %name, "cancelled during build");
                // Cancel found no channel to release, so this one is ours to drop.
                if let Err(err) = channel.unsubscribe() {
                    warn!(channel = %name, error = %err, "unsubscribe failed during teardown");
                }
                return;
            }
            *slot = Some(channel.clone());

            self.register(&channel);

            let descriptor = channel.descriptor();
            debug!(
                channel = %descriptor.name,
                auto_subscribe = descriptor.policy.auto_subscribe,
                "channel built"
            );
            if descriptor.policy.auto_subscribe {
                Ok(())
            } else {
                channel.subscribe()
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "initial subscribe failed");
            lifecycle.finish(Err(err));
        }
    }

    fn register(&self, channel: &Arc<C>) {
        let expected = channel.descriptor().name.clone();
        let weak = Arc::downgrade(&self.lifecycle);
        let mapper = self.mapper.clone();
        channel.on_message(Box::new(move |routed: &str, message: RawMessage| {
            let Some(lifecycle) = weak.upgrade() else {
                return;
            };
            if !lifecycle.is_active() {
                return;
            }
            if routed != expected {
                trace!(expected = %expected, routed, "dropping frame for another channel");
                return;
            }
            if let Some(output) = mapper.map(&message) {
                if lifecycle.is_active() {
                    lifecycle.emit(output);
                }
            }
        }));

        let weak = Arc::downgrade(&self.lifecycle);
        let weak_channel: Weak<C> = Arc::downgrade(channel);
        channel.on_unsubscribed(Box::new(move || {
            let Some(lifecycle) = weak.upgrade() else {
                return;
            };
            if !lifecycle.is_active() || !lifecycle.has_subscriber() {
                return;
            }
            let Some(channel) = weak_channel.upgrade() else {
                return;
            };
            let descriptor = channel.descriptor();
            if !descriptor.policy.auto_resubscribe {
                debug!(channel = %descriptor.name, "unsubscribed by server");
                return;
            }

            debug!(channel = %descriptor.name, "resubscribing");
            if let Err(err) = channel.subscribe() {
                warn!(channel = %descriptor.name, error = %err, "resubscribe failed");
            }
        }));

        let weak = Arc::downgrade(&self.lifecycle);
        channel.on_failure(Box::new(move |err: EffectError| {
            if let Some(lifecycle) = weak.upgrade() {
                lifecycle.finish(Err(err));
            }
        }));
    }
}
