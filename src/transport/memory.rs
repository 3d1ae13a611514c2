//! In-process transport for tests, demos and loopback wiring.

use crate::error::{EffectError, Result};
use crate::types::{ChannelDescriptor, RawMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::{Channel, FailureListener, MessageListener, UnsubscribeListener};

type SharedMessageListener = Arc<dyn Fn(&str, RawMessage) + Send + Sync>;
type SharedUnsubscribeListener = Arc<dyn Fn() + Send + Sync>;
type SharedFailureListener = Arc<dyn Fn(EffectError) + Send + Sync>;

struct TransportInner {
    /// Open channels by ID. Weak so dropped handles fall out on the next prune.
    channels: RwLock<HashMap<u64, Weak<MemoryChannel>>>,
    /// Counter for generating channel IDs.
    next_id: AtomicU64,
    connected: AtomicBool,
}

/// Multiplexes named channels over one simulated connection.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<TransportInner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(true),
            }),
        }
    }

    /// Build a channel handle on this connection.
    ///
    /// Channels whose policy has `auto_subscribe` count as subscribed right away.
    pub fn channel(&self, descriptor: ChannelDescriptor) -> Arc<MemoryChannel> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let subscribed = descriptor.policy.auto_subscribe && self.is_connected();
        let channel = Arc::new(MemoryChannel {
            id,
            descriptor,
            transport: Arc::downgrade(&self.inner),
            subscribed: AtomicBool::new(subscribed),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            fail_next_subscribe: Mutex::new(None),
            fail_unsubscribes: AtomicBool::new(false),
            message_listeners: RwLock::new(Vec::new()),
            unsubscribe_listeners: RwLock::new(Vec::new()),
            failure_listeners: RwLock::new(Vec::new()),
        });

        let mut channels = self.inner.channels.write();
        channels.retain(|_, weak| weak.strong_count() > 0);
        channels.insert(id, Arc::downgrade(&channel));

        channel
    }

    /// Route a frame to every subscribed channel with this name.
    ///
    /// Returns the number of channels that received it.
    pub fn publish(&self, name: &str, message: RawMessage) -> usize {
        let targets: Vec<Arc<MemoryChannel>> = {
            let channels = self.inner.channels.read();
            channels
                .values()
                .filter_map(Weak::upgrade)
                .filter(|c| c.descriptor.name == name && c.is_subscribed())
                .collect()
        };

        for channel in &targets {
            channel.deliver_as(name, message.clone());
        }

        targets.len()
    }

    /// Drop the connection, failing every open channel.
    pub fn disconnect(&self, reason: &str) {
        self.inner.connected.store(false, Ordering::SeqCst);

        let open: Vec<Arc<MemoryChannel>> = {
            let channels = self.inner.channels.read();
            channels.values().filter_map(Weak::upgrade).collect()
        };

        debug!(channels = open.len(), reason, "memory transport disconnected");
        for channel in open {
            channel.fail(reason);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of live channel handles.
    pub fn channel_count(&self) -> usize {
        self.inner
            .channels
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel handle produced by [`MemoryTransport`].
pub struct MemoryChannel {
    id: u64,
    descriptor: ChannelDescriptor,
    transport: Weak<TransportInner>,
    subscribed: AtomicBool,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    /// Reason for the next subscribe request to fail with.
    fail_next_subscribe: Mutex<Option<String>>,
    fail_unsubscribes: AtomicBool,
    message_listeners: RwLock<Vec<SharedMessageListener>>,
    unsubscribe_listeners: RwLock<Vec<SharedUnsubscribeListener>>,
    failure_listeners: RwLock<Vec<SharedFailureListener>>,
}

impl MemoryChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Explicit subscribe requests seen so far.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        *self.fail_next_subscribe.lock() = Some(reason.into());
    }

    /// Make every unsubscribe request fail from now on.
    pub fn fail_unsubscribes(&self) {
        self.fail_unsubscribes.store(true, Ordering::SeqCst);
    }

    /// Hand a frame to the listeners under this channel's own name,
    /// whether or not the channel is subscribed (an in-flight frame).
    pub fn deliver(&self, message: RawMessage) {
        self.deliver_as(&self.descriptor.name, message);
    }

    /// Hand a frame to the listeners as if it was routed to `name`.
    pub fn deliver_as(&self, name: &str, message: RawMessage) {
        let listeners = self.message_listeners.read().clone();
        for listener in listeners {
            listener(name, message.clone());
        }
    }

    /// Simulate the server dropping the subscription.
    pub fn notify_unsubscribed(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
        let listeners = self.unsubscribe_listeners.read().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Simulate a connection fault reaching this channel.
    pub fn fail(&self, reason: &str) {
        self.subscribed.store(false, Ordering::SeqCst);
        let listeners = self.failure_listeners.read().clone();
        for listener in listeners {
            listener(EffectError::Transport(reason.to_string()));
        }
    }

    fn connected(&self) -> bool {
        self.transport
            .upgrade()
            .is_some_and(|t| t.connected.load(Ordering::SeqCst))
    }
}

impl Channel for MemoryChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    fn on_message(&self, listener: MessageListener) {
        self.message_listeners.write().push(Arc::from(listener));
    }

    fn on_unsubscribed(&self, listener: UnsubscribeListener) {
        self.unsubscribe_listeners.write().push(Arc::from(listener));
    }

    fn on_failure(&self, listener: FailureListener) {
        self.failure_listeners.write().push(Arc::from(listener));
    }

    fn subscribe(&self) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if !self.connected() {
            return Err(EffectError::Transport("not connected".to_string()));
        }
        if let Some(reason) = self.fail_next_subscribe.lock().take() {
            return Err(EffectError::subscribe(&self.descriptor.name, reason));
        }

        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_unsubscribes.load(Ordering::SeqCst) {
            return Err(EffectError::unsubscribe(
                &self.descriptor.name,
                "server refused",
            ));
        }

        self.subscribed.store(false, Ordering::SeqCst);
        Ok(())
    }
}
