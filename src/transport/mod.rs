//! Channel transport boundary.
//!
//! A [`Channel`] is one named, possibly parameterized subscription
//! multiplexed over a persistent socket connection. The socket itself, its
//! framing and its reconnect policy live behind this trait.
//!
//! Listeners are invoked from the transport's own threads and may fire
//! concurrently with, or after, a subscriber's cancellation.
//!
//! # Example
//!
//! ```ignore
//! let transport = MemoryTransport::new();
//! let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
//!
//! channel.on_message(Box::new(|name, message| println!("{name}: {message:?}")));
//! channel.subscribe()?;
//!
//! transport.publish("ChatChannel", RawMessage::data(json!({"id": 1})));
//! ```

mod memory;

pub use memory::{MemoryChannel, MemoryTransport};

use crate::error::{EffectError, Result};
use crate::types::{ChannelDescriptor, RawMessage};

/// Called for every routed frame with the name of the channel it was routed to.
pub type MessageListener = Box<dyn Fn(&str, RawMessage) + Send + Sync>;

/// Called when the server drops the subscription.
pub type UnsubscribeListener = Box<dyn Fn() + Send + Sync>;

/// Called when the connection carrying the channel fails.
pub type FailureListener = Box<dyn Fn(EffectError) + Send + Sync>;

/// Handle to one channel subscription.
pub trait Channel: Send + Sync + 'static {
    /// Name, parameters and policy this channel was built with.
    fn descriptor(&self) -> &ChannelDescriptor;

    fn on_message(&self, listener: MessageListener);

    fn on_unsubscribed(&self, listener: UnsubscribeListener);

    fn on_failure(&self, listener: FailureListener);

    /// Ask the server to (re)subscribe this channel.
    fn subscribe(&self) -> Result<()>;

    /// Ask the server to drop this channel's subscription.
    fn unsubscribe(&self) -> Result<()>;
}
