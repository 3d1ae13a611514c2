//! # Cable Effect
//!
//! Bridges a socket channel subscription into an application's action stream.
//!
//! ## Core Concepts
//!
//! - **Channels**: Named, parameterized subscriptions over one transport connection
//! - **Event Source**: Builds the channel on first demand, delivers mapped outputs, tears down on cancel
//! - **Debounce**: Collapses bursts of outputs into the last one per quiet period
//! - **Action Mapping**: Each output is paired with one consistent state snapshot
//! - **Fault Translation**: Any transport failure becomes one terminal action, then the stream ends
//!
//! ## Example
//!
//! ```ignore
//! use cable_effect::{ChannelDescriptor, ChannelEffect, FnActionMapper, JsonDataMapper, MemoryTransport};
//!
//! let transport = MemoryTransport::new();
//! let stream = ChannelEffect::new(
//!     "chats",
//!     move || Some(transport.channel(ChannelDescriptor::new("ChatChannel"))),
//!     JsonDataMapper::<NewChat>::with_type("new_chat"),
//!     FnActionMapper::new(|chat: NewChat, state: &AppState| vec![Action::Insert(chat)]),
//!     app_state.clone(),
//! )
//! .run()?;
//!
//! for item in stream {
//!     println!("{:?}", item);
//! }
//! ```

pub mod action;
pub mod config;
pub mod debounce;
pub mod effect;
pub mod error;
pub mod fault;
pub mod mapper;
pub mod registry;
pub mod source;
pub mod state;
pub mod transport;
pub mod types;

// Re-exports
pub use action::StateCorrelatedMapper;
pub use config::{EffectConfig, DEFAULT_DEBOUNCE};
pub use debounce::Debouncer;
pub use effect::{ActionStream, ChannelEffect};
pub use error::{EffectError, Result};
pub use fault::{ErrorAction, FaultTranslator, FlowAction};
pub use mapper::{ActionMapper, DataMapper, FnActionMapper, JsonDataMapper, OutputMapper};
pub use registry::EffectRegistry;
pub use source::{CancelHandle, ChannelEventSource, SubscriptionState};
pub use state::{SharedState, StateAccess};
pub use transport::{
    Channel, FailureListener, MemoryChannel, MemoryTransport, MessageListener,
    UnsubscribeListener,
};
pub use types::*;
