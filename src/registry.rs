//! Cancellation of running effects by flow identifier.

use crate::source::{CancelHandle, SubscriptionState};
use crate::types::FlowId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Tracks running effects so an effect runner can cancel them by key.
///
/// Registering under a key that already has a running effect cancels the
/// old one first, so at most one effect runs per flow.
pub struct EffectRegistry {
    effects: RwLock<HashMap<FlowId, CancelHandle>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            effects: RwLock::new(HashMap::new()),
        }
    }

    /// Track `handle` under `flow_id`, cancelling any in-flight effect with the same key.
    ///
    /// Returns true if an in-flight effect was replaced. Registering the same
    /// effect again under its own key is a no-op.
    pub fn register(&self, flow_id: FlowId, handle: CancelHandle) -> bool {
        let replaced = {
            let mut effects = self.effects.write();
            effects.retain(|_, h| is_running(h));
            effects.insert(flow_id.clone(), handle.clone())
        };

        match replaced {
            Some(previous) if previous.same_as(&handle) => false,
            Some(previous) => {
                debug!(flow = %flow_id, "cancelling in-flight effect");
                previous.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the effect registered under `flow_id`. Returns false if there was none.
    pub fn cancel(&self, flow_id: &FlowId) -> bool {
        let removed = self.effects.write().remove(flow_id);
        match removed {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything. Returns how many handles were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancelHandle> = self.effects.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.cancel();
        }
        drained.len()
    }

    pub fn contains(&self, flow_id: &FlowId) -> bool {
        self.effects.read().contains_key(flow_id)
    }

    /// Registered handles, including ones that finished since the last registration.
    pub fn len(&self) -> usize {
        self.effects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.read().is_empty()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_running(handle: &CancelHandle) -> bool {
    matches!(
        handle.state(),
        SubscriptionState::Idle | SubscriptionState::Active
    )
}
