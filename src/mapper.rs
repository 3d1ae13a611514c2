//! Mapping capabilities injected into a channel effect.
//!
//! An [`OutputMapper`] turns raw frames into typed outputs and drops what it
//! does not recognize. An [`ActionMapper`] turns one typed output plus a state
//! snapshot into zero or more domain actions. Both are expected to be pure.

use crate::types::RawMessage;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;

/// Raw input to typed output. `None` means "not relevant, drop".
pub trait OutputMapper: Send + Sync + 'static {
    type Input;
    type Output;

    fn map(&self, input: &Self::Input) -> Option<Self::Output>;
}

/// Typed output plus state snapshot to an ordered group of actions.
pub trait ActionMapper: Send + 'static {
    type Output;
    type State;
    type Action;

    fn map(&self, output: Self::Output, state: &Self::State) -> Vec<Self::Action>;
}

/// Output mapper over data frames only. Control frames never reach the closure.
pub struct DataMapper<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> DataMapper<F, T>
where
    F: Fn(&serde_json::Value) -> Option<T> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _output: PhantomData,
        }
    }
}

impl<F, T> OutputMapper for DataMapper<F, T>
where
    F: Fn(&serde_json::Value) -> Option<T> + Send + Sync + 'static,
    T: 'static,
{
    type Input = RawMessage;
    type Output = T;

    fn map(&self, input: &RawMessage) -> Option<T> {
        if !input.kind.is_data() {
            return None;
        }
        (self.f)(&input.payload)
    }
}

/// Output mapper that decodes data payloads with serde.
///
/// Payloads that fail to decode are dropped. With a discriminator set, only
/// payloads whose `type` field equals it are considered.
pub struct JsonDataMapper<T> {
    discriminator: Option<String>,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonDataMapper<T> {
    pub fn new() -> Self {
        Self {
            discriminator: None,
            _output: PhantomData,
        }
    }

    /// Only accept payloads tagged `{"type": "<kind>"}`.
    pub fn with_type(kind: impl Into<String>) -> Self {
        Self {
            discriminator: Some(kind.into()),
            _output: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Default for JsonDataMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OutputMapper for JsonDataMapper<T>
where
    T: DeserializeOwned + 'static,
{
    type Input = RawMessage;
    type Output = T;

    fn map(&self, input: &RawMessage) -> Option<T> {
        if !input.kind.is_data() {
            return None;
        }

        if let Some(ref expected) = self.discriminator {
            let tag = input.payload.get("type").and_then(|v| v.as_str());
            if tag != Some(expected.as_str()) {
                return None;
            }
        }

        T::deserialize(&input.payload).ok()
    }
}

/// Action mapper backed by a closure.
pub struct FnActionMapper<F, O, S> {
    f: F,
    _types: PhantomData<fn(O, &S)>,
}

impl<F, O, S, A> FnActionMapper<F, O, S>
where
    F: Fn(O, &S) -> Vec<A> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, O, S, A> ActionMapper for FnActionMapper<F, O, S>
where
    F: Fn(O, &S) -> Vec<A> + Send + 'static,
    O: 'static,
    S: 'static,
{
    type Output = O;
    type State = S;
    type Action = A;

    fn map(&self, output: O, state: &S) -> Vec<A> {
        (self.f)(output, state)
    }
}
