//! Core types shared by the transport, the event source and the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primitive value a channel can be parameterized with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Subscription policy carried by a channel handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Channel subscribes itself when built. When false, the event source
    /// issues the subscribe request.
    pub auto_subscribe: bool,

    /// Re-issue a subscribe request when the server drops the subscription.
    pub auto_resubscribe: bool,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            auto_resubscribe: true,
        }
    }
}

impl ChannelPolicy {
    /// Policy for channels that wait for an explicit subscribe request.
    pub fn manual() -> Self {
        Self {
            auto_subscribe: false,
            auto_resubscribe: false,
        }
    }
}

/// Identity of one channel subscription: name, parameters and policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub policy: ChannelPolicy,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            policy: ChannelPolicy::default(),
        }
    }

    /// Add a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Canonical wire identifier: `{"channel": name, ...params}` with sorted keys.
    ///
    /// A parameter named `channel` is shadowed by the channel name.
    pub fn identifier(&self) -> String {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.params {
            let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            map.insert(key.clone(), value);
        }
        map.insert(
            "channel".to_string(),
            serde_json::Value::String(self.name.clone()),
        );
        // serde_json::Map is a BTreeMap without `preserve_order`, so keys come out sorted.
        serde_json::Value::Object(map).to_string()
    }
}

/// Kind of an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Welcome,
    Ping,
    Confirmation,
    Rejection,
    Disconnect,
    Data,
}

impl MessageKind {
    pub fn is_control(self) -> bool {
        !self.is_data()
    }

    pub fn is_data(self) -> bool {
        matches!(self, MessageKind::Data)
    }
}

/// Envelope delivered by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawMessage {
    /// A data frame carrying `payload`.
    pub fn data(payload: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Data,
            payload,
        }
    }

    /// A control frame without payload.
    pub fn control(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
        }
    }
}

/// Correlation tag attached to every action an effect instance emits.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        FlowId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowId({})", self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlowId {
    fn from(id: &str) -> Self {
        FlowId(id.to_string())
    }
}

impl From<String> for FlowId {
    fn from(id: String) -> Self {
        FlowId(id)
    }
}
