//! Fault translation: the one place failures become actions.

use crate::error::EffectError;
use crate::types::FlowId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Terminal action emitted once when an effect fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAction {
    pub error_description: String,
    pub flow_id: FlowId,
}

/// Item of an effect's action stream.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowAction<A> {
    /// A domain action produced by the action mapper.
    Action { flow_id: FlowId, action: A },
    /// The terminal failure. Nothing follows it.
    Failed(ErrorAction),
}

impl<A> FlowAction<A> {
    pub fn flow_id(&self) -> &FlowId {
        match self {
            FlowAction::Action { flow_id, .. } => flow_id,
            FlowAction::Failed(error) => &error.flow_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowAction::Failed(_))
    }

    /// The domain action, if this is not the terminal failure.
    pub fn into_action(self) -> Option<A> {
        match self {
            FlowAction::Action { action, .. } => Some(action),
            FlowAction::Failed(_) => None,
        }
    }
}

/// Converts the first failure it sees into an [`ErrorAction`]; later ones are ignored.
#[derive(Debug)]
pub struct FaultTranslator {
    flow_id: FlowId,
    fired: AtomicBool,
}

impl FaultTranslator {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            fired: AtomicBool::new(false),
        }
    }

    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// `Some` for the first failure only.
    pub fn translate(&self, error: &EffectError) -> Option<ErrorAction> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(ErrorAction {
            error_description: error.description(),
            flow_id: self.flow_id.clone(),
        })
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Tag a domain action with this translator's flow.
    pub fn tag<A>(&self, action: A) -> FlowAction<A> {
        FlowAction::Action {
            flow_id: self.flow_id.clone(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translates_once() {
        let translator = FaultTranslator::new(FlowId::from("chats"));
        let err = EffectError::Transport("socket closed".to_string());

        let action = translator.translate(&err).unwrap();
        assert_eq!(action.flow_id, FlowId::from("chats"));
        assert!(action.error_description.contains("socket closed"));

        assert!(translator.translate(&err).is_none());
        assert!(translator.has_fired());
    }

    #[test]
    fn test_error_action_wire_shape() {
        let action = ErrorAction {
            error_description: "boom".to_string(),
            flow_id: FlowId::from("chats"),
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"errorDescription": "boom", "flowId": "chats"})
        );
    }

    #[test]
    fn test_flow_action_helpers() {
        let translator = FaultTranslator::new(FlowId::from("f"));
        let tagged = translator.tag(5);
        assert_eq!(tagged.flow_id().as_str(), "f");
        assert!(!tagged.is_terminal());
        assert_eq!(tagged.into_action(), Some(5));

        let failed: FlowAction<i32> = FlowAction::Failed(
            translator
                .translate(&EffectError::Rejected("ChatChannel".into()))
                .unwrap(),
        );
        assert!(failed.is_terminal());
        assert_eq!(failed.into_action(), None);
    }
}
