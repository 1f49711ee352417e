//! Debugger events.
//!
//! Effects created with `on_track` / `on_trigger` hooks receive one of these
//! for every dependency they gain and every notification they receive.

use serde::Serialize;

use super::runtime::{TrackOp, TriggerOp};
use super::subscriber::SubscriberId;
use crate::observable::{PropKey, TargetId};

/// The operation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Where an event happened, minus the effect it is delivered to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventInfo {
    /// Raw target of the field; `None` for refs and computed cells.
    pub target: Option<TargetId>,
    pub op: Operation,
    pub key: Option<PropKey>,
}

impl EventInfo {
    pub fn track(target: Option<TargetId>, op: TrackOp, key: Option<PropKey>) -> Self {
        Self {
            target,
            op: Operation::Track(op),
            key,
        }
    }

    pub fn trigger(target: Option<TargetId>, op: TriggerOp, key: Option<PropKey>) -> Self {
        Self {
            target,
            op: Operation::Trigger(op),
            key,
        }
    }
}

/// Delivered to an effect's debugger hooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebuggerEvent {
    pub effect: SubscriberId,
    #[serde(flatten)]
    pub info: EventInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_flat() {
        let event = DebuggerEvent {
            effect: SubscriberId::new(),
            info: EventInfo::trigger(None, TriggerOp::Set, Some(PropKey::from("foo"))),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["op"], serde_json::json!({ "trigger": "set" }));
        assert_eq!(json["key"], serde_json::json!({ "name": "foo" }));
        assert!(json["target"].is_null());
    }
}
