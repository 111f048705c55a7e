use serde::{Deserialize, Serialize};

/// Kind of a sequenced log entry. The payload behind each kind is opaque
/// to the storage engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutItemKind {
    SessionMeta,
    ResponseItem,
    EventMsg,
    Compacted,
    TurnContext,
}

impl std::fmt::Display for RolloutItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionMeta => write!(f, "session_meta"),
            Self::ResponseItem => write!(f, "response_item"),
            Self::EventMsg => write!(f, "event_msg"),
            Self::Compacted => write!(f, "compacted"),
            Self::TurnContext => write!(f, "turn_context"),
        }
    }
}

impl std::str::FromStr for RolloutItemKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_meta" => Ok(Self::SessionMeta),
            "response_item" => Ok(Self::ResponseItem),
            "event_msg" => Ok(Self::EventMsg),
            "compacted" => Ok(Self::Compacted),
            "turn_context" => Ok(Self::TurnContext),
            other => Err(format!("unknown rollout item kind: {other}")),
        }
    }
}

/// One log entry as constructed by the agent runtime. The engine stores the
/// payload untouched and returns it byte-for-byte equivalent on replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RolloutItem {
    #[serde(rename = "type")]
    pub kind: RolloutItemKind,
    pub payload: serde_json::Value,
}

impl RolloutItem {
    pub fn new(kind: RolloutItemKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_display_roundtrip() {
        let kinds = [
            RolloutItemKind::SessionMeta,
            RolloutItemKind::ResponseItem,
            RolloutItemKind::EventMsg,
            RolloutItemKind::Compacted,
            RolloutItemKind::TurnContext,
        ];
        for kind in kinds {
            let parsed: RolloutItemKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("tool_call".parse::<RolloutItemKind>().is_err());
    }

    #[test]
    fn item_serde_uses_type_tag() {
        let item = RolloutItem::new(RolloutItemKind::EventMsg, json!({"message": "hi"}));
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "event_msg");
        assert_eq!(v["payload"]["message"], "hi");
        let back: RolloutItem = serde_json::from_value(v).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn payload_preserved_exactly() {
        let payload = json!({"nested": {"a": [1, 2, 3]}, "b": null, "c": 1.5});
        let item = RolloutItem::new(RolloutItemKind::ResponseItem, payload.clone());
        let json = serde_json::to_string(&item).unwrap();
        let back: RolloutItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload, payload);
    }
}
