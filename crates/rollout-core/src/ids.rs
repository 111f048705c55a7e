use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque rollout identifier. UUID-shaped; primary key for both the
/// metadata index and the item log.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid conversation id: {0}")]
pub struct InvalidConversationId(String);

impl FromStr for ConversationId {
    type Err = InvalidConversationId;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| InvalidConversationId(s.to_owned()))
    }
}

impl AsRef<Uuid> for ConversationId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ConversationId::new();
        let b = ConversationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ConversationId::new();
        let s = id.to_string();
        let parsed: ConversationId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_string_is_rejected() {
        assert!("not-a-uuid".parse::<ConversationId>().is_err());
        assert!("".parse::<ConversationId>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let id = ConversationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<ConversationId> = (0..100).map(|_| ConversationId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
