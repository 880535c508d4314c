use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-assigned identity of one inbound message.
///
/// Every redelivery of the same message carries the same id, so this is the
/// key the session registry deduplicates on. The value is opaque: WeChat
/// hands out 64-bit integers, other transports may use strings.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
