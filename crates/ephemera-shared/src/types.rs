use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::MESSAGE_ID_RANDOM_BYTES;
use crate::error::TypeError;

/// Which partition of the message stream a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelClass {
    Global,
    Local,
}

impl ChannelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelClass::Global => "global",
            ChannelClass::Local => "local",
        }
    }
}

impl FromStr for ChannelClass {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(ChannelClass::Global),
            "local" => Ok(ChannelClass::Local),
            other => Err(TypeError::UnknownChannelClass(other.to_string())),
        }
    }
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque local channel identifier, held in canonical string form.
///
/// Callers reach the same channel from different places (a JSON number in a
/// send body, a query-string value in a fetch), so every identifier is
/// normalized before it is compared: surrounding whitespace is dropped and
/// integral numbers are rendered without a fractional part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Canonicalize a textual identifier. Blank input yields `None`.
    ///
    /// Text that is a valid JSON number goes through the same rule as
    /// [`from_number`](Self::from_number), so `"42.0"`, `"42"` and the
    /// number `42.0` all name one channel.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if looks_numeric(trimmed) {
            if let Some(id) = serde_json::Number::from_str(trimmed)
                .ok()
                .and_then(|n| Self::from_number(&n))
            {
                return Some(id);
            }
        }
        Some(Self(trimmed.to_string()))
    }

    /// Canonicalize a numeric identifier.
    pub fn from_number(n: &serde_json::Number) -> Option<Self> {
        if let Some(u) = n.as_u64() {
            return Some(Self(u.to_string()));
        }
        if let Some(i) = n.as_i64() {
            return Some(Self(i.to_string()));
        }
        let f = n.as_f64()?;
        if !f.is_finite() {
            return None;
        }
        if f.fract() == 0.0 && f.abs() < 9.0e15 {
            Some(Self(format!("{}", f as i64)))
        } else {
            Some(Self(f.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn looks_numeric(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully resolved destination: the global channel or one named local
/// channel. A local target without an identifier cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    Global,
    Local(ChannelId),
}

impl ChannelTarget {
    /// Combine a class with an optional identifier.
    ///
    /// Global targets ignore any identifier supplied alongside them; local
    /// targets require one.
    pub fn resolve(class: ChannelClass, channel_id: Option<ChannelId>) -> Result<Self, TypeError> {
        match class {
            ChannelClass::Global => Ok(ChannelTarget::Global),
            ChannelClass::Local => channel_id
                .map(ChannelTarget::Local)
                .ok_or(TypeError::MissingChannelId),
        }
    }

    pub fn class(&self) -> ChannelClass {
        match self {
            ChannelTarget::Global => ChannelClass::Global,
            ChannelTarget::Local(_) => ChannelClass::Local,
        }
    }

    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            ChannelTarget::Global => None,
            ChannelTarget::Local(id) => Some(id),
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::Global => f.write_str("global"),
            ChannelTarget::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// A relayed chat message. Never mutated once stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub username: String,
    pub display_name: String,
    pub body: String,
    pub channel_class: ChannelClass,
    /// `null` for global messages.
    pub channel_id: Option<ChannelId>,
    /// Milliseconds since the Unix epoch; the ordering key.
    pub created_at: i64,
}

impl Message {
    pub fn target(&self) -> ChannelTarget {
        match &self.channel_id {
            Some(id) if self.channel_class == ChannelClass::Local => ChannelTarget::Local(id.clone()),
            _ => ChannelTarget::Global,
        }
    }
}

/// A validated message that has not yet been given an id or timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: String,
    pub username: String,
    pub display_name: String,
    pub body: String,
    pub target: ChannelTarget,
}

impl MessageDraft {
    /// Assign the creation time and a fresh id.
    pub fn stamp(self, created_at: i64) -> Message {
        Message {
            id: generate_message_id(created_at),
            sender_id: self.sender_id,
            username: self.username,
            display_name: self.display_name,
            body: self.body,
            channel_class: self.target.class(),
            channel_id: self.target.channel_id().cloned(),
            created_at,
        }
    }
}

/// `<created_at>-<16 hex chars>`. Unique in practice, not by construction.
pub fn generate_message_id(created_at: i64) -> String {
    let mut bytes = [0u8; MESSAGE_ID_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", created_at, hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(target: ChannelTarget) -> MessageDraft {
        MessageDraft {
            sender_id: "u1".into(),
            username: "alice".into(),
            display_name: "Alice".into(),
            body: "hi".into(),
            target,
        }
    }

    #[test]
    fn test_channel_class_parse() {
        assert_eq!("Local".parse::<ChannelClass>().unwrap(), ChannelClass::Local);
        assert_eq!(" global ".parse::<ChannelClass>().unwrap(), ChannelClass::Global);
        assert!("team".parse::<ChannelClass>().is_err());
    }

    #[test]
    fn test_channel_id_normalization() {
        let from_text = ChannelId::parse(" 42 ").unwrap();
        let from_int = ChannelId::from_number(&serde_json::Number::from(42u64)).unwrap();
        let from_float =
            ChannelId::from_number(&serde_json::Number::from_f64(42.0).unwrap()).unwrap();

        assert_eq!(from_text, from_int);
        assert_eq!(from_int, from_float);
        assert!(ChannelId::parse("   ").is_none());

        assert_eq!(ChannelId::parse("42.0").unwrap(), from_float);
        assert_eq!(ChannelId::parse(" 42.0 ").unwrap().as_str(), "42");
        assert_eq!(ChannelId::parse("4.2e1").unwrap().as_str(), "42");
        assert_eq!(ChannelId::parse("42.5").unwrap().as_str(), "42.5");
        assert_eq!(ChannelId::parse("-7").unwrap().as_str(), "-7");
    }

    #[test]
    fn test_channel_id_non_numeric_text_is_kept() {
        assert_eq!(ChannelId::parse("srv-42").unwrap().as_str(), "srv-42");
        assert_eq!(ChannelId::parse("007").unwrap().as_str(), "007");
        assert_eq!(ChannelId::parse("1.").unwrap().as_str(), "1.");
        assert_eq!(ChannelId::parse("-").unwrap().as_str(), "-");
    }

    #[test]
    fn test_resolve_local_requires_id() {
        assert_eq!(
            ChannelTarget::resolve(ChannelClass::Local, None),
            Err(TypeError::MissingChannelId)
        );
    }

    #[test]
    fn test_resolve_global_drops_id() {
        let target =
            ChannelTarget::resolve(ChannelClass::Global, ChannelId::parse("7")).unwrap();
        assert_eq!(target, ChannelTarget::Global);
        assert!(target.channel_id().is_none());
    }

    #[test]
    fn test_stamp_assigns_id_and_channel() {
        let id = ChannelId::parse("srv-1").unwrap();
        let msg = draft(ChannelTarget::Local(id.clone())).stamp(1_700_000_000_000);

        assert!(msg.id.starts_with("1700000000000-"));
        assert_eq!(msg.id.len(), "1700000000000-".len() + 16);
        assert_eq!(msg.channel_class, ChannelClass::Local);
        assert_eq!(msg.channel_id, Some(id.clone()));
        assert_eq!(msg.target(), ChannelTarget::Local(id));
    }

    #[test]
    fn test_global_message_serializes_null_channel() {
        let msg = draft(ChannelTarget::Global).stamp(5);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["channelClass"], "global");
        assert!(json["channelId"].is_null());
        assert_eq!(json["createdAt"], 5);
        assert_eq!(json["displayName"], "Alice");
    }
}
