use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{ChannelId, Message};

/// Body of `POST /chat/init`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub display_name: Option<String>,
    #[serde(default, alias = "serverId", deserialize_with = "lenient_channel_id")]
    pub channel_id: Option<ChannelId>,
}

/// Body of `POST /chat/send`.
///
/// `chatType` and `serverId` are accepted as older spellings of
/// `channelClass` and `channelId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub display_name: Option<String>,
    /// Raw body text; trimming and length checks happen in the relay.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "chatType")]
    pub channel_class: Option<String>,
    #[serde(default, alias = "serverId", deserialize_with = "lenient_channel_id")]
    pub channel_id: Option<ChannelId>,
}

/// Query string of `GET /chat/messages`. Every field arrives as text and is
/// parsed leniently by the relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    #[serde(default, alias = "chatType")]
    pub channel_class: Option<String>,
    #[serde(default, alias = "serverId")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub success: bool,
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub message_data: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub count: usize,
}

/// Shape of every failure response. Carries no caller-identifying detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

/// Accept a string or a number; blank strings and `null` become `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(match raw {
        Some(StringOrNumber::Text(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(StringOrNumber::Number(n)) => Some(n.to_string()),
        None => None,
    })
}

fn lenient_channel_id<'de, D>(deserializer: D) -> Result<Option<ChannelId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(match raw {
        Some(StringOrNumber::Text(s)) => ChannelId::parse(&s),
        Some(StringOrNumber::Number(n)) => ChannelId::from_number(&n),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_legacy_aliases() {
        let req: SendRequest = serde_json::from_str(
            r#"{"userId": 991, "username": "A", "message": "hi", "chatType": "local", "serverId": 42}"#,
        )
        .unwrap();

        assert_eq!(req.user_id.as_deref(), Some("991"));
        assert_eq!(req.channel_class.as_deref(), Some("local"));
        assert_eq!(req.channel_id, ChannelId::parse("42"));
    }

    #[test]
    fn test_send_request_blank_fields_are_absent() {
        let req: SendRequest = serde_json::from_str(
            r#"{"userId": "  ", "username": "A", "message": "hi", "channelId": null}"#,
        )
        .unwrap();

        assert!(req.user_id.is_none());
        assert!(req.channel_id.is_none());
        assert!(req.channel_class.is_none());
    }

    #[test]
    fn test_init_request_missing_fields_default() {
        let req: InitRequest = serde_json::from_str("{}").unwrap();
        assert!(req.user_id.is_none());
        assert!(req.username.is_none());
    }
}
