//! Wire shapes for the chat-gateway connection (§4.10/§4.11). The gateway
//! is treated as a black box beyond the handful of fields FireFrp reads or
//! writes; anything else round-trips through the `Opaque` variants instead
//! of being rejected.

use serde::{Deserialize, Serialize};

/// A single message segment. `at`/`text` are the only kinds FireFrp
/// constructs or inspects; everything else (images, replies, faces, ...)
/// passes through untouched as [`MessageSegment::Opaque`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageSegment {
    At { at: String },
    Text { text: String },
    Opaque(serde_json::Value),
}

impl MessageSegment {
    pub fn at(user_id: impl Into<String>) -> Self {
        MessageSegment::At { at: user_id.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        MessageSegment::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageSegment::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_at(&self) -> Option<&str> {
        match self {
            MessageSegment::At { at } => Some(at.as_str()),
            _ => None,
        }
    }
}

/// A response frame correlated with an outstanding [`crate::transport::BotTransport::call_api`]
/// call via `echo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponseFrame {
    pub status: String,
    #[serde(default)]
    pub retcode: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub message: String,
    pub echo: String,
}

impl ApiResponseFrame {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// The `sender` object on a group-message event (§6.4): `card` is the
/// group-local nickname set by an admin, `nickname` the account-wide one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Sender {
    /// `card` takes priority over `nickname` when both are set and
    /// non-empty, matching how group chat clients render a display name.
    pub fn display_name(&self) -> Option<&str> {
        self.card
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.nickname.as_deref().filter(|s| !s.is_empty()))
    }
}

/// An unsolicited event pushed by the gateway — a chat message, a
/// lifecycle notice, or anything else carrying a `post_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub post_type: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    pub self_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default)]
    pub message: Vec<MessageSegment>,
}

/// Everything received over the connection is one of these three shapes;
/// anything matching neither an API response nor a recognised event still
/// round-trips as [`IncomingFrame::Opaque`] rather than being dropped,
/// per the "opaque passthrough" design note.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingFrame {
    ApiResponse(ApiResponseFrame),
    Event(EventFrame),
    Opaque(serde_json::Value),
}

/// An outgoing `callApi` request.
#[derive(Debug, Clone, Serialize)]
pub struct ApiCallFrame {
    pub action: String,
    pub params: serde_json::Value,
    pub echo: String,
}

/// Gateways commonly use numeric chat ids; accept either a JSON number or
/// a string and normalise to `String` either way.
fn deserialize_id_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_segment_round_trips_at_and_text() {
        let at = MessageSegment::at("12345");
        let json = serde_json::to_string(&at).unwrap();
        assert_eq!(json, r#"{"at":"12345"}"#);
        let parsed: MessageSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_at(), Some("12345"));

        let text = MessageSegment::text("hello");
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, r#"{"text":"hello"}"#);
    }

    #[test]
    fn unrecognised_segment_round_trips_as_opaque() {
        let raw = serde_json::json!({"type": "image", "data": {"url": "x"}});
        let parsed: MessageSegment = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(parsed, MessageSegment::Opaque(_)));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn incoming_frame_picks_api_response_over_event() {
        let raw = serde_json::json!({"status": "ok", "data": {}, "echo": "abc"});
        let frame: IncomingFrame = serde_json::from_value(raw).unwrap();
        assert!(matches!(frame, IncomingFrame::ApiResponse(_)));
    }

    #[test]
    fn incoming_frame_parses_group_message_event_with_numeric_ids() {
        let raw = serde_json::json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 10001,
            "user_id": 10002,
            "group_id": 10003,
            "message": [{"at": "10001"}, {"text": " open"}]
        });
        let frame: IncomingFrame = serde_json::from_value(raw).unwrap();
        match frame {
            IncomingFrame::Event(event) => {
                assert_eq!(event.self_id.as_deref(), Some("10001"));
                assert_eq!(event.group_id.as_deref(), Some("10003"));
                assert_eq!(event.message.len(), 2);
            },
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn unrecognised_frame_round_trips_as_opaque() {
        let raw = serde_json::json!({"something": "else"});
        let frame: IncomingFrame = serde_json::from_value(raw).unwrap();
        assert!(matches!(frame, IncomingFrame::Opaque(_)));
    }
}
