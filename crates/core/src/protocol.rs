//! Defines the JSON frame protocol spoken with the chat server.
//!
//! Inbound frames are classified by their `type` tag. Any tag the client does
//! not know about is rendered as an ordinary chat line, so only frames that
//! are not JSON objects, or that lack a field their tag requires, are errors.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Errors raised while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Correlates an `ai_chat` placeholder with its `ai_stream_update` fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        string_or_number(deserializer).map(Self)
    }
}

/// Transport control verbs shared by `music_control` frames in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicAction {
    Play,
    Pause,
}

impl fmt::Display for MusicAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MusicAction::Play => write!(f, "play"),
            MusicAction::Pause => write!(f, "pause"),
        }
    }
}

/// A server notice, optionally carrying the full online roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SystemEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
    #[serde(default)]
    pub online_users: Option<Vec<String>>,
}

/// A plain chat line. Also the fallback for unknown `type` tags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ChatEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub sender: String,
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub timestamp: Option<String>,
    /// Set on weather reports so viewers can start the matching effect.
    #[serde(default)]
    pub weather_description: Option<String>,
}

/// Opens a streamed AI reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AiChatEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub sender: String,
    pub id: ConversationId,
    /// The question that triggered the reply.
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub timestamp: Option<String>,
}

/// One fragment of a streamed AI reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AiStreamUpdateEvent {
    pub id: ConversationId,
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
}

/// A shared movie; `content` is the source URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MovieEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub sender: String,
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub timestamp: Option<String>,
}

/// A shared song. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MusicEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub sender: String,
    #[serde(default)]
    pub song_name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub song_url: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub timestamp: Option<String>,
}

/// Another viewer pressed play or pause on a shared song.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MusicControlEvent {
    pub action: MusicAction,
    #[serde(deserialize_with = "string_or_number")]
    pub song_id: String,
}

/// A news picture; `content` is the image URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewsImageEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub sender: String,
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub timestamp: Option<String>,
}

/// Every frame the server can push, keyed by its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    System(SystemEvent),
    Chat(ChatEvent),
    AiChat(AiChatEvent),
    AiStreamUpdate(AiStreamUpdateEvent),
    Movie(MovieEvent),
    Music(MusicEvent),
    MusicControl(MusicControlEvent),
    NewsImage(NewsImageEvent),
}

impl InboundEvent {
    /// Decodes one text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
        Self::from_value(value)
    }

    /// Classifies an already parsed frame by its `type` tag.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_owned();
        let malformed = |source| ProtocolError::Malformed {
            kind: kind.clone(),
            source,
        };

        let event = match kind.as_str() {
            "system" => Self::System(serde_json::from_value(value).map_err(malformed)?),
            "ai_chat" => Self::AiChat(serde_json::from_value(value).map_err(malformed)?),
            "ai_stream_update" => {
                Self::AiStreamUpdate(serde_json::from_value(value).map_err(malformed)?)
            }
            "movie" => Self::Movie(serde_json::from_value(value).map_err(malformed)?),
            "music" => Self::Music(serde_json::from_value(value).map_err(malformed)?),
            "music_control" => {
                Self::MusicControl(serde_json::from_value(value).map_err(malformed)?)
            }
            "news_image" => Self::NewsImage(serde_json::from_value(value).map_err(malformed)?),
            _ => Self::Chat(serde_json::from_value(value).map_err(malformed)?),
        };
        Ok(event)
    }

    /// The tag this event was classified under.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Chat(_) => "chat",
            Self::AiChat(_) => "ai_chat",
            Self::AiStreamUpdate(_) => "ai_stream_update",
            Self::Movie(_) => "movie",
            Self::Music(_) => "music",
            Self::MusicControl(_) => "music_control",
            Self::NewsImage(_) => "news_image",
        }
    }
}

/// How an outbound message should be tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Chat,
    Command,
    Ai,
    Movie,
    News,
}

/// Frames sent from the client to the server.
///
/// Feature frames (`ai`, `movie`, `news`) keep the user's full text,
/// prefix included, because the server also detects features by prefix.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        content: String,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        weather_description: Option<String>,
    },
    Command {
        content: String,
        timestamp: String,
    },
    Ai {
        content: String,
        timestamp: String,
    },
    Movie {
        content: String,
        timestamp: String,
    },
    News {
        content: String,
        timestamp: String,
    },
    MusicControl {
        action: MusicAction,
        song_id: String,
        timestamp: String,
    },
}

impl ClientFrame {
    /// Builds a text frame of the given kind, stamped with the current time.
    pub fn message(kind: FrameKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let timestamp = now_timestamp();
        match kind {
            FrameKind::Chat => Self::Chat {
                content,
                timestamp,
                weather_description: None,
            },
            FrameKind::Command => Self::Command { content, timestamp },
            FrameKind::Ai => Self::Ai { content, timestamp },
            FrameKind::Movie => Self::Movie { content, timestamp },
            FrameKind::News => Self::News { content, timestamp },
        }
    }

    /// A chat frame announcing a weather report.
    pub fn weather_report(content: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
            timestamp: now_timestamp(),
            weather_description: Some(description.into()),
        }
    }

    pub fn music_control(action: MusicAction, song_id: impl Into<String>) -> Self {
        Self::MusicControl {
            action,
            song_id: song_id.into(),
            timestamp: now_timestamp(),
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Command { .. } => "command",
            Self::Ai { .. } => "ai",
            Self::Movie { .. } => "movie",
            Self::News { .. } => "news",
            Self::MusicControl { .. } => "music_control",
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// --- Lenient field decoders ---

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        }
    }
}

/// Treats an explicit `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_event_with_roster() {
        let event = InboundEvent::from_json(
            r#"{"type":"system","content":"alice 加入了聊天室","online_users":["alice","bob"]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::System(SystemEvent {
                content: "alice 加入了聊天室".to_string(),
                online_users: Some(vec!["alice".to_string(), "bob".to_string()]),
            })
        );
    }

    #[test]
    fn test_text_and_chat_tags_decode_as_chat() {
        for tag in ["text", "chat"] {
            let frame = json!({"type": tag, "sender": "bob", "content": "hi", "timestamp": null});
            match InboundEvent::from_value(frame).unwrap() {
                InboundEvent::Chat(chat) => {
                    assert_eq!(chat.sender, "bob");
                    assert_eq!(chat.content, "hi");
                    assert_eq!(chat.timestamp, None);
                }
                other => panic!("expected chat, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_or_missing_tag_falls_back_to_chat() {
        let unknown = InboundEvent::from_json(r#"{"type":"hologram","sender":"x","content":"y"}"#)
            .unwrap();
        assert_eq!(unknown.kind(), "chat");

        let untagged = InboundEvent::from_json(r#"{"sender":"x","content":"y"}"#).unwrap();
        assert_eq!(untagged.kind(), "chat");
    }

    #[test]
    fn test_ai_events_accept_string_and_numeric_ids() {
        let open = InboundEvent::from_json(
            r#"{"type":"ai_chat","sender":"川小农","id":"abc-1","content":"你好"}"#,
        )
        .unwrap();
        match open {
            InboundEvent::AiChat(event) => assert_eq!(event.id, ConversationId::from("abc-1")),
            other => panic!("expected ai_chat, got {:?}", other),
        }

        let update =
            InboundEvent::from_json(r#"{"type":"ai_stream_update","id":42,"content":"Hel"}"#)
                .unwrap();
        match update {
            InboundEvent::AiStreamUpdate(event) => {
                assert_eq!(event.id.as_str(), "42");
                assert_eq!(event.content, "Hel");
            }
            other => panic!("expected ai_stream_update, got {:?}", other),
        }
    }

    #[test]
    fn test_music_frames() {
        let music = InboundEvent::from_json(r#"{"type":"music","sender":"bob","song_name":"晴天"}"#)
            .unwrap();
        match music {
            InboundEvent::Music(event) => {
                assert_eq!(event.song_name.as_deref(), Some("晴天"));
                assert_eq!(event.artist, None);
                assert_eq!(event.song_url, None);
            }
            other => panic!("expected music, got {:?}", other),
        }

        let control =
            InboundEvent::from_json(r#"{"type":"music_control","action":"pause","song_id":7}"#)
                .unwrap();
        assert_eq!(
            control,
            InboundEvent::MusicControl(MusicControlEvent {
                action: MusicAction::Pause,
                song_id: "7".to_string(),
            })
        );
    }

    #[test]
    fn test_weather_description_is_carried_on_chat() {
        let event = InboundEvent::from_json(
            r#"{"type":"chat","sender":"bob","content":"北京 晴","weather_description":"晴"}"#,
        )
        .unwrap();
        match event {
            InboundEvent::Chat(chat) => assert_eq!(chat.weather_description.as_deref(), Some("晴")),
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_frames_are_errors() {
        assert!(matches!(
            InboundEvent::from_json("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            InboundEvent::from_json("[1, 2]"),
            Err(ProtocolError::NotAnObject)
        ));
        match InboundEvent::from_json(r#"{"type":"ai_stream_update","content":"x"}"#) {
            Err(ProtocolError::Malformed { kind, .. }) => assert_eq!(kind, "ai_stream_update"),
            other => panic!("expected malformed, got {:?}", other),
        }
        assert!(matches!(
            InboundEvent::from_json(r#"{"type":"music_control","action":"rewind","song_id":"1"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_client_frame_wire_shape() {
        let frame = ClientFrame::message(FrameKind::Command, "/help");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["content"], "/help");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));

        let chat = serde_json::to_value(ClientFrame::message(FrameKind::Chat, "hello")).unwrap();
        assert_eq!(chat["type"], "chat");
        assert!(chat.get("weather_description").is_none());

        let weather = serde_json::to_value(ClientFrame::weather_report("北京 晴", "晴")).unwrap();
        assert_eq!(weather["type"], "chat");
        assert_eq!(weather["weather_description"], "晴");
    }

    #[test]
    fn test_music_control_frame_wire_shape() {
        let frame = ClientFrame::music_control(MusicAction::Play, "song-9");
        assert_eq!(frame.kind(), "music_control");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "music_control");
        assert_eq!(value["action"], "play");
        assert_eq!(value["song_id"], "song-9");
    }
}
