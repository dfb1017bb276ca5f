use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload kind used for error responses.
pub const ERROR_PAYLOAD_KIND: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

/// Logical endpoint tag carried in `source` / `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Endpoint {
    Background,
    ContentWatcher,
    NativeHost,
    Other(String),
}

impl Endpoint {
    pub fn as_str(&self) -> &str {
        match self {
            Endpoint::Background => "background",
            Endpoint::ContentWatcher => "content_watcher",
            Endpoint::NativeHost => "native_host",
            Endpoint::Other(tag) => tag,
        }
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        match value.as_str() {
            "background" => Endpoint::Background,
            "content_watcher" => Endpoint::ContentWatcher,
            "native_host" => Endpoint::NativeHost,
            _ => Endpoint::Other(value),
        }
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        match value {
            Endpoint::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation named by a frame. Unrecognised names survive decoding as
/// `Unknown` so the receiver can answer with an error instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    GetMetadata,
    GetIcon,
    GenerateAssets,
    GenerateSnapshot,
    New,
    Play,
    TabActivated,
    TabUpdated,
    TabClosed,
    BrowserBlurred,
    Unknown(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::GetMetadata => "GET_METADATA",
            Command::GetIcon => "GET_ICON",
            Command::GenerateAssets => "GENERATE_ASSETS",
            Command::GenerateSnapshot => "GENERATE_SNAPSHOT",
            Command::New => "NEW",
            Command::Play => "PLAY",
            Command::TabActivated => "TAB_ACTIVATED",
            Command::TabUpdated => "TAB_UPDATED",
            Command::TabClosed => "TAB_CLOSED",
            Command::BrowserBlurred => "BROWSER_BLURRED",
            Command::Unknown(name) => name,
        }
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        match value.as_str() {
            "GET_METADATA" => Command::GetMetadata,
            "GET_ICON" => Command::GetIcon,
            "GENERATE_ASSETS" => Command::GenerateAssets,
            "GENERATE_SNAPSHOT" => Command::GenerateSnapshot,
            "NEW" => Command::New,
            "PLAY" => Command::Play,
            "TAB_ACTIVATED" => Command::TabActivated,
            "TAB_UPDATED" => Command::TabUpdated,
            "TAB_CLOSED" => Command::TabClosed,
            "BROWSER_BLURRED" => Command::BrowserBlurred,
            _ => Command::Unknown(value),
        }
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Command::from(value.to_string())
    }
}

impl From<Command> for String {
    fn from(value: Command) -> Self {
        match value {
            Command::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque payload: `content` is a JSON document encoded as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    pub content: String,
}

impl Payload {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramedMessage {
    pub id: String,
    pub kind: MessageKind,
    pub source: Endpoint,
    pub target: Endpoint,
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl FramedMessage {
    pub fn request(
        source: Endpoint,
        target: Endpoint,
        command: Command,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Request,
            source,
            target,
            command,
            payload,
        }
    }

    pub fn event(
        source: Endpoint,
        target: Endpoint,
        command: Command,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Event,
            source,
            target,
            command,
            payload,
        }
    }

    /// Builds the response to this request: same id, endpoints swapped.
    pub fn respond(&self, payload: Option<Payload>) -> Self {
        Self {
            id: self.id.clone(),
            kind: MessageKind::Response,
            source: self.target.clone(),
            target: self.source.clone(),
            command: self.command.clone(),
            payload,
        }
    }

    pub fn respond_error(&self, message: impl Into<String>) -> Self {
        let body = serde_json::json!({ "message": message.into() }).to_string();
        self.respond(Some(Payload::new(ERROR_PAYLOAD_KIND, body)))
    }

    pub fn is_error(&self) -> bool {
        self.payload
            .as_ref()
            .is_some_and(|payload| payload.kind == ERROR_PAYLOAD_KIND)
    }
}
