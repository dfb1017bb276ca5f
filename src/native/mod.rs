//! Typed payloads carried inside [`Payload`]. The frame's `payload.kind`
//! names the variant and `payload.content` is its JSON body.
//!
//! The content scripts were written against camelCase field names, so every
//! multi-word field also accepts its camelCase alias.

use serde::{Deserialize, Serialize};

use crate::bridge::Payload;
use crate::error::{CaptureError, CaptureResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeMetadata {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "iconBase64")]
    pub icon_base64: Option<String>,
}

impl NativeMetadata {
    /// Only real web pages can answer capture commands.
    pub fn is_capturable(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeYoutubeAsset {
    pub url: String,
    pub title: String,
    /// JSON array of transcript lines, encoded as a string. Empty when the
    /// page could not read captions.
    #[serde(default)]
    pub transcript: String,
    #[serde(alias = "currentTime")]
    pub current_time: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeArticleAsset {
    #[serde(default)]
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(alias = "textContent")]
    pub text_content: String,
    #[serde(default, alias = "siteName")]
    pub site_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub byline: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default, alias = "selectedText")]
    pub selected_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativePdfAsset {
    pub url: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTweet {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTwitterAsset {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub tweets: Vec<NativeTweet>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeYoutubeSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(alias = "currentTime")]
    pub current_time: f32,
    #[serde(alias = "videoFrameBase64")]
    pub video_frame_base64: String,
    #[serde(default, alias = "videoFrameWidth")]
    pub video_frame_width: Option<u32>,
    #[serde(default, alias = "videoFrameHeight")]
    pub video_frame_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeArticleSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "highlightedText")]
    pub highlighted_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTwitterSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tweets: Vec<NativeTweet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeIcon {
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativePlay {
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeError {
    pub message: String,
}

macro_rules! native_messages {
    ($($variant:ident($body:ty) => $kind:literal,)+) => {
        /// Every payload kind the bridge understands.
        #[derive(Debug, Clone, PartialEq)]
        pub enum NativeMessage {
            $($variant($body),)+
        }

        impl NativeMessage {
            pub fn kind(&self) -> &'static str {
                match self {
                    $(NativeMessage::$variant(_) => $kind,)+
                }
            }

            pub fn from_payload(payload: &Payload) -> CaptureResult<Self> {
                match payload.kind.as_str() {
                    $($kind => Ok(NativeMessage::$variant(serde_json::from_str(&payload.content)?)),)+
                    other => Err(CaptureError::UnsupportedPayload(other.to_string())),
                }
            }

            pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
                let content = match self {
                    $(NativeMessage::$variant(body) => serde_json::to_string(body)?,)+
                };
                Ok(Payload::new(self.kind(), content))
            }
        }
    };
}

native_messages! {
    NativeMetadata(NativeMetadata) => "NativeMetadata",
    NativeYoutubeAsset(NativeYoutubeAsset) => "NativeYoutubeAsset",
    NativeArticleAsset(NativeArticleAsset) => "NativeArticleAsset",
    NativePdfAsset(NativePdfAsset) => "NativePdfAsset",
    NativeTwitterAsset(NativeTwitterAsset) => "NativeTwitterAsset",
    NativeYoutubeSnapshot(NativeYoutubeSnapshot) => "NativeYoutubeSnapshot",
    NativeArticleSnapshot(NativeArticleSnapshot) => "NativeArticleSnapshot",
    NativeTwitterSnapshot(NativeTwitterSnapshot) => "NativeTwitterSnapshot",
    NativeIcon(NativeIcon) => "NativeIcon",
    NativePlay(NativePlay) => "NativePlay",
    Error(NativeError) => "Error",
}
