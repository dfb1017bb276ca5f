use serde::{Deserialize, Serialize};

use crate::native::{NativeArticleSnapshot, NativeTwitterSnapshot, NativeYoutubeSnapshot};

use super::assets::Tweet;

/// A video frame as the page sent it: base64, optionally as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameImage {
    pub base64: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoutubeSnapshot {
    pub current_time: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSnapshot {
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitterSnapshot {
    pub tweets: Vec<Tweet>,
}

/// Strategy-specific body of an `ActivitySnapshot`, stored as JSON. The video
/// frame itself lives in its own `Frame` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotData {
    Youtube(YoutubeSnapshot),
    Article(ArticleSnapshot),
    Twitter(TwitterSnapshot),
}

impl SnapshotData {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotData::Youtube(_) => "youtube",
            SnapshotData::Article(_) => "article",
            SnapshotData::Twitter(_) => "twitter",
        }
    }
}

/// What a strategy hands back for one tick, before the assembler assigns ids.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSnapshot {
    pub data: SnapshotData,
    pub frame: Option<FrameImage>,
}

impl From<NativeYoutubeSnapshot> for CapturedSnapshot {
    fn from(snapshot: NativeYoutubeSnapshot) -> Self {
        let frame = Some(snapshot.video_frame_base64)
            .filter(|base64| !base64.is_empty())
            .map(|base64| FrameImage {
                base64,
                width: snapshot.video_frame_width,
                height: snapshot.video_frame_height,
            });
        Self {
            data: SnapshotData::Youtube(YoutubeSnapshot {
                current_time: snapshot.current_time,
            }),
            frame,
        }
    }
}

impl From<NativeArticleSnapshot> for CapturedSnapshot {
    fn from(snapshot: NativeArticleSnapshot) -> Self {
        Self {
            data: SnapshotData::Article(ArticleSnapshot {
                highlight: snapshot.highlighted_text.filter(|text| !text.trim().is_empty()),
            }),
            frame: None,
        }
    }
}

impl From<NativeTwitterSnapshot> for CapturedSnapshot {
    fn from(snapshot: NativeTwitterSnapshot) -> Self {
        Self {
            data: SnapshotData::Twitter(TwitterSnapshot {
                tweets: snapshot.tweets.into_iter().map(Tweet::from).collect(),
            }),
            frame: None,
        }
    }
}
