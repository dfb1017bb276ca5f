//! Heavy, once-per-activity content pulled from a page.

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};
use crate::native::{
    NativeArticleAsset, NativePdfAsset, NativeTweet, NativeTwitterAsset, NativeYoutubeAsset,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub text: String,
    pub start: f32,
    pub duration: f32,
}

/// Decodes the JSON-in-a-string transcript the page sends. Blank means no
/// captions were available.
pub fn parse_transcript(raw: &str) -> CaptureResult<Vec<TranscriptLine>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|err| CaptureError::invalid_data(format!("transcript is not a line array: {err}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoutubeAsset {
    pub url: String,
    pub title: String,
    pub transcript: Vec<TranscriptLine>,
    pub current_time: f32,
}

impl YoutubeAsset {
    pub fn from_native(asset: NativeYoutubeAsset) -> CaptureResult<Self> {
        Ok(Self {
            transcript: parse_transcript(&asset.transcript)?,
            url: asset.url,
            title: asset.title,
            current_time: asset.current_time,
        })
    }

    /// The last `words` words spoken before the playback position.
    pub fn recent_transcript(&self, words: usize) -> String {
        let spoken: Vec<&str> = self
            .transcript
            .iter()
            .filter(|line| line.start + line.duration <= self.current_time)
            .flat_map(|line| line.text.split_whitespace())
            .collect();
        let skip = spoken.len().saturating_sub(words);
        spoken[skip..].join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleAsset {
    pub url: String,
    pub title: String,
    pub content: String,
    pub text_content: String,
    pub site_name: Option<String>,
    pub language: Option<String>,
    pub excerpt: Option<String>,
    pub byline: Option<String>,
    pub length: Option<i64>,
    pub selected_text: Option<String>,
}

impl From<NativeArticleAsset> for ArticleAsset {
    fn from(asset: NativeArticleAsset) -> Self {
        Self {
            url: asset.url,
            title: asset.title,
            content: asset.content,
            text_content: asset.text_content,
            site_name: asset.site_name,
            language: asset.language,
            excerpt: asset.excerpt,
            byline: asset.byline,
            length: asset.length,
            selected_text: asset.selected_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfAsset {
    pub url: String,
    pub title: String,
    pub content: String,
}

impl From<NativePdfAsset> for PdfAsset {
    fn from(asset: NativePdfAsset) -> Self {
        Self {
            url: asset.url,
            title: asset.title,
            content: asset.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub text: String,
    pub timestamp: Option<String>,
    pub author: Option<String>,
}

impl Tweet {
    pub fn hashtags(&self) -> impl Iterator<Item = &str> {
        self.text
            .split_whitespace()
            .filter(|word| word.len() > 1 && word.starts_with('#'))
    }

    pub fn mentions(&self) -> impl Iterator<Item = &str> {
        self.text
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('@'))
            .filter(|handle| !handle.is_empty())
    }
}

impl From<NativeTweet> for Tweet {
    fn from(tweet: NativeTweet) -> Self {
        Self {
            text: tweet.text,
            timestamp: tweet.timestamp,
            author: tweet.author,
        }
    }
}

fn collect_sorted<'a>(words: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut collected: Vec<String> = words.map(str::to_string).collect();
    collected.sort();
    collected.dedup();
    collected
}

pub fn hashtags(tweets: &[Tweet]) -> Vec<String> {
    collect_sorted(tweets.iter().flat_map(Tweet::hashtags))
}

pub fn mentions(tweets: &[Tweet]) -> Vec<String> {
    collect_sorted(tweets.iter().flat_map(Tweet::mentions))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitterAsset {
    pub url: String,
    pub title: String,
    pub tweets: Vec<Tweet>,
    pub timestamp: String,
}

impl From<NativeTwitterAsset> for TwitterAsset {
    fn from(asset: NativeTwitterAsset) -> Self {
        Self {
            url: asset.url,
            title: asset.title,
            tweets: asset.tweets.into_iter().map(Tweet::from).collect(),
            timestamp: asset.timestamp,
        }
    }
}

/// Body of an `ActivityAsset`, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetData {
    Youtube(YoutubeAsset),
    Article(ArticleAsset),
    Pdf(PdfAsset),
    Twitter(TwitterAsset),
    /// What non-capturable activities get.
    Empty,
}

impl AssetData {
    pub fn url(&self) -> Option<&str> {
        let url = match self {
            AssetData::Youtube(asset) => &asset.url,
            AssetData::Article(asset) => &asset.url,
            AssetData::Pdf(asset) => &asset.url,
            AssetData::Twitter(asset) => &asset.url,
            AssetData::Empty => return None,
        };
        Some(url.as_str()).filter(|url| !url.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            AssetData::Youtube(asset) => Some(&asset.title),
            AssetData::Article(asset) => Some(&asset.title),
            AssetData::Pdf(asset) => Some(&asset.title),
            AssetData::Twitter(asset) => Some(&asset.title),
            AssetData::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AssetData::Empty)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AssetData::Youtube(_) => "youtube",
            AssetData::Article(_) => "article",
            AssetData::Pdf(_) => "pdf",
            AssetData::Twitter(_) => "twitter",
            AssetData::Empty => "empty",
        }
    }
}
