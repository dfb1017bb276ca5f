use std::fmt;

use url::Url;

use crate::domain::normalize_host;

/// What a page "is" for activity purposes. Two URLs with the same identity
/// belong to the same activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentIdentity {
    Video { id: String },
    Page { url: String },
    /// Non-browser windows: the process plus its window title.
    Window { process: String, title: String },
}

impl ContentIdentity {
    /// `None` for anything that is not an http(s) URL.
    pub fn from_url(raw: &str) -> Option<Self> {
        let mut url = Url::parse(raw).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = normalize_host(url.host_str()?);

        if let Some(id) = youtube_video_id(&host, &url) {
            return Some(ContentIdentity::Video { id });
        }

        url.set_fragment(None);
        Some(ContentIdentity::Page {
            url: url.to_string(),
        })
    }

    pub fn window(process: &str, title: &str) -> Self {
        ContentIdentity::Window {
            process: process.to_string(),
            title: title.to_string(),
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn video_id(&self) -> Option<&str> {
        match self {
            ContentIdentity::Video { id } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentIdentity::Video { id } => write!(f, "youtube:{id}"),
            ContentIdentity::Page { url } => write!(f, "page:{url}"),
            ContentIdentity::Window { process, title } => write!(f, "window:{process}:{title}"),
        }
    }
}

fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com" || host.ends_with(".youtube.com")
}

fn youtube_video_id(host: &str, url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?.filter(|segment| !segment.is_empty());

    if host == "youtu.be" {
        return segments.next().map(str::to_string);
    }
    if !is_youtube_host(host) {
        return None;
    }

    match segments.next()? {
        "watch" => url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty()),
        "shorts" | "embed" | "live" => segments.next().map(str::to_string),
        _ => None,
    }
}
