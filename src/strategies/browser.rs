use std::sync::Arc;

use crate::activity::assets::{ArticleAsset, AssetData, PdfAsset, TwitterAsset, YoutubeAsset};
use crate::activity::snapshots::CapturedSnapshot;
use crate::bridge::Command;
use crate::error::{CaptureError, CaptureResult};
use crate::native::{NativeMessage, NativePlay};

use super::client::{request_native, CaptureClient};
use super::identity::ContentIdentity;
use super::transcript::TranscriptCache;
use super::{CurrentState, SiteKind};

/// Captures one browser tab through the extension. Bound to the content
/// identity it was built for; answers that describe any other content are
/// rejected as stale.
#[derive(Clone)]
pub struct BrowserStrategy {
    kind: SiteKind,
    name: String,
    icon: Option<String>,
    process_name: String,
    identity: ContentIdentity,
    client: Arc<dyn CaptureClient>,
    transcripts: Arc<TranscriptCache>,
}

impl BrowserStrategy {
    pub fn new(
        kind: SiteKind,
        name: String,
        icon: Option<String>,
        process_name: String,
        identity: ContentIdentity,
        client: Arc<dyn CaptureClient>,
        transcripts: Arc<TranscriptCache>,
    ) -> Self {
        Self {
            kind,
            name,
            icon,
            process_name,
            identity,
            client,
            transcripts,
        }
    }

    pub fn kind(&self) -> SiteKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn identity(&self) -> &ContentIdentity {
        &self.identity
    }

    fn ensure_identity(&self, url: &str) -> CaptureResult<()> {
        let actual = ContentIdentity::from_url(url);
        if actual.as_ref() == Some(&self.identity) {
            return Ok(());
        }
        Err(CaptureError::StaleIdentity {
            expected: self.identity.key(),
            actual: actual.map_or_else(|| url.to_string(), |identity| identity.key()),
        })
    }

    /// Asks the tab where it is now and checks that it is still ours.
    async fn revalidate(&self) -> CaptureResult<()> {
        let state = self.current_state().await?;
        match state.url {
            Some(url) => self.ensure_identity(&url),
            None => Err(CaptureError::invalid_data("tab reported no url")),
        }
    }

    async fn check_url(&self, url: Option<&str>) -> CaptureResult<()> {
        match url.filter(|url| !url.is_empty()) {
            Some(url) => self.ensure_identity(url),
            None => self.revalidate().await,
        }
    }

    pub async fn retrieve_assets(&self) -> CaptureResult<AssetData> {
        let command = Command::GenerateAssets;
        let data = match request_native(self.client.as_ref(), command.clone(), None).await? {
            NativeMessage::NativeYoutubeAsset(native) => AssetData::Youtube(YoutubeAsset::from_native(native)?),
            NativeMessage::NativeArticleAsset(native) => AssetData::Article(ArticleAsset::from(native)),
            NativeMessage::NativePdfAsset(native) => AssetData::Pdf(PdfAsset::from(native)),
            NativeMessage::NativeTwitterAsset(native) => AssetData::Twitter(TwitterAsset::from(native)),
            NativeMessage::Error(error) => return Err(CaptureError::Remote(error.message)),
            other => {
                return Err(CaptureError::UnexpectedPayload {
                    command,
                    actual: other.kind().to_string(),
                })
            }
        };

        self.check_url(data.url()).await?;
        match data {
            AssetData::Youtube(asset) => Ok(AssetData::Youtube(self.complete_youtube(asset).await)),
            other => Ok(other),
        }
    }

    /// Fills in a missing transcript from the captioning service. A failing
    /// service leaves the transcript empty rather than failing the asset.
    async fn complete_youtube(&self, mut asset: YoutubeAsset) -> YoutubeAsset {
        let Some(video_id) = ContentIdentity::from_url(&asset.url)
            .as_ref()
            .and_then(ContentIdentity::video_id)
            .map(str::to_string)
        else {
            return asset;
        };

        if !asset.transcript.is_empty() {
            self.transcripts.insert(&video_id, asset.transcript.clone());
            return asset;
        }

        match self.transcripts.get(&video_id).await {
            Ok(lines) => asset.transcript = lines,
            Err(err) => log::warn!("transcript lookup for {video_id} failed: {err}"),
        }
        asset
    }

    pub async fn retrieve_snapshot(&self) -> CaptureResult<Option<CapturedSnapshot>> {
        let command = Command::GenerateSnapshot;
        let (url, captured) = match request_native(self.client.as_ref(), command.clone(), None).await? {
            NativeMessage::NativeYoutubeSnapshot(native) => (native.url.clone(), CapturedSnapshot::from(native)),
            NativeMessage::NativeArticleSnapshot(native) => (native.url.clone(), CapturedSnapshot::from(native)),
            NativeMessage::NativeTwitterSnapshot(native) => (native.url.clone(), CapturedSnapshot::from(native)),
            NativeMessage::Error(error) => return Err(CaptureError::Remote(error.message)),
            other => {
                return Err(CaptureError::UnexpectedPayload {
                    command,
                    actual: other.kind().to_string(),
                })
            }
        };

        self.check_url(url.as_deref()).await?;
        Ok(Some(captured))
    }

    pub async fn current_state(&self) -> CaptureResult<CurrentState> {
        let command = Command::GetMetadata;
        match request_native(self.client.as_ref(), command.clone(), None).await? {
            NativeMessage::NativeMetadata(metadata) => Ok(CurrentState {
                title: metadata.title.clone().unwrap_or_else(|| metadata.url.clone()),
                url: Some(metadata.url),
                icon: metadata.icon_base64,
            }),
            other => Err(CaptureError::UnexpectedPayload {
                command,
                actual: other.kind().to_string(),
            }),
        }
    }

    pub async fn fetch_icon(&self) -> CaptureResult<String> {
        let command = Command::GetIcon;
        match request_native(self.client.as_ref(), command.clone(), None).await? {
            NativeMessage::NativeIcon(icon) => Ok(icon.base64),
            other => Err(CaptureError::UnexpectedPayload {
                command,
                actual: other.kind().to_string(),
            }),
        }
    }

    /// Moves playback to `time` seconds. Only videos can seek.
    pub async fn seek(&self, time: f64) -> CaptureResult<()> {
        if self.kind != SiteKind::Youtube {
            return Err(CaptureError::Unsupported(Command::Play));
        }
        let payload = NativeMessage::NativePlay(NativePlay { time }).to_payload()?;
        self.client.request(Command::Play, Some(payload)).await?;
        Ok(())
    }
}
