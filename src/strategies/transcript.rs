use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::activity::assets::TranscriptLine;
use crate::error::CaptureResult;

/// External captioning service.
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    async fn fetch(&self, video_id: &str) -> CaptureResult<Vec<TranscriptLine>>;
}

/// Used when no captioning service is configured.
pub struct NoTranscripts;

#[async_trait]
impl TranscriptProvider for NoTranscripts {
    async fn fetch(&self, _video_id: &str) -> CaptureResult<Vec<TranscriptLine>> {
        Ok(Vec::new())
    }
}

/// Per-video transcript cache in front of a provider. Empty results are not
/// cached so a later activity on the same video can try again.
pub struct TranscriptCache {
    provider: Arc<dyn TranscriptProvider>,
    entries: Mutex<HashMap<String, Vec<TranscriptLine>>>,
}

impl TranscriptCache {
    pub fn new(provider: Arc<dyn TranscriptProvider>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, video_id: &str) -> Option<Vec<TranscriptLine>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(video_id)
            .cloned()
    }

    pub fn insert(&self, video_id: &str, lines: Vec<TranscriptLine>) {
        if lines.is_empty() {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(video_id.to_string(), lines);
    }

    pub async fn get(&self, video_id: &str) -> CaptureResult<Vec<TranscriptLine>> {
        if let Some(lines) = self.cached(video_id) {
            return Ok(lines);
        }
        let lines = self.provider.fetch(video_id).await?;
        self.insert(video_id, lines.clone());
        Ok(lines)
    }
}

impl Default for TranscriptCache {
    fn default() -> Self {
        Self::new(Arc::new(NoTranscripts))
    }
}
