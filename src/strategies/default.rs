use crate::activity::assets::AssetData;
use crate::activity::snapshots::CapturedSnapshot;
use crate::error::CaptureResult;

use super::identity::ContentIdentity;
use super::CurrentState;

/// Timeline-only capture for windows we cannot look inside.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultStrategy {
    name: String,
    icon: Option<String>,
    process_name: String,
    window_title: String,
    identity: ContentIdentity,
}

impl DefaultStrategy {
    pub fn new(name: String, icon: Option<String>, process_name: String, window_title: String) -> Self {
        let identity = ContentIdentity::window(&process_name, &window_title);
        Self {
            name,
            icon,
            process_name,
            window_title,
            identity,
        }
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

    pub async fn retrieve_assets(&self) -> CaptureResult<AssetData> {
        Ok(AssetData::Empty)
    }

    pub async fn retrieve_snapshot(&self) -> CaptureResult<Option<CapturedSnapshot>> {
        Ok(None)
    }

    pub async fn current_state(&self) -> CaptureResult<CurrentState> {
        Ok(CurrentState {
            url: None,
            title: self.window_title.clone(),
            icon: self.icon.clone(),
        })
    }
}
