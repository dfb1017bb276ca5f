//! Activity records as they are handed to persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assets::AssetData;
use super::snapshots::{FrameImage, SnapshotData};

/// A time-bounded stretch of focus on one (process, content) identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub process_name: String,
    pub identity_key: String,
    pub strategy_kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn open(
        name: impl Into<String>,
        icon: Option<String>,
        process_name: impl Into<String>,
        identity_key: impl Into<String>,
        strategy_kind: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            icon,
            process_name: process_name.into(),
            identity_key: identity_key.into(),
            strategy_kind: strategy_kind.into(),
            started_at,
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAsset {
    pub id: String,
    pub activity_id: String,
    pub data: AssetData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityAsset {
    pub fn new(activity_id: impl Into<String>, data: AssetData, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            activity_id: activity_id.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub id: String,
    pub activity_id: String,
    pub frame_id: Option<String>,
    pub data: SnapshotData,
    pub created_at: DateTime<Utc>,
}

impl ActivitySnapshot {
    pub fn new(
        activity_id: impl Into<String>,
        frame_id: Option<String>,
        data: SnapshotData,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            activity_id: activity_id.into(),
            frame_id,
            data,
            created_at,
        }
    }
}

/// A screen or video frame captured out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub phash: Option<String>,
    pub image: FrameImage,
}

impl Frame {
    pub fn new(image: FrameImage, phash: Option<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            captured_at,
            phash,
            image,
        }
    }
}
