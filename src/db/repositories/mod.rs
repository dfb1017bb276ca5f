mod activities;
mod assets;
mod snapshots;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::activity::model::{Activity, ActivityAsset, ActivitySnapshot, Frame};
use crate::activity::store::ActivityStore;
use crate::db::Database;

#[async_trait]
impl ActivityStore for Database {
    async fn create_activity(&self, activity: &Activity) -> Result<()> {
        self.insert_activity(activity).await
    }

    async fn append_snapshot(&self, snapshot: &ActivitySnapshot, frame: Option<&Frame>) -> Result<()> {
        self.insert_snapshot(snapshot, frame).await
    }

    async fn upsert_asset(&self, asset: &ActivityAsset) -> Result<()> {
        self.upsert_activity_asset(asset).await
    }

    async fn close_activity(&self, activity_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.mark_activity_ended(activity_id, ended_at).await
    }
}
