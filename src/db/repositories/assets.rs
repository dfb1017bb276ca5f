use anyhow::{Context, Result};
use rusqlite::{params, Row};
use serde_json::{from_str, to_string};

use crate::activity::assets::AssetData;
use crate::activity::model::ActivityAsset;
use crate::db::{helpers::parse_datetime, Database};

fn row_to_asset(row: &Row) -> Result<ActivityAsset> {
    let data_json: String = row.get("data_json")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let data: AssetData = from_str(&data_json).context("failed to deserialize asset data")?;

    Ok(ActivityAsset {
        id: row.get("id")?,
        activity_id: row.get("activity_id")?,
        data,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// One asset per activity: a second write for the same activity replaces
    /// the body and keeps the original id and `created_at`.
    pub async fn upsert_activity_asset(&self, asset: &ActivityAsset) -> Result<()> {
        let record = asset.clone();
        self.execute(move |conn| {
            let data_json = to_string(&record.data).context("failed to serialize asset data")?;
            conn.execute(
                "INSERT INTO activity_assets (id, activity_id, kind, url, title, data_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(activity_id) DO UPDATE SET
                     kind = excluded.kind,
                     url = excluded.url,
                     title = excluded.title,
                     data_json = excluded.data_json,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.activity_id,
                    record.data.kind(),
                    record.data.url(),
                    record.data.title(),
                    data_json,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_asset_for_activity(&self, activity_id: &str) -> Result<Option<ActivityAsset>> {
        let activity_id = activity_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, activity_id, data_json, created_at, updated_at
                 FROM activity_assets
                 WHERE activity_id = ?1",
            )?;
            let mut rows = stmt.query(params![activity_id])?;
            let asset = match rows.next()? {
                Some(row) => Some(row_to_asset(row)?),
                None => None,
            };
            Ok(asset)
        })
        .await
    }
}
