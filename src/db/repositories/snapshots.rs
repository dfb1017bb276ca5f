use anyhow::{Context, Result};
use rusqlite::{params, Row, Transaction};
use serde_json::{from_str, to_string};

use crate::activity::model::{ActivitySnapshot, Frame};
use crate::activity::snapshots::{FrameImage, SnapshotData};
use crate::db::{
    helpers::{parse_datetime, to_u32},
    Database,
};

fn row_to_snapshot(row: &Row) -> Result<ActivitySnapshot> {
    let data_json: String = row.get("data_json")?;
    let created_at: String = row.get("created_at")?;
    let data: SnapshotData =
        from_str(&data_json).context("failed to deserialize snapshot data")?;

    Ok(ActivitySnapshot {
        id: row.get("id")?,
        activity_id: row.get("activity_id")?,
        frame_id: row.get("frame_id")?,
        data,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn row_to_frame(row: &Row) -> Result<Frame> {
    let width: Option<i64> = row.get("width")?;
    let height: Option<i64> = row.get("height")?;
    let captured_at: String = row.get("captured_at")?;

    Ok(Frame {
        id: row.get("id")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
        phash: row.get("phash")?,
        image: FrameImage {
            base64: row.get("image_base64")?,
            width: width.map(|value| to_u32(value, "width")).transpose()?,
            height: height.map(|value| to_u32(value, "height")).transpose()?,
        },
    })
}

fn insert_frame(tx: &Transaction<'_>, frame: &Frame) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO frames (id, image_base64, width, height, phash, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            frame.id,
            frame.image.base64,
            frame.image.width.map(i64::from),
            frame.image.height.map(i64::from),
            frame.phash,
            frame.captured_at.to_rfc3339(),
        ],
    )
    .context("failed to insert frame")?;
    Ok(())
}

impl Database {
    /// Writes the snapshot and, when given, the frame it points at, in one
    /// transaction.
    pub async fn insert_snapshot(&self, snapshot: &ActivitySnapshot, frame: Option<&Frame>) -> Result<()> {
        let record = snapshot.clone();
        let frame = frame.cloned();
        self.execute(move |conn| {
            let data_json = to_string(&record.data).context("failed to serialize snapshot data")?;
            let tx = conn.transaction()?;
            if let Some(frame) = &frame {
                insert_frame(&tx, frame)?;
            }
            tx.execute(
                "INSERT INTO activity_snapshots (id, activity_id, frame_id, kind, data_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.activity_id,
                    record.frame_id,
                    record.data.kind(),
                    data_json,
                    record.created_at.to_rfc3339(),
                ],
            )
            .context("failed to insert snapshot")?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_snapshots_for_activity(&self, activity_id: &str) -> Result<Vec<ActivitySnapshot>> {
        let activity_id = activity_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, activity_id, frame_id, data_json, created_at
                 FROM activity_snapshots
                 WHERE activity_id = ?1
                 ORDER BY created_at ASC",
            )?;

            let mut rows = stmt.query(params![activity_id])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_snapshot(row)?);
            }
            Ok(snapshots)
        })
        .await
    }

    pub async fn get_frame(&self, frame_id: &str) -> Result<Option<Frame>> {
        let frame_id = frame_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, image_base64, width, height, phash, captured_at
                 FROM frames
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![frame_id])?;
            let frame = match rows.next()? {
                Some(row) => Some(row_to_frame(row)?),
                None => None,
            };
            Ok(frame)
        })
        .await
    }
}
