use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::activity::model::Activity;
use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, to_i64},
    Database,
};

const ACTIVITY_COLUMNS: &str =
    "id, name, icon, process_name, identity_key, strategy_kind, started_at, ended_at";

fn row_to_activity(row: &Row) -> Result<Activity> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;

    Ok(Activity {
        id: row.get("id")?,
        name: row.get("name")?,
        icon: row.get("icon")?,
        process_name: row.get("process_name")?,
        identity_key: row.get("identity_key")?,
        strategy_kind: row.get("strategy_kind")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
    })
}

impl Database {
    pub async fn insert_activity(&self, activity: &Activity) -> Result<()> {
        let record = activity.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO activities (id, name, icon, process_name, identity_key, strategy_kind, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.name,
                    record.icon,
                    record.process_name,
                    record.identity_key,
                    record.strategy_kind,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Sets `ended_at` once. Closing an already closed activity keeps the
    /// first end time.
    pub async fn mark_activity_ended(&self, activity_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let activity_id = activity_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE activities
                 SET ended_at = ?1
                 WHERE id = ?2 AND ended_at IS NULL",
                params![ended_at.to_rfc3339(), activity_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>> {
        let activity_id = activity_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![activity_id])?;
            let activity = match rows.next()? {
                Some(row) => Some(row_to_activity(row)?),
                None => None,
            };
            Ok(activity)
        })
        .await
    }

    /// Newest first.
    pub async fn list_activities(&self, limit: usize) -> Result<Vec<Activity>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTIVITY_COLUMNS}
                 FROM activities
                 ORDER BY started_at DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut activities = Vec::new();
            while let Some(row) = rows.next()? {
                activities.push(row_to_activity(row)?);
            }
            Ok(activities)
        })
        .await
    }

    pub async fn get_open_activities(&self) -> Result<Vec<Activity>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTIVITY_COLUMNS}
                 FROM activities
                 WHERE ended_at IS NULL
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut activities = Vec::new();
            while let Some(row) = rows.next()? {
                activities.push(row_to_activity(row)?);
            }
            Ok(activities)
        })
        .await
    }

    /// Ends activities a previous run left open. Each one ends at its last
    /// snapshot, or at its start if it never got one. Returns how many were
    /// closed.
    pub async fn close_dangling_activities(&self) -> Result<usize> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let dangling: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT a.id,
                            COALESCE(MAX(s.created_at), a.started_at)
                     FROM activities a
                     LEFT JOIN activity_snapshots s ON s.activity_id = a.id
                     WHERE a.ended_at IS NULL
                     GROUP BY a.id",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let dangling = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                dangling
            };

            for (id, ended_at) in &dangling {
                tx.execute(
                    "UPDATE activities SET ended_at = ?1 WHERE id = ?2",
                    params![ended_at, id],
                )?;
            }
            tx.commit()?;
            Ok(dangling.len())
        })
        .await
    }

    pub async fn count_activities(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
