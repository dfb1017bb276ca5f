use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::model::{Activity, ActivityAsset, ActivitySnapshot, Frame};
use super::store::ActivityStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// One pending persistence call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create(Activity),
    Snapshot {
        snapshot: ActivitySnapshot,
        frame: Option<Frame>,
    },
    Asset(ActivityAsset),
    Close {
        activity_id: String,
        ended_at: DateTime<Utc>,
    },
}

impl WriteOp {
    fn describe(&self) -> &'static str {
        match self {
            WriteOp::Create(_) => "create activity",
            WriteOp::Snapshot { .. } => "append snapshot",
            WriteOp::Asset(_) => "upsert asset",
            WriteOp::Close { .. } => "close activity",
        }
    }

    async fn apply(&self, store: &dyn ActivityStore) -> Result<()> {
        match self {
            WriteOp::Create(activity) => store.create_activity(activity).await,
            WriteOp::Snapshot { snapshot, frame } => store.append_snapshot(snapshot, frame.as_ref()).await,
            WriteOp::Asset(asset) => store.upsert_asset(asset).await,
            WriteOp::Close {
                activity_id,
                ended_at,
            } => store.close_activity(activity_id, *ended_at).await,
        }
    }
}

/// Writes waiting for the store, applied strictly in order.
///
/// Lifecycle writes are never dropped. When the queue is full the oldest
/// snapshot write goes first; if it carried a frame that a later queued
/// snapshot points at, the frame moves to that snapshot.
pub struct PendingWrites {
    ops: VecDeque<WriteOp>,
    capacity: usize,
    dropped: u64,
}

impl PendingWrites {
    pub fn new(capacity: usize) -> Self {
        Self {
            ops: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queues `op`. Returns the id of a frame that was dropped together with
    /// an evicted snapshot and is no longer queued anywhere.
    pub fn push(&mut self, op: WriteOp) -> Option<String> {
        let mut orphaned = None;
        if self.ops.len() >= self.capacity {
            orphaned = self.evict_oldest_snapshot();
        }
        self.ops.push_back(op);
        orphaned
    }

    fn evict_oldest_snapshot(&mut self) -> Option<String> {
        let index = self
            .ops
            .iter()
            .position(|op| matches!(op, WriteOp::Snapshot { .. }))?;
        let WriteOp::Snapshot { snapshot, frame } = self.ops.remove(index)? else {
            return None;
        };
        self.dropped += 1;
        log_warn!(
            "write queue full ({}), dropped snapshot {} of activity {}",
            self.capacity,
            snapshot.id,
            snapshot.activity_id
        );

        let frame = frame?;
        let heir = self.ops.iter_mut().skip(index).find_map(|op| match op {
            WriteOp::Snapshot {
                snapshot,
                frame: slot @ None,
            } if snapshot.frame_id.as_deref() == Some(frame.id.as_str()) => Some(slot),
            _ => None,
        });
        match heir {
            Some(slot) => {
                *slot = Some(frame);
                None
            }
            None => Some(frame.id),
        }
    }

    /// Applies queued writes in order until one fails. The failed write stays
    /// at the front for the next flush. Returns how many writes succeeded.
    pub async fn flush(&mut self, store: &dyn ActivityStore) -> usize {
        let mut written = 0;
        while let Some(op) = self.ops.front() {
            match op.apply(store).await {
                Ok(()) => {
                    self.ops.pop_front();
                    written += 1;
                }
                Err(err) => {
                    log_warn!(
                        "{} failed, {} writes pending: {err:#}",
                        op.describe(),
                        self.ops.len()
                    );
                    break;
                }
            }
        }
        if written > 0 {
            log_debug!("flushed {written} writes");
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::activity::snapshots::{FrameImage, SnapshotData, YoutubeSnapshot};
    use crate::activity::store::testing::MemoryStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("valid time")
    }

    fn activity() -> Activity {
        Activity::open("Video", None, "chrome", "youtube:abc123", "youtube", now())
    }

    fn snapshot(activity: &Activity, frame_id: Option<&str>, at: f32) -> ActivitySnapshot {
        ActivitySnapshot::new(
            &activity.id,
            frame_id.map(str::to_string),
            SnapshotData::Youtube(YoutubeSnapshot { current_time: at }),
            now(),
        )
    }

    fn frame() -> Frame {
        Frame::new(
            FrameImage {
                base64: "aGVsbG8=".to_string(),
                width: None,
                height: None,
            },
            None,
            now(),
        )
    }

    #[tokio::test]
    async fn failed_write_blocks_and_retries_in_order() {
        let store = MemoryStore::default();
        let record = activity();
        let mut writes = PendingWrites::new(8);
        writes.push(WriteOp::Create(record.clone()));
        writes.push(WriteOp::Snapshot {
            snapshot: snapshot(&record, None, 1.0),
            frame: None,
        });

        store.set_failing(true);
        assert_eq!(writes.flush(&store).await, 0);
        assert_eq!(writes.len(), 2);

        store.set_failing(false);
        assert_eq!(writes.flush(&store).await, 2);
        assert!(writes.is_empty());
        assert_eq!(store.activities().len(), 1);
        assert_eq!(store.snapshots().len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_snapshot_only() {
        let record = activity();
        let mut writes = PendingWrites::new(2);
        writes.push(WriteOp::Create(record.clone()));
        writes.push(WriteOp::Snapshot {
            snapshot: snapshot(&record, None, 1.0),
            frame: None,
        });
        writes.push(WriteOp::Close {
            activity_id: record.id.clone(),
            ended_at: now(),
        });
        writes.push(WriteOp::Create(activity()));

        assert_eq!(writes.dropped(), 1);
        assert_eq!(writes.len(), 3);
        assert!(writes.ops.iter().all(|op| !matches!(op, WriteOp::Snapshot { .. })));
    }

    #[test]
    fn evicted_frame_moves_to_next_snapshot_using_it() {
        let record = activity();
        let shared = frame();
        let mut writes = PendingWrites::new(2);
        writes.push(WriteOp::Snapshot {
            snapshot: snapshot(&record, Some(&shared.id), 1.0),
            frame: Some(shared.clone()),
        });
        writes.push(WriteOp::Snapshot {
            snapshot: snapshot(&record, Some(&shared.id), 2.0),
            frame: None,
        });

        let orphaned = writes.push(WriteOp::Close {
            activity_id: record.id.clone(),
            ended_at: now(),
        });

        assert_eq!(orphaned, None);
        match writes.ops.front() {
            Some(WriteOp::Snapshot { frame, .. }) => assert_eq!(frame.as_ref(), Some(&shared)),
            other => panic!("unexpected head {other:?}"),
        }
    }

    #[test]
    fn evicted_frame_without_heir_is_reported() {
        let record = activity();
        let lone = frame();
        let mut writes = PendingWrites::new(1);
        writes.push(WriteOp::Snapshot {
            snapshot: snapshot(&record, Some(&lone.id), 1.0),
            frame: Some(lone.clone()),
        });

        let orphaned = writes.push(WriteOp::Close {
            activity_id: record.id,
            ended_at: now(),
        });
        assert_eq!(orphaned, Some(lone.id));
    }
}
