use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{Activity, ActivityAsset, ActivitySnapshot, Frame};

/// The narrow persistence surface the assembler writes through. The assembler
/// never sees SQL; anything that can store these four operations will do.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn create_activity(&self, activity: &Activity) -> Result<()>;

    /// `frame` is only present the first time a frame is referenced.
    async fn append_snapshot(&self, snapshot: &ActivitySnapshot, frame: Option<&Frame>) -> Result<()>;

    /// Replaces the activity's asset if it already has one.
    async fn upsert_asset(&self, asset: &ActivityAsset) -> Result<()>;

    async fn close_activity(&self, activity_id: &str, ended_at: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::ActivityStore;
    use crate::activity::model::{Activity, ActivityAsset, ActivitySnapshot, Frame};

    /// Keeps everything in memory and can be told to fail every call.
    #[derive(Default)]
    pub struct MemoryStore {
        activities: Mutex<Vec<Activity>>,
        snapshots: Mutex<Vec<ActivitySnapshot>>,
        frames: Mutex<Vec<Frame>>,
        assets: Mutex<HashMap<String, ActivityAsset>>,
        failing: AtomicBool,
    }

    impl MemoryStore {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("store unavailable");
            }
            Ok(())
        }

        pub fn activities(&self) -> Vec<Activity> {
            self.activities.lock().expect("activities lock").clone()
        }

        pub fn open_activities(&self) -> Vec<Activity> {
            self.activities().into_iter().filter(Activity::is_open).collect()
        }

        pub fn snapshots(&self) -> Vec<ActivitySnapshot> {
            self.snapshots.lock().expect("snapshots lock").clone()
        }

        pub fn frames(&self) -> Vec<Frame> {
            self.frames.lock().expect("frames lock").clone()
        }

        pub fn asset(&self, activity_id: &str) -> Option<ActivityAsset> {
            self.assets.lock().expect("assets lock").get(activity_id).cloned()
        }
    }

    #[async_trait]
    impl ActivityStore for MemoryStore {
        async fn create_activity(&self, activity: &Activity) -> Result<()> {
            self.check()?;
            self.activities.lock().expect("activities lock").push(activity.clone());
            Ok(())
        }

        async fn append_snapshot(&self, snapshot: &ActivitySnapshot, frame: Option<&Frame>) -> Result<()> {
            self.check()?;
            if let Some(frame) = frame {
                self.frames.lock().expect("frames lock").push(frame.clone());
            }
            self.snapshots.lock().expect("snapshots lock").push(snapshot.clone());
            Ok(())
        }

        async fn upsert_asset(&self, asset: &ActivityAsset) -> Result<()> {
            self.check()?;
            self.assets
                .lock()
                .expect("assets lock")
                .insert(asset.activity_id.clone(), asset.clone());
            Ok(())
        }

        async fn close_activity(&self, activity_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
            self.check()?;
            let mut activities = self.activities.lock().expect("activities lock");
            match activities.iter_mut().find(|activity| activity.id == activity_id) {
                Some(activity) => {
                    activity.ended_at.get_or_insert(ended_at);
                    Ok(())
                }
                None => bail!("unknown activity {activity_id}"),
            }
        }
    }
}
