//! The activity state machine.
//!
//! The assembler owns the open [`Activity`] and is the only thing that
//! mutates it. Strategy calls run as detached tasks and come back as
//! [`CaptureReport`]s tagged with the activity they were issued for, so a
//! late answer can never land on the wrong activity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::bridge::Command;
use crate::error::{CaptureError, CaptureResult};
use crate::sensing::phash::{compute_frame_phash, is_same_frame};
use crate::settings::{ActivitySettings, AssetPolicy};
use crate::strategies::{FocusedWindow, Strategy, StrategyRegistry};

use super::assets::AssetData;
use super::model::{Activity, ActivityAsset, ActivitySnapshot, Frame};
use super::snapshots::CapturedSnapshot;
use super::store::ActivityStore;
use super::writes::{PendingWrites, WriteOp};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Upper bound for one strategy call, on top of the per-request bridge
/// timeout. Transcript lookups are not covered by the bridge timeout.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    pub snapshot_interval: Duration,
    pub asset_policy: AssetPolicy,
    pub pending_write_capacity: usize,
    pub capture_timeout: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self::from(&ActivitySettings::default())
    }
}

impl From<&ActivitySettings> for AssemblerConfig {
    fn from(settings: &ActivitySettings) -> Self {
        Self {
            snapshot_interval: Duration::from_millis(settings.snapshot_interval_ms.max(1)),
            asset_policy: settings.asset_policy,
            pending_write_capacity: settings.pending_write_capacity,
            capture_timeout: CAPTURE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusChange {
    Focused(FocusedWindow),
    /// A page went away. Only ends the activity if it is showing that page.
    Closed(FocusedWindow),
    /// Focus left anything we track, e.g. the browser lost focus.
    Lost,
}

/// The open activity as seen by a context request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityContext {
    pub activity: Activity,
    pub asset: Option<AssetData>,
}

#[derive(Debug)]
pub struct SnapshotCapture {
    pub snapshot: CapturedSnapshot,
    pub phash: Option<String>,
}

#[derive(Debug)]
pub enum CaptureReport {
    Snapshot {
        activity_id: String,
        requested_at: DateTime<Utc>,
        result: CaptureResult<Option<SnapshotCapture>>,
    },
    Asset {
        activity_id: String,
        result: CaptureResult<AssetData>,
    },
}

enum AssetSlot {
    Missing,
    InFlight,
    Ready(AssetData),
}

struct LastFrame {
    id: String,
    phash: String,
}

struct OpenActivity {
    activity: Activity,
    strategy: Strategy,
    asset: AssetSlot,
    snapshot_in_flight: bool,
    last_frame: Option<LastFrame>,
    waiters: Vec<oneshot::Sender<Option<ActivityContext>>>,
}

impl OpenActivity {
    fn is_same_content(&self, strategy: &Strategy) -> bool {
        self.activity.process_name == strategy.process_name()
            && self.activity.identity_key == strategy.identity().key()
    }

    fn context(&self) -> ActivityContext {
        let asset = match &self.asset {
            AssetSlot::Ready(data) => Some(data.clone()),
            AssetSlot::Missing | AssetSlot::InFlight => None,
        };
        ActivityContext {
            activity: self.activity.clone(),
            asset,
        }
    }

    fn resolve_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let context = self.context();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Some(context.clone()));
        }
    }
}

pub struct Assembler {
    config: AssemblerConfig,
    registry: Arc<StrategyRegistry>,
    store: Arc<dyn ActivityStore>,
    current: Option<OpenActivity>,
    writes: PendingWrites,
    reports: mpsc::UnboundedSender<CaptureReport>,
}

impl Assembler {
    pub fn new(
        config: AssemblerConfig,
        registry: Arc<StrategyRegistry>,
        store: Arc<dyn ActivityStore>,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureReport>) {
        let (reports, report_rx) = mpsc::unbounded_channel();
        let writes = PendingWrites::new(config.pending_write_capacity);
        let assembler = Self {
            config,
            registry,
            store,
            current: None,
            writes,
            reports,
        };
        (assembler, report_rx)
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn current_activity(&self) -> Option<Activity> {
        self.current.as_ref().map(|open| open.activity.clone())
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub async fn on_focus(&mut self, change: FocusChange, now: DateTime<Utc>) {
        match change {
            FocusChange::Focused(window) => {
                let strategy = self.registry.select(&window);
                let unchanged = self
                    .current
                    .as_ref()
                    .is_some_and(|open| open.is_same_content(&strategy));
                if unchanged {
                    log_debug!("focus unchanged: {}", strategy.identity());
                } else {
                    self.close_current(now);
                    self.open(strategy, now);
                }
            }
            FocusChange::Closed(window) => {
                let strategy = self.registry.select(&window);
                let current = self
                    .current
                    .as_ref()
                    .is_some_and(|open| open.is_same_content(&strategy));
                if current {
                    self.close_current(now);
                } else {
                    log_debug!("ignoring close of background {}", strategy.identity());
                }
            }
            FocusChange::Lost => self.close_current(now),
        }
        self.flush().await;
    }

    /// Flushes writes, then starts a snapshot unless one is still running.
    pub async fn on_tick(&mut self, now: DateTime<Utc>) {
        self.flush().await;

        let Some(open) = self.current.as_mut() else {
            return;
        };
        if !open.strategy.captures_snapshots() {
            return;
        }
        if open.snapshot_in_flight {
            log_debug!("snapshot for {} still in flight, skipping tick", open.activity.id);
            return;
        }

        open.snapshot_in_flight = true;
        spawn_snapshot(
            open.strategy.clone(),
            open.activity.id.clone(),
            now,
            self.config.capture_timeout,
            self.reports.clone(),
        );
    }

    pub async fn on_report(&mut self, report: CaptureReport, now: DateTime<Utc>) {
        match report {
            CaptureReport::Snapshot {
                activity_id,
                requested_at,
                result,
            } => self.accept_snapshot(activity_id, requested_at, result),
            CaptureReport::Asset {
                activity_id,
                result,
            } => self.accept_asset(activity_id, result, now),
        }
        self.flush().await;
    }

    /// Answers with the open activity and its asset, fetching the asset first
    /// if nobody has yet.
    pub fn request_context(&mut self, reply: oneshot::Sender<Option<ActivityContext>>) {
        let Some(open) = self.current.as_mut() else {
            let _ = reply.send(None);
            return;
        };
        if matches!(open.asset, AssetSlot::Ready(_)) {
            let _ = reply.send(Some(open.context()));
            return;
        }
        open.waiters.push(reply);
        start_asset(open, &self.reports, self.config.capture_timeout);
    }

    pub async fn shutdown(&mut self, now: DateTime<Utc>) {
        self.close_current(now);
        self.flush().await;
        if !self.writes.is_empty() {
            log_warn!("{} writes still pending at shutdown", self.writes.len());
        }
    }

    fn open(&mut self, strategy: Strategy, now: DateTime<Utc>) {
        let activity = Activity::open(
            strategy.name(),
            strategy.icon().map(str::to_string),
            strategy.process_name(),
            strategy.identity().key(),
            strategy.kind_name(),
            now,
        );
        log_info!(
            "opened activity {} ({}) for {}",
            activity.id,
            activity.strategy_kind,
            activity.identity_key
        );
        self.push_write(WriteOp::Create(activity.clone()));

        let mut open = OpenActivity {
            activity,
            strategy,
            asset: AssetSlot::Missing,
            snapshot_in_flight: false,
            last_frame: None,
            waiters: Vec::new(),
        };
        if self.config.asset_policy == AssetPolicy::OnOpen {
            start_asset(&mut open, &self.reports, self.config.capture_timeout);
        }
        self.current = Some(open);
    }

    fn close_current(&mut self, now: DateTime<Utc>) {
        let Some(mut open) = self.current.take() else {
            return;
        };
        open.activity.ended_at = Some(now);
        open.resolve_waiters();
        log_info!("closed activity {} ({})", open.activity.id, open.activity.identity_key);
        self.push_write(WriteOp::Close {
            activity_id: open.activity.id,
            ended_at: now,
        });
    }

    fn accept_snapshot(
        &mut self,
        activity_id: String,
        requested_at: DateTime<Utc>,
        result: CaptureResult<Option<SnapshotCapture>>,
    ) {
        let Some(open) = self
            .current
            .as_mut()
            .filter(|open| open.activity.id == activity_id)
        else {
            log_debug!("discarding snapshot for closed activity {activity_id}");
            return;
        };
        open.snapshot_in_flight = false;

        let capture = match result {
            Ok(Some(capture)) => capture,
            Ok(None) => return,
            Err(err) if err.is_stale() => {
                log_debug!("discarding stale snapshot for {activity_id}: {err}");
                return;
            }
            Err(err) => {
                log_warn!("snapshot for activity {activity_id} failed: {err}");
                return;
            }
        };

        let SnapshotCapture { snapshot, phash } = capture;
        let (frame_id, frame) = match snapshot.frame {
            None => (None, None),
            Some(image) => {
                let reused = match (&phash, &open.last_frame) {
                    (Some(hash), Some(last)) if is_same_frame(hash, &last.phash) => Some(last.id.clone()),
                    _ => None,
                };
                match reused {
                    Some(id) => (Some(id), None),
                    None => {
                        let frame = Frame::new(image, phash.clone(), requested_at);
                        open.last_frame = phash.map(|phash| LastFrame {
                            id: frame.id.clone(),
                            phash,
                        });
                        (Some(frame.id.clone()), Some(frame))
                    }
                }
            }
        };

        let snapshot = ActivitySnapshot::new(activity_id, frame_id, snapshot.data, requested_at);
        self.push_write(WriteOp::Snapshot { snapshot, frame });
    }

    fn accept_asset(&mut self, activity_id: String, result: CaptureResult<AssetData>, now: DateTime<Utc>) {
        let Some(open) = self
            .current
            .as_mut()
            .filter(|open| open.activity.id == activity_id)
        else {
            log_debug!("discarding asset for closed activity {activity_id}");
            return;
        };

        match result {
            Ok(data) => {
                let persist = !data.is_empty();
                open.asset = AssetSlot::Ready(data.clone());
                open.resolve_waiters();
                if persist {
                    self.push_write(WriteOp::Asset(ActivityAsset::new(activity_id, data, now)));
                }
            }
            Err(err) => {
                if err.is_stale() {
                    log_debug!("discarding stale asset for {activity_id}: {err}");
                } else {
                    log_warn!("asset for activity {activity_id} failed: {err}");
                }
                open.asset = AssetSlot::Missing;
                open.resolve_waiters();
            }
        }
    }

    fn push_write(&mut self, op: WriteOp) {
        let Some(orphaned) = self.writes.push(op) else {
            return;
        };
        if let Some(open) = self.current.as_mut() {
            if open.last_frame.as_ref().is_some_and(|last| last.id == orphaned) {
                open.last_frame = None;
            }
        }
    }

    async fn flush(&mut self) {
        self.writes.flush(self.store.as_ref()).await;
    }
}

fn timeout_error(command: Command, timeout: Duration) -> CaptureError {
    CaptureError::Timeout {
        command,
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Starts the asset fetch unless it is already running or done.
fn start_asset(open: &mut OpenActivity, reports: &mpsc::UnboundedSender<CaptureReport>, timeout: Duration) {
    if !matches!(open.asset, AssetSlot::Missing) {
        return;
    }
    open.asset = AssetSlot::InFlight;

    let strategy = open.strategy.clone();
    let activity_id = open.activity.id.clone();
    let reports = reports.clone();
    tokio::spawn(async move {
        let result = tokio::time::timeout(timeout, strategy.retrieve_assets())
            .await
            .unwrap_or_else(|_| Err(timeout_error(Command::GenerateAssets, timeout)));
        let _ = reports.send(CaptureReport::Asset {
            activity_id,
            result,
        });
    });
}

fn spawn_snapshot(
    strategy: Strategy,
    activity_id: String,
    requested_at: DateTime<Utc>,
    timeout: Duration,
    reports: mpsc::UnboundedSender<CaptureReport>,
) {
    tokio::spawn(async move {
        let result = tokio::time::timeout(timeout, strategy.retrieve_snapshot())
            .await
            .unwrap_or_else(|_| Err(timeout_error(Command::GenerateSnapshot, timeout)));
        let result = match result {
            Ok(Some(snapshot)) => Ok(Some(hash_frame(snapshot).await)),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        let _ = reports.send(CaptureReport::Snapshot {
            activity_id,
            requested_at,
            result,
        });
    });
}

async fn hash_frame(snapshot: CapturedSnapshot) -> SnapshotCapture {
    let Some(encoded) = snapshot.frame.as_ref().map(|frame| frame.base64.clone()) else {
        return SnapshotCapture {
            snapshot,
            phash: None,
        };
    };

    let phash = match tokio::task::spawn_blocking(move || compute_frame_phash(&encoded)).await {
        Ok(Ok(hash)) => Some(hash),
        Ok(Err(err)) => {
            log_warn!("frame hash failed: {err:#}");
            None
        }
        Err(err) => {
            log_warn!("frame hash worker failed: {err}");
            None
        }
    };
    SnapshotCapture { snapshot, phash }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::activity::store::testing::MemoryStore;
    use crate::domain::DomainRegistry;
    use crate::native::{
        NativeArticleAsset, NativeArticleSnapshot, NativeMessage, NativeYoutubeAsset,
        NativeYoutubeSnapshot,
    };
    use crate::sensing::phash::testing::quadrant_png;
    use crate::strategies::testing::{Scripted, ScriptedClient};

    const VIDEO_URL: &str = "https://www.youtube.com/watch?v=abc123";
    const NEWS_URL: &str = "https://news-site.com/story";

    struct Harness {
        assembler: Assembler,
        reports: mpsc::UnboundedReceiver<CaptureReport>,
        client: Arc<ScriptedClient>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new(policy: AssetPolicy) -> Self {
            let client = Arc::new(ScriptedClient::default());
            let store = Arc::new(MemoryStore::default());
            let registry = StrategyRegistry::new(
                vec!["chrome".to_string()],
                Arc::new(DomainRegistry::builtin()),
            )
            .with_client(client.clone());
            let config = AssemblerConfig {
                asset_policy: policy,
                ..AssemblerConfig::default()
            };
            let (assembler, reports) = Assembler::new(config, Arc::new(registry), store.clone());
            Self {
                assembler,
                reports,
                client,
                store,
            }
        }

        async fn focus(&mut self, url: &str, seconds: i64) {
            self.assembler
                .on_focus(FocusChange::Focused(chrome_window(url)), at(seconds))
                .await;
        }

        /// Waits for the next strategy report and hands it to the assembler.
        async fn pump(&mut self, seconds: i64) {
            let report = self.reports.recv().await.expect("capture report");
            self.assembler.on_report(report, at(seconds)).await;
        }
    }

    fn chrome_window(url: &str) -> FocusedWindow {
        FocusedWindow {
            process_id: 7,
            process_name: "chrome".to_string(),
            display_name: "Google Chrome".to_string(),
            window_title: url.to_string(),
            url: Some(url.to_string()),
            icon: None,
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("valid time")
            + chrono::Duration::seconds(seconds)
    }

    fn video_snapshot(url: &str, frame: String, current_time: f32) -> NativeMessage {
        NativeMessage::NativeYoutubeSnapshot(NativeYoutubeSnapshot {
            url: Some(url.to_string()),
            current_time,
            video_frame_base64: frame,
            video_frame_width: Some(64),
            video_frame_height: Some(64),
        })
    }

    fn video_asset() -> NativeMessage {
        NativeMessage::NativeYoutubeAsset(NativeYoutubeAsset {
            url: VIDEO_URL.to_string(),
            title: "Lecture".to_string(),
            transcript: r#"[{"text":"hello","start":0.0,"duration":1.0}]"#.to_string(),
            current_time: 4.0,
        })
    }

    fn article_asset() -> NativeMessage {
        NativeMessage::NativeArticleAsset(NativeArticleAsset {
            url: NEWS_URL.to_string(),
            title: "Story".to_string(),
            content: "<p>body</p>".to_string(),
            text_content: "body".to_string(),
            site_name: None,
            language: None,
            excerpt: None,
            byline: None,
            length: None,
            selected_text: None,
        })
    }

    #[tokio::test]
    async fn focus_change_closes_previous_activity() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);

        harness.focus(VIDEO_URL, 0).await;
        harness.focus(&format!("{VIDEO_URL}&t=30"), 5).await;
        assert_eq!(harness.store.activities().len(), 1);

        harness.focus(NEWS_URL, 10).await;

        let activities = harness.store.activities();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].strategy_kind, "youtube");
        assert_eq!(activities[0].ended_at, Some(at(10)));
        assert_eq!(activities[1].strategy_kind, "article");
        assert_eq!(harness.store.open_activities().len(), 1);
    }

    #[tokio::test]
    async fn focus_loss_closes_without_opening() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.focus(NEWS_URL, 0).await;
        harness.assembler.on_focus(FocusChange::Lost, at(3)).await;

        assert!(harness.assembler.current_activity().is_none());
        assert!(harness.store.open_activities().is_empty());

        harness.focus(NEWS_URL, 6).await;
        assert_eq!(harness.store.activities().len(), 2);
    }

    #[tokio::test]
    async fn closing_a_background_tab_keeps_activity_open() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.focus(VIDEO_URL, 0).await;

        harness
            .assembler
            .on_focus(FocusChange::Closed(chrome_window(NEWS_URL)), at(4))
            .await;
        let open = harness.assembler.current_activity().expect("still open");
        assert_eq!(open.strategy_kind, "youtube");
        assert_eq!(harness.store.open_activities().len(), 1);

        harness
            .assembler
            .on_focus(FocusChange::Closed(chrome_window(VIDEO_URL)), at(8))
            .await;
        assert!(harness.assembler.current_activity().is_none());
        let activities = harness.store.activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].ended_at, Some(at(8)));
    }

    #[tokio::test]
    async fn one_snapshot_in_flight_per_activity() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.client.reply(
            Command::GenerateSnapshot,
            NativeMessage::NativeArticleSnapshot(NativeArticleSnapshot {
                url: Some(NEWS_URL.to_string()),
                highlighted_text: Some("quote".to_string()),
            }),
        );
        harness.focus(NEWS_URL, 0).await;

        harness.assembler.on_tick(at(3)).await;
        harness.assembler.on_tick(at(6)).await;
        harness.pump(7).await;
        assert_eq!(harness.client.calls(&Command::GenerateSnapshot), 1);

        harness.assembler.on_tick(at(9)).await;
        harness.pump(10).await;

        let snapshots = harness.store.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].created_at, at(3));
        assert_eq!(snapshots[1].created_at, at(9));
    }

    #[tokio::test]
    async fn late_snapshot_is_not_attached_to_next_activity() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.client.reply(
            Command::GenerateSnapshot,
            video_snapshot(VIDEO_URL, String::new(), 1.0),
        );
        harness.focus(VIDEO_URL, 0).await;
        harness.assembler.on_tick(at(3)).await;

        harness.focus(NEWS_URL, 4).await;
        harness.pump(5).await;

        assert!(harness.store.snapshots().is_empty());
    }

    #[tokio::test]
    async fn stale_or_failed_snapshots_keep_activity_open() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.client.push(
            Command::GenerateSnapshot,
            Scripted::Reply(video_snapshot("https://www.youtube.com/watch?v=other", String::new(), 1.0)),
        );
        harness
            .client
            .push(Command::GenerateSnapshot, Scripted::Fail("player gone".to_string()));
        harness.focus(VIDEO_URL, 0).await;

        harness.assembler.on_tick(at(3)).await;
        harness.pump(3).await;
        harness.assembler.on_tick(at(6)).await;
        harness.pump(6).await;

        assert!(harness.store.snapshots().is_empty());
        assert!(harness.assembler.current_activity().is_some());
        assert_eq!(harness.store.open_activities().len(), 1);
    }

    #[tokio::test]
    async fn similar_frames_share_one_frame_row() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.client.push(
            Command::GenerateSnapshot,
            Scripted::Reply(video_snapshot(VIDEO_URL, quadrant_png(true), 1.0)),
        );
        harness.client.push(
            Command::GenerateSnapshot,
            Scripted::Reply(video_snapshot(VIDEO_URL, quadrant_png(true), 4.0)),
        );
        harness.client.push(
            Command::GenerateSnapshot,
            Scripted::Reply(video_snapshot(VIDEO_URL, quadrant_png(false), 7.0)),
        );
        harness.focus(VIDEO_URL, 0).await;

        for tick in [3, 6, 9] {
            harness.assembler.on_tick(at(tick)).await;
            harness.pump(tick).await;
        }

        let snapshots = harness.store.snapshots();
        let frames = harness.store.frames();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].frame_id, snapshots[1].frame_id);
        assert_eq!(frames.len(), 2);
        assert_eq!(snapshots[2].frame_id.as_deref(), Some(frames[1].id.as_str()));
    }

    #[tokio::test]
    async fn asset_fetched_on_open_and_served_from_memory() {
        let mut harness = Harness::new(AssetPolicy::OnOpen);
        harness.client.reply(Command::GenerateAssets, video_asset());
        harness.focus(VIDEO_URL, 0).await;
        harness.pump(1).await;

        let activity = harness.assembler.current_activity().expect("open activity");
        let stored = harness.store.asset(&activity.id).expect("asset stored");
        match &stored.data {
            AssetData::Youtube(asset) => {
                assert_eq!(asset.current_time, 4.0);
                assert_eq!(asset.transcript.len(), 1);
            }
            other => panic!("unexpected asset {other:?}"),
        }

        let (tx, rx) = oneshot::channel();
        harness.assembler.request_context(tx);
        let context = rx.await.expect("reply").expect("context");
        assert_eq!(context.asset, Some(stored.data));
        assert_eq!(harness.client.calls(&Command::GenerateAssets), 1);
    }

    #[tokio::test]
    async fn on_demand_asset_is_fetched_once_and_retried_after_failure() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness
            .client
            .push(Command::GenerateAssets, Scripted::Fail("readability failed".to_string()));
        harness.client.push(Command::GenerateAssets, Scripted::Reply(article_asset()));
        harness.focus(NEWS_URL, 0).await;
        assert_eq!(harness.client.calls(&Command::GenerateAssets), 0);

        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        harness.assembler.request_context(first_tx);
        harness.assembler.request_context(second_tx);
        harness.pump(1).await;

        assert_eq!(first_rx.await.expect("reply").expect("context").asset, None);
        assert_eq!(second_rx.await.expect("reply").expect("context").asset, None);
        assert_eq!(harness.client.calls(&Command::GenerateAssets), 1);

        let (retry_tx, retry_rx) = oneshot::channel();
        harness.assembler.request_context(retry_tx);
        harness.pump(2).await;
        let context = retry_rx.await.expect("reply").expect("context");
        assert!(matches!(context.asset, Some(AssetData::Article(_))));
        assert_eq!(harness.client.calls(&Command::GenerateAssets), 2);
    }

    #[tokio::test]
    async fn writes_survive_store_outage_in_order() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.store.set_failing(true);
        harness.focus(VIDEO_URL, 0).await;
        harness.focus(NEWS_URL, 5).await;
        assert!(harness.store.activities().is_empty());
        assert_eq!(harness.assembler.pending_writes(), 3);

        harness.store.set_failing(false);
        harness.assembler.on_tick(at(6)).await;

        let activities = harness.store.activities();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].ended_at, Some(at(5)));
        assert!(activities[1].is_open());
        assert_eq!(harness.assembler.pending_writes(), 0);
    }

    #[tokio::test]
    async fn default_windows_are_never_polled() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        let editor = FocusedWindow {
            process_name: "code".to_string(),
            window_title: "main.rs".to_string(),
            ..FocusedWindow::default()
        };
        harness
            .assembler
            .on_focus(FocusChange::Focused(editor), at(0))
            .await;
        harness.assembler.on_tick(at(3)).await;

        let activities = harness.store.activities();
        assert_eq!(activities[0].strategy_kind, "default");
        assert_eq!(activities[0].identity_key, "window:code:main.rs");
        assert_eq!(harness.client.calls(&Command::GenerateSnapshot), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_open_activity() {
        let mut harness = Harness::new(AssetPolicy::OnDemand);
        harness.focus(NEWS_URL, 0).await;

        let (tx, rx) = oneshot::channel();
        harness.assembler.request_context(tx);
        harness.assembler.shutdown(at(30)).await;

        let context = rx.await.expect("reply").expect("context");
        assert_eq!(context.activity.ended_at, Some(at(30)));
        assert!(harness.store.open_activities().is_empty());
        assert!(harness.assembler.current_activity().is_none());
    }
}
