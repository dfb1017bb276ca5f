//! Port Manager: one logical connection to the native host that survives the
//! host going away.
//!
//! Callers only ever push frames into a bounded FIFO. A supervisor task owns
//! the actual channel: it connects, drains the FIFO, resolves inbound
//! Responses through the [`Correlator`], forwards everything else as
//! [`PortEvent`]s and, when the channel drops, reconnects with capped
//! exponential backoff. Frames that could not be written stay queued and are
//! replayed in order once the host is back. Requests already written when the
//! channel drops can never be answered, so their waiters fail at once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::settings::BridgeSettings;

use super::codec::{read_frame, write_frame, FrameRead, DEFAULT_MAX_FRAME_LEN};
use super::correlator::{Correlator, Resolution};
use super::message::FramedMessage;
use super::transport::{BoxedReader, Connection, Connector};
use super::FrameSink;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Fraction of the computed delay added at random, 0.0 disables jitter.
    pub reconnect_jitter: f64,
    pub queue_capacity: usize,
    pub max_inbound_frame_len: usize,
    pub max_outbound_frame_len: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5_000),
            max_reconnect_delay: Duration::from_millis(60_000),
            reconnect_jitter: 0.1,
            queue_capacity: 256,
            max_inbound_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_outbound_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl From<&BridgeSettings> for PortConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            reconnect_jitter: settings.reconnect_jitter,
            queue_capacity: settings.queue_capacity,
            ..Self::default()
        }
    }
}

impl PortConfig {
    /// `min(base * 2^attempt, max)`, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.reconnect_delay
            .checked_mul(factor)
            .unwrap_or(self.max_reconnect_delay)
            .min(self.max_reconnect_delay)
    }

    fn reconnect_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.reconnect_jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.reconnect_jitter);
        delay + delay.mul_f64(extra)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Connected,
    Disconnected,
    Message(FramedMessage),
}

struct OutboundQueue {
    frames: VecDeque<FramedMessage>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
            closed: false,
        }
    }

    fn push_back(&mut self, message: FramedMessage) -> Option<FramedMessage> {
        self.frames.push_back(message);
        self.evict_overflow()
    }

    /// Puts a frame that failed to write back at the head of the line.
    fn requeue(&mut self, message: FramedMessage) -> Option<FramedMessage> {
        self.frames.push_front(message);
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Option<FramedMessage> {
        if self.frames.len() <= self.capacity {
            return None;
        }
        self.dropped += 1;
        self.frames.pop_front()
    }
}

struct Shared {
    queue: Mutex<OutboundQueue>,
    wake: Notify,
    status: watch::Sender<PortStatus>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, OutboundQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: PortStatus) {
        self.status.send_replace(status);
    }

    fn pop(&self) -> Option<FramedMessage> {
        self.queue().frames.pop_front()
    }

    fn queued_ids(&self) -> HashSet<String> {
        self.queue()
            .frames
            .iter()
            .map(|message| message.id.clone())
            .collect()
    }

    fn requeue(&self, message: FramedMessage) {
        if let Some(dropped) = self.queue().requeue(message) {
            log_warn!(
                "outbound queue full, dropped oldest {} frame {}",
                dropped.command,
                dropped.id
            );
        }
    }
}

pub struct PortManager {
    config: PortConfig,
    connector: Arc<dyn Connector>,
    correlator: Correlator,
    shared: Arc<Shared>,
    status_rx: watch::Receiver<PortStatus>,
    cancel_token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl PortManager {
    pub fn new(config: PortConfig, connector: Arc<dyn Connector>, correlator: Correlator) -> Self {
        let (status_tx, status_rx) = watch::channel(PortStatus::Disconnected);
        let shared = Arc::new(Shared {
            queue: Mutex::new(OutboundQueue::new(config.queue_capacity)),
            wake: Notify::new(),
            status: status_tx,
        });
        Self {
            config,
            connector,
            correlator,
            shared,
            status_rx,
            cancel_token: None,
            handle: None,
        }
    }

    /// Starts the supervisor. Inbound frames and connection transitions
    /// arrive on the returned stream.
    pub fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<PortEvent>, BridgeError> {
        if self.handle.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }
        if self.shared.queue().closed {
            return Err(BridgeError::Closed);
        }

        let cancel_token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(supervise(
            self.config.clone(),
            Arc::clone(&self.connector),
            self.correlator.clone(),
            Arc::clone(&self.shared),
            events_tx,
            cancel_token.clone(),
        ));

        self.cancel_token = Some(cancel_token);
        self.handle = Some(handle);
        Ok(events_rx)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn status(&self) -> PortStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<PortStatus> {
        self.status_rx.clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.queue().dropped
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue().frames.len()
    }

    pub async fn shutdown(&mut self) {
        self.shared.queue().closed = true;

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log_error!("port supervisor failed to join: {err}");
            }
        }
        self.shared.set_status(PortStatus::Disconnected);

        let failed = self.correlator.fail_all();
        if failed > 0 {
            log_info!("failed {failed} pending requests on shutdown");
        }
    }
}

impl FrameSink for PortManager {
    fn send(&self, message: FramedMessage) -> Result<(), BridgeError> {
        let dropped = {
            let mut queue = self.shared.queue();
            if queue.closed {
                return Err(BridgeError::Closed);
            }
            queue.push_back(message)
        };
        if let Some(dropped) = dropped {
            log_warn!(
                "outbound queue full, dropped oldest {} frame {}",
                dropped.command,
                dropped.id
            );
        }
        self.shared.wake.notify_one();
        Ok(())
    }
}

enum ConnectionEnd {
    Cancelled,
    Lost(String),
}

async fn supervise(
    config: PortConfig,
    connector: Arc<dyn Connector>,
    correlator: Correlator,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PortEvent>,
    cancel_token: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_status(PortStatus::Connecting);
        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = cancel_token.cancelled() => break,
        };

        match connected {
            Ok(connection) => {
                attempt = 0;
                shared.set_status(PortStatus::Connected);
                log_info!("native port connected");
                let _ = events.send(PortEvent::Connected);

                let end = run_connection(
                    connection,
                    &config,
                    &correlator,
                    &shared,
                    &events,
                    &cancel_token,
                )
                .await;

                shared.set_status(PortStatus::Disconnected);
                if let ConnectionEnd::Lost(reason) = &end {
                    log_warn!("native port disconnected: {reason}");
                    let queued = shared.queued_ids();
                    let failed = correlator.fail_where(|id| !queued.contains(id));
                    if failed > 0 {
                        log_warn!("failed {failed} requests written before the disconnect");
                    }
                }
                let _ = events.send(PortEvent::Disconnected);
                if let ConnectionEnd::Cancelled = end {
                    break;
                }
            }
            Err(err) => {
                shared.set_status(PortStatus::Disconnected);
                log_warn!("native port connect failed: {err}");
            }
        }

        let delay = config.reconnect_delay_for(attempt);
        attempt = attempt.saturating_add(1);
        log_info!(
            "reconnecting native port in {}ms ({} frames queued)",
            delay.as_millis(),
            shared.queue().frames.len()
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    shared.set_status(PortStatus::Disconnected);
    log_info!("native port supervisor stopped");
}

async fn run_connection(
    connection: Connection,
    config: &PortConfig,
    correlator: &Correlator,
    shared: &Shared,
    events: &mpsc::UnboundedSender<PortEvent>,
    cancel_token: &CancellationToken,
) -> ConnectionEnd {
    let (reader, mut writer, _child) = connection.into_parts();
    let (closed_tx, mut closed_rx) = oneshot::channel();
    let reader_task = tokio::spawn(forward_inbound(
        reader,
        correlator.clone(),
        events.clone(),
        config.max_inbound_frame_len,
        closed_tx,
    ));

    let end = loop {
        tokio::select! {
            flushed = drain_queue(&mut writer, shared, config.max_outbound_frame_len) => {
                if let Err(reason) = flushed {
                    break ConnectionEnd::Lost(reason);
                }
            }
            _ = cancel_token.cancelled() => break ConnectionEnd::Cancelled,
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break ConnectionEnd::Cancelled,
            reason = &mut closed_rx => {
                break ConnectionEnd::Lost(reason.unwrap_or_else(|_| "reader stopped".to_string()));
            }
            _ = shared.wake.notified() => {}
        }
    };

    reader_task.abort();
    end
}

/// Writes queued frames in FIFO order until the queue is empty. On a write
/// failure the frame goes back to the head of the queue.
async fn drain_queue<W>(writer: &mut W, shared: &Shared, max_len: usize) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = shared.pop() {
        match write_frame(writer, &message, max_len).await {
            Ok(()) => log_debug!("sent {} frame {}", message.command, message.id),
            Err(err @ (BridgeError::FrameTooLarge { .. } | BridgeError::Encode(_))) => {
                log_error!("dropping unsendable {} frame {}: {err}", message.command, message.id);
            }
            Err(err) => {
                shared.requeue(message);
                return Err(err.to_string());
            }
        }
    }
    Ok(())
}

async fn forward_inbound(
    mut reader: BoxedReader,
    correlator: Correlator,
    events: mpsc::UnboundedSender<PortEvent>,
    max_len: usize,
    closed_tx: oneshot::Sender<String>,
) {
    let reason = loop {
        match read_frame(&mut reader, max_len).await {
            Ok(FrameRead::Message(message)) => match correlator.resolve(message) {
                Resolution::Delivered | Resolution::Stale => {}
                Resolution::Unsolicited(message) => {
                    if events.send(PortEvent::Message(message)).is_err() {
                        log_debug!("port event receiver dropped, discarding inbound frame");
                    }
                }
            },
            Ok(FrameRead::Malformed(reason)) => log_warn!("dropping malformed inbound frame: {reason}"),
            Ok(FrameRead::Eof) => break "native host closed the channel".to_string(),
            Err(err) => break err.to_string(),
        }
    };
    let _ = closed_tx.send(reason);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::bridge::correlator::PendingResponse;
    use crate::bridge::message::{Command, Endpoint};
    use crate::error::CaptureError;

    struct PipeConnector {
        available: AtomicBool,
        attempts: AtomicUsize,
        remotes: mpsc::UnboundedSender<DuplexStream>,
    }

    impl PipeConnector {
        fn new(available: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                available: AtomicBool::new(available),
                attempts: AtomicUsize::new(0),
                remotes: tx,
            });
            (connector, rx)
        }
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self) -> Result<Connection, BridgeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.available.load(Ordering::SeqCst) {
                return Err(BridgeError::ConnectFailed("host not running".to_string()));
            }
            let (local, remote) = tokio::io::duplex(64 * 1024);
            self.remotes
                .send(remote)
                .map_err(|_| BridgeError::ConnectFailed("test dropped".to_string()))?;
            let (reader, writer) = tokio::io::split(local);
            Ok(Connection::new(Box::new(reader), Box::new(writer)))
        }
    }

    fn config(capacity: usize) -> PortConfig {
        PortConfig {
            reconnect_jitter: 0.0,
            queue_capacity: capacity,
            ..PortConfig::default()
        }
    }

    fn frame(command: Command) -> FramedMessage {
        FramedMessage::request(Endpoint::Background, Endpoint::NativeHost, command, None)
    }

    async fn next_message(remote: &mut DuplexStream) -> FramedMessage {
        match read_frame(remote, DEFAULT_MAX_FRAME_LEN).await.expect("read frame") {
            FrameRead::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    async fn wait_for(events: &mut mpsc::UnboundedReceiver<PortEvent>, wanted: PortEvent) {
        loop {
            let event = events.recv().await.expect("event stream open");
            if event == wanted {
                return;
            }
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = config(8);
        let secs: Vec<u64> = [0, 1, 2, 3, 4, 10, 40]
            .into_iter()
            .map(|attempt| config.backoff(attempt).as_secs())
            .collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[test]
    fn full_queue_drops_oldest_first() {
        let (connector, _remotes) = PipeConnector::new(false);
        let manager = PortManager::new(config(2), connector, Correlator::default());
        let first = frame(Command::GetMetadata);
        let second = frame(Command::GenerateAssets);
        let third = frame(Command::GenerateSnapshot);

        manager.send(first).expect("queue first");
        manager.send(second.clone()).expect("queue second");
        manager.send(third.clone()).expect("queue third");

        assert_eq!(manager.dropped_count(), 1);
        assert_eq!(manager.queued_len(), 2);
        let queued: Vec<String> = manager
            .shared
            .queue()
            .frames
            .iter()
            .map(|message| message.id.clone())
            .collect();
        assert_eq!(queued, vec![second.id, third.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_sent_while_disconnected_replay_in_order() {
        let (connector, mut remotes) = PipeConnector::new(false);
        let mut manager = PortManager::new(config(16), connector.clone(), Correlator::default());
        let _events = manager.connect().expect("start supervisor");

        let sent: Vec<FramedMessage> = [Command::GetMetadata, Command::GenerateAssets, Command::GenerateSnapshot]
            .into_iter()
            .map(frame)
            .collect();
        for message in &sent {
            manager.send(message.clone()).expect("queue frame");
        }
        assert_ne!(manager.status(), PortStatus::Connected);

        // Let the first attempt fail before the host comes up.
        while connector.attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        connector.available.store(true, Ordering::SeqCst);
        let mut remote = remotes.recv().await.expect("reconnected");
        for expected in &sent {
            assert_eq!(&next_message(&mut remote).await, expected);
        }
        assert!(connector.attempts.load(Ordering::SeqCst) >= 2);
        assert_eq!(manager.dropped_count(), 0);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn host_restart_keeps_queued_frames() {
        let (connector, mut remotes) = PipeConnector::new(true);
        let mut manager = PortManager::new(config(16), connector, Correlator::default());
        let mut events = manager.connect().expect("start supervisor");

        let mut first_remote = remotes.recv().await.expect("connected");
        wait_for(&mut events, PortEvent::Connected).await;
        let before = frame(Command::GetMetadata);
        manager.send(before.clone()).expect("send before");
        assert_eq!(next_message(&mut first_remote).await, before);

        drop(first_remote);
        wait_for(&mut events, PortEvent::Disconnected).await;
        assert_eq!(manager.status(), PortStatus::Disconnected);

        let during: Vec<FramedMessage> = [Command::GenerateAssets, Command::GenerateSnapshot]
            .into_iter()
            .map(frame)
            .collect();
        for message in &during {
            manager.send(message.clone()).expect("queue during outage");
        }

        let mut second_remote = remotes.recv().await.expect("reconnected");
        for expected in &during {
            assert_eq!(&next_message(&mut second_remote).await, expected);
        }

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_become_events() {
        let (connector, mut remotes) = PipeConnector::new(true);
        let mut manager = PortManager::new(config(4), connector, Correlator::default());
        let mut events = manager.connect().expect("start supervisor");

        let mut remote = remotes.recv().await.expect("connected");
        let inbound = frame(Command::New);
        write_frame(&mut remote, &inbound, DEFAULT_MAX_FRAME_LEN)
            .await
            .expect("write inbound");

        wait_for(&mut events, PortEvent::Message(inbound)).await;
        manager.shutdown().await;
    }

    fn issue(manager: &PortManager, command: Command) -> PendingResponse {
        manager
            .correlator()
            .issue(manager, Endpoint::Background, Endpoint::NativeHost, command, None)
            .expect("issue request")
    }

    #[tokio::test]
    async fn responses_resolve_requests_instead_of_becoming_events() {
        let (connector, mut remotes) = PipeConnector::new(true);
        let mut manager = PortManager::new(config(4), connector, Correlator::default());
        let mut events = manager.connect().expect("start supervisor");
        let mut remote = remotes.recv().await.expect("connected");

        let pending = issue(&manager, Command::GetMetadata);
        let request = next_message(&mut remote).await;
        assert_eq!(request.id, pending.id());
        let response = request.respond(None);
        write_frame(&mut remote, &response, DEFAULT_MAX_FRAME_LEN)
            .await
            .expect("write response");
        assert_eq!(pending.wait().await.expect("response"), response);

        let event = FramedMessage::event(
            Endpoint::NativeHost,
            Endpoint::Background,
            Command::TabActivated,
            None,
        );
        write_frame(&mut remote, &event, DEFAULT_MAX_FRAME_LEN)
            .await
            .expect("write event");
        loop {
            match events.recv().await.expect("event stream open") {
                PortEvent::Message(message) => {
                    assert_eq!(message, event);
                    break;
                }
                PortEvent::Connected => {}
                PortEvent::Disconnected => panic!("unexpected disconnect"),
            }
        }
        assert_eq!(manager.correlator().pending_count(), 0);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_fails_written_requests_and_keeps_queued_ones() {
        let (connector, mut remotes) = PipeConnector::new(true);
        let mut manager = PortManager::new(config(4), connector.clone(), Correlator::default());
        let mut events = manager.connect().expect("start supervisor");
        let mut first_remote = remotes.recv().await.expect("connected");

        let written = issue(&manager, Command::GenerateAssets);
        next_message(&mut first_remote).await;
        connector.available.store(false, Ordering::SeqCst);
        drop(first_remote);
        wait_for(&mut events, PortEvent::Disconnected).await;
        assert!(matches!(
            written.wait().await,
            Err(CaptureError::ChannelClosed(Command::GenerateAssets))
        ));

        let queued = issue(&manager, Command::GenerateSnapshot);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(manager.correlator().pending_count(), 1);

        connector.available.store(true, Ordering::SeqCst);
        let mut second_remote = remotes.recv().await.expect("reconnected");
        let replayed = next_message(&mut second_remote).await;
        assert_eq!(replayed.id, queued.id());
        write_frame(&mut second_remote, &replayed.respond(None), DEFAULT_MAX_FRAME_LEN)
            .await
            .expect("write response");
        assert!(queued.wait().await.is_ok());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_further_sends() {
        let (connector, _remotes) = PipeConnector::new(false);
        let mut manager = PortManager::new(config(4), connector, Correlator::default());
        let _events = manager.connect().expect("start supervisor");
        assert!(matches!(manager.connect(), Err(BridgeError::AlreadyRunning)));
        let pending = issue(&manager, Command::GetMetadata);

        manager.shutdown().await;
        assert!(matches!(
            pending.wait().await,
            Err(CaptureError::ChannelClosed(Command::GetMetadata))
        ));

        assert_eq!(manager.status(), PortStatus::Disconnected);
        assert!(matches!(
            manager.send(frame(Command::GetIcon)),
            Err(BridgeError::Closed)
        ));
        assert!(matches!(manager.connect(), Err(BridgeError::Closed)));
    }
}
