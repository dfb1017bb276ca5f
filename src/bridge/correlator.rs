use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::error::{CaptureError, CaptureResult};

use super::message::{Command, Endpoint, FramedMessage, MessageKind, Payload};
use super::FrameSink;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

struct PendingRequest {
    command: Command,
    tx: oneshot::Sender<FramedMessage>,
}

/// What happened to an inbound frame handed to [`Correlator::resolve`].
#[derive(Debug, PartialEq)]
pub enum Resolution {
    Delivered,
    /// A Response nobody is waiting for any more (timed out, or never ours).
    Stale,
    /// Requests and Events are not correlated; the caller routes them.
    Unsolicited(FramedMessage),
}

/// Pairs Responses with the Requests that caused them. Cheap to clone; all
/// clones share one pending map.
#[derive(Clone)]
pub struct Correlator {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    timeout: Duration,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a resolver under a fresh id, then hands the Request to the
    /// sink. The resolver is in place before the frame can possibly be
    /// answered.
    pub fn issue(
        &self,
        sink: &dyn FrameSink,
        source: Endpoint,
        target: Endpoint,
        command: Command,
        payload: Option<Payload>,
    ) -> CaptureResult<PendingResponse> {
        let request = FramedMessage::request(source, target, command.clone(), payload);
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(
            id.clone(),
            PendingRequest {
                command: command.clone(),
                tx,
            },
        );

        if let Err(err) = sink.send(request) {
            self.pending().remove(&id);
            return Err(err.into());
        }

        Ok(PendingResponse {
            id,
            command,
            rx,
            timeout: self.timeout,
            pending: Arc::clone(&self.pending),
        })
    }

    pub async fn request(
        &self,
        sink: &dyn FrameSink,
        source: Endpoint,
        target: Endpoint,
        command: Command,
        payload: Option<Payload>,
    ) -> CaptureResult<FramedMessage> {
        self.issue(sink, source, target, command, payload)?.wait().await
    }

    pub fn resolve(&self, message: FramedMessage) -> Resolution {
        if message.kind != MessageKind::Response {
            return Resolution::Unsolicited(message);
        }

        let Some(entry) = self.pending().remove(&message.id) else {
            log::warn!(
                "dropping {} response {} with no pending request",
                message.command,
                message.id
            );
            return Resolution::Stale;
        };

        if entry.command != message.command {
            log::debug!(
                "response {} answers {} but carries command {}",
                message.id,
                entry.command,
                message.command
            );
        }

        let id = message.id.clone();
        if entry.tx.send(message).is_err() {
            log::warn!("requester for {id} went away before its response arrived");
            return Resolution::Stale;
        }
        Resolution::Delivered
    }

    /// Drops every resolver; their waiters see `ChannelClosed`.
    pub fn fail_all(&self) -> usize {
        let mut pending = self.pending();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Drops the resolvers whose id matches `failed`; their waiters see
    /// `ChannelClosed`.
    pub fn fail_where(&self, mut failed: impl FnMut(&str) -> bool) -> usize {
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|id, _| !failed(id.as_str()));
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

pub struct PendingResponse {
    id: String,
    command: Command,
    rx: oneshot::Receiver<FramedMessage>,
    timeout: Duration,
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> CaptureResult<FramedMessage> {
        let Self {
            id,
            command,
            rx,
            timeout,
            pending,
        } = self;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CaptureError::ChannelClosed(command)),
            Err(_) => {
                pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&id);
                return Err(CaptureError::Timeout {
                    command,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if response.is_error() {
            return Err(CaptureError::Remote(error_message(&response)));
        }
        Ok(response)
    }
}

fn error_message(response: &FramedMessage) -> String {
    let Some(payload) = response.payload.as_ref() else {
        return "unknown error".to_string();
    };
    serde_json::from_str::<serde_json::Value>(&payload.content)
        .ok()
        .and_then(|body| body.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| payload.content.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::error::BridgeError;

    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<FramedMessage>>,
        closed: bool,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<FramedMessage> {
            std::mem::take(&mut *self.sent.lock().expect("sink lock"))
        }
    }

    impl FrameSink for RecordingSink {
        fn send(&self, message: FramedMessage) -> Result<(), BridgeError> {
            if self.closed {
                return Err(BridgeError::Closed);
            }
            self.sent.lock().expect("sink lock").push(message);
            Ok(())
        }
    }

    fn issue(correlator: &Correlator, sink: &RecordingSink, command: Command) -> PendingResponse {
        correlator
            .issue(sink, Endpoint::NativeHost, Endpoint::ContentWatcher, command, None)
            .expect("issue request")
    }

    #[tokio::test]
    async fn responses_reach_only_their_own_request() {
        let correlator = Correlator::default();
        let sink = RecordingSink::default();
        let assets = issue(&correlator, &sink, Command::GenerateAssets);
        let snapshot = issue(&correlator, &sink, Command::GenerateSnapshot);
        let sent = sink.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(correlator.pending_count(), 2);

        let snapshot_reply = sent[1].respond(Some(Payload::new("NativeArticleSnapshot", "{}")));
        let assets_reply = sent[0].respond(Some(Payload::new("NativeArticleAsset", "{}")));
        assert_eq!(correlator.resolve(snapshot_reply.clone()), Resolution::Delivered);
        assert_eq!(correlator.resolve(assets_reply.clone()), Resolution::Delivered);

        assert_eq!(snapshot.wait().await.expect("snapshot reply"), snapshot_reply);
        assert_eq!(assets.wait().await.expect("assets reply"), assets_reply);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_responses_are_stale() {
        let correlator = Correlator::default();
        let sink = RecordingSink::default();
        let pending = issue(&correlator, &sink, Command::GetMetadata);
        let request = sink.take().remove(0);

        let stranger = FramedMessage {
            id: "not-ours".to_string(),
            ..request.respond(None)
        };
        assert_eq!(correlator.resolve(stranger), Resolution::Stale);

        assert_eq!(correlator.resolve(request.respond(None)), Resolution::Delivered);
        assert_eq!(correlator.resolve(request.respond(None)), Resolution::Stale);
        assert!(pending.wait().await.is_ok());
    }

    #[tokio::test]
    async fn requests_and_events_are_unsolicited() {
        let correlator = Correlator::default();
        let event = FramedMessage::event(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::TabActivated,
            None,
        );
        assert_eq!(
            correlator.resolve(event.clone()),
            Resolution::Unsolicited(event)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_and_frees_entry() {
        let correlator = Correlator::new(Duration::from_millis(5_000));
        let sink = RecordingSink::default();
        let pending = issue(&correlator, &sink, Command::GenerateSnapshot);

        let err = pending.wait().await.expect_err("request should time out");
        assert!(matches!(
            err,
            CaptureError::Timeout {
                command: Command::GenerateSnapshot,
                timeout_ms: 5000
            }
        ));
        assert_eq!(correlator.pending_count(), 0);

        let late = sink.take().remove(0).respond(None);
        assert_eq!(correlator.resolve(late), Resolution::Stale);
    }

    #[tokio::test]
    async fn error_payload_surfaces_as_remote_error() {
        let correlator = Correlator::default();
        let sink = RecordingSink::default();
        let pending = issue(&correlator, &sink, Command::GenerateAssets);
        let request = sink.take().remove(0);

        correlator.resolve(request.respond_error("video element not found"));

        match pending.wait().await {
            Err(CaptureError::Remote(message)) => assert_eq!(message, "video element not found"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_all_wakes_waiters() {
        let correlator = Correlator::default();
        let sink = RecordingSink::default();
        let pending = issue(&correlator, &sink, Command::GetIcon);

        assert_eq!(correlator.fail_all(), 1);
        assert!(matches!(
            pending.wait().await,
            Err(CaptureError::ChannelClosed(Command::GetIcon))
        ));
    }

    #[tokio::test]
    async fn fail_where_spares_unmatched_requests() {
        let correlator = Correlator::default();
        let sink = RecordingSink::default();
        let written = issue(&correlator, &sink, Command::GenerateAssets);
        let queued = issue(&correlator, &sink, Command::GenerateSnapshot);
        let queued_id = queued.id().to_string();

        assert_eq!(correlator.fail_where(|id| id != queued_id), 1);
        assert_eq!(correlator.pending_count(), 1);
        assert!(matches!(
            written.wait().await,
            Err(CaptureError::ChannelClosed(Command::GenerateAssets))
        ));

        let reply = sink.take().remove(1).respond(None);
        assert_eq!(correlator.resolve(reply), Resolution::Delivered);
        assert!(queued.wait().await.is_ok());
    }

    #[test]
    fn closed_sink_leaves_nothing_pending() {
        let correlator = Correlator::default();
        let sink = RecordingSink {
            closed: true,
            ..RecordingSink::default()
        };
        let result = correlator.issue(
            &sink,
            Endpoint::NativeHost,
            Endpoint::ContentWatcher,
            Command::GetMetadata,
            None,
        );
        assert!(matches!(result, Err(CaptureError::Bridge(BridgeError::Closed))));
        assert_eq!(correlator.pending_count(), 0);
    }
}
