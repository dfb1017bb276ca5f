use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::{Command, Correlator, Endpoint, FrameSink, FramedMessage, Payload};
use crate::error::{CaptureError, CaptureResult};
use crate::native::NativeMessage;

/// A way to ask the focused tab something and get its answer back.
#[async_trait]
pub trait CaptureClient: Send + Sync {
    async fn request(&self, command: Command, payload: Option<Payload>) -> CaptureResult<FramedMessage>;
}

/// Sends through whatever carries frames to the extension and waits on the
/// shared correlator.
pub struct BridgeClient {
    sink: Arc<dyn FrameSink>,
    correlator: Correlator,
    target: Endpoint,
}

impl BridgeClient {
    pub fn new(sink: Arc<dyn FrameSink>, correlator: Correlator) -> Self {
        Self {
            sink,
            correlator,
            target: Endpoint::ContentWatcher,
        }
    }
}

#[async_trait]
impl CaptureClient for BridgeClient {
    async fn request(&self, command: Command, payload: Option<Payload>) -> CaptureResult<FramedMessage> {
        self.correlator
            .request(
                self.sink.as_ref(),
                Endpoint::NativeHost,
                self.target.clone(),
                command,
                payload,
            )
            .await
    }
}

/// Issues `command` and decodes the typed payload of the response.
pub(crate) async fn request_native(
    client: &dyn CaptureClient,
    command: Command,
    payload: Option<Payload>,
) -> CaptureResult<NativeMessage> {
    let response = client.request(command.clone(), payload).await?;
    let payload = response
        .payload
        .as_ref()
        .ok_or(CaptureError::MissingPayload(command))?;
    NativeMessage::from_payload(payload)
}
