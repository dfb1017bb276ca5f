//! The native host's end of the bridge. The browser owns the process and the
//! pipes, so there is nothing to reconnect: when stdin reaches EOF the
//! extension is gone and the host winds down.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

use super::codec::{read_frame, write_frame, FrameRead, DEFAULT_MAX_FRAME_LEN, HOST_TO_BROWSER_MAX_FRAME_LEN};
use super::correlator::{Correlator, Resolution};
use super::message::FramedMessage;
use super::FrameSink;

/// Cloneable handle that queues frames for the writer task.
#[derive(Clone)]
pub struct HostSink {
    outbound: mpsc::UnboundedSender<FramedMessage>,
}

impl FrameSink for HostSink {
    fn send(&self, message: FramedMessage) -> Result<(), BridgeError> {
        self.outbound.send(message).map_err(|_| BridgeError::Closed)
    }
}

pub struct HostBridge {
    sink: HostSink,
    correlator: Correlator,
    stop: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl HostBridge {
    /// Starts the reader and writer tasks. Requests and Events from the
    /// extension arrive on the returned channel; it closes on EOF.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        correlator: Correlator,
    ) -> (Self, mpsc::UnboundedReceiver<FramedMessage>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let stop = CancellationToken::new();
        let reader = tokio::spawn(read_loop(reader, correlator.clone(), inbound_tx));
        let writer = tokio::spawn(write_loop(writer, outbound_rx, stop.clone()));

        (
            Self {
                sink: HostSink {
                    outbound: outbound_tx,
                },
                correlator,
                stop,
                reader,
                writer,
            },
            inbound_rx,
        )
    }

    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(self.sink.clone())
    }

    /// Stops reading, then lets the writer flush what is already queued.
    /// Frames sent through outstanding sinks afterwards are refused and
    /// requests still waiting for the extension fail with `ChannelClosed`.
    pub async fn shutdown(self) {
        self.reader.abort();
        let abandoned = self.correlator.fail_all();
        if abandoned > 0 {
            log::warn!("abandoned {abandoned} pending requests on shutdown");
        }
        self.stop.cancel();
        if let Err(err) = self.writer.await {
            log::error!("host bridge writer failed to join: {err}");
        }
    }
}

impl FrameSink for HostBridge {
    fn send(&self, message: FramedMessage) -> Result<(), BridgeError> {
        self.sink.send(message)
    }
}

async fn read_loop<R>(
    mut reader: R,
    correlator: Correlator,
    inbound: mpsc::UnboundedSender<FramedMessage>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await {
            Ok(FrameRead::Message(message)) => match correlator.resolve(message) {
                Resolution::Delivered | Resolution::Stale => {}
                Resolution::Unsolicited(message) => {
                    if inbound.send(message).is_err() {
                        log::debug!("inbound receiver dropped, ignoring frame");
                    }
                }
            },
            Ok(FrameRead::Malformed(reason)) => log::warn!("skipping malformed frame: {reason}"),
            Ok(FrameRead::Eof) => {
                log::info!("extension closed the native messaging channel");
                break;
            }
            Err(err) => {
                log::error!("native messaging read failed: {err}");
                break;
            }
        }
    }

    let abandoned = correlator.fail_all();
    if abandoned > 0 {
        log::warn!("abandoned {abandoned} pending requests after channel close");
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<FramedMessage>,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = stop.cancelled() => {
                outbound.close();
                match outbound.try_recv() {
                    Ok(message) => message,
                    Err(_) => break,
                }
            }
        };

        match write_frame(&mut writer, &message, HOST_TO_BROWSER_MAX_FRAME_LEN).await {
            Ok(()) => {}
            Err(err @ (BridgeError::FrameTooLarge { .. } | BridgeError::Encode(_))) => {
                log::error!("dropping {} frame {}: {err}", message.command, message.id);
            }
            Err(err) => {
                log::error!("native messaging write failed: {err}");
                break;
            }
        }
    }
}
