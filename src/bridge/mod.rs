pub mod codec;
pub mod correlator;
pub mod host;
pub mod message;
pub mod port;
pub mod transport;

use crate::error::BridgeError;

pub use codec::{read_frame, write_frame, FrameRead};
pub use correlator::{Correlator, PendingResponse, Resolution};
pub use host::{HostBridge, HostSink};
pub use message::{Command, Endpoint, FramedMessage, MessageKind, Payload};
pub use port::{PortConfig, PortEvent, PortManager, PortStatus};
pub use transport::{Connection, Connector, HostManifest, ProcessConnector};

/// Anything that can accept an outbound frame without blocking.
pub trait FrameSink: Send + Sync {
    fn send(&self, message: FramedMessage) -> Result<(), BridgeError>;
}
