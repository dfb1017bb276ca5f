use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::BridgeError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live duplex channel to the native host.
pub struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
    /// Dropping the child kills it, so it lives exactly as long as the
    /// connection.
    child: Option<Child>,
}

impl Connection {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader,
            writer,
            child: None,
        }
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, BridgeError>;
}

/// Per-browser registration of the native host. Installing it is somebody
/// else's job; we only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub transport: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl HostManifest {
    pub fn from_json(raw: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(raw).map_err(|err| BridgeError::Manifest(err.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, BridgeError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            BridgeError::Manifest(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn validate(&self, expected_name: &str, origin: &str) -> Result<(), BridgeError> {
        if self.name != expected_name {
            return Err(BridgeError::Manifest(format!(
                "manifest names host {} but {} was requested",
                self.name, expected_name
            )));
        }
        if self.transport != "stdio" {
            return Err(BridgeError::Manifest(format!(
                "unsupported transport type {}",
                self.transport
            )));
        }
        if self.path.as_os_str().is_empty() {
            return Err(BridgeError::Manifest("manifest path is empty".to_string()));
        }
        if !self.allowed_origins.iter().any(|allowed| allowed == origin) {
            return Err(BridgeError::Manifest(format!(
                "origin {origin} is not allowed by the manifest"
            )));
        }
        Ok(())
    }
}

/// Launches the host binary named by a manifest and talks to it over its
/// stdin/stdout, the way a browser does.
pub struct ProcessConnector {
    manifest_path: PathBuf,
    host_name: String,
    origin: String,
}

impl ProcessConnector {
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        host_name: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            host_name: host_name.into(),
            origin: origin.into(),
        }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self) -> Result<Connection, BridgeError> {
        let manifest = HostManifest::load(&self.manifest_path).await?;
        manifest.validate(&self.host_name, &self.origin)?;

        let mut child = Command::new(&manifest.path)
            .arg(&self.origin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                BridgeError::ConnectFailed(format!(
                    "failed to spawn {}: {err}",
                    manifest.path.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ConnectFailed("host stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ConnectFailed("host stdout is not piped".to_string()))?;

        Ok(Connection::new(Box::new(stdout), Box::new(stdin)).with_child(child))
    }
}
