//! The native messaging host the browser launches. Stdout carries frames, so
//! everything human-readable goes to stderr.

mod router;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::activity::{ActivityStore, AssemblerConfig, AssemblerController, FocusChange};
use crate::bridge::{Correlator, FrameSink, FramedMessage, HostBridge};
use crate::db::Database;
use crate::domain::{DomainRegistry, DEFAULT_CHUNK};
use crate::sensing::{detect_browser, BrowserProcess};
use crate::settings::{self, CaptureSettings, SettingsStore};
use crate::strategies::{BridgeClient, StrategyRegistry};

pub use router::{FocusRouter, Routed};

/// Entry point of `eurora-native-host`.
pub async fn run_native_host() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("Eurora native host starting up...");

    let data_dir = settings::data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let settings = SettingsStore::in_dir(&data_dir)?.snapshot();

    let domains = Arc::new(load_domains(&settings));
    let database = Database::in_dir(&data_dir)?;
    let recovered = database.close_dangling_activities().await?;
    if recovered > 0 {
        log::warn!("Recovered {recovered} activities left open by a previous run");
    }

    let browser = detect_browser().unwrap_or_else(|| {
        log::warn!("could not identify the launching browser");
        BrowserProcess {
            pid: 0,
            name: "browser".to_string(),
        }
    });
    log::info!("serving {} (pid {})", browser.display_name(), browser.pid);

    let host = NativeHost::start(
        settings,
        domains,
        Arc::new(database),
        browser,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )?;
    host.run(shutdown_signal()).await
}

fn load_domains(settings: &CaptureSettings) -> DomainRegistry {
    let Some(path) = settings.registry_path.as_deref() else {
        return DomainRegistry::builtin();
    };
    match DomainRegistry::load(path, DEFAULT_CHUNK) {
        Ok(registry) => registry,
        Err(err) => {
            log::error!("falling back to the built-in domain registry: {err:#}");
            DomainRegistry::builtin()
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

/// A running host: bridge, assembler and the router between them.
pub struct NativeHost {
    bridge: HostBridge,
    inbound: mpsc::UnboundedReceiver<FramedMessage>,
    controller: AssemblerController,
    router: FocusRouter,
}

impl NativeHost {
    pub fn start<R, W>(
        settings: CaptureSettings,
        domains: Arc<DomainRegistry>,
        store: Arc<dyn ActivityStore>,
        browser: BrowserProcess,
        reader: R,
        writer: W,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let correlator = Correlator::new(Duration::from_millis(settings.bridge.request_timeout_ms));
        let (bridge, inbound) = HostBridge::spawn(reader, writer, correlator.clone());
        let client = Arc::new(BridgeClient::new(bridge.sink(), correlator));

        // The browser that launched us is a browser whatever the list says.
        let mut browser_processes = settings.activity.browser_processes.clone();
        if !browser_processes
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&browser.name))
        {
            browser_processes.push(browser.name.clone());
        }
        let registry =
            Arc::new(StrategyRegistry::new(browser_processes, domains).with_client(client));

        let mut controller = AssemblerController::new();
        controller.start(AssemblerConfig::from(&settings.activity), registry, store)?;

        Ok(Self {
            bridge,
            inbound,
            controller,
            router: FocusRouter::new(browser),
        })
    }

    pub fn controller(&self) -> &AssemblerController {
        &self.controller
    }

    /// Routes extension traffic until the channel closes or `shutdown`
    /// resolves, then closes the open activity and flushes the bridge.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let focus = self
            .controller
            .focus_sender()
            .context("assembler is not running")?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                message = self.inbound.recv() => {
                    let Some(message) = message else {
                        log::info!("native messaging channel closed");
                        break;
                    };
                    self.dispatch(&message, &focus).await;
                }
                _ = &mut shutdown => {
                    log::info!("shutdown requested");
                    break;
                }
            }
        }

        drop(focus);
        let stopped = self.controller.stop().await;
        self.bridge.shutdown().await;
        log::info!("Eurora native host stopped");
        stopped
    }

    async fn dispatch(&self, message: &FramedMessage, focus: &mpsc::Sender<FocusChange>) {
        let Routed { reply, focus: change } = self.router.route(message);
        if let Some(change) = change {
            if focus.send(change).await.is_err() {
                log::error!("assembler stopped, dropping focus change");
            }
        }
        if let Some(reply) = reply {
            if let Err(err) = self.bridge.send(reply) {
                log::warn!("failed to answer {}: {err}", message.command);
            }
        }
    }
}
