use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::strategies::StrategyRegistry;

use super::assembler::{ActivityContext, Assembler, AssemblerConfig, FocusChange};
use super::loop_worker::{assembler_loop, AssemblerCommand};
use super::model::Activity;
use super::store::ActivityStore;

const FOCUS_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Owns the assembler loop task.
pub struct AssemblerController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    focus_tx: Option<mpsc::Sender<FocusChange>>,
    command_tx: Option<mpsc::Sender<AssemblerCommand>>,
}

impl AssemblerController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            focus_tx: None,
            command_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        config: AssemblerConfig,
        registry: Arc<StrategyRegistry>,
        store: Arc<dyn ActivityStore>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("assembler already active");
        }

        let cancel_token = CancellationToken::new();
        let (focus_tx, focus_rx) = mpsc::channel(FOCUS_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (assembler, reports) = Assembler::new(config, registry, store);

        let handle = tokio::spawn(assembler_loop(
            assembler,
            reports,
            focus_rx,
            command_rx,
            cancel_token.clone(),
        ));
        info!("assembler started");

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.focus_tx = Some(focus_tx);
        self.command_tx = Some(command_tx);
        Ok(())
    }

    /// Where focus changes go. `None` until started.
    pub fn focus_sender(&self) -> Option<mpsc::Sender<FocusChange>> {
        self.focus_tx.clone()
    }

    pub async fn current_activity(&self) -> Result<Option<Activity>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(AssemblerCommand::CurrentActivity(reply_tx)).await?;
        reply_rx.await.context("assembler dropped the request")
    }

    /// The open activity with its asset, fetching the asset if needed.
    pub async fn request_context(&self) -> Result<Option<ActivityContext>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(AssemblerCommand::RequestContext(reply_tx)).await?;
        reply_rx.await.context("assembler dropped the request")
    }

    async fn send(&self, command: AssemblerCommand) -> Result<()> {
        let Some(command_tx) = &self.command_tx else {
            bail!("assembler not running");
        };
        command_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("assembler loop has stopped"))
    }

    /// Closes the open activity and waits for the final flush.
    pub async fn stop(&mut self) -> Result<()> {
        self.focus_tx = None;
        self.command_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("assembler loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for AssemblerController {
    fn default() -> Self {
        Self::new()
    }
}
