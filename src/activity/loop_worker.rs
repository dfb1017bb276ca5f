use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::assembler::{ActivityContext, Assembler, CaptureReport, FocusChange};
use super::model::Activity;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

pub enum AssemblerCommand {
    CurrentActivity(oneshot::Sender<Option<Activity>>),
    RequestContext(oneshot::Sender<Option<ActivityContext>>),
}

/// Drives the assembler until cancelled, then closes the open activity and
/// flushes what it can.
pub async fn assembler_loop(
    mut assembler: Assembler,
    mut reports: mpsc::UnboundedReceiver<CaptureReport>,
    mut focus: mpsc::Receiver<FocusChange>,
    mut commands: mpsc::Receiver<AssemblerCommand>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(assembler.config().snapshot_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Polled in order, so a query sees every focus change sent before it.
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("assembler loop shutting down");
                break;
            }
            Some(change) = focus.recv() => {
                assembler.on_focus(change, Utc::now()).await;
            }
            Some(report) = reports.recv() => {
                assembler.on_report(report, Utc::now()).await;
            }
            Some(command) = commands.recv() => match command {
                AssemblerCommand::CurrentActivity(reply) => {
                    let _ = reply.send(assembler.current_activity());
                }
                AssemblerCommand::RequestContext(reply) => assembler.request_context(reply),
            },
            _ = ticker.tick() => {
                assembler.on_tick(Utc::now()).await;
            }
        }
    }

    assembler.shutdown(Utc::now()).await;
}
