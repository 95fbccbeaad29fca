use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::orchestrator::Orchestrator;

/// Longest sleep between looks at the trigger table, so schedules registered
/// while idle are picked up.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Starts flows whose `schedule` triggers come due.
pub struct CronScheduler {
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl CronScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            cancel,
        }
    }

    /// Run the scheduler loop. Blocks until cancelled.
    pub async fn run(&self) {
        info!("Cron scheduler started");

        loop {
            let now = Utc::now();
            let next = self.orchestrator.triggers().next_due(now).await;

            let delay = match next {
                Some((fire_at, ref scheduled)) => {
                    let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
                    info!(
                        flow_id = %scheduled.flow_id,
                        fire_at = %fire_at.format("%H:%M:%S"),
                        delay_secs = delay.as_secs(),
                        "Next scheduled run"
                    );
                    delay.min(MAX_IDLE)
                }
                None => MAX_IDLE,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let Some((fire_at, scheduled)) = next else { continue };
                    if fire_at > Utc::now() {
                        continue;
                    }
                    info!(flow_id = %scheduled.flow_id, cron = %scheduled.expression, "Firing scheduled flow");
                    match self.orchestrator.start(&scheduled.flow_id, scheduled.input.clone()).await {
                        Ok(execution_id) => info!(flow_id = %scheduled.flow_id, execution_id = %execution_id, "Scheduled execution started"),
                        Err(e) => error!(flow_id = %scheduled.flow_id, error = %e, "Scheduled execution failed to start"),
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("Cron scheduler shutting down");
                    break;
                }
            }
        }
    }
}
