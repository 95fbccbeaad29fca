use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error};

use conduit_core::event::EventBus;
use conduit_core::types::FlowEvent;

/// JSONL event log, one file per execution.
///
/// Each line is a self-contained JSON object, so a crash mid-run leaves every
/// earlier line intact.
pub struct EventLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a FlowEvent,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Subscribe now and write events for `execution_id` in the background
    /// until that execution completes or fails.
    pub fn spawn(self, event_bus: &EventBus, execution_id: String) -> tokio::task::JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, execution_id))
    }

    async fn run(self, mut rx: broadcast::Receiver<FlowEvent>, execution_id: String) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create event log directory");
            return;
        }
        let path = self.log_dir.join(format!("{}.jsonl", execution_id));
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to open event log");
                return;
            }
        };
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.execution_id() != Some(execution_id.as_str()) {
                        continue;
                    }
                    let entry = LogEntry {
                        timestamp: Utc::now().to_rfc3339(),
                        event: &event,
                    };
                    if let Ok(json) = serde_json::to_string(&entry) {
                        let line = format!("{}\n", json);
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            error!(error = %e, "Failed to write event log entry");
                            break;
                        }
                        if let Err(e) = writer.flush().await {
                            error!(error = %e, "Failed to flush event log");
                        }
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event log lagged, skipped events");
                }
                Err(RecvError::Closed) => break,
            }
        }

        writer.flush().await.ok();
        debug!(path = %path.display(), "Event log closed");
    }
}
