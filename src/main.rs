use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use conduit_core::config::AppConfig;
use conduit_core::document::load_flow;
use conduit_core::flow::Flow;
use conduit_core::types::{ExecutionStatus, FlowEvent};
use conduit_core::work::{Resolution, WorkKind};

use conduit_engine::{
    build_waves, validate_flow, wave_ids, CronScheduler, HumanWorkQueue, Orchestrator,
    OrchestratorBuilder,
};

#[derive(Parser)]
#[command(name = "conduit", version, about = "Workflow orchestration with humans in the loop")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conduit.toml", env = "CONDUIT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a flow document without running it
    Validate {
        /// Flow document (.json or .toml)
        flow: PathBuf,
    },
    /// Print the waves a flow would run in
    Plan { flow: PathBuf },
    /// Run a flow once and print the final execution state
    Run {
        flow: PathBuf,
        /// Trigger input as a JSON document
        #[arg(long)]
        input: Option<String>,
        /// Approve every work item and approval request without prompting
        #[arg(long)]
        auto_approve: bool,
    },
    /// Start the HTTP gateway and the cron scheduler
    Serve {
        /// Register every flow document in this directory at startup
        #[arg(long)]
        flows: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conduit=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { flow } => validate(&flow)?,
        Commands::Plan { flow } => plan(&flow)?,
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            flow,
            input,
            auto_approve,
        } => {
            let input = match input {
                Some(text) => serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("--input is not valid JSON: {}", e))?,
                None => serde_json::Value::Null,
            };
            let orchestrator = build_orchestrator(load_config(&cli.config)?)?;
            let flow = load_flow(&flow)?;
            run_once(&orchestrator, flow, input, auto_approve).await?;
        }
        Commands::Serve { flows } => {
            let config = load_config(&cli.config)?;
            let gateway_config = config.gateway.clone();
            let orchestrator = build_orchestrator(config)?;
            if let Some(ref dir) = flows {
                register_dir(&orchestrator, dir).await?;
            }

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down...");
                cancel_clone.cancel();
            });

            let scheduler = CronScheduler::new(orchestrator.clone(), cancel.clone());
            tokio::spawn(async move {
                scheduler.run().await;
            });

            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = conduit_gateway::GatewayServer::new(gateway_config, orchestrator);
            server.run(cancel).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    info!(path = %path.display(), "No config file, using defaults");
    Ok(AppConfig::default())
}

fn build_orchestrator(config: AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let model = conduit_connectors::model_client(&config);
    let http = conduit_connectors::http_client(&config)?;
    let notifier = conduit_connectors::notifier(&config);
    if config.model.endpoint.is_none() {
        warn!("No [model] endpoint configured; ai steps will fail");
    }
    Ok(OrchestratorBuilder::new(config, model, http, notifier).build())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let flow = load_flow(path)?;
    validate_flow(&flow)?;
    let waves = build_waves(&flow.scheduled_steps())?;
    println!(
        "{}: ok ({} steps, {} waves, {} triggers, {} rules)",
        flow.id,
        flow.steps.len(),
        waves.len(),
        flow.triggers.len(),
        flow.business_rules.len()
    );
    Ok(())
}

fn plan(path: &Path) -> anyhow::Result<()> {
    let flow = load_flow(path)?;
    validate_flow(&flow)?;
    let waves = build_waves(&flow.scheduled_steps())?;
    println!("{} ({})", flow.name, flow.id);
    for (index, ids) in wave_ids(&waves).iter().enumerate() {
        println!("  wave {}: {}", index, ids.join(", "));
    }
    let owners = flow.auxiliary_owners();
    for (aux, owned_by) in &owners {
        println!("  {} runs on behalf of {}", aux, owned_by.join(", "));
    }
    Ok(())
}

async fn register_dir(orchestrator: &Arc<Orchestrator>, dir: &Path) -> anyhow::Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json" | "toml")))
        .collect();
    paths.sort();

    for path in paths {
        match load_flow(&path) {
            Ok(flow) => match orchestrator.register_flow(flow).await {
                Ok(id) => info!(flow_id = %id, path = %path.display(), "Flow loaded"),
                Err(e) => error!(path = %path.display(), error = %e, "Flow rejected"),
            },
            Err(e) => error!(path = %path.display(), error = %e, "Flow document unreadable"),
        }
    }
    Ok(())
}

async fn run_once(
    orchestrator: &Arc<Orchestrator>,
    flow: Flow,
    input: serde_json::Value,
    auto_approve: bool,
) -> anyhow::Result<()> {
    let flow_id = orchestrator.register_flow(flow).await?;

    // Subscribe before starting so no event is missed
    let mut rx = orchestrator.event_bus().subscribe();
    let queue = orchestrator.queue().clone();

    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                FlowEvent::WaveStarted { wave, steps, .. } => {
                    eprintln!("[wave {}] {}", wave, steps.join(", "));
                }
                FlowEvent::StepCompleted {
                    step_id,
                    elapsed_ms,
                    ..
                } => eprintln!("[{}: ok] {}ms", step_id, elapsed_ms),
                FlowEvent::StepSkipped {
                    step_id, reason, ..
                } => eprintln!("[{}: skipped] {}", step_id, reason),
                FlowEvent::StepFailed { step_id, error, .. } => {
                    eprintln!("[{}: ERROR] {}", step_id, error)
                }
                FlowEvent::StepRecovered {
                    step_id, fallback, ..
                } => eprintln!("[{}: recovered by {}]", step_id, fallback),
                FlowEvent::ApprovalRequested { item } | FlowEvent::WorkItemCreated { item } => {
                    match item.kind {
                        WorkKind::Approval {
                            ref decision,
                            confidence,
                            ..
                        } => eprintln!(
                            "\n[APPROVAL] {}: {} (confidence {:.2})",
                            item.step_id, decision, confidence
                        ),
                        WorkKind::Task => {
                            eprintln!("\n[WORK ITEM] {}: {}", item.step_id, item.title)
                        }
                        // Nobody waits on escalations
                        WorkKind::Escalation { .. } => continue,
                    }
                    answer(&queue, item.id, auto_approve).await;
                }
                FlowEvent::ExecutionEscalated { step_id, error, .. } => {
                    eprintln!("[ESCALATED] {}: {}", step_id, error);
                }
                event if event.is_terminal() => break,
                _ => {}
            }
        }
    });

    let outcome = orchestrator.execute(&flow_id, input).await;
    print_handle.abort();

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("\n[error: {}]", e);
            let execution_id = match e {
                conduit_core::error::ConduitError::ExecutionFailed { ref execution_id, .. } => {
                    execution_id.clone()
                }
                other => return Err(other.into()),
            };
            orchestrator.get_execution(&execution_id).await?
        }
    };

    let mut stdout = io::stdout();
    writeln!(stdout, "{}", serde_json::to_string_pretty(&snapshot)?)?;
    if snapshot.status != ExecutionStatus::Completed {
        anyhow::bail!("execution {} ended {}", snapshot.execution_id, snapshot.status);
    }
    Ok(())
}

async fn answer(queue: &Arc<HumanWorkQueue>, item_id: String, auto_approve: bool) {
    if auto_approve {
        queue.resolve(&item_id, Resolution::approve("cli")).await;
        return;
    }
    let approved = tokio::task::spawn_blocking(|| {
        dialoguer::Confirm::new()
            .with_prompt("Approve?")
            .default(true)
            .interact()
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    let resolution = if approved {
        Resolution::approve("cli")
    } else {
        Resolution::reject("cli", "denied at the prompt")
    };
    queue.resolve(&item_id, resolution).await;
}
