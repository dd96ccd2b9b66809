//! imgrelay CLI - relay container images into your own registry.

mod output;

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use imgrelay_client::{HttpClientConfig, HttpTaskClient, TaskClient};
use imgrelay_coordinator::{
    CoordinatorEvent, Destination, PollingConfig, PollingCoordinator, SubmitRequest,
    TaskLifecycleCoordinator,
};
use imgrelay_core::{rewrite, ImageReference, TaskId, TaskStatus};

/// imgrelay CLI - image relay task management tool
#[derive(Parser)]
#[command(name = "imgrelay")]
#[command(about = "Relay container images into your own registry", long_about = None)]
struct Cli {
    /// Task service address
    #[arg(short, long, env = "IMGRELAY_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Bearer token for the task service
    #[arg(long, env = "IMGRELAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an image reference and print its components
    Parse {
        /// Image reference, e.g. nginx:1.27
        reference: String,
    },

    /// Show the target reference an image would be relayed to
    Rewrite {
        /// Source image reference
        reference: String,

        /// Destination registry, optionally with a path prefix
        #[arg(short, long)]
        destination: String,
    },

    /// Submit a relay task
    Submit {
        /// Source image reference
        reference: String,

        #[command(flatten)]
        destination: DestinationArgs,

        /// Use this target reference instead of the rewritten one
        #[arg(long)]
        target: Option<String>,

        /// Return as soon as the task is created
        #[arg(short, long)]
        detach: bool,
    },

    /// Cancel a queued or running task
    Cancel {
        /// Task ID to cancel
        id: String,
    },

    /// Show current, queued and recent tasks
    Status {
        /// Keep printing on every change until interrupted
        #[arg(short, long)]
        watch: bool,
    },
}

/// Where the image is pushed.
#[derive(Args, Debug, Default)]
struct DestinationArgs {
    /// Saved registry configuration ID
    #[arg(long, env = "IMGRELAY_CONFIG_ID", conflicts_with_all = ["host", "username"])]
    config_id: Option<String>,

    /// Registry address of the saved configuration
    #[arg(long, env = "IMGRELAY_REGISTRY", requires = "config_id")]
    registry: Option<String>,

    /// Destination registry host
    #[arg(long)]
    host: Option<String>,

    /// Destination registry username
    #[arg(long)]
    username: Option<String>,

    /// Destination registry password
    #[arg(long, env = "IMGRELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl DestinationArgs {
    /// Missing pieces are left empty; the coordinator reports them.
    fn into_destination(self) -> Option<Destination> {
        if let Some(config_id) = self.config_id {
            return Some(Destination::Saved {
                config_id,
                registry_url: self.registry.unwrap_or_default(),
            });
        }
        if self.host.is_none() && self.username.is_none() {
            return None;
        }
        Some(Destination::Manual {
            host: self.host.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = HttpClientConfig {
        base_url: cli.server,
        token: cli.token,
        ..Default::default()
    };

    match cli.command {
        Commands::Parse { reference } => {
            parse(&reference)?;
        }
        Commands::Rewrite {
            reference,
            destination,
        } => {
            rewrite_reference(&reference, &destination)?;
        }
        Commands::Submit {
            reference,
            destination,
            target,
            detach,
        } => {
            let request = SubmitRequest {
                source: reference,
                destination: destination.into_destination(),
                target_override: target,
            };
            submit(config, request, detach).await?;
        }
        Commands::Cancel { id } => {
            cancel(config, TaskId::new(id)).await?;
        }
        Commands::Status { watch } => {
            if watch {
                watch_status(config).await?;
            } else {
                status(config).await?;
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "imgrelay=debug" } else { "imgrelay=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect(config: HttpClientConfig) -> Result<Arc<dyn TaskClient>, Box<dyn std::error::Error>> {
    debug!(url = %config.base_url, "Connecting to task service");
    Ok(Arc::new(HttpTaskClient::new(config)?))
}

/// Like [`connect`], but fails fast if the service does not answer `/health`.
async fn connect_checked(
    config: HttpClientConfig,
) -> Result<Arc<dyn TaskClient>, Box<dyn std::error::Error>> {
    debug!(url = %config.base_url, "Connecting to task service");
    let client = HttpTaskClient::new(config)?;
    client.health().await?;
    Ok(Arc::new(client))
}

fn parse(reference: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = ImageReference::validate(reference)?;
    println!("{}", serde_json::to_string_pretty(&output::reference_json(&parsed))?);
    Ok(())
}

fn rewrite_reference(reference: &str, destination: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = ImageReference::validate(reference)?;
    let result = rewrite(&source, destination).ok_or("destination registry has no host")?;

    println!("Source:       {}", source);
    println!("Target:       {}", result.target_reference);
    println!("Rule:         {}", result.explanation());
    println!("              {}", result.rule.detail(&source));
    Ok(())
}

async fn submit(
    config: HttpClientConfig,
    request: SubmitRequest,
    detach: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = TaskLifecycleCoordinator::start(connect(config)?, PollingConfig::default());
    let mut events = coordinator.subscribe_events();

    let task = match coordinator.submit(request).await {
        Ok(task) => task,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e.into());
        }
    };
    println!("Task submitted:");
    output::print_task(&task);

    if detach {
        coordinator.shutdown().await;
        return Ok(());
    }

    let mut snapshots = WatchStream::new(coordinator.subscribe_snapshots());
    let mut last_progress = None;
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CoordinatorEvent::TaskFinished(finished)) if finished.id == task.id => {
                    println!("{}", CoordinatorEvent::TaskFinished(finished.clone()).message());
                    break if finished.status == TaskStatus::Completed {
                        Ok(())
                    } else {
                        Err(format!("task {} {}", finished.id, finished.status).into())
                    };
                }
                Ok(CoordinatorEvent::SessionExpired(reason)) => {
                    break Err(format!("session expired: {}", reason).into());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed coordinator events");
                }
                Err(RecvError::Closed) => break Err("coordinator stopped".into()),
            },
            Some(snapshot) = snapshots.next() => {
                if let Some(current) = snapshot.find(&task.id) {
                    let progress = (current.current_step, current.progress_percent);
                    if last_progress != Some(progress) && !current.is_terminal() {
                        last_progress = Some(progress);
                        output::print_progress(current);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped waiting; task {} keeps running on the server", task.id);
                break Ok(());
            }
        }
    };

    coordinator.shutdown().await;
    outcome
}

async fn cancel(config: HttpClientConfig, id: TaskId) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = TaskLifecycleCoordinator::start(connect(config)?, PollingConfig::default());
    let result = coordinator.cancel(&id).await;
    coordinator.shutdown().await;
    result?;

    println!("Task cancelled: {}", id);
    Ok(())
}

async fn status(config: HttpClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = connect_checked(config).await?;
    let polling = PollingCoordinator::new(client, PollingConfig::default());
    let snapshot = polling.reconcile().await?;
    output::print_snapshot(&snapshot);
    Ok(())
}

async fn watch_status(config: HttpClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = connect_checked(config).await?;
    let coordinator = TaskLifecycleCoordinator::start(client, PollingConfig::default());
    let mut events = coordinator.subscribe_events();
    // The first item is the empty initial snapshot; wait for real data.
    let mut snapshots = WatchStream::from_changes(coordinator.subscribe_snapshots());

    let outcome = loop {
        tokio::select! {
            Some(snapshot) = snapshots.next() => {
                output::print_snapshot(&snapshot);
                println!();
            }
            event = events.recv() => match event {
                Ok(CoordinatorEvent::SessionExpired(reason)) => {
                    break Err(format!("session expired: {}", reason).into());
                }
                Ok(event) => println!("{}", event.message()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed coordinator events");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    coordinator.shutdown().await;
    outcome
}
