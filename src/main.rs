//! cronify - run container lifecycle actions on cron schedules declared in labels.
//!
//! Usage:
//!   cronify run                       Watch containers and run their jobs
//!   cronify jobs                      List the jobs declared by running containers
//!   cronify check --label KEY=VALUE   Validate labels without a container runtime

use chrono::Utc;
use clap::{Parser, Subcommand};
use cronify::{
    ActionConfig, ContainerFilter, ContainerId, ContainerRuntime, DockerRuntime, EventBus,
    EventHandler, GlobalConfig, JobDefinition, LabelParser, Orchestrator, Schedule, Scheduler,
    Trigger,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// cronify - cron jobs for containers, configured through labels
#[derive(Parser)]
#[command(name = "cronify")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true, env = "CRONIFY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default log level (RUST_LOG directives take precedence per target)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Label prefix jobs are declared under (overrides the config file)
    #[arg(long, global = true)]
    label_prefix: Option<String>,

    /// Scheduler tick interval in seconds (overrides the config file)
    #[arg(long, global = true)]
    tick_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch containers and run their jobs until interrupted
    Run,

    /// List the jobs declared by existing containers without running them
    Jobs,

    /// Parse labels given on the command line and report problems
    Check {
        /// A label as KEY=VALUE; repeat for each label
        #[arg(short, long = "label", value_name = "KEY=VALUE", value_parser = parse_label, required = true)]
        labels: Vec<(String, String)>,

        /// Container id the jobs are attributed to
        #[arg(long, default_value = "local")]
        owner: String,
    },
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

/// Logs scheduler events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &cronify::Event) {
        match event {
            cronify::Event::JobStarted {
                job, owner, run_id, ..
            } => {
                info!("Job '{}' started on {} (run: {})", job, owner.short(), run_id);
            }
            cronify::Event::ActionCompleted {
                job,
                phase,
                container,
                kind,
                exit_code,
                duration,
                ..
            } => {
                let kind = kind.map(|k| k.as_str()).unwrap_or("?");
                let exit_info = exit_code
                    .map(|c| format!(" (exit: {})", c))
                    .unwrap_or_default();
                info!(
                    "  [{}] {} {} on {} completed in {:?}{}",
                    job,
                    phase,
                    kind,
                    container.short(),
                    duration,
                    exit_info
                );
            }
            cronify::Event::ActionFailed {
                job,
                phase,
                container,
                kind,
                error,
                ..
            } => {
                let kind = kind.map(|k| k.as_str()).unwrap_or("?");
                warn!(
                    "  [{}] {} {} on {} failed: {}",
                    job,
                    phase,
                    kind,
                    container.short(),
                    error
                );
            }
            cronify::Event::JobCompleted {
                job,
                run_id,
                success,
                duration,
                next_run_at,
                ..
            } => {
                let next = next_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                if *success {
                    info!(
                        "Job '{}' completed in {:?} (run: {}, next: {})",
                        job, duration, run_id, next
                    );
                } else {
                    error!(
                        "Job '{}' failed after {:?} (run: {}, next: {})",
                        job, duration, run_id, next
                    );
                }
            }
            cronify::Event::ScheduleFailed { job, owner, error, .. } => {
                error!("Job '{}' on {} cannot be scheduled: {}", job, owner.short(), error);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(cli.log_level.into()),
        )
        .init();

    let mut config = GlobalConfig::load_or_default(cli.config.as_deref())?;
    if let Some(prefix) = cli.label_prefix {
        config.label_prefix = prefix;
    }
    if let Some(secs) = cli.tick_interval {
        config.tick_interval_secs = secs;
    }
    config.validate()?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Jobs => list_jobs(config).await?,
        Commands::Check { labels, owner } => check_labels(&config, labels, owner)?,
    }

    Ok(())
}

/// Watch containers and run their jobs until Ctrl+C.
async fn run(config: GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let docker = DockerRuntime::connect(&config.docker)?;
    docker.ping().await?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let scheduler = Scheduler::new(Arc::clone(&runtime))
        .with_event_bus(event_bus)
        .with_tick_interval(config.tick_interval())
        .with_exec_poll_interval(config.exec_poll_interval())
        .with_timezone(config.timezone.clone())
        .with_shutdown_timeout(config.shutdown_timeout());

    let orchestrator = Arc::new(Orchestrator::new(
        scheduler.clone(),
        runtime,
        LabelParser::new(config.label_prefix.clone()),
        ContainerFilter::label(config.container_filter.clone()),
        config.watch.clone(),
    ));

    info!(
        "Starting scheduler (tick interval: {}s, timezone: {})...",
        config.tick_interval_secs, config.timezone
    );
    let (handle, scheduler_task) = scheduler.start();

    if let Err(e) = orchestrator.sync().await {
        error!("Initial container sync failed: {}", e);
        handle.shutdown().await?;
        return Err(e.into());
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.watch(cancel).await })
    };

    info!("Press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
        }
        _ = scheduler_task => {
            warn!("Scheduler stopped unexpectedly");
        }
    }

    cancel.cancel();
    if let Err(e) = watcher.await {
        warn!("Event watcher ended abnormally: {}", e);
    }
    match handle.in_flight().await {
        Ok(runs) if !runs.is_empty() => {
            let jobs: Vec<&str> = runs.iter().map(|run| run.job.as_str()).collect();
            info!("Waiting for {} running job(s): {}", runs.len(), jobs.join(", "));
        }
        _ => {}
    }
    if let Err(e) = handle.shutdown().await {
        warn!("Scheduler shutdown: {}", e);
    }

    info!("Goodbye!");
    Ok(())
}

/// Print the jobs declared by existing containers.
async fn list_jobs(config: GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = DockerRuntime::connect(&config.docker)?;
    let filter = ContainerFilter::label(config.container_filter.clone());
    let parser = LabelParser::new(config.label_prefix.clone());

    let containers = runtime.list_containers(&filter).await?;
    if containers.is_empty() {
        println!("No containers match '{}'", filter.label);
        return Ok(());
    }

    for container in &containers {
        let parsed = parser.parse(&container.labels, &container.id);
        println!("Container {}:", container.id.short());
        if parsed.jobs.is_empty() {
            println!("  (no jobs)");
        }
        for job in parsed.jobs.values() {
            print_job(job, &config.timezone);
        }
        for e in &parsed.errors {
            println!("  ! {}", e);
        }
        println!();
    }

    Ok(())
}

/// Parse labels from the command line and report what they declare.
fn check_labels(
    config: &GlobalConfig,
    labels: Vec<(String, String)>,
    owner: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: HashMap<String, String> = labels.into_iter().collect();
    let owner = ContainerId::new(owner);
    let parsed = LabelParser::new(config.label_prefix.clone()).parse(&labels, &owner);

    let mut problems = parsed.errors.len();
    for job in parsed.jobs.values() {
        if !print_job(job, &config.timezone) {
            problems += 1;
        }
    }
    for e in &parsed.errors {
        println!("! {}", e);
    }

    if problems > 0 {
        error!("{} problem(s) found", problems);
        return Err(format!("{} problem(s) found", problems).into());
    }

    info!("All {} job(s) are valid", parsed.jobs.len());
    Ok(())
}

/// Print one job. Returns false if its schedule is invalid.
fn print_job(job: &JobDefinition, timezone: &str) -> bool {
    println!("  Job: {}", job.name);

    let valid = match Schedule::with_timezone(job.schedule.as_str(), timezone)
        .and_then(|schedule| schedule.next_after(Utc::now()))
    {
        Ok(next) => {
            println!("    Schedule: {} (next: {})", job.schedule, next.to_rfc3339());
            true
        }
        Err(e) => {
            println!("    Schedule: '{}' INVALID: {}", job.schedule, e);
            false
        }
    };

    println!("    Action: {}", describe_action(&job.primary));
    for (trigger, title) in [(Trigger::Success, "On success"), (Trigger::Fail, "On failure")] {
        let hooks = job.hooks(trigger);
        if hooks.is_empty() {
            continue;
        }
        println!("    {}:", title);
        for (index, action) in hooks {
            println!("      [{}] {}", index, describe_action(action));
        }
    }

    valid
}

fn describe_action(action: &ActionConfig) -> String {
    let mut description = match action.kind {
        Some(kind) => kind.to_string(),
        None => "(no type)".to_string(),
    };
    if !action.command.is_empty() {
        description.push_str(&format!(" {:?}", action.command));
    }
    if let Some(signal) = &action.signal {
        description.push_str(&format!(" signal={}", signal));
    }
    description.push_str(&format!(" on {}", action.container.short()));
    if action.timeout > Duration::ZERO {
        description.push_str(&format!(" timeout={:?}", action.timeout));
    }
    description
}
