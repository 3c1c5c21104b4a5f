use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hypha::config::AppConfig;
use hypha::error::AppError;
use hypha::server::{create_router, AppState};
use hypha::shutdown::{graceful_shutdown, wait_for_shutdown};
use hypha::state::{WorkflowState, WorkflowStateStore, WorkflowStatus};
use hypha::workflow::{ReviewCycleOrchestrator, WorkflowContext};

/// Steps `merge` may take: gate, merge, and one retry after a transition.
const MAX_MERGE_STEPS: usize = 3;

#[derive(Parser)]
#[command(name = "hypha", about = "Drives pull requests through review, merge and cleanup")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workflow for an issue and its pull request
    Start {
        issue_id: String,
        #[arg(long)]
        pr: u64,
        #[arg(long)]
        branch: String,
        /// Existing worktree; one is created when omitted
        #[arg(long)]
        worktree: Option<PathBuf>,
    },
    /// Run one step of a workflow
    Step { issue_id: String },
    /// Run the AI review for a pull request's workflow
    Review { pr: u64 },
    /// Address outstanding review feedback on a pull request
    Update { pr: u64 },
    /// Gate and merge a pull request, then clean up
    Merge { pr: u64 },
    /// Show workflows and whether their review cycles are complete
    Status { issue_id: Option<String> },
    /// Delete completed workflow records past the retention window
    Purge,
    /// Run the webhook server and poller
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(e) = run(cli).await {
        let (category, code) = match e.downcast_ref::<AppError>() {
            Some(app) => (app.category(), app.exit_code()),
            None => ("internal", 1),
        };
        eprintln!("error[{category}]: {e:#}");
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Start {
            issue_id,
            pr,
            branch,
            worktree,
        } => {
            let orchestrator = orchestrator(config)?;
            let state = orchestrator.start(&issue_id, pr, &branch, worktree).await?;
            print_state(&state);
        }
        Command::Step { issue_id } => {
            let orchestrator = orchestrator(config)?;
            print_state(&orchestrator.step(&issue_id).await?);
        }
        Command::Review { pr } => {
            let orchestrator = orchestrator(config)?;
            let state = workflow_for_pr(&orchestrator, pr)?;
            let reviewable = [WorkflowStatus::Created, WorkflowStatus::AiReviewing];
            expect_status(&state, &reviewable, "review")?;
            print_state(&step_while(&orchestrator, state, &reviewable, 2).await?);
        }
        Command::Update { pr } => {
            let orchestrator = orchestrator(config)?;
            let state = workflow_for_pr(&orchestrator, pr)?;
            expect_status(&state, &[WorkflowStatus::AddressingComments], "update")?;
            print_state(&orchestrator.step(&state.issue_id).await?);
        }
        Command::Merge { pr } => {
            let orchestrator = orchestrator(config)?;
            let state = workflow_for_pr(&orchestrator, pr)?;
            let mergeable = [WorkflowStatus::ReadyToMerge, WorkflowStatus::Merging];
            expect_status(&state, &mergeable, "merge")?;
            print_state(&step_while(&orchestrator, state, &mergeable, MAX_MERGE_STEPS).await?);
        }
        Command::Status { issue_id } => status(config, issue_id.as_deref()).await?,
        Command::Purge => {
            let store = WorkflowStateStore::open(&config.state.dir)?;
            match config.retention() {
                Some(retention) => {
                    let purged = store.purge_completed(retention, chrono::Utc::now())?;
                    println!("Purged {} completed workflow(s)", purged.len());
                    for issue_id in purged {
                        println!("  {issue_id}");
                    }
                }
                None => println!("Retention is disabled (state.retention_days = 0); nothing purged"),
            }
        }
        Command::Serve => serve(config).await?,
    }

    Ok(())
}

fn orchestrator(config: AppConfig) -> anyhow::Result<ReviewCycleOrchestrator> {
    Ok(ReviewCycleOrchestrator::new(WorkflowContext::live(config)?))
}

fn workflow_for_pr(orchestrator: &ReviewCycleOrchestrator, pr: u64) -> anyhow::Result<WorkflowState> {
    orchestrator
        .context()
        .store
        .find_by_pr(pr)?
        .ok_or_else(|| AppError::WorkflowNotFound(format!("pull request #{pr}")).into())
}

fn expect_status(state: &WorkflowState, allowed: &[WorkflowStatus], action: &str) -> anyhow::Result<()> {
    if allowed.contains(&state.status) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "Cannot {action} pull request #{}: workflow {} is {}",
        state.pr_number, state.issue_id, state.status
    ))
    .into())
}

/// Step while the workflow stays within `statuses` and keeps moving.
async fn step_while(
    orchestrator: &ReviewCycleOrchestrator,
    mut state: WorkflowState,
    statuses: &[WorkflowStatus],
    max_steps: usize,
) -> anyhow::Result<WorkflowState> {
    for _ in 0..max_steps {
        let before = state.status;
        state = orchestrator.step(&state.issue_id).await?;
        if state.status == before || !statuses.contains(&state.status) {
            break;
        }
    }
    Ok(state)
}

fn print_state(state: &WorkflowState) {
    println!(
        "{}: PR #{} on {} is {} (iteration {})",
        state.issue_id, state.pr_number, state.branch, state.status, state.review_iteration
    );
    if let Some(reason) = &state.failure_reason {
        println!("  failure: {reason}");
    }
    if let Some(merge) = state.merge.as_ref().filter(|m| m.success) {
        println!(
            "  merged via {} as {}",
            merge.method,
            merge.commit_sha.as_deref().unwrap_or("unknown sha")
        );
    }
    for item in &state.blocking_items {
        println!("  - {item}");
    }
}

async fn status(config: AppConfig, issue_id: Option<&str>) -> anyhow::Result<()> {
    let store = WorkflowStateStore::open(&config.state.dir)?;
    let workflows = match issue_id {
        Some(id) => vec![store.load(id)?],
        None => store.list()?,
    };

    if workflows.is_empty() {
        println!("No workflows");
        return Ok(());
    }

    // Completion needs the code host; the table does not
    let orchestrator = match WorkflowContext::live(config) {
        Ok(ctx) => Some(ReviewCycleOrchestrator::new(ctx)),
        Err(e) => {
            tracing::warn!(error = %e, "Code host unavailable, showing stored state only");
            None
        }
    };

    println!("{:<16} {:>6}  {:<22} {:>5}  UPDATED", "ISSUE", "PR", "STATUS", "ITER");
    for workflow in &workflows {
        println!(
            "{:<16} {:>6}  {:<22} {:>5}  {}",
            workflow.issue_id,
            workflow.pr_number,
            workflow.status.as_str(),
            workflow.review_iteration,
            workflow.updated_at.format("%Y-%m-%d %H:%M")
        );

        let Some(orchestrator) = &orchestrator else {
            continue;
        };
        match orchestrator.check_cycle_completion(workflow).await {
            Ok(completion) => {
                let verdict = if completion.ready { "ready" } else { "not ready" };
                println!("  {verdict}: {}", completion.reason);
                for item in &completion.blocking_items {
                    println!("  - {item}");
                }
            }
            Err(e) => println!("  completion unknown: {e}"),
        }
    }
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(address = %address, "Starting Hypha server");

    let state = Arc::new(AppState::new(WorkflowContext::live(config)?));

    // Start the task queue processor
    let queue_state = Arc::clone(&state);
    tokio::spawn(async move {
        hypha::queue::run_queue_processor(queue_state).await;
    });

    // Poll open workflows (also resumes them after a restart)
    let poll_state = Arc::clone(&state);
    tokio::spawn(async move {
        hypha::queue::poller::run_poller(poll_state).await;
    });

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}
