use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pomosync::application::commands::{
    check_integrity_impl, create_task_impl, drain_notifications_impl, list_sessions_impl,
    list_tasks_impl, login_impl, select_task_impl, start_timer_impl, sync_now_impl, AppState,
};
use pomosync::infrastructure::error::InfraError;
use pomosync::infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root holding config/, state/ and logs/.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Sign in as this user instead of POMOSYNC_USER_ID.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Log to stderr instead of logs/pomosync.log.
    #[arg(long, global = true)]
    stderr: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the timer and periodic sync running until interrupted.
    Run {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        start: bool,
    },
    Sync,
    /// Compare remote and cached record counts.
    Check,
    Tasks,
    AddTask {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    History,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failed<'a>(state: &'a AppState, command: &'static str) -> impl Fn(InfraError) -> anyhow::Error + 'a {
    move |error| anyhow!(state.command_error(command, &error))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };

    let background_sync = matches!(cli.command, Commands::Run { .. });
    let state = AppState::new(root.clone())
        .with_context(|| format!("failed to initialize workspace at {}", root.display()))?
        .with_background_sync(background_sync);
    let logs_dir = (!cli.stderr).then(|| state.logs_dir().to_path_buf());
    init_logging(logs_dir.as_deref())?;

    login_impl(&state, cli.user).await.map_err(failed(&state, "login"))?;

    match cli.command {
        Commands::Run { task, start } => run(&state, task, start).await?,
        Commands::Sync => print_json(&sync_now_impl(&state).await.map_err(failed(&state, "sync_now"))?)?,
        Commands::Check => print_json(
            &check_integrity_impl(&state)
                .await
                .map_err(failed(&state, "check_integrity"))?,
        )?,
        Commands::Tasks => print_json(&list_tasks_impl(&state).await.map_err(failed(&state, "list_tasks"))?)?,
        Commands::AddTask { title, description } => print_json(
            &create_task_impl(&state, title, description)
                .await
                .map_err(failed(&state, "create_task"))?,
        )?,
        Commands::History => print_json(
            &list_sessions_impl(&state)
                .await
                .map_err(failed(&state, "list_sessions"))?,
        )?,
    }

    state.shutdown().await.map_err(failed(&state, "shutdown"))?;
    Ok(())
}

async fn run(state: &AppState, task: Option<String>, start: bool) -> Result<()> {
    if task.is_some() {
        select_task_impl(state, task)
            .await
            .map_err(failed(state, "select_task"))?;
    }
    if start {
        start_timer_impl(state)
            .await
            .map_err(failed(state, "start_timer"))?;
    }
    info!("running until interrupted");

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            _ = poll.tick() => {
                let notifications = drain_notifications_impl(state)
                    .await
                    .map_err(failed(state, "drain_notifications"))?;
                for notification in notifications {
                    println!("{}: {}", notification.title, notification.description);
                }
            }
        }
    }
    Ok(())
}
