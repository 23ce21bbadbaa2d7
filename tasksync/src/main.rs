//! `tasksync` -- follow and edit a task's comment thread from the terminal.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! # Follow task 42 live
//! cargo run --bin tasksync -- --hub-url ws://127.0.0.1:8080/hub \
//!     --api-url http://127.0.0.1:8080/ --user-id alice watch 42
//!
//! # Post, reply, delete, advance status
//! TASKSYNC_USER=alice cargo run --bin tasksync -- comment 42 "looks good"
//! TASKSYNC_USER=alice cargo run --bin tasksync -- reply 42 7 --parent 9 "agreed"
//! TASKSYNC_USER=alice cargo run --bin tasksync -- delete 42 7
//! TASKSYNC_USER=alice cargo run --bin tasksync -- status 42 --from pending in-progress
//! ```

use std::path::Path;
use std::process::ExitCode;

use chrono::{DateTime, Local};
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::config::{CliArgs, ClientConfig, Command, ConfigError};
use tasksync::error::SyncError;
use tasksync::model::{CommentEntry, EntityKind, EntryId, ReplyEntry};
use tasksync::net::{self, SyncCommand, ViewSnapshot};
use tasksync::session::SyncNotice;
use tasksync_proto::comment::ServerId;
use tasksync_proto::task::TaskId;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("sync driver stopped unexpectedly")]
    Closed,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(command) = cli.command else {
        eprintln!("no command given; see --help");
        return ExitCode::from(2);
    };

    tracing::info!(?command, "tasksync starting");
    let result = run(command, &config).await;
    tracing::info!("tasksync exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging so stdout stays clean for the thread.
///
/// The returned [`WorkerGuard`] must be held until shutdown.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasksync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

const fn command_task(command: &Command) -> TaskId {
    match command {
        Command::Watch { task }
        | Command::Comment { task, .. }
        | Command::Reply { task, .. }
        | Command::Delete { task, .. }
        | Command::Status { task, .. } => *task,
    }
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let connector = config.to_connector()?;
    let api = config.to_write_api()?;
    let mut handle = net::spawn_sync(connector, api, config.to_sync_config()?);
    let commands = handle.commands.clone();
    let notices = &mut handle.notices;

    let task_id = command_task(&command);
    let status = match &command {
        Command::Status { from, .. } => Some(*from),
        _ => None,
    };
    send(&commands, SyncCommand::OpenView { task_id, status }).await?;
    wait_for(notices, task_id, |n| matches!(n, SyncNotice::ThreadLoaded(t) if *t == task_id)).await?;

    match command {
        Command::Watch { .. } => {
            render(&snapshot(&commands, task_id).await?, &config.timestamp_format);
            watch(&commands, notices, task_id, &config.timestamp_format).await?;
        }
        Command::Comment { text, .. } => {
            send(&commands, SyncCommand::SubmitComment { task_id, content: text }).await?;
            let id = wait_confirmed(notices, task_id, EntityKind::Comment).await?;
            println!("comment {id} posted");
        }
        Command::Reply {
            comment, parent, text, ..
        } => {
            send(
                &commands,
                SyncCommand::SubmitReply {
                    task_id,
                    comment: EntryId::Confirmed(ServerId::new(comment)),
                    parent: parent.map(|p| EntryId::Confirmed(ServerId::new(p))),
                    content: text,
                },
            )
            .await?;
            let id = wait_confirmed(notices, task_id, EntityKind::Reply).await?;
            println!("reply {id} posted");
        }
        Command::Delete { id, reply, .. } => {
            let id = EntryId::Confirmed(ServerId::new(id));
            let (kind, command) = if reply {
                (EntityKind::Reply, SyncCommand::DeleteReply { task_id, id })
            } else {
                (EntityKind::Comment, SyncCommand::DeleteComment { task_id, id })
            };
            send(&commands, command).await?;
            let id = wait_confirmed(notices, task_id, kind).await?;
            println!("{kind} {id} deleted");
        }
        Command::Status { from, to, .. } => {
            if from == to {
                println!("task {task_id} is already {to}");
            } else {
                send(&commands, SyncCommand::ChangeStatus { task_id, status: to }).await?;
                wait_for(notices, task_id, |n| matches!(n, SyncNotice::StatusChanged { .. })).await?;
                println!("task {task_id} is now {to}");
            }
        }
    }

    let _ = commands.send(SyncCommand::Shutdown).await;
    Ok(())
}

async fn watch(
    commands: &mpsc::Sender<SyncCommand>,
    notices: &mut mpsc::Receiver<SyncNotice>,
    task_id: TaskId,
    timestamp_format: &str,
) -> Result<(), CliError> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            notice = notices.recv() => match notice.ok_or(CliError::Closed)? {
                SyncNotice::ViewUpdated(t) if t == task_id => {
                    println!();
                    render(&snapshot(commands, task_id).await?, timestamp_format);
                }
                SyncNotice::ConnectionChanged(state) => eprintln!("-- {state}"),
                SyncNotice::WriteFailed { error, .. } => eprintln!("-- write failed: {error}"),
                SyncNotice::EventDropped { event, reason, .. } => eprintln!("-- dropped {event:?}: {reason}"),
                other => tracing::trace!(?other, "notice"),
            },
        }
    }
}

async fn send(commands: &mpsc::Sender<SyncCommand>, command: SyncCommand) -> Result<(), CliError> {
    commands.send(command).await.map_err(|_| CliError::Closed)
}

async fn snapshot(commands: &mpsc::Sender<SyncCommand>, task_id: TaskId) -> Result<ViewSnapshot, CliError> {
    let (reply, rx) = oneshot::channel();
    send(commands, SyncCommand::Snapshot { task_id, reply }).await?;
    rx.await
        .map_err(|_| CliError::Closed)?
        .ok_or(CliError::Sync(SyncError::UnknownView(task_id)))
}

/// Waits for a notice matching `pred`, failing on the first error for
/// `task_id`.
async fn wait_for(
    notices: &mut mpsc::Receiver<SyncNotice>,
    task_id: TaskId,
    mut pred: impl FnMut(&SyncNotice) -> bool,
) -> Result<SyncNotice, CliError> {
    loop {
        let notice = notices.recv().await.ok_or(CliError::Closed)?;
        if pred(&notice) {
            return Ok(notice);
        }
        match notice {
            SyncNotice::WriteFailed { task_id: t, error } | SyncNotice::ActionRejected { task_id: t, error }
                if t == task_id =>
            {
                return Err(error.into());
            }
            other => tracing::trace!(?other, "notice"),
        }
    }
}

async fn wait_confirmed(
    notices: &mut mpsc::Receiver<SyncNotice>,
    task_id: TaskId,
    kind: EntityKind,
) -> Result<ServerId, CliError> {
    let notice = wait_for(notices, task_id, |n| {
        matches!(n, SyncNotice::WriteConfirmed { task_id: t, kind: k, .. } if *t == task_id && *k == kind)
    })
    .await?;
    match notice {
        SyncNotice::WriteConfirmed { id, .. } => Ok(id),
        _ => Err(CliError::Closed),
    }
}

fn render(view: &ViewSnapshot, timestamp_format: &str) {
    if let Some(status) = view.status {
        println!("status: {status}");
    }
    if view.comments.is_empty() {
        println!("(no comments)");
    }
    for comment in &view.comments {
        print_comment(comment, timestamp_format);
    }
}

fn print_comment(comment: &CommentEntry, timestamp_format: &str) {
    println!(
        "[{}] {} {}{}",
        comment.id,
        comment.author.display_name,
        format_time(comment.created_at_ms, timestamp_format),
        pending_marker(comment.id),
    );
    println!("    {}", comment.content);
    for reply in &comment.replies {
        print_reply(reply, 1, timestamp_format);
    }
}

fn print_reply(reply: &ReplyEntry, depth: usize, timestamp_format: &str) {
    let indent = "    ".repeat(depth);
    println!(
        "{indent}└ [{}] {} {}{}",
        reply.id,
        reply.author.display_name,
        format_time(reply.created_at_ms, timestamp_format),
        pending_marker(reply.id),
    );
    println!("{indent}    {}", reply.content);
    for nested in &reply.replies {
        print_reply(nested, depth + 1, timestamp_format);
    }
}

const fn pending_marker(id: EntryId) -> &'static str {
    if id.is_pending() { " (sending)" } else { "" }
}

fn format_time(ms: u64, format: &str) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&Local).format(format).to_string())
        .unwrap_or_default()
}
