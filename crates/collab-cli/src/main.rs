use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use collab_core::bridge::{BridgeReply, OutboundMessage};
use collab_core::config::CollabConfig;
use collab_core::logging;
use collab_core::models::TaskId;
use collab_core::orchestration::Dispatcher;
use collab_core::runtime::CollabRuntime;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const FORWARDER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "collab",
    about = "Capability-routed task dispatcher speaking JSON lines over stdio"
)]
struct Cli {
    /// Path to a TOML config file; the built-in worker catalog is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for accepted tasks once stdin is closed
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Log filter directive, overrides COLLAB_LOG
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref());

    let config = match &cli.config {
        Some(path) => CollabConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CollabConfig::default(),
    };

    let (lines, output) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(output));

    let mut runtime = CollabRuntime::start(&config).context("starting dispatcher")?;
    let events = spawn_event_forwarder(runtime.dispatcher().subscribe(), lines.clone());
    let assignments = runtime
        .take_assignments()
        .map(|receiver| spawn_assignment_forwarder(receiver, lines.clone()));

    let accepted = read_messages(&runtime, &lines).await?;

    let dispatcher = runtime.dispatcher().clone();
    dispatcher.shutdown()?;
    drain(
        &dispatcher,
        &accepted,
        Duration::from_secs(cli.drain_timeout_secs),
    )
    .await;

    drop(dispatcher);
    drop(runtime);
    flush_forwarder(events).await;
    if let Some(assignments) = assignments {
        flush_forwarder(assignments).await;
    }

    drop(lines);
    writer.await.context("stdout writer panicked")??;
    Ok(())
}

async fn read_messages(
    runtime: &CollabRuntime,
    lines: &mpsc::UnboundedSender<String>,
) -> anyhow::Result<Vec<TaskId>> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = Vec::new();

    while let Some(line) = input.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = runtime.bridge().handle_json(&line);
        if let BridgeReply::TaskAccepted { task_id } = &reply {
            accepted.push(*task_id);
        }
        emit(lines, &reply);
    }

    Ok(accepted)
}

async fn drain(dispatcher: &Dispatcher, accepted: &[TaskId], limit: Duration) {
    let wait_all = async {
        for task_id in accepted {
            if let Err(error) = dispatcher.wait_for_terminal(*task_id, None).await {
                tracing::debug!(
                    task_id = task_id.0,
                    message = %error.message,
                    "stopped waiting for task"
                );
            }
        }
    };

    if tokio::time::timeout(limit, wait_all).await.is_err() {
        tracing::warn!(
            timeout_secs = limit.as_secs(),
            queued = dispatcher.queued_len().unwrap_or(0),
            active = dispatcher.active_len().unwrap_or(0),
            "drain timeout elapsed with unfinished tasks"
        );
    } else {
        tracing::info!(tasks = accepted.len(), "all accepted tasks settled");
    }
}

fn spawn_event_forwarder(
    mut events: broadcast::Receiver<collab_core::orchestration::LifecycleEvent>,
    lines: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => emit(&lines, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output fell behind; events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_assignment_forwarder(
    mut assignments: mpsc::UnboundedReceiver<collab_core::execution::RemoteAssignment>,
    lines: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(assignment) = assignments.recv().await {
            emit(&lines, &OutboundMessage::AssignTask(assignment));
        }
    })
}

async fn flush_forwarder(handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(FORWARDER_FLUSH_TIMEOUT, handle)
        .await
        .is_err()
    {
        abort.abort();
    }
}

async fn write_lines(mut output: mpsc::UnboundedReceiver<String>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = output.recv().await {
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn emit<T: Serialize>(lines: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = lines.send(line);
        }
        Err(error) => tracing::error!(%error, "failed to encode output line"),
    }
}
