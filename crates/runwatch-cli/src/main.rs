mod api;
mod config;
mod connector;
mod output;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use config::{load_config, Args, Config, Target};
use connector::{CloseReason, ConnectionState, StreamItem};
use output::Printer;
use runwatch_state::{RunStore, ViewChange};
use std::collections::BTreeSet;
use std::io::{self, Write};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse())?;
    init_logging(&config);

    match run(config).await? {
        CloseReason::RetriesExhausted => anyhow::bail!("event stream unavailable: retries exhausted"),
        reason => {
            info!(event = "watch_done", reason = ?reason);
            Ok(())
        }
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries rendered views, so logs default to stderr.
    let writer = if config.quiet {
        BoxMakeWriter::new(io::sink)
    } else if config.log_stdout {
        BoxMakeWriter::new(io::stdout)
    } else {
        BoxMakeWriter::new(io::stderr)
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init();
}

async fn run(config: Config) -> anyhow::Result<CloseReason> {
    let mut store = RunStore::new(config.store.clone());
    let mut changes = store.subscribe();
    let mut printer = Printer::new(config.output);

    let (run_id, resume_from) = match &config.target {
        Target::Attach {
            run_id,
            resume_from,
        } => {
            store.begin_run(run_id, &[]);
            (run_id.clone(), resume_from.clone())
        }
        Target::Start(request) => {
            let client = reqwest::Client::new();
            let started = api::start_run(&client, &config.base_url, request)
                .await
                .context("start run")?;
            store.begin_run(&started.run_id, &started.agents);
            (started.run_id, None)
        }
    };
    emit(printer.render(&store, &drain_changes(&mut changes)));

    let (handle, mut subscription) =
        connector::connect(config.connector.clone(), &run_id, resume_from)
            .context("open event stream")?;

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut items_open = true;

    let reason = loop {
        let mut closed = None;
        tokio::select! {
            item = subscription.items.recv(), if items_open => match item {
                Some(item) => apply_item(&mut store, item),
                None => items_open = false,
            },
            changed = subscription.status.changed() => {
                let state = subscription.status.borrow_and_update().clone();
                store.set_connection(state.is_live(), Utc::now());
                emit(printer.connection(&state));
                if let ConnectionState::Closed(reason) = state {
                    while let Ok(item) = subscription.items.try_recv() {
                        apply_item(&mut store, item);
                    }
                    closed = Some(reason);
                } else if changed.is_err() {
                    closed = Some(CloseReason::Cancelled);
                }
            }
            _ = ticker.tick() => {
                store.tick(Utc::now());
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!(event = "watch_interrupted", run_id = %run_id);
                handle.disconnect();
            }
        }
        emit(printer.render(&store, &drain_changes(&mut changes)));
        if let Some(reason) = closed {
            break reason;
        }
    };

    if let Some(cursor) = handle.cursor() {
        info!(event = "watch_cursor", run_id = %run_id, cursor = %cursor);
    }
    Ok(reason)
}

fn apply_item(store: &mut RunStore, item: StreamItem) {
    match item {
        StreamItem::Envelope(envelope) => {
            store.ingest(envelope);
        }
        StreamItem::Heartbeat { at } => store.record_heartbeat(at),
    }
}

fn drain_changes(changes: &mut broadcast::Receiver<ViewChange>) -> BTreeSet<ViewChange> {
    let mut seen = BTreeSet::new();
    loop {
        match changes.try_recv() {
            Ok(change) => {
                seen.insert(change);
            }
            // Missed notifications: redraw everything.
            Err(broadcast::error::TryRecvError::Lagged(_)) => {
                seen.insert(ViewChange::Reset);
            }
            Err(_) => break,
        }
    }
    seen
}

fn emit(lines: Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    for line in lines {
        let _ = writeln!(stdout, "{line}");
    }
    let _ = stdout.flush();
}
