//! frontierq CLI: operator interface to a frontier queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use frontierq::config::{BackendKind, Config};
use frontierq::model::{AckOutcome, EnqueueOutcome, ItemId, NackOutcome, NewItem};
use frontierq::queue::{self, FrontierQueue};
use frontierq::reaper::Reaper;
use frontierq::telemetry::{TelemetryConfig, init_telemetry};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "frontierq", about = "Crawl frontier queue")]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit an item
    Push {
        /// Item key (usually a URL)
        key: String,
        /// Priority (lower = dequeued sooner)
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Opaque payload stored with the item
        #[arg(long)]
        payload: Option<String>,
    },
    /// Claim the next item
    Pop {
        /// Worker identifier recorded on the claim
        #[arg(long, default_value = "cli")]
        worker: String,
        /// Lease in seconds (defaults to the configured lease)
        #[arg(long)]
        lease_secs: Option<u64>,
    },
    /// Acknowledge a claimed item
    Ack {
        /// Item ID
        id: String,
    },
    /// Return a claimed item to the queue
    Nack {
        /// Item ID
        id: String,
    },
    /// Show pending and outstanding counts
    Size,
    /// Run one reaper pass
    Reap,
    /// Run the reaper until interrupted
    Reaper {
        /// Print queue events as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Delete every item and dedup record in the namespace
    Clear,
    /// Print the canonical form and fingerprint of a key
    Fingerprint {
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "frontierq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if let Command::Fingerprint { ref key } = cli.command {
        let fingerprinter = config.queue.fingerprinter()?;
        println!("Canonical:    {}", fingerprinter.canonicalize(key));
        println!("Fingerprint:  {}", fingerprinter.fingerprint(key));
        return Ok(());
    }

    if config.backend == BackendKind::Memory {
        tracing::warn!("memory backend selected: queue state ends with this process");
    }
    let queue = queue::open(&config).await?;

    let result = match cli.command {
        Command::Push {
            key,
            priority,
            payload,
        } => cmd_push(queue.as_ref(), key, priority, payload).await,
        Command::Pop { worker, lease_secs } => {
            let lease = lease_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.queue.lease());
            cmd_pop(queue.as_ref(), &worker, lease).await
        }
        Command::Ack { id } => cmd_ack(queue.as_ref(), &id).await,
        Command::Nack { id } => cmd_nack(queue.as_ref(), &id).await,
        Command::Size => cmd_size(queue.as_ref()).await,
        Command::Reap => cmd_reap(queue.as_ref()).await,
        Command::Reaper { events } => cmd_reaper(Arc::clone(&queue), &config, events).await,
        Command::Clear => {
            queue.clear().await?;
            println!("Cleared namespace {}", queue.namespace());
            Ok(())
        }
        Command::Fingerprint { .. } => Ok(()),
    };

    queue.close();
    guard.force_flush();
    result
}

fn parse_id(raw: &str) -> anyhow::Result<ItemId> {
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid item id '{raw}': {e}"))
}

async fn cmd_push(
    queue: &dyn FrontierQueue,
    key: String,
    priority: i64,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let mut new = NewItem::new(key).priority(priority);
    if let Some(payload) = payload {
        new = new.payload(payload);
    }

    match queue.enqueue(new).await? {
        EnqueueOutcome::Accepted(id) => println!("Accepted: {id}"),
        EnqueueOutcome::Duplicate => println!("Duplicate: already seen"),
        EnqueueOutcome::DedupedUpdated(id) => println!("Duplicate: priority of {id} updated"),
        EnqueueOutcome::CapacityExceeded => anyhow::bail!("queue is full"),
        EnqueueOutcome::Closed => anyhow::bail!("queue is closed"),
    }
    Ok(())
}

async fn cmd_pop(queue: &dyn FrontierQueue, worker: &str, lease: Duration) -> anyhow::Result<()> {
    let Some(item) = queue.dequeue(worker, lease).await? else {
        println!("Queue is empty.");
        return Ok(());
    };

    println!("ID:           {}", item.id);
    println!("Key:          {}", item.key);
    println!("Fingerprint:  {}", item.fingerprint);
    println!("Priority:     {}", item.priority);
    println!("Attempts:     {}", item.attempt_count);
    println!("Enqueued:     {}", item.enqueued_at);
    if let Some(expires) = item.expires_at {
        println!("Expires:      {expires}");
    }
    if !item.payload.is_empty() {
        println!("Payload:      {}", String::from_utf8_lossy(&item.payload));
    }
    println!("Lease:        {}s", lease.as_secs());
    Ok(())
}

async fn cmd_ack(queue: &dyn FrontierQueue, id: &str) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    match queue.ack(id).await? {
        AckOutcome::Acked => println!("Acked: {id}"),
        AckOutcome::Stale => println!("Stale: {id} is no longer claimed"),
    }
    Ok(())
}

async fn cmd_nack(queue: &dyn FrontierQueue, id: &str) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    match queue.nack(id).await? {
        NackOutcome::Requeued { attempt_count } => {
            println!("Requeued: {id} (attempt {attempt_count})")
        }
        NackOutcome::Dropped { attempt_count } => {
            println!("Dropped: {id} after {attempt_count} attempts")
        }
        NackOutcome::Stale => println!("Stale: {id} is no longer claimed"),
    }
    Ok(())
}

async fn cmd_size(queue: &dyn FrontierQueue) -> anyhow::Result<()> {
    println!("Namespace:    {}", queue.namespace());
    println!("Pending:      {}", queue.size().await?);
    println!("Outstanding:  {}", queue.outstanding().await?);
    Ok(())
}

async fn cmd_reap(queue: &dyn FrontierQueue) -> anyhow::Result<()> {
    let report = queue.reap().await?;
    println!("Reclaimed:    {}", report.reclaimed.len());
    println!("Dropped:      {}", report.dropped.len());
    println!("Expired:      {}", report.expired.len());
    println!("Dedup purged: {}", report.dedup_purged);
    Ok(())
}

async fn cmd_reaper(
    queue: Arc<dyn FrontierQueue>,
    config: &Config,
    print_events: bool,
) -> anyhow::Result<()> {
    let mut events = queue.subscribe();
    let reaper = Reaper::new(queue, config.queue.reaper_interval())?;
    let handle = reaper.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                break;
            }
            received = events.recv(), if print_events => match received {
                Ok(event) => println!("{}", event.to_json()?),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    Ok(())
}
