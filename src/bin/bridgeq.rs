//! bridgeq CLI — operator interface to the dispatch daemon and its spool.

use std::path::PathBuf;
use std::sync::Arc;

use bridgeq::bridge::{Bridge, BridgeRegistry, TransactionScript};
use bridgeq::config::Config;
use bridgeq::config::fleet::FleetConfig;
use bridgeq::engine::{DispatchConfig, Dispatcher, ReadinessGate};
use bridgeq::error::Error;
use bridgeq::model::{NewWorkItem, WorkItem};
use bridgeq::notify::{LogNotifier, StatusHub};
use bridgeq::pipeline::StepPipeline;
use bridgeq::session::{DryRunSession, Session};
use bridgeq::store::QueueStore;
use bridgeq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;

#[derive(Parser)]
#[command(name = "bridgeq", about = "Queue and dispatch engine for fiscal form-submission bridges")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch daemon
    Serve {
        /// Fleet roster TOML
        #[arg(long, default_value = "fleet.toml")]
        fleet: PathBuf,
    },
    /// Work item operations on the snapshot spool
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    /// Queue a new work item in the spool
    Submit {
        /// Transaction kind (routes to bridges by affinity)
        kind: String,
        /// Fiscal year affinity
        #[arg(long)]
        year: Option<i32>,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Explicit dedup key (derived from kind and payload when omitted)
        #[arg(long)]
        dedup_key: Option<String>,
        /// Requester id to notify on completion
        #[arg(long)]
        callback: Option<String>,
    },
    /// List spooled pending items
    List {
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one item (pending or settled) by ID or prefix
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// Show recent outcomes
    Outcomes {
        /// Filter by correlation id (callback id or item id)
        #[arg(long)]
        correlation: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { fleet } => cmd_serve(fleet).await,
        Command::Work { action } => {
            let config = Config::from_env()?;
            match action {
                WorkAction::Submit {
                    kind,
                    year,
                    payload,
                    dedup_key,
                    callback,
                } => cmd_work_submit(&config, kind, year, payload, dedup_key, callback),
                WorkAction::List { limit } => cmd_work_list(&config, limit),
                WorkAction::Show { id } => cmd_work_show(&config, id),
                WorkAction::Outcomes { correlation, limit } => {
                    cmd_work_outcomes(&config, correlation, limit)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(fleet: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "bridgeq".to_string(),
    })?;

    let roster = FleetConfig::load(&fleet)?;
    let registry = Arc::new(build_fleet(&roster));
    let hub = Arc::new(StatusHub::new(registry.clone()));
    let store = Arc::new(QueueStore::new(hub).with_outcome_cap(config.outcome_cap));

    if let Some(ref dir) = config.snapshot_dir {
        store.restore(dir)?;
    }

    ReadinessGate::new(registry.clone())
        .with_timeout(config.ready_timeout)
        .wait()
        .await?;

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        registry,
        Arc::new(LogNotifier),
        DispatchConfig {
            tick: config.tick,
            exec_timeout: config.exec_timeout,
        },
    ));

    let d = dispatcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        d.shutdown();
    });

    dispatcher.run().await;

    if let Some(ref dir) = config.snapshot_dir {
        store.persist(dir)?;
    }
    Ok(())
}

/// Build the bridge fleet from the roster. Every bridge gets a dry-run
/// session and the demo commitment script; a real deployment attaches its
/// own sessions and scripts here.
fn build_fleet(roster: &FleetConfig) -> BridgeRegistry {
    let bridges = roster
        .bridge
        .iter()
        .map(|meta| {
            let mut bridge = Bridge::new(meta.name.as_str(), Arc::new(DryRunSession::new()))
                .with_script(Arc::new(CommitmentScript));
            if let Some(year) = meta.year {
                bridge = bridge.with_year(year);
            }
            if let Some(ref kinds) = meta.kinds {
                bridge = bridge.with_kinds(kinds.iter().cloned());
            }
            Arc::new(bridge)
        })
        .collect();
    BridgeRegistry::new(bridges)
}

/// Demo commitment-form walk. Each actor phase opens with a switch-role
/// step whose result gates the steps of that phase; the recovery step runs
/// on every exit path and reports a halt if one happened.
struct CommitmentScript;

impl TransactionScript for CommitmentScript {
    fn kind(&self) -> &str {
        "commitment-create"
    }

    fn build(&self, item: &WorkItem, _session: &Arc<dyn Session>) -> StepPipeline {
        let payload = item.payload.clone();
        StepPipeline::new()
            .step("switch-role-preparer", |_| {
                Box::pin(async { Ok(json!({ "role": "preparer" })) })
            })
            .step_if(
                "fill-form",
                |prior| prior.ran("switch-role-preparer"),
                move |_| {
                    let payload = payload.clone();
                    Box::pin(async move { Ok(json!({ "filled": payload })) })
                },
            )
            .step("switch-role-approver", |_| {
                Box::pin(async { Ok(json!({ "role": "approver" })) })
            })
            .step_if(
                "approve",
                |prior| prior.ran("switch-role-approver") && prior.ran("fill-form"),
                |prior| {
                    let form = prior.get("fill-form").cloned().unwrap_or(serde_json::Value::Null);
                    Box::pin(async move { Ok(json!({ "approved": true, "form": form })) })
                },
            )
            .recover("reset-role", |prior| {
                let halted = prior.halt_error().map(str::to_string);
                Box::pin(async move {
                    if let Some(error) = halted {
                        warn!(%error, "commitment walk halted, role state reset");
                    }
                    Ok(json!({ "role": "none" }))
                })
            })
    }
}

// ---------------------------------------------------------------------------
// work
// ---------------------------------------------------------------------------

/// Open the spool the daemon reads at startup. The work commands edit that
/// snapshot offline; they never talk to a running daemon.
fn spool_store(config: &Config) -> anyhow::Result<(Arc<QueueStore>, PathBuf)> {
    let dir = config
        .snapshot_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("BRIDGEQ_SNAPSHOT_DIR must be set for work commands"))?;
    let hub = Arc::new(StatusHub::new(Arc::new(BridgeRegistry::empty())));
    let store = Arc::new(QueueStore::new(hub).with_outcome_cap(config.outcome_cap));
    store.restore(&dir)?;
    Ok((store, dir))
}

/// Cut a column value to at most `max` characters. Dedup keys are operator
/// input and may hold multi-byte text, so the cut lands on a char boundary.
fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

fn cmd_work_submit(
    config: &Config,
    kind: String,
    year: Option<i32>,
    payload: Option<String>,
    dedup_key: Option<String>,
    callback: Option<String>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => json!({}),
    };

    let mut new = NewWorkItem::new(&kind).payload(payload);
    if let Some(year) = year {
        new = new.year(year);
    }
    if let Some(ref key) = dedup_key {
        new = new.dedup_key(key);
    }
    if let Some(ref cb) = callback {
        new = new.callback(cb);
    }

    let (store, dir) = spool_store(config)?;
    match store.submit(new) {
        Ok(item) => {
            store.persist(&dir)?;
            println!("Queued: {} (dedup key: {})", item.id, item.dedup_key);
        }
        Err(Error::Duplicate { dedup_key }) => {
            println!("Duplicate: dedup key '{dedup_key}' is already live in the spool");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn cmd_work_list(config: &Config, limit: usize) -> anyhow::Result<()> {
    let (store, _dir) = spool_store(config)?;
    let items = store.pending_items();

    if items.is_empty() {
        println!("No pending work items.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<22}  {:<6}  {:<30}  CREATED",
        "ID", "KIND", "YEAR", "DEDUP_KEY"
    );
    println!("{}", "-".repeat(90));

    for item in items.iter().take(limit) {
        let dedup = clip(&item.dedup_key, 30);
        println!(
            "{:<8}  {:<22}  {:<6}  {:<30}  {}",
            item.id.to_string(),
            item.kind,
            item.year.map(|y| y.to_string()).unwrap_or("-".to_string()),
            dedup,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len().min(limit));
    Ok(())
}

fn cmd_work_show(config: &Config, id_str: String) -> anyhow::Result<()> {
    let (store, _dir) = spool_store(config)?;

    let pending = store.pending_items();
    let matches: Vec<&WorkItem> = pending
        .iter()
        .filter(|item| item.id.0.to_string().starts_with(&id_str))
        .collect();
    match matches.len() {
        0 => {}
        1 => {
            let item = matches[0];
            println!("ID:         {}", item.id.0);
            println!("Kind:       {}", item.kind);
            println!(
                "Year:       {}",
                item.year.map(|y| y.to_string()).unwrap_or("-".to_string())
            );
            println!("Status:     {}", item.status);
            println!("Dedup Key:  {}", item.dedup_key);
            println!("Callback:   {}", item.callback.as_deref().unwrap_or("-"));
            println!("Payload:    {}", serde_json::to_string_pretty(&item.payload)?);
            println!("Created:    {}", item.created_at);
            return Ok(());
        }
        n => anyhow::bail!("{n} pending items match prefix '{id_str}', be more specific"),
    }

    let outcomes = store.recent_outcomes(None);
    let matches: Vec<_> = outcomes
        .iter()
        .filter(|e| e.id.0.to_string().starts_with(&id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no work item matching prefix '{id_str}'"),
        1 => {
            let entry = matches[0];
            println!("ID:         {}", entry.id.0);
            println!("Kind:       {}", entry.kind);
            println!("Status:     {}", entry.status);
            println!("Dedup Key:  {}", entry.dedup_key);
            println!("Callback:   {}", entry.callback.as_deref().unwrap_or("-"));
            if let Some(ref result) = entry.result {
                println!("Result:     {}", serde_json::to_string_pretty(result)?);
            }
            if let Some(ref error) = entry.error {
                println!("Error:      {error}");
            }
            println!("Completed:  {}", entry.completed_at);
            Ok(())
        }
        n => anyhow::bail!("{n} outcomes match prefix '{id_str}', be more specific"),
    }
}

fn cmd_work_outcomes(
    config: &Config,
    correlation: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let (store, _dir) = spool_store(config)?;
    let entries = store.recent_outcomes(correlation.as_deref());

    if entries.is_empty() {
        println!("No recorded outcomes.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<22}  {:<8}  {:<20}  COMPLETED",
        "ID", "KIND", "STATUS", "CALLBACK"
    );
    println!("{}", "-".repeat(90));

    for entry in entries.iter().take(limit) {
        println!(
            "{:<8}  {:<22}  {:<8}  {:<20}  {}",
            entry.id.to_string(),
            entry.kind,
            entry.status,
            entry.callback.as_deref().unwrap_or("-"),
            entry.completed_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} entry(ies)", entries.len().min(limit));
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::clip;

    #[test]
    fn clip_keeps_short_values_whole() {
        assert_eq!(clip("2025/000123", 30), "2025/000123");
        // 33 bytes but 17 chars; byte 30 lands inside a two-byte char.
        let key = format!("a{}", "д".repeat(16));
        assert_eq!(clip(&key, 30), key);
    }

    #[test]
    fn clip_cuts_long_values_on_char_boundaries() {
        let ascii = "k".repeat(90);
        assert_eq!(clip(&ascii, 30), "k".repeat(30));
        let wide = "д".repeat(40);
        let cut = clip(&wide, 30);
        assert_eq!(cut.chars().count(), 30);
        assert!(wide.starts_with(cut));
    }
}
