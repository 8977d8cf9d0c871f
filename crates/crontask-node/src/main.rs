use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crontask_core::{Address, Coin, CrontaskConfig, GenesisState, Params, TaskId, TaskStatus};
use crontask_scheduler::{
    export_genesis, init_genesis, register_builtin, Clock, CreateTaskRequest, EventSink,
    ExecutionEngine, Ledger, OperationRouter, Scheduler, SchedulerEngine, SystemClock, TaskEvent,
    TaskQuery, TaskService,
};
use crontask_store::{PageRequest, SqliteKv, StateRoot};

#[derive(Parser)]
#[command(name = "crontask-node", version, about = "Deferred task scheduler node")]
struct Cli {
    /// Config file (default: ~/.crontask/crontask.toml, or CRONTASK_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tick loop until Ctrl-C (default).
    Run {
        /// JSON genesis file, applied only when the database is empty.
        #[arg(long)]
        genesis: Option<PathBuf>,
    },
    /// Print the current scheduler state as genesis JSON.
    ExportGenesis,
    /// Create a task from a JSON request file; prints the new id.
    CreateTask {
        /// `{creator, scheduled_time, expiry_time?, cost_limit, cost_fee, operations}`
        file: PathBuf,
    },
    /// Delete a task. Only its creator may do this.
    DeleteTask {
        id: u64,
        #[arg(long)]
        requester: String,
    },
    /// Print one task.
    ShowTask { id: u64 },
    /// List one page of tasks.
    ListTasks {
        /// Only tasks of this creator (ascending id).
        #[arg(long, conflicts_with = "status")]
        creator: Option<String>,
        /// Only tasks in this status.
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        /// Ordering within `--status`.
        #[arg(long, value_enum, default_value_t = OrderBy::Time)]
        order_by: OrderBy,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// `next_cursor` of the previous page.
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        reverse: bool,
    },
    /// Print the active params.
    Params,
    /// Replace the params from a JSON file. Requires the configured authority.
    SetParams {
        file: PathBuf,
        #[arg(long)]
        caller: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderBy {
    Time,
    Price,
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    s.to_ascii_uppercase().parse().map_err(|e| format!("{e}"))
}

/// On-disk genesis: the scheduler state plus optional starting balances.
#[derive(Debug, Deserialize)]
struct NodeGenesis {
    #[serde(flatten)]
    crontask: GenesisState,
    #[serde(default)]
    balances: Vec<GenesisBalance>,
}

#[derive(Debug, Deserialize)]
struct GenesisBalance {
    address: String,
    coins: Vec<Coin>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // explicit flag > CRONTASK_CONFIG env > ~/.crontask/crontask.toml
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("CRONTASK_CONFIG").ok());
    let config = CrontaskConfig::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(path = %config.database.path, "opening SQLite database");
    let root = Arc::new(StateRoot::new(Arc::new(SqliteKv::open(&config.database.path)?)));
    let store = root.task_store();
    let ledger = Arc::new(Ledger::new(root.state()));
    let authority = config
        .node
        .authority
        .as_deref()
        .map(Address::parse)
        .transpose()?;
    let service = TaskService::new(store.clone(), authority, EventSink::disabled());
    let query = TaskQuery::new(store.clone());

    match cli.command.unwrap_or(Command::Run { genesis: None }) {
        Command::Run { genesis } => {
            if store.stored_params()?.is_none() {
                seed(&root, &ledger, &config, genesis.as_deref())?;
            } else if genesis.is_some() {
                warn!("database already initialised, ignoring genesis file");
            }
            run(config, root, ledger).await
        }
        Command::ExportGenesis => print_json(&export_genesis(&store)?),
        Command::CreateTask { file } => {
            let req: CreateTaskRequest = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            let id = service.create_task(req, SystemClock.now())?;
            print_json(&serde_json::json!({ "task_id": id }))
        }
        Command::DeleteTask { id, requester } => {
            service.delete_task(TaskId(id), &requester)?;
            info!(task_id = id, "task deleted");
            Ok(())
        }
        Command::ShowTask { id } => print_json(&query.task_by_id(TaskId(id))?),
        Command::ListTasks {
            creator,
            status,
            order_by,
            limit,
            cursor,
            reverse,
        } => {
            let page = PageRequest {
                cursor,
                limit,
                reverse,
            };
            let tasks = match (creator, status, order_by) {
                (Some(creator), _, _) => query.tasks_by_creator(&creator, &page)?,
                (None, Some(status), OrderBy::Time) => {
                    query.tasks_by_status_and_time(status, &page)?
                }
                (None, Some(status), OrderBy::Price) => {
                    query.tasks_by_status_and_price(status, &page)?
                }
                (None, None, _) => query.all_tasks(&page)?,
            };
            print_json(&tasks)
        }
        Command::Params => print_json(&query.params()?),
        Command::SetParams { file, caller } => {
            let params: Params = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            service.set_params(&caller, params)?;
            info!("params updated");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// First start: load the genesis file, or fall back to the configured params.
fn seed(
    root: &StateRoot,
    ledger: &Ledger,
    config: &CrontaskConfig,
    genesis: Option<&Path>,
) -> anyhow::Result<()> {
    let store = root.task_store();
    let Some(path) = genesis else {
        init_genesis(
            &store,
            &GenesisState {
                params: config.params.clone(),
                ..GenesisState::default()
            },
        )?;
        info!("empty database seeded from config params");
        return Ok(());
    };

    let raw = std::fs::read_to_string(path)?;
    let genesis: NodeGenesis = serde_json::from_str(&raw)?;
    init_genesis(&store, &genesis.crontask)?;
    for balance in &genesis.balances {
        for coin in &balance.coins {
            ledger.mint(&balance.address, coin)?;
        }
    }
    info!(
        path = %path.display(),
        tasks = genesis.crontask.tasks.len(),
        accounts = genesis.balances.len(),
        "genesis applied"
    );
    Ok(())
}

async fn run(config: CrontaskConfig, root: Arc<StateRoot>, ledger: Arc<Ledger>) -> anyhow::Result<()> {
    let router = OperationRouter::new();
    register_builtin(&router);
    info!(kinds = ?router.kinds(), "operation handlers registered");

    // Task events: Scheduler → log consumer
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<TaskEvent>(config.node.event_buffer);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "crontask::events", event = %json, "task event"),
                Err(e) => warn!(error = %e, "cannot encode task event"),
            }
        }
    });

    let scheduler = Arc::new(Scheduler::new(
        root,
        ledger,
        ExecutionEngine::new(Arc::new(router), config.costs.clone()),
        EventSink::new(event_tx),
    ));
    let engine = SchedulerEngine::new(
        scheduler,
        Arc::new(SystemClock),
        Duration::from_millis(config.node.tick_interval_ms.max(1)),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));
    info!("crontask node running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
