use clap::{Parser, Subcommand};
use querylab::config::{AppConfig, StoreTarget, load_config};
use querylab::gateway::{self, GatewayState, SharedState};
use querylab::store::{MemoryStore, MongoStore, SharedStore};
use querylab::{logger, query};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "querylab", version, about = "Query gateway for the interactive MongoDB documentation", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Listen port; takes precedence over config/env")]
    port: Option<u16>,
    #[arg(long, help = "Serve from the in-memory store instead of MongoDB")]
    memory: bool,
    #[arg(long, help = "JSON seed file for the in-memory store (implies --memory)")]
    seed: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the HTTP gateway (default)")]
    Serve,
    #[command(about = "Execute one query and print the response envelope")]
    Exec {
        #[arg(help = "Query text, e.g. 'db.books.find({year: 1965})'")]
        query: String,
    },
    #[command(about = "Print the normalized invocation for a query without executing it")]
    Parse {
        #[arg(help = "Query text")]
        query: String,
    },
}

fn apply_cli(cli: &Cli, mut cfg: AppConfig) -> AppConfig {
    if cli.port.is_some() {
        cfg.port = cli.port;
    }
    if cli.memory {
        cfg.memory = Some(true);
    }
    if cli.seed.is_some() {
        cfg.seed.clone_from(&cli.seed);
    }
    cfg
}

/// Configures logging, then reports the warnings collected while loading config.
fn init_logging(cfg: &AppConfig, fallback_level: &str, warnings: &[String]) {
    let res = match &cfg.log_config {
        Some(path) => logger::init_path(path),
        None => logger::configure_logging(
            cfg.log_dir.as_deref(),
            Some(cfg.log_level.as_deref().unwrap_or(fallback_level)),
            None,
        ),
    };
    if let Err(e) = res {
        eprintln!("warning: logging not initialized: {e}");
        print_warnings(warnings);
        return;
    }
    for w in warnings {
        log::warn!("{w}");
    }
}

fn print_warnings(warnings: &[String]) {
    for w in warnings {
        eprintln!("warning: {w}");
    }
}

async fn open_store(target: StoreTarget) -> Result<SharedStore, Box<dyn Error>> {
    match target {
        StoreTarget::Mongo { uri, database } => Ok(Arc::new(MongoStore::connect(&uri, &database).await?)),
        StoreTarget::Memory { seed: Some(path) } => Ok(Arc::new(MemoryStore::from_seed_file(&path)?)),
        StoreTarget::Memory { seed: None } => Ok(Arc::new(MemoryStore::new())),
        StoreTarget::Disabled { reason } => Err(reason.into()),
    }
}

async fn serve(cfg: AppConfig) -> Result<(), Box<dyn Error>> {
    let state: SharedState = Arc::new(GatewayState::new(cfg.default_collection()));
    match cfg.store_target() {
        StoreTarget::Mongo { uri, database } => {
            gateway::connect_in_background(state.clone(), async move {
                let store: SharedStore = Arc::new(MongoStore::connect(&uri, &database).await?);
                Ok(store)
            });
        }
        target @ StoreTarget::Memory { .. } => {
            let store = open_store(target).await?;
            if state.attach(store).is_err() {
                log::warn!("store slot already filled");
            }
        }
        StoreTarget::Disabled { reason } => {
            log::error!("database connection error: {reason}");
        }
    }

    let addr = format!("{}:{}", cfg.bind(), cfg.port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("server running on http://{addr}");
    axum::serve(listener, gateway::router(state.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for shutdown signal: {e}");
            }
            log::info!("shutting down");
        })
        .await?;
    state.shutdown().await;
    Ok(())
}

async fn exec(cfg: AppConfig, text: &str) -> Result<bool, Box<dyn Error>> {
    let store = open_store(cfg.store_target()).await?;
    let state = GatewayState::with_store(store, cfg.default_collection());
    let result = state.execute(Some(text)).await;
    state.shutdown().await;
    match result {
        Ok(resp) => {
            println!("{}", serde_json::to_string_pretty(&resp)?);
            Ok(true)
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err)?);
            Ok(false)
        }
    }
}

fn parse(cfg: &AppConfig, text: &str) -> Result<bool, Box<dyn Error>> {
    match query::interpret(text, cfg.default_collection()) {
        Ok(inv) => {
            println!("{}", serde_json::to_string_pretty(&inv)?);
            Ok(true)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let loaded = load_config(cli.config.as_deref());
    let cfg = apply_cli(&cli, loaded.config);

    let r: Result<bool, Box<dyn Error>> = match &cli.command {
        None | Some(Commands::Serve) => {
            init_logging(&cfg, "info", &loaded.warnings);
            serve(cfg).await.map(|()| true)
        }
        Some(Commands::Exec { query }) => {
            init_logging(&cfg, "warn", &loaded.warnings);
            exec(cfg, query).await
        }
        Some(Commands::Parse { query: text }) => {
            print_warnings(&loaded.warnings);
            parse(&cfg, text)
        }
    };
    match r {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
