use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::info,
};

use {
    axon_actions::RawParams,
    axon_connection::{Connection, ConnectionKind},
    axon_dispatch::Dispatcher,
    axon_gateway::App,
    axon_registry::{Registry, RunMode},
};

#[derive(Parser)]
#[command(name = "axon", about = "axon: transport-agnostic action server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Run without Redis: in-memory stores, single process.
    #[arg(long, global = true, default_value_t = false)]
    memory: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default when no subcommand is provided).
    Start,
    /// Dispatch one action and print the JSON envelope.
    Run {
        /// Action name.
        action: String,
        /// Parameters, repeatable: --param key=value
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// List registered actions.
    Actions,
    /// Print the resolved configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = axon_config::resolve().map_err(|e| anyhow::anyhow!("{e}"))?;
    config.logger.level = cli.log_level.clone();
    config.logger.format = if cli.json_logs { "json".into() } else { "text".into() };
    if let Some(bind) = &cli.bind {
        config.server.web.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.web.port = port;
    }
    axon_logger::init(&config.logger);

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => start(config, cli.memory).await,
        Commands::Run { action, params } => run_action(config, cli.memory, &action, &params).await,
        Commands::Actions => list_actions(config).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn build_app(config: axon_config::AppConfig, memory: bool) -> App {
    let app = App::new(config);
    if memory { app.in_memory() } else { app }
}

async fn start(config: axon_config::AppConfig, memory: bool) -> anyhow::Result<()> {
    let mut registry = build_app(config, memory).into_registry();
    registry
        .start(RunMode::Server)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    registry.stop().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

/// Dispatch one action over a CLI connection. Exit 0 on success, 1 on a
/// dispatch error.
async fn run_action(
    config: axon_config::AppConfig,
    memory: bool,
    action: &str,
    params: &[String],
) -> anyhow::Result<()> {
    let mut registry = build_app(config, memory).into_registry();
    registry
        .start(RunMode::Cli)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let dispatcher = registry
        .api()
        .get::<Dispatcher>(axon_dispatch::NAMESPACE)
        .ok_or_else(|| anyhow::anyhow!("dispatcher not initialized"))?;

    let mut raw = RawParams::new();
    for pair in params {
        match pair.split_once('=') {
            Some((key, value)) => raw.push_text(key, value),
            None => anyhow::bail!("--param expects key=value, got '{pair}'"),
        }
    }

    let conn = Arc::new(Connection::new(ConnectionKind::Cli, "cli"));
    let result = dispatcher
        .dispatch(&conn, Some(action), raw, None, None)
        .await;
    let failed = result.error.is_some();
    println!("{}", serde_json::to_string_pretty(&result.to_envelope())?);

    registry.stop().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn list_actions(config: axon_config::AppConfig) -> anyhow::Result<()> {
    // Listing never needs live stores.
    let mut registry: Registry = App::new(config).in_memory().into_registry();
    registry
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let actions = registry
        .api()
        .get::<axon_actions::ActionRegistry>(axon_actions::NAMESPACE)
        .ok_or_else(|| anyhow::anyhow!("actions not initialized"))?;
    for name in actions.names() {
        if let Some(action) = actions.get(&name) {
            let def = action.def();
            let route = def
                .web
                .as_ref()
                .map(|w| format!(" [{} {}]", w.method, w.route))
                .unwrap_or_default();
            println!("{name}{route}  {}", def.description);
        }
    }
    Ok(())
}
