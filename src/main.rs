//! callqa - bulk call-audit campaign processor

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callqa::{
    api::{campaign_routes, worker_routes, AppState},
    config::{get_data_dir, load_config, AppConfig},
    db::init_database,
    events::EventBus,
    invoker::HttpAuditInvoker,
    worker::WorkerSupervisor,
};

#[derive(Parser)]
#[command(name = "callqa")]
#[command(author = "CallQA Team")]
#[command(version = "0.1.0")]
#[command(about = "Bulk call-audit campaign processor with REST API and background workers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Database path (defaults to the platform data dir)
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the callqa server
    Serve,
    /// Initialize the database
    Init,
    /// Show configuration info
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callqa=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config();

    // Determine database path
    let db_path = cli
        .database
        .clone()
        .or(config.database.path.clone())
        .unwrap_or_else(|| get_data_dir().join("data.db").to_string_lossy().to_string());

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing database at: {}", db_path);
            let _pool = init_database(&db_path).await?;
            println!("Database initialized successfully!");
            return Ok(());
        }
        Some(Commands::Config) => {
            println!("callqa Configuration");
            println!("====================");
            println!("Data directory: {}", get_data_dir().display());
            println!("Database path: {}", db_path);
            println!("Server: {}:{}", cli.host, cli.port);
            println!("Audit service: {}", config.audit.base_url);
            println!(
                "Rate limit default: {}/min, {}/hour (enabled: {})",
                config.rate_limit.requests_per_minute,
                config.rate_limit.requests_per_hour,
                config.rate_limit.enabled
            );
            return Ok(());
        }
        _ => {}
    }

    run_server(&cli.host, cli.port, &db_path, config).await
}

async fn run_server(host: &str, port: u16, db_path: &str, config: AppConfig) -> anyhow::Result<()> {
    // Initialize database
    tracing::info!("Initializing database at: {}", db_path);
    let pool = init_database(db_path).await?;

    // Create shared state
    let event_bus = EventBus::new();
    let config = Arc::new(config);

    let app_state = AppState {
        pool: pool.clone(),
        event_bus: event_bus.clone(),
        config: config.clone(),
    };

    // Start the campaign worker
    let invoker = Arc::new(HttpAuditInvoker::new(
        config.audit.base_url.clone(),
        config.audit.api_key.clone(),
        Duration::from_secs(config.audit.timeout_secs),
    ));
    let supervisor = Arc::new(WorkerSupervisor::new(
        pool,
        config.worker.clone(),
        event_bus,
        invoker,
    ));
    supervisor.spawn();

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // API routes
        .nest("/api/campaigns", campaign_routes())
        .nest("/api/worker", worker_routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    // Parse address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    tracing::info!("API:    http://{}/api", addr);
    tracing::info!("Health: http://{}/health", addr);

    // Start server
    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
