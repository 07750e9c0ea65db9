//! plenum-ds entry point.

use clap::Parser;
use plenum_common::api::auth::load_shared_secret;
use plenum_common::config::{RootFolderInitializer, RootFolderResolver};
use plenum_common::db::init::init_database;
use plenum_common::events::EventBus;
use plenum_ds::config::{build_clients, load_ai_config, load_session_settings};
use plenum_ds::session::RunRegistry;
use plenum_ds::{build_router, AppState};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "plenum-ds", about = "Plenum deliberation service")]
struct Args {
    /// Root folder for the database (overrides PLENUM_ROOT and config.toml)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Listen port
    #[arg(short, long, default_value_t = 5731)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("plenum-ds version {} starting", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let root = RootFolderResolver::new(args.root_folder).resolve();
    let initializer = RootFolderInitializer::new(root);
    initializer.ensure_directory_exists()?;
    let db_path = initializer.database_path();
    info!("using database at {}", db_path.display());

    let db = init_database(&db_path).await?;
    let shared_secret = load_shared_secret(&db).await.map_err(|e| {
        error!("failed to load shared secret: {e}");
        anyhow::anyhow!(e)
    })?;

    let ai_config = load_ai_config(&db).await;
    let (facilitator, analyst) = build_clients(&ai_config);
    let session_settings = load_session_settings(&db).await;

    let state = AppState {
        db,
        event_bus: EventBus::new(100),
        runs: RunRegistry::new(),
        facilitator,
        analyst,
        session_settings,
        shared_secret,
    };

    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
