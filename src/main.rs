use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportgate::config::Config;
use reportgate::db::{AppState, DownloadPolicy, create_pool, init_db, queries};
use reportgate::handlers;
use reportgate::jwt::SessionVerifier;
use reportgate::models::CreateReport;
use reportgate::payments::{HttpGateway, WebhookVerifier};
use reportgate::storage::LocalObjectStore;

/// Seed account used by `--seed`.
const DEV_ACCOUNT: &str = "dev-account";

#[derive(Parser, Debug)]
#[command(name = "reportgate")]
#[command(about = "Paid access to evaluation reports")]
struct Cli {
    /// Seed the database with a sample report and print a dev session token
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds a sample report for testing the purchase and download flow.
/// Only runs in dev mode.
async fn seed_dev_data(state: &AppState, storage: &LocalObjectStore) {
    let storage_key = "reports/dev-subject/claude.pdf";
    if let Err(e) = storage.put(storage_key, b"%PDF-1.4\n% dev report\n").await {
        tracing::warn!("Failed to write dev report blob: {}", e);
        return;
    }

    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let report = queries::create_report(
        &conn,
        &CreateReport {
            subject_id: "dev-subject".to_string(),
            subject_name: "Dev Subject".to_string(),
            evaluator: "claude".to_string(),
            storage_key: storage_key.to_string(),
        },
    )
    .expect("Failed to create dev report");

    let token = state
        .sessions
        .issue(DEV_ACCOUNT, 7 * 24 * 3600)
        .expect("Failed to issue dev session token");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED");
    tracing::info!("Report: {} (subject: {})", report.id, report.subject_id);
    tracing::info!("============================================");

    // Print copy-paste friendly output (no log formatting)
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  account_id: {}", DEV_ACCOUNT);
    println!("  session_token: {}", token);
    println!("  subject_id: {}", report.subject_id);
    println!("  report_id: {}", report.id);
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reportgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let gateway = HttpGateway::new(
        &config.gateway_api_url,
        &config.gateway_secret_key,
        config.gateway_timeout,
    )
    .expect("Failed to build payment gateway client");

    let storage = LocalObjectStore::new(
        &config.storage_root,
        &config.base_url,
        config.storage_signing_secret.as_bytes(),
    );

    let state = AppState {
        db: db_pool,
        gateway: Arc::new(gateway),
        // Lease outlives the gateway timeout so a slow call can't be duplicated
        gateway_lease: config.gateway_timeout * 3,
        webhook_verifier: WebhookVerifier::new(&config.gateway_webhook_secret),
        sessions: SessionVerifier::new(config.session_secret.as_bytes()),
        storage: Arc::new(storage.clone()),
        pricing: config.pricing.clone(),
        download: DownloadPolicy {
            quota: config.download_quota,
            link_ttl: config.signed_url_ttl,
            ..DownloadPolicy::default()
        },
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set REPORTGATE_ENV=dev)");
        } else {
            seed_dev_data(&state, &storage).await;
        }
    }

    let app: Router = handlers::router(state.clone(), Some(config.rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Reportgate listening on {}", addr);

    // Peer addresses are needed for IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
