//! loyal-daemon entry point.
//!
//! This file is intentionally thin: it resolves settings, sets up tracing,
//! connects storage, starts the reconciliation worker and serves HTTP until
//! Ctrl-C / SIGTERM. Handlers live in `routes.rs`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loyal_accrual::HttpAccrualClient;
use loyal_config::Overrides;
use loyal_daemon::{bootstrap, routes, state};
use loyal_db::{LoyaltyStore, PgStore};
use loyal_ledger::LoyaltyService;
use loyal_reconcile::{ReconcileConfig, ReconcileWorker};
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "loyal-daemon", about = "Loyalty points service")]
struct Args {
    /// Listen address (overrides RUN_ADDRESS).
    #[arg(short = 'a', long = "address")]
    address: Option<String>,

    /// Postgres URL (overrides DATABASE_URI).
    #[arg(short = 'd', long = "database-uri")]
    database_uri: Option<String>,

    /// Accrual authority base URL (overrides ACCRUAL_SYSTEM_ADDRESS).
    #[arg(short = 'r', long = "accrual-address")]
    accrual_address: Option<String>,

    /// YAML config layers, merged in order.
    #[arg(long = "config")]
    config: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    let flags = Overrides {
        run_address: args.address,
        database_url: args.database_uri,
        accrual_address: args.accrual_address,
    };
    let resolved = bootstrap::resolve_settings(&args.config, flags, Overrides::from_env())?;
    let settings = resolved.settings;
    bootstrap::init_tracing(&settings.log)?;
    if let Some(hash) = &resolved.config_hash {
        info!(config_hash = %hash, "config loaded");
    }

    let db_url = settings
        .database_url
        .as_ref()
        .context("database URL missing: set DATABASE_URI or pass -d")?;
    let pool = loyal_db::connect(db_url.expose()).await?;
    loyal_db::migrate(&pool).await?;
    let store: Arc<dyn LoyaltyStore> = Arc::new(PgStore::new(pool));

    let gateway = HttpAccrualClient::new(
        settings.accrual.base_url.clone(),
        settings.accrual.request_timeout(),
    )
    .context("failed to build accrual http client")?;

    let cancel = CancellationToken::new();
    let worker = Arc::new(ReconcileWorker::new(
        Arc::clone(&store),
        Arc::new(gateway),
        ReconcileConfig::from_settings(&settings),
    ));
    let worker_handle = worker.spawn(cancel.child_token());

    let shared = Arc::new(state::AppState::new(LoyaltyService::new(store)));
    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new());

    let listener = tokio::net::TcpListener::bind(&settings.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.addr))?;
    info!(
        addr = %settings.server.addr,
        accrual = %settings.accrual.base_url,
        "loyal-daemon listening"
    );

    tokio::spawn(watch_signals(cancel.clone()));
    let server_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await
        .context("server crashed");

    // Server errors also stop the worker.
    cancel.cancel();
    match tokio::time::timeout(settings.shutdown_grace(), worker_handle).await {
        Ok(Ok(())) => info!("reconcile worker drained"),
        Ok(Err(e)) => warn!(error = %e, "reconcile worker task failed"),
        Err(_) => warn!(
            grace_ms = settings.shutdown_grace_ms,
            "reconcile worker still running at shutdown deadline"
        ),
    }

    served
}

async fn watch_signals(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => return,
    }
    info!("shutdown signal received");
    cancel.cancel();
}
