//! ks-daemon entry point.
//!
//! Boot order: config and secrets, the store (migrated if configured), shared
//! state, then the HTTP server. Handlers live in `routes.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::{HeaderValue, Method};
use ks_config::{Consumer, KillSwitchConfig, UnusedKeyPolicy};
use ks_daemon::{auth, routes, state};
use ks_switch::{AffectedSystems, AuthorizationGate, KillSwitchService, LogLimits};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = ks_config::config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = ks_config::load_layered_yaml(&path_refs)?;
    let report =
        ks_config::report_unused_keys(Consumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config contains keys the daemon ignores");
    }
    let cfg = loaded.settings()?;
    let secrets = ks_config::resolve_secrets(&cfg)?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let pool = ks_db::connect(
        secrets.require_database_url()?,
        ks_db::ConnectOptions {
            max_connections: cfg.store.max_connections,
            acquire_timeout: Duration::from_millis(cfg.store.acquire_timeout_ms),
        },
    )
    .await?;
    if cfg.store.run_migrations {
        ks_db::migrate(&pool).await?;
    }
    let st = ks_db::status(&pool).await?;
    if !st.is_migrated() {
        bail!("kill switch tables are missing; run `ks db migrate` or enable store.run_migrations");
    }

    let store = Arc::new(ks_db::PgLockStore::new(
        pool,
        Duration::from_millis(cfg.store.op_timeout_ms),
    ));

    let bus = state::new_bus();
    let service = build_service(&cfg, store)
        .with_alarm(Arc::new(state::BusAlarm::new(bus.clone())));
    info!(operator = %service.gate().operator_id(), "kill switch operator configured");
    let identity = auth::resolver_from_config(&cfg.identity, &secrets)?;
    let shared = Arc::new(state::AppState::with_bus(bus, service, identity));

    state::spawn_heartbeat(
        shared.bus.clone(),
        Duration::from_secs(cfg.daemon.heartbeat_secs.max(1)),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors(&cfg.daemon.allowed_origins));

    let addr = match bind_addr_from_env() {
        Some(addr) => addr,
        None => cfg
            .daemon
            .bind_addr
            .parse()
            .with_context(|| format!("invalid daemon.bind_addr: {}", cfg.daemon.bind_addr))?,
    };
    info!("ks-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn build_service(cfg: &KillSwitchConfig, store: Arc<ks_db::PgLockStore>) -> KillSwitchService {
    let mut service = KillSwitchService::new(store, AuthorizationGate::new(&cfg.operator.principal_id))
        .with_log_limits(LogLimits {
            default_limit: cfg.logs.default_limit,
            max_limit: cfg.logs.max_limit,
        });
    if let Some(names) = &cfg.kill_switch.affected_systems {
        service = service.with_catalog(AffectedSystems::new(names.clone()));
    }
    if let Some(reason) = &cfg.kill_switch.default_deactivation_reason {
        service = service.with_deactivation_reason(reason.clone());
    }
    service
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("KS_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("ctrl-c handler unavailable; shutdown only by process termination");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// CORS: only the configured origins.
fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
