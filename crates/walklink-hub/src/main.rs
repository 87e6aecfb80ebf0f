mod chat;
mod config;
mod hub;
mod logging;
mod notify;
mod presence;
mod rooms;
mod session;
mod status_cache;
mod throttle;
mod tracking;

#[cfg(test)]
mod test_support;

use crate::config::{
    Config, DEFAULT_ADDR, DEFAULT_LOG_KEEP, DEFAULT_STATUS_TTL_SECS, DEFAULT_THROTTLE_SECS,
};
use crate::hub::Hub;
use crate::notify::{LogNotifier, WebhookNotifier};
use crate::session::extract_token;
use anyhow::Context;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use walklink_core::geo::iso_timestamp;
use walklink_core::{
    IdentityVerifier, MemoryStore, Notifier, RecordStore, Seed, TokenTableVerifier,
};
use walklink_storage::SqliteStore;

const SERVICE_NAME: &str = "walklink-hub";

#[derive(Parser, Debug)]
#[command(name = "walklink-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    /// SQLite database file; the in-memory store is used when empty.
    #[arg(long, default_value = "")]
    db: String,
    /// JSON seed of users, chats and walks.
    #[arg(long, default_value = "")]
    seed: String,
    /// JSON token table, `{"<token>": {"uid": .., "email": ..}}`.
    #[arg(long, default_value = "")]
    tokens: String,
    #[arg(long, default_value = "")]
    notify_url: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = DEFAULT_STATUS_TTL_SECS)]
    status_ttl: u64,
    #[arg(long, default_value_t = DEFAULT_THROTTLE_SECS)]
    throttle: u64,
    #[arg(long, default_value_t = 25)]
    ping_interval: u64,
    #[arg(long, default_value_t = 90)]
    stale_seconds: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    /// Directory for daily log files.
    #[arg(long, default_value = "")]
    log_dir: String,
    /// Filter directive used when RUST_LOG is unset.
    #[arg(long, default_value = "")]
    log_level: String,
    #[arg(long)]
    log_keep: Option<usize>,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = logging::init(&config);
    if let Err(err) = run(config).await {
        let reason = format!("{err:#}");
        error!(event = "hub_error", error = %reason);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;
    let store = build_store(&config)?;
    let verifier = build_verifier(&config)?;
    let notifier = build_notifier(&config)?;

    let hub = Arc::new(Hub::new(config.clone(), store, verifier, notifier));
    hub.clone().start_stale_reaper();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(event = "hub_start", addr = %addr, debug = config.debug);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    axum::serve(
        listener,
        router(hub).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("serving")?;
    Ok(())
}

fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = extract_token(authorization, params.get("token").map(String::as_str));
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, token, addr).await;
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "service": SERVICE_NAME,
        "timestamp": iso_timestamp(Utc::now()),
    }))
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    let seed = match &config.seed_path {
        Some(path) => {
            Some(Seed::from_path(path).with_context(|| format!("loading seed {path}"))?)
        }
        None => None,
    };
    if let Some(path) = &config.db_path {
        let store =
            SqliteStore::open(path).with_context(|| format!("opening database {path}"))?;
        if let Some(seed) = &seed {
            store.import_seed(seed).context("importing seed")?;
        }
        info!(event = "store_ready", backend = "sqlite", path = %path);
        return Ok(Arc::new(store));
    }
    let store = match seed {
        Some(seed) => MemoryStore::from_seed(seed),
        None => {
            warn!(event = "store_empty", backend = "memory");
            MemoryStore::new()
        }
    };
    info!(event = "store_ready", backend = "memory");
    Ok(Arc::new(store))
}

fn build_verifier(config: &Config) -> anyhow::Result<Arc<dyn IdentityVerifier>> {
    let verifier = match &config.tokens_path {
        Some(path) => TokenTableVerifier::from_path(path)
            .with_context(|| format!("loading token table {path}"))?,
        None => TokenTableVerifier::new(),
    };
    if verifier.is_empty() {
        warn!(event = "token_table_empty");
    }
    Ok(Arc::new(verifier))
}

fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notify_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.as_str()).context("building webhook client")?;
            info!(event = "notifier_ready", kind = "webhook", url = %url);
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve("WALKLINK_ADDR", &args.addr).unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        debug: args.debug || env_true("WALKLINK_DEBUG"),
        db_path: resolve("WALKLINK_DB", &args.db),
        seed_path: resolve("WALKLINK_SEED", &args.seed),
        tokens_path: resolve("WALKLINK_TOKENS", &args.tokens),
        notify_url: resolve("WALKLINK_NOTIFY_URL", &args.notify_url),
        status_ttl: Duration::from_secs(args.status_ttl),
        throttle_window: Duration::from_secs(args.throttle),
        ping_interval: Duration::from_secs(args.ping_interval),
        stale_after: Duration::from_secs(args.stale_seconds),
        write_timeout: Duration::from_secs(args.write_timeout),
        log_dir: resolve("WALKLINK_LOG_DIR", &args.log_dir),
        log_level: resolve("WALKLINK_LOG_LEVEL", &args.log_level),
        log_keep: args
            .log_keep
            .or_else(|| resolve("WALKLINK_LOG_KEEP", "").and_then(|value| value.parse().ok()))
            .unwrap_or(DEFAULT_LOG_KEEP),
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Flag first, then the environment. Blank values count as unset.
fn resolve(env_key: &str, flag: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    std::env::var(env_key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
