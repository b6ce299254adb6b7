//! Core shared utilities for MoltRank services: tracing, layered
//! configuration, Prometheus metrics, health endpoints and the reputation
//! formula.

use anyhow::Result;
use tracing::info;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use axum::{routing::get, Router};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;
pub mod reputation;

pub use metrics::{init_metrics, metrics, RankMetrics};
pub use reputation::{reputation, round1, stake_days, Tier, TokenAmount};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);
static CONFIG_VERSION: OnceCell<String> = OnceCell::new();

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `MOLTRANK_JSON_LOG=1|true` switches to JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("MOLTRANK_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false)).try_init()?;
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(target: "moltrank", service, "tracing initialized");
    Ok(())
}

/// Serves liveness, readiness, status and `/metrics`, merged with the
/// service's own `routes`.
pub async fn start_health_server(port: u16, routes: Router) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { axum::Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/status", get(|| async {
            axum::Json(serde_json::json!({
                "live": NODE_LIVENESS.load(Ordering::SeqCst),
                "ready": NODE_READINESS.load(Ordering::SeqCst),
                "config_version": CONFIG_VERSION.get(),
            }))
        }))
        .route("/metrics", get(metrics_handler))
        .merge(routes);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!(?addr, "health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "health server failed");
        }
    });
    Ok(addr)
}

async fn metrics_handler() -> Response {
    if metrics::metrics().is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response();
    }
    let metric_families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}

/// Runtime configuration. Defaults target the MoltRank deployment on Base.
#[derive(Debug, Deserialize, Clone)]
pub struct RankConfig {
    pub service_name: String,
    pub log_level: String,
    pub config_version: Option<String>,
    pub rpc_url: String,
    pub contract_address: String,
    pub deployment_block: u64,
    pub window_size: u64,
    pub fetch_concurrency: usize,
    /// Deadline for one logical chain call, retries included.
    pub call_timeout_ms: u64,
    pub run_timeout_ms: u64,
    /// Timeout of a single HTTP attempt against the provider.
    pub rpc_request_timeout_ms: u64,
    pub rpc_max_retries: usize,
    pub rpc_retry_base_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_secs: u64,
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    pub health_port: u16,
    pub refresh_interval_secs: u64,
    /// Address -> display name for known agents.
    #[serde(default = "default_agent_names")]
    pub agent_names: HashMap<String, String>,
}

fn default_agent_names() -> HashMap<String, String> {
    HashMap::from([("0xca6E9A01c6b7E52E56461807336B36bEff08e5B0".to_string(), "nessie".to_string())])
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            service_name: "moltrank".into(),
            log_level: "info".into(),
            config_version: Some("0".into()),
            rpc_url: "https://mainnet.base.org".into(),
            contract_address: "0x0000000000000000000000000000000000000000".into(),
            deployment_block: 41_577_100,
            window_size: 10_000,
            fetch_concurrency: 16,
            call_timeout_ms: 10_000,
            run_timeout_ms: 120_000,
            rpc_request_timeout_ms: 2_000,
            rpc_max_retries: 2,
            rpc_retry_base_delay_ms: 200,
            breaker_failure_threshold: 5,
            breaker_open_secs: 30,
            index_path: None,
            health_port: 9091,
            refresh_interval_secs: 300,
            agent_names: default_agent_names(),
        }
    }
}

/// Layers defaults, an optional config file (`file`, else
/// `MOLTRANK_CONFIG_FILE`) and `MOLTRANK_*` environment variables.
pub fn load_config(service: &str, file: Option<PathBuf>) -> Result<RankConfig> {
    let d = RankConfig::default();
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("log_level", d.log_level)?
        .set_default("config_version", "0")?
        .set_default("rpc_url", d.rpc_url)?
        .set_default("contract_address", d.contract_address)?
        .set_default("deployment_block", d.deployment_block)?
        .set_default("window_size", d.window_size)?
        .set_default("fetch_concurrency", d.fetch_concurrency as u64)?
        .set_default("call_timeout_ms", d.call_timeout_ms)?
        .set_default("run_timeout_ms", d.run_timeout_ms)?
        .set_default("rpc_request_timeout_ms", d.rpc_request_timeout_ms)?
        .set_default("rpc_max_retries", d.rpc_max_retries as u64)?
        .set_default("rpc_retry_base_delay_ms", d.rpc_retry_base_delay_ms)?
        .set_default("breaker_failure_threshold", d.breaker_failure_threshold as u64)?
        .set_default("breaker_open_secs", d.breaker_open_secs)?
        .set_default("health_port", d.health_port as u64)?
        .set_default("refresh_interval_secs", d.refresh_interval_secs)?;

    let file = file.or_else(|| std::env::var("MOLTRANK_CONFIG_FILE").ok().map(PathBuf::from));
    if let Some(path) = &file {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("MOLTRANK").separator("__").try_parsing(true));
    let cfg: RankConfig = builder.build()?.try_deserialize()?;
    if let Some(v) = &cfg.config_version { let _ = CONFIG_VERSION.set(v.clone()); }
    info!(service, file = ?file, rpc_url = %cfg.rpc_url, "config loaded");
    Ok(cfg)
}
