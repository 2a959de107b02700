use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::routing::get;
use clap::Parser;
use serde_json::Value;
use serde_json::json;
use tokio::signal;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_turnstile::AdmissionConfig;
use tower_turnstile::handle_admit_error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use turnstile::PolicyRegistry;

/// Serves the rate limit test endpoints behind the admission middleware.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML or JSON policy configuration. The built-in demo policies are used when
    /// omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,
}

fn payload(policy: &str) -> Json<Value> {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    Json(json!({ "policy": policy, "unix_ms": unix_ms }))
}

async fn statistics(State(registry): State<PolicyRegistry>) -> Json<Value> {
    let policies: serde_json::Map<_, _> = registry
        .statistics()
        .into_iter()
        .map(|(name, stats)| {
            let stats = json!({
                "available_permits": stats.available_permits,
                "queued": stats.queued,
                "total_admitted": stats.total_admitted,
                "total_rejected": stats.total_rejected,
            });
            (name, stats)
        })
        .collect();
    Json(Value::Object(policies))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AdmissionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AdmissionConfig::default(),
    };
    let (registry, admission) = config.layer().context("building admission policies")?;
    info!(policies = ?registry.names(), "admission policies ready");

    let app = Router::new()
        .route("/ratelimittests/fixed", get(|| async { payload("fixed") }))
        .route("/ratelimittests/sliding", get(|| async { payload("sliding") }))
        .route(
            "/ratelimittests/token-bucket",
            get(|| async { payload("token_bucket") }),
        )
        .route(
            "/ratelimittests/concurrency",
            get(|| async {
                // Long enough to keep several requests in flight at once.
                tokio::time::sleep(Duration::from_secs(2)).await;
                payload("concurrency")
            }),
        )
        .route("/ratelimittests/stats", get(statistics))
        .with_state(registry)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_admit_error))
                .layer(admission)
                .map_err(BoxError::from),
        );

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("turnstile demo stopped");
    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}
