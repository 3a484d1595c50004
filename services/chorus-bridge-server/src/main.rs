//! Chorus Bridge Server
//!
//! Federation bridge between Chorus Stage instances, the Conductor ordering
//! network, and the ActivityPub fediverse.
//!
//! # Features
//!
//! - Signed envelope intake with replay and idempotency protection
//! - Conductor submission through a cached, pooled, circuit-broken client
//! - Reliable outbound delivery workers (Stage federation + ActivityPub)
//! - EdDSA JWT authentication and per-instance rate limiting
//! - Graceful shutdown handling
//!
//! # Usage
//!
//! ```bash
//! # Start against a local Postgres and an in-memory Conductor
//! BRIDGE_DATABASE_URL=postgresql://bridge@localhost/bridge chorus-bridge-server
//!
//! # Start with a real Conductor pool
//! chorus-bridge-server \
//!     --conductor-mode http \
//!     --conductor-base-url http://conductor-1:8610,http://conductor-2:8610
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chorus_bridge_api::{api_router, AppState};
use chorus_bridge_conductor::http::RetryPolicy;
use chorus_bridge_conductor::{
    CachedConductorClient, ConductorCache, ConductorClient, ConductorPool, GrpcConductorClient,
    HttpConductorClient, InMemoryConductorClient,
};
use chorus_bridge_core::{ActivityPubDeliveryWorker, BridgeService, OutboundFederationWorker};
use chorus_bridge_crypto::TrustStore;
use chorus_bridge_db::PgStore;
use chorus_bridge_types::{BridgeConfig, DispatchFlags};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chorus Bridge - federation bridge service
#[derive(Parser, Debug)]
#[command(name = "chorus-bridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "BRIDGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "BRIDGE_PORT", default_value_t = 8600)]
    port: u16,

    /// Unique identifier of this bridge instance
    #[arg(long, env = "BRIDGE_INSTANCE_ID", default_value = "bridge-local")]
    instance_id: String,

    /// PostgreSQL connection URL
    #[arg(long, env = "BRIDGE_DATABASE_URL")]
    database_url: String,

    /// Maximum database connections
    #[arg(long, env = "BRIDGE_DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    database_max_connections: u32,

    /// Path to JSON trust store mapping instance ids to Ed25519 public keys
    #[arg(long, env = "BRIDGE_TRUST_STORE_PATH")]
    trust_store_path: Option<PathBuf>,

    /// Conductor integration mode: memory or http
    #[arg(long, env = "BRIDGE_CONDUCTOR_MODE", default_value = "memory")]
    conductor_mode: String,

    /// Conductor protocol when remote: http or grpc
    #[arg(long, env = "BRIDGE_CONDUCTOR_PROTOCOL", default_value = "http")]
    conductor_protocol: String,

    /// Comma-separated Conductor endpoints
    #[arg(long, env = "BRIDGE_CONDUCTOR_BASE_URL", value_delimiter = ',')]
    conductor_base_url: Vec<String>,

    #[arg(long, env = "BRIDGE_CONDUCTOR_MAX_RETRIES", default_value_t = 3)]
    conductor_max_retries: u32,

    #[arg(long, env = "BRIDGE_CONDUCTOR_RETRY_DELAY", default_value_t = 1.0)]
    conductor_retry_delay: f64,

    #[arg(long, env = "BRIDGE_CONDUCTOR_TIMEOUT", default_value_t = 30.0)]
    conductor_timeout: f64,

    #[arg(long, env = "BRIDGE_CONDUCTOR_CIRCUIT_BREAKER_THRESHOLD", default_value_t = 5)]
    conductor_circuit_breaker_threshold: u32,

    #[arg(long, env = "BRIDGE_CONDUCTOR_CIRCUIT_BREAKER_TIMEOUT", default_value_t = 60.0)]
    conductor_circuit_breaker_timeout: f64,

    #[arg(long, env = "BRIDGE_CONDUCTOR_CACHE_TTL", default_value_t = 3600.0)]
    conductor_cache_ttl: f64,

    #[arg(long, env = "BRIDGE_CONDUCTOR_CACHE_SIZE", default_value_t = 1000)]
    conductor_cache_size: usize,

    #[arg(long, env = "BRIDGE_CONDUCTOR_HEALTH_CHECK_INTERVAL", default_value_t = 30.0)]
    conductor_health_check_interval: f64,

    /// Replay-cache TTL in seconds (the replay horizon)
    #[arg(long, env = "BRIDGE_REPLAY_CACHE_TTL_SECONDS", default_value_t = 86_400)]
    replay_cache_ttl_seconds: i64,

    #[arg(long, env = "BRIDGE_IDEMPOTENCY_TTL_SECONDS", default_value_t = 3_600)]
    idempotency_ttl_seconds: i64,

    /// Unix timestamp of day zero for ActivityPub publish stamps
    #[arg(long, env = "BRIDGE_EXPORT_GENESIS_TIMESTAMP", default_value_t = 1_729_670_400)]
    export_genesis_timestamp: i64,

    #[arg(
        long,
        env = "BRIDGE_ACTIVITYPUB_ACTOR_DOMAIN",
        default_value = "bridge.chorus.social"
    )]
    activitypub_actor_domain: String,

    /// Comma-separated ActivityPub inbox URLs
    #[arg(long, env = "BRIDGE_ACTIVITYPUB_TARGETS", value_delimiter = ',')]
    activitypub_targets: Vec<String>,

    #[arg(long, env = "BRIDGE_ACTIVITYPUB_WORKER_INTERVAL_SECONDS", default_value_t = 60)]
    activitypub_worker_interval_seconds: u64,

    #[arg(long, env = "BRIDGE_ACTIVITYPUB_MAX_RETRIES", default_value_t = 5)]
    activitypub_max_retries: u32,

    #[arg(long, env = "BRIDGE_ACTIVITYPUB_RETRY_DELAY_SECONDS", default_value_t = 60)]
    activitypub_retry_delay_seconds: i64,

    #[arg(long, env = "BRIDGE_OUTBOUND_WORKER_INTERVAL_SECONDS", default_value_t = 1)]
    outbound_worker_interval_seconds: u64,

    #[arg(long, env = "BRIDGE_OUTBOUND_MAX_RETRIES", default_value_t = 5)]
    outbound_max_retries: u32,

    #[arg(long, env = "BRIDGE_OUTBOUND_RETRY_DELAY_SECONDS", default_value_t = 60)]
    outbound_retry_delay_seconds: i64,

    /// Comma-separated base URLs of Stage instances receiving outbound pushes
    #[arg(long, env = "BRIDGE_FEDERATION_TARGET_STAGES", value_delimiter = ',')]
    federation_target_stages: Vec<String>,

    #[arg(long, env = "BRIDGE_FEDERATION_RATE_LIMITS_DEFAULT_RPS", default_value_t = 10)]
    federation_rate_limits_default_rps: u32,

    #[arg(long, env = "BRIDGE_FEDERATION_RATE_LIMITS_BURST", default_value_t = 50)]
    federation_rate_limits_burst: u32,

    #[arg(long, env = "BRIDGE_PROMETHEUS_PORT", default_value_t = 9090)]
    prometheus_port: u16,

    /// Enforce EdDSA JWT authentication on federation endpoints
    #[arg(
        long,
        env = "BRIDGE_JWT_ENFORCEMENT_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    jwt_enforcement_enabled: bool,

    /// Hex-encoded Ed25519 public key for verifying Stage JWTs
    #[arg(long, env = "BRIDGE_JWT_PUBLIC_KEY")]
    jwt_public_key: Option<String>,

    /// Hex-encoded Ed25519 private key for signing outbound envelopes
    #[arg(long, env = "BRIDGE_PRIVATE_KEY")]
    bridge_private_key: Option<String>,

    /// Hex-encoded Ed25519 private key for signing outbound JWTs
    #[arg(long, env = "BRIDGE_JWT_SIGNING_KEY")]
    bridge_jwt_signing_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, env = "BRIDGE_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    // Feature flags per dispatch type
    #[arg(
        long,
        env = "BRIDGE_FEDERATION_POST_ANNOUNCE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_post_announce_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_USER_REGISTRATION_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    federation_user_registration_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_DAY_PROOF_CONSUMPTION_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_day_proof_consumption_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_MODERATION_EVENTS_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_moderation_events_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_COMMUNITY_CREATION_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_community_creation_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_USER_UPDATE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_user_update_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_COMMUNITY_UPDATE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_community_update_enabled: bool,

    #[arg(
        long,
        env = "BRIDGE_FEDERATION_COMMUNITY_MEMBERSHIP_UPDATE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    federation_community_membership_update_enabled: bool,
}

impl Args {
    fn into_config(self) -> BridgeConfig {
        BridgeConfig {
            instance_id: self.instance_id,
            database_url: self.database_url,
            trust_store_path: self.trust_store_path,
            conductor_mode: self.conductor_mode,
            conductor_protocol: self.conductor_protocol,
            conductor_base_url: if self.conductor_base_url.is_empty() {
                None
            } else {
                Some(self.conductor_base_url.join(","))
            },
            conductor_max_retries: self.conductor_max_retries,
            conductor_retry_delay_secs: self.conductor_retry_delay,
            conductor_timeout_secs: self.conductor_timeout,
            conductor_circuit_breaker_threshold: self.conductor_circuit_breaker_threshold,
            conductor_circuit_breaker_timeout_secs: self.conductor_circuit_breaker_timeout,
            conductor_cache_ttl_secs: self.conductor_cache_ttl,
            conductor_cache_size: self.conductor_cache_size,
            conductor_health_check_interval_secs: self.conductor_health_check_interval,
            replay_cache_ttl_seconds: self.replay_cache_ttl_seconds,
            idempotency_ttl_seconds: self.idempotency_ttl_seconds,
            export_genesis_timestamp: self.export_genesis_timestamp,
            activitypub_actor_domain: self.activitypub_actor_domain,
            activitypub_targets: self.activitypub_targets,
            activitypub_worker_interval_seconds: self.activitypub_worker_interval_seconds,
            activitypub_max_retries: self.activitypub_max_retries,
            activitypub_retry_delay_seconds: self.activitypub_retry_delay_seconds,
            outbound_worker_interval_seconds: self.outbound_worker_interval_seconds,
            outbound_max_retries: self.outbound_max_retries,
            outbound_retry_delay_seconds: self.outbound_retry_delay_seconds,
            federation_target_stages: self.federation_target_stages,
            federation_rate_limits_default_rps: self.federation_rate_limits_default_rps,
            federation_rate_limits_burst: self.federation_rate_limits_burst,
            prometheus_port: self.prometheus_port,
            jwt_enforcement_enabled: self.jwt_enforcement_enabled,
            jwt_public_key: self.jwt_public_key,
            bridge_private_key: self.bridge_private_key,
            bridge_jwt_signing_key: self.bridge_jwt_signing_key,
            features: DispatchFlags {
                post_announce: self.federation_post_announce_enabled,
                user_registration: self.federation_user_registration_enabled,
                day_proof_consumption: self.federation_day_proof_consumption_enabled,
                moderation_events: self.federation_moderation_events_enabled,
                community_creation: self.federation_community_creation_enabled,
                user_update: self.federation_user_update_enabled,
                community_update: self.federation_community_update_enabled,
                community_membership_update: self.federation_community_membership_update_enabled,
            },
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log_level, &args.log_format)?;

    let host = args.host.clone();
    let port = args.port;
    let database_max_connections = args.database_max_connections;
    let config = args.into_config();
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_id = %config.instance_id,
        "Starting Chorus Bridge"
    );
    tracing::info!(database = %config.database_url_masked(), "Connecting to database");

    // Persistence
    let store = Arc::new(PgStore::connect(&config.database_url, database_max_connections).await?);

    // Trust store
    let trust_mapping = config.load_trust_store()?;
    let trust_store = Arc::new(TrustStore::from_hex_mapping(&trust_mapping)?);
    info!(peers = trust_store.len(), "Trust store loaded");

    // Shutdown fan-out for background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Conductor stack: Cache(Pool([concrete; N]))
    let (conductor, health_handle) = build_conductor(&config, shutdown_rx.clone())?;

    // Core pipeline
    let service = Arc::new(BridgeService::new(
        config.clone(),
        store.clone(),
        trust_store,
        conductor.clone(),
    ));

    // Delivery workers
    let outbound_worker = OutboundFederationWorker::new(&config, store.clone())?;
    let activitypub_worker = ActivityPubDeliveryWorker::new(&config, store.clone())?;
    let outbound_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { outbound_worker.run(shutdown).await }
    });
    let activitypub_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { activitypub_worker.run(shutdown).await }
    });

    // HTTP edge
    let state = Arc::new(AppState::new(service, conductor.clone())?);
    let router = api_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(host = %host, port, "Chorus Bridge listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting work, then wind the background loops down
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = outbound_handle.await;
        let _ = activitypub_handle.await;
        if let Some(handle) = health_handle {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("Background workers did not stop within the shutdown grace period");
    }
    conductor.aclose().await;
    info!("Shutdown complete");
    Ok(())
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chorus_bridge={level},tower_http=warn")));
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

/// Assemble the decorated Conductor client per configuration
fn build_conductor(
    config: &BridgeConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(Arc<dyn ConductorClient>, Option<tokio::task::JoinHandle<()>>)> {
    if config.conductor_mode == "memory" {
        info!("Using in-memory Conductor client");
        return Ok((Arc::new(InMemoryConductorClient::new()), None));
    }

    let policy = RetryPolicy {
        max_retries: config.conductor_max_retries,
        retry_delay: Duration::from_secs_f64(config.conductor_retry_delay_secs),
        timeout: Duration::from_secs_f64(config.conductor_timeout_secs),
        circuit_breaker_threshold: config.conductor_circuit_breaker_threshold,
        circuit_breaker_timeout: Duration::from_secs_f64(
            config.conductor_circuit_breaker_timeout_secs,
        ),
        health_check_interval: Duration::from_secs_f64(
            config.conductor_health_check_interval_secs,
        ),
    };

    let endpoints: Vec<String> = config
        .conductor_base_url
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    anyhow::ensure!(!endpoints.is_empty(), "no conductor endpoints configured");

    let mut clients: Vec<Arc<dyn ConductorClient>> = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        let client: Arc<dyn ConductorClient> = if config.conductor_protocol == "grpc" {
            Arc::new(GrpcConductorClient::new(endpoint.clone(), policy.clone())?)
        } else {
            Arc::new(HttpConductorClient::new(endpoint.clone(), policy.clone())?)
        };
        clients.push(client);
    }
    info!(
        endpoints = endpoints.len(),
        protocol = %config.conductor_protocol,
        "Conductor pool configured"
    );

    let pool = Arc::new(ConductorPool::new(
        clients,
        policy.health_check_interval,
        config.conductor_max_retries,
        policy.retry_delay,
    ));
    let health_handle = ConductorPool::start_health_loop(pool.clone(), shutdown);

    let cached = Arc::new(CachedConductorClient::new(
        pool,
        ConductorCache::new(
            Duration::from_secs_f64(config.conductor_cache_ttl_secs),
            config.conductor_cache_size,
        ),
    ));
    Ok((cached, Some(health_handle)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
