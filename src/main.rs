use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use chrono::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use uptime_hub::{
    Coordinator, DatabasePool, HttpTransferGateway, InMemoryLedgerGateway, MemoryStore,
    PersistenceGateway, TransferGateway, WithdrawalStateMachine,
    api::{
        CoordinatorApiState, PayoutApiState, SecurityMiddlewareConfig, SecurityState,
        TargetApiState, auth_middleware, body_size_middleware, create_coordinator_router,
        create_payout_router, create_target_router, logging_middleware,
        security_headers_middleware,
    },
    config::{HubConfig, redact_url, sanitize_for_logging},
    settlement::RelayerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = Arc::new(HubConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check HUB_* environment variables.");
        e
    })?);

    init_secure_logging(&config)?;

    info!("Starting uptime validator hub");
    info!(
        "Dispatch every {}s, reward {} per check, callback ttl {}s",
        config.coordinator.dispatch_interval_secs,
        config.coordinator.reward_per_check,
        config.coordinator.callback_ttl_secs
    );

    let store = create_store(&config).await?;
    let gateway = create_transfer_gateway(&config)?;

    let coordinator = Arc::new(Coordinator::new(store.clone(), config.coordinator.clone()));
    let dispatcher = Arc::new(coordinator.dispatcher());
    tokio::spawn(dispatcher.run());

    let machine = Arc::new(WithdrawalStateMachine::new(
        store.clone(),
        gateway,
        Duration::seconds(config.settlement.challenge_ttl_secs),
    ));

    let security_state = SecurityState::new(SecurityMiddlewareConfig {
        enable_auth: config.security.enable_auth,
        api_keys: config.security.api_keys.clone(),
        max_request_size: config.security.max_request_size,
        log_requests: config.logging.log_requests,
        sanitize_logs: config.logging.sanitize_logs,
        trust_proxy_headers: config.security.trust_proxy_headers,
        ..Default::default()
    });

    let app = Router::new()
        // Validator transport + coordinator stats
        .merge(create_coordinator_router(CoordinatorApiState {
            coordinator: coordinator.clone(),
            trust_proxy_headers: config.security.trust_proxy_headers,
        }))
        // Payout API (signature authenticated)
        .nest(
            "/payout",
            create_payout_router(PayoutApiState { machine }),
        )
        // Target management (API key protected)
        .nest(
            "/targets",
            create_target_router(TargetApiState {
                store: store.clone(),
            }),
        )
        .route("/health", get(|| async { "OK" }))
        // Apply security middleware layers (order matters!)
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            body_size_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            logging_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Hub listening on {}", bind_addr);
    info!(
        "Security middleware: Auth={}, Max body={}KB",
        config.security.enable_auth,
        config.security.max_request_size / 1024
    );

    // Serve with connect info for client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Initialize secure logging with sanitization
fn init_secure_logging(config: &HubConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Secure logging initialized with data sanitization enabled");
    }

    Ok(())
}

/// PostgreSQL when enabled, otherwise the in-memory store
async fn create_store(config: &HubConfig) -> Result<Arc<dyn PersistenceGateway>> {
    if !config.database.postgres_enabled {
        warn!("PostgreSQL disabled - balances and ticks will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let shown_url = if config.logging.sanitize_logs {
        redact_url(&config.database.postgres_url)
    } else {
        config.database.postgres_url.clone()
    };
    info!("Connecting to PostgreSQL at {}", shown_url);

    let pool = DatabasePool::new(
        &config.database.postgres_url,
        config.database.max_connections,
    )
    .await
    .context("Failed to connect to PostgreSQL")?;
    pool.init_schema()
        .await
        .context("Failed to initialize database schema")?;

    Ok(Arc::new(pool))
}

/// HTTP relayer when configured, otherwise the in-memory ledger
fn create_transfer_gateway(config: &HubConfig) -> Result<Arc<dyn TransferGateway>> {
    let Some(relayer_url) = &config.settlement.relayer_url else {
        warn!("No transfer relayer configured - payouts settle against the in-memory ledger");
        return Ok(Arc::new(InMemoryLedgerGateway::new(
            config.treasury_or_default(),
            u128::from(config.settlement.ledger_float),
        )));
    };

    let shown_url = if config.logging.sanitize_logs {
        sanitize_for_logging(relayer_url)
    } else {
        relayer_url.clone()
    };
    info!(
        "Payouts relayed through {} from treasury {}",
        shown_url, config.settlement.treasury_public_key
    );

    let gateway = HttpTransferGateway::new(RelayerConfig {
        endpoint: relayer_url.clone(),
        api_key: config.settlement.relayer_api_key.clone(),
        treasury: config.settlement.treasury_public_key.clone(),
        require_https: config.security.require_https,
        timeout_secs: config.settlement.transfer_timeout_secs,
        max_attempts: config.settlement.transfer_max_attempts,
        ..Default::default()
    })
    .context("Failed to create transfer relayer client")?;

    Ok(Arc::new(gateway))
}
