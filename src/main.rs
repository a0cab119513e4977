use clap::Parser;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use token_gate::config::{Args, GateConfig};
use token_gate::gate::TokenGate;
use token_gate::load_balancer::{LoadBalancer, health_checker};
use token_gate::state::AppState;
use token_gate::store::{MemoryStore, RedisStore, TokenStore};

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "token_gate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn connect_store(
    args: &Args,
    config: &GateConfig,
) -> Result<Arc<dyn TokenStore>, Box<dyn std::error::Error>> {
    if args.memory_store {
        let store = MemoryStore::new();
        for (table, token) in args.seeds()? {
            store.add_token(&table, &token);
        }
        tracing::warn!("using in-memory token store, tokens and counters are not shared");
        return Ok(Arc::new(store));
    }

    let store = RedisStore::connect(&config.redis.url()?).await?;
    tracing::info!(host = %config.redis.host, db = config.redis.db, "connected to redis");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    // parse cli arguments
    let args = Args::parse();
    let config = GateConfig::load(&args)?;

    let store = connect_store(&args, &config).await?;
    let gate = Arc::new(TokenGate::new(store, config.rate_limit(), args.store_timeout()));

    let load_balancer = Arc::new(LoadBalancer::new(&args.upstreams)?);
    let client = reqwest::Client::new();

    // spawn the upstream health checker
    tokio::spawn(health_checker(
        Arc::clone(&load_balancer),
        client.clone(),
        Duration::from_secs(args.health_interval),
        args.health_path.clone(),
    ));

    let state = Arc::new(AppState {
        client,
        gate,
        load_balancer,
        max_body_bytes: args.max_body_bytes,
    });
    let app = token_gate::build_app(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    if config.max_request_count == 0 {
        tracing::info!(%addr, "gateway running, rate limiting disabled");
    } else {
        tracing::info!(
            %addr,
            max_request_count = config.max_request_count,
            window_secs = config.token_refresh_time,
            "gateway running"
        );
    }
    axum::serve(listener, app).await?;
    Ok(())
}
