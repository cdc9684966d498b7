use server::{Broker, BrokerConfig, routes};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = BrokerConfig::from_env().expect("invalid broker configuration");
    let addr = config.bind_addr();
    if config.access_tokens.is_empty() {
        tracing::warn!("BROKER_ACCESS_TOKENS not set, accepting all clients");
    }

    let broker = Broker::new(config);
    let app = routes::app(broker.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind");

    tracing::info!(%addr, "broker listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker))
        .await
        .expect("server failed");
}

async fn shutdown_signal(broker: Broker) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("shutting down");
    broker.shutdown();
}
