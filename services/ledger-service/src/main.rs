use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenv::dotenv;
use message_bus::{JetStreamGroup, NatsClient, Subscriber, Topic};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ledger_service::{
    config::Config,
    database::{Database, PgLedgerStore},
    LedgerProjector, LedgerStore,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    init_tracing();

    info!("Starting Ledger Service...");

    let config = Config::from_env()?;
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Configuration loaded successfully");

    let database = Database::connect(&config.database).await?;
    if config.database.bootstrap_schema {
        database.bootstrap_schema().await?;
    }

    info!("Database connected successfully");

    let nats = Arc::new(NatsClient::connect(config.nats_config()).await?);
    nats.ensure_streams().await?;

    info!("NATS JetStream connected successfully");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(database.pool().clone()));
    let projector = Arc::new(LedgerProjector::new(store, config.insert_timeout()));

    let subscriber = Subscriber::new(
        JetStreamGroup::new(nats.clone(), Topic::TransactionLedger, config.group_config()),
        config.subscriber_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = tokio::spawn(async move { subscriber.run(projector, shutdown_rx).await });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    info!("Health and metrics on http://{}", bind_address);

    let db_data = web::Data::new(database);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_data.clone())
            .route("/health", web::get().to(health_check))
            .route("/metrics", web::get().to(prometheus_metrics))
    })
    .bind(&bind_address)?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    shutdown_signal().await;
    info!("Shutdown signal received, draining consumer");

    let _ = shutdown_tx.send(true);
    match consumer.await {
        Ok(Ok(())) => info!("Consumer stopped"),
        Ok(Err(e)) => error!(error = %e, "Consumer stopped with error"),
        Err(e) => error!(error = %e, "Consumer task panicked"),
    }

    server_handle.stop(true).await;
    server_task.await??;

    info!("Ledger Service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("pretty") {
        builder.init();
    } else {
        builder.json().init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn health_check(database: web::Data<Database>) -> impl Responder {
    match database.health_check().await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "service": "ledger-service",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "unhealthy",
            "service": "ledger-service",
            "error": e.to_string(),
        })),
    }
}

async fn prometheus_metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e)),
    }
}
