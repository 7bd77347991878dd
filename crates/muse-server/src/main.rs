use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use muse_api::mail::{LogMailer, Mailer, SmtpMailer};
use muse_api::storage::Storage;
use muse_api::{AppState, AppStateInner, Config, router, sweep};
use muse_billing::StripeGateway;
use muse_db::Database;
use muse_gateway::dispatcher::Dispatcher;

const DEFAULT_LOG_FILTER: &str =
    "muse=debug,muse_api=debug,muse_gateway=debug,muse_billing=debug,muse_db=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let gateway = Arc::new(StripeGateway::new(&config.billing)?);
    if config.billing.api_key.is_none() {
        warn!("STRIPE_SECRET_KEY not set, payment calls will fail");
    }

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            info!("Sending mail through {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp, &config.mail_from_address, &config.mail_from_name)?)
        }
        None => {
            warn!("SMTP_HOST not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    let storage = Storage::new(config.upload_dir.clone());
    storage.ensure_dirs().await?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let sweep_interval = config.sweep_interval;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        config,
        dispatcher: Dispatcher::new(),
        gateway,
        mailer,
        storage,
    });

    tokio::spawn(sweep::run_sweep_loop(state.clone(), sweep_interval));

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Muse server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
