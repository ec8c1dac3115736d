//! # Virtual Banking Assistant - Main Application Entry Point
//!
//! Sets up an Actix-web HTTP server that bridges browser audio to Amazon Nova
//! Sonic over a WebSocket.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **Arc<dyn Trait>**: The speech service is shared as a trait object so tests
//!   and production plug in different implementations
//! - **Result<T, E>**: Startup failures bubble up through `?` and end the process
//! - **static**: A global shutdown flag that lives for the whole program
//!
//! ## Routes:
//! - `GET /health`: plain `ok` for the load balancer
//! - `GET /ws`: voice session (API key as WebSocket subprotocol)
//! - `GET /api/v1/health`, `/api/v1/metrics`, `/api/v1/config`: operator views

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use virtual_banking_assistant::assistant::NovaSonicService;
use virtual_banking_assistant::config::AppConfig;
use virtual_banking_assistant::state::AppState;
use virtual_banking_assistant::tools::ToolRegistry;
use virtual_banking_assistant::websocket::{voice_websocket, VoiceBackend};
use virtual_banking_assistant::{handlers, health, middleware};

/// Set by the signal handler task; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and `APP_*` variables
/// 2. **Sets up logging** with `RUST_LOG` support
/// 3. **Builds the assistant backend** (Nova Sonic client + tool registry)
/// 4. **Serves HTTP** until SIGINT/SIGTERM, then drains connections
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        model_id = %config.assistant.model_id,
        region = %config.assistant.region,
        voice_id = %config.assistant.voice_id,
        "Assistant configured"
    );
    if !config.assistant.prompt_path.exists() {
        warn!(
            "System prompt {} not found; sessions will fail until it exists",
            config.assistant.prompt_path.display()
        );
    }

    let app_state = AppState::new(config.clone());
    let backend = VoiceBackend::new(
        Arc::new(NovaSonicService::from_config(&config)),
        ToolRegistry::banking(),
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(backend.clone()))
            // Middleware runs in reverse registration order for requests
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::liveness))
            .route("/ws", web::get().to(voice_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: e.g. "debug", "virtual_banking_assistant=trace"
/// - Defaults to "virtual_banking_assistant=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "virtual_banking_assistant=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip `SHUTDOWN_SIGNAL` on SIGTERM (ECS task stop) or SIGINT (Ctrl+C).
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
