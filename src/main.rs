// src/main.rs
use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trade_arena::api;
use trade_arena::config::EngineConfig;
use trade_arena::market::MarketService;
use trade_arena::websocket_server::WebSocketServer;

#[derive(Debug, Parser)]
#[command(name = "trade_arena", about = "Simulated market engine for timed trading competitions")]
struct Args {
    /// HTTP API port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// WebSocket port for real-time clients
    #[arg(long, default_value_t = 8083)]
    ws_port: u16,
}

// Console + daily rotating file output
fn init_logging(logs_dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "trade_arena");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        println!("Warning: Could not load .env file: {}", e);
    }

    let args = Args::parse();
    let config = EngineConfig::from_env();

    if let Err(e) = init_logging(&config.logs_dir) {
        eprintln!("Failed to initialize logging: {}", e);
        tracing_subscriber::fmt().with_target(false).with_level(true).init();
    }

    info!("🚀 Starting trade_arena competition market engine...");
    info!("⚙️  Configuration:");
    info!("   💰 Initial price: {}", config.initial_price);
    info!("   ⏱️  Tick interval: {:?}", config.tick_interval);
    info!("   🕯️  Candle interval: {:?}", config.candle_interval);
    info!("   📅 Reconcile interval: {:?}", config.reconcile_interval);
    info!("   ⏳ Closing grace: {:?}", config.closing_grace);

    let market = MarketService::new(config);
    market.start_drivers();

    // WebSocket fan-out
    let ws_addr: SocketAddr = format!("0.0.0.0:{}", args.ws_port).parse()?;
    let ws_market = market.clone();
    tokio::spawn(async move {
        let server = WebSocketServer::new(ws_market);
        if let Err(e) = server.start(ws_addr).await {
            error!("❌ WebSocket server failed: {}", e);
        }
    });

    // HTTP API
    let app = api::router(market);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.http_port)).await?;

    info!("🌐 HTTP API on http://localhost:{}", args.http_port);
    info!("📡 WebSocket on ws://localhost:{}", args.ws_port);
    info!("🔗 Available endpoints:");
    info!("   GET  /health");
    info!("   GET  /api/price");
    info!("   GET  /api/candles?timeframe=1&limit=200");
    info!("   POST /api/rooms");
    info!("   POST /api/rooms/:id/join");
    info!("   GET  /api/rooms/:id/ranking");
    info!("   POST /api/trades");
    info!("   PUT  /api/trades/:id/close");
    info!("✅ trade_arena ready!");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("👋 Shutting down trade_arena");
        })
        .await?;

    Ok(())
}
