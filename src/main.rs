use hls_cache_proxy::logger::init_logger;
use hls_cache_proxy::prelude::*;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();

    let url = match std::env::args().nth(1) {
        Some(url) => url,
        None => return Err("usage: hls_cache_proxy <manifest-url>".into()),
    };

    info!("Starting HLS cache proxy");
    let config = ProxyConfig::load()?;
    let quality = config.quality.clone();
    let session = ProxySession::new(config)?;

    session.load(&url, quality).await?;
    session.play().await;
    match session.playlist_url().await {
        Some(playlist_url) => info!("Play from {}", playlist_url),
        None => error!("Proxy playlist is not available"),
    }

    // 等待关闭信号
    wait_for_shutdown().await;

    info!("Shutting down...");
    session.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
