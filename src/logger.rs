use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_logger() {
    let mut filter = EnvFilter::from_default_env();
    match "hls_cache_proxy=info".parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Invalid log directive: {}", e),
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

pub fn log_request(path: &str, status: u16, duration: std::time::Duration) {
    if status >= 500 {
        warn!(
            target: "request",
            path = %path,
            status = status,
            duration_ms = %duration.as_millis(),
            "Request failed"
        );
    } else {
        info!(
            target: "request",
            path = %path,
            status = status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }
}
