use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut port: u16 = 8081;
    let mut max_rooms: usize = 100;
    for arg in std::env::args().skip(1) {
        if let Some(p) = arg.strip_prefix("--port=").and_then(|p| p.parse().ok()) {
            port = p;
        } else if let Some(m) = arg.strip_prefix("--max-rooms=").and_then(|m| m.parse().ok()) {
            max_rooms = m;
        } else {
            tracing::warn!(%arg, "Ignoring unknown argument");
        }
    }

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!("Mechmaze relay listening on {addr} (max rooms: {max_rooms})");

    if let Err(e) = mechmaze_relay::serve(listener, max_rooms).await {
        tracing::error!("Relay server error: {e}");
        std::process::exit(1);
    }
}
