//! Broadcast chat over WebSocket, with the browser client served from a
//! static directory.
//!
//! Run with:
//!   RUST_LOG=gatehouse=info cargo run --example chat -- ./web
//!
//! Try (any WebSocket client):
//!   websocat ws://localhost:7841/chat
//!   curl localhost:7841/_/health

use gatehouse::websocket::{Message, WsConnection};
use gatehouse::{App, Server, ServerConfig, StaticOptions};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), gatehouse::Error> {
    gatehouse::logging::init()?;

    let mut app = App::new(ServerConfig::from_env());
    app.ws("/chat", chat);

    if let Some(dist) = std::env::args().nth(1) {
        if let Err(e) = app.serve_static(&dist, StaticOptions::default()) {
            warn!(dist = %dist, error = %e, "static client not served");
        }
    }

    Server::bind(":7841").await?.serve(app).await
}

async fn chat(mut conn: WsConnection) {
    let name = conn
        .context()
        .request_id()
        .map_or_else(|| "anonymous".to_owned(), |id| format!("guest-{}", id.rsplit('-').next().unwrap_or(id)));
    conn.register(name.clone());
    info!(name = %name, members = conn.registry().len(), "joined");
    conn.registry().broadcast(&Message::text(format!("* {name} joined")));

    while let Some(msg) = conn.recv().await {
        let Ok(text) = msg.to_text() else { continue };
        let delivered = conn.registry().broadcast(&Message::text(format!("{name}: {text}")));
        if delivered == 0 {
            break;
        }
    }

    info!(name = %name, "left");
    conn.registry().broadcast(&Message::text(format!("* {name} left")));
}
