//! One WebSocket connection, from upgrade to close.
//!
//! Each session runs in its own task. Reads happen on the handler's task
//! through [`WsConnection::recv`]; writes from anywhere (the handler, or
//! other sessions holding a [`WsPeer`]) go through an unbounded queue that a
//! separate writer task drains into the socket.
//!
//! When the handler returns or panics, a drop guard cancels the session
//! token and deregisters the session's keys. The writer task then flushes
//! anything still queued, sends a close frame, and exits.

use std::sync::Arc;

use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tracing::debug;

use super::registry::ConnectionRegistry;
use super::{Message, WsHandler};
use crate::context::{CancelToken, Context};
use crate::error::Error;

// ── WsPeer ───────────────────────────────────────────────────────────────────

/// A cloneable send handle to one connection.
#[derive(Clone, Debug)]
pub struct WsPeer {
    tx: mpsc::UnboundedSender<Message>,
    token: CancelToken,
}

impl WsPeer {
    /// Queues `msg` for delivery.
    pub fn send(&self, msg: Message) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(msg).map_err(|_| Error::ConnectionClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.send(Message::text(text.into()))
    }

    /// Ends the session. Messages already queued are still delivered.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    pub(crate) fn same_peer(&self, other: &WsPeer) -> bool {
        self.tx.same_channel(&other.tx)
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, token: CancelToken::new() }, rx)
    }
}

// ── WsConnection ─────────────────────────────────────────────────────────────

type Incoming = BoxStream<'static, Result<Message, tungstenite::Error>>;

/// The handler's view of a connection.
pub struct WsConnection {
    incoming: Incoming,
    peer: WsPeer,
    ctx: Context,
    registry: ConnectionRegistry,
    keys: Arc<Mutex<Vec<String>>>,
}

impl WsConnection {
    /// The next text or binary message. `None` once the peer closes, the
    /// connection fails, or the session is cancelled.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.ctx.cancel_token().cancelled() => return None,
                next = self.incoming.next() => next,
            };
            match next? {
                Ok(msg @ (Message::Text(_) | Message::Binary(_))) => return Some(msg),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    return None;
                }
            }
        }
    }

    pub fn send(&self, msg: Message) -> Result<(), Error> {
        self.peer.send(msg)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.peer.send_text(text)
    }

    /// A handle other tasks can use to write to this connection.
    pub fn peer(&self) -> WsPeer {
        self.peer.clone()
    }

    /// Publishes this connection in the shared registry under `key`. The key
    /// is removed when the session ends.
    pub fn register(&self, key: impl Into<String>) {
        let key = key.into();
        self.registry.store(key.clone(), self.peer.clone());
        self.keys.lock().push(key);
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Session context. Its token fires when the session ends or the server
    /// shuts down.
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

struct SessionGuard {
    peer: WsPeer,
    registry: ConnectionRegistry,
    keys: Arc<Mutex<Vec<String>>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.peer.close();
        for key in self.keys.lock().drain(..) {
            self.registry.delete_if_same(&key, &self.peer);
        }
    }
}

/// Runs `handler` over an established WebSocket until it returns.
pub(crate) async fn run_session<S>(
    ws: WebSocketStream<S>,
    handler: WsHandler,
    ctx: Context,
    registry: ConnectionRegistry,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let token = ctx.cancel_token().clone();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, rx, token.clone()));

    let peer = WsPeer { tx, token };
    let keys = Arc::new(Mutex::new(Vec::new()));
    let guard = SessionGuard { peer: peer.clone(), registry: registry.clone(), keys: Arc::clone(&keys) };
    let conn = WsConnection { incoming: stream.boxed(), peer, ctx, registry, keys };

    handler(conn).await;
    drop(guard);
    if let Err(e) = writer.await {
        debug!(error = %e, "websocket writer task failed");
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    token: CancelToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "websocket write failed");
                    token.cancel();
                    return;
                }
            }
        }
    }
    while let Ok(msg) = rx.try_recv() {
        if sink.send(msg).await.is_err() {
            return;
        }
    }
    // Fails harmlessly if the peer already started the close handshake.
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::websocket::ws_handler;

    async fn pair() -> (WebSocketStream<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    fn echo() -> WsHandler {
        ws_handler(|mut conn: WsConnection| async move {
            conn.register("echo");
            while let Some(msg) = conn.recv().await {
                if conn.send(msg).is_err() {
                    break;
                }
            }
        })
    }

    #[tokio::test]
    async fn echo_round_trip_then_cleanup() {
        let (server, mut client) = pair().await;
        let registry = ConnectionRegistry::new();
        let session = tokio::spawn(run_session(server, echo(), Context::default(), registry.clone()));

        client.send(Message::text("hi")).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply.to_text().unwrap(), "hi");
        assert_eq!(registry.len(), 1);

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn server_cancellation_ends_the_session() {
        let (server, mut client) = pair().await;
        let server_token = CancelToken::new();
        let ctx = Context::for_request(&server_token, Default::default()).detach();
        let session = tokio::spawn(run_session(server, echo(), ctx, ConnectionRegistry::new()));

        server_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
        // The writer sends a close frame on the way out.
        let last = client.next().await.unwrap().unwrap();
        assert!(last.is_close());
    }

    #[tokio::test]
    async fn peers_can_write_from_other_tasks() {
        let (server, mut client) = pair().await;
        let registry = ConnectionRegistry::new();
        tokio::spawn(run_session(server, echo(), Context::default(), registry.clone()));

        // Wait for the handler to register itself.
        let peer = loop {
            if let Some(peer) = registry.load("echo") {
                break peer;
            }
            tokio::task::yield_now().await;
        };
        peer.send_text("pushed").unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.to_text().unwrap(), "pushed");
    }
}
