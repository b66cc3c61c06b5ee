// src/reload.rs
//! Reload-notification channel.
//!
//! A small WebSocket server on its own port. Browsers load the embedded
//! client script from `/livereload.js`, connect to `/livereload`, and reload
//! (or re-fetch stylesheets) whenever [`ReloadHub::refresh`] is called.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

/// Default port of the reload channel.
pub const DEFAULT_RELOAD_PORT: u16 = 35729;

/// Route of the WebSocket endpoint.
pub const SOCKET_ROUTE: &str = "/livereload";

/// Route of the browser client script.
pub const SCRIPT_ROUTE: &str = "/livereload.js";

const SERVER_NAME: &str = "liveserver";
const PROTOCOL: &str = "http://livereload.com/protocols/official-7";
const CLIENT_SCRIPT: &str = include_str!("../static/livereload.js");
const CHANNEL_CAPACITY: usize = 100;

/// Messages pushed to browser clients, serialized as JSON text frames.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ReloadMessage {
    /// Sent once when a client connects.
    Hello {
        protocols: Vec<String>,
        #[serde(rename = "serverName")]
        server_name: String,
    },
    /// A watched file changed.
    Reload {
        path: String,
        /// Lets the client patch stylesheets in place instead of reloading.
        #[serde(rename = "liveCSS")]
        live_css: bool,
    },
}

impl ReloadMessage {
    pub fn hello() -> Self {
        Self::Hello {
            protocols: vec![PROTOCOL.to_string()],
            server_name: SERVER_NAME.to_string(),
        }
    }

    pub fn reload(path: &Path) -> Self {
        Self::Reload {
            path: path.to_string_lossy().into_owned(),
            live_css: true,
        }
    }
}

/// Fan-out point for reload notifications.
///
/// Cloning is cheap; every clone publishes to the same set of clients.
#[derive(Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<ReloadMessage>,
    watched: Arc<Mutex<Vec<PathBuf>>>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            watched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Associates a watched root with this hub.
    ///
    /// Only bookkeeping: the filesystem watch itself belongs to the watcher,
    /// so each change is refreshed once.
    pub fn watch(&self, root: &Path) {
        if let Ok(mut watched) = self.watched.lock() {
            if !watched.iter().any(|p| p == root) {
                watched.push(root.to_path_buf());
            }
        }
    }

    /// Roots registered through [`watch`](Self::watch).
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Tells every connected client that `path` changed.
    ///
    /// Returns the number of clients the message was queued for.
    pub fn refresh(&self, path: &Path) -> usize {
        if !self.watched().iter().any(|root| path.starts_with(root)) {
            debug!("Refreshing {} outside any watched root", path.display());
        }
        match self.tx.send(ReloadMessage::reload(path)) {
            Ok(n) => {
                debug!("Reload for {} queued for {} client(s)", path.display(), n);
                n
            }
            Err(_) => 0,
        }
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.tx.subscribe()
    }
}

/// Router for the reload port.
pub fn router(hub: ReloadHub) -> Router {
    Router::new()
        .route(SOCKET_ROUTE, get(websocket_handler))
        .route(SCRIPT_ROUTE, get(serve_client_script))
        .with_state(hub)
}

/// Loader inserted into served HTML pages. Points at this channel's port on
/// whatever host the page was loaded from.
pub fn client_snippet(reload_port: u16) -> String {
    format!(
        "<script>(function(){{var s=document.createElement('script');\
s.src='//'+(location.hostname||'localhost')+':{reload_port}{SCRIPT_ROUTE}';\
document.head.appendChild(s);}})();</script>"
    )
}

async fn serve_client_script() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        CLIENT_SCRIPT,
    )
}

async fn websocket_handler(ws: WebSocketUpgrade, State(hub): State<ReloadHub>) -> Response {
    debug!("New reload client connection request.");
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Serves one browser client until either side closes.
async fn handle_socket(socket: WebSocket, hub: ReloadHub) {
    let (mut sender, mut receiver): (SplitSink<WebSocket, Message>, SplitStream<WebSocket>) =
        socket.split();
    let mut rx = hub.subscribe();
    info!("Reload client connected ({} total).", hub.client_count());

    if let Err(e) = send_message(&mut sender, &ReloadMessage::hello()).await {
        warn!("Failed to greet reload client: {}", e);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Err(e) = send_message(&mut sender, &message).await {
                        debug!("Reload client went away: {}", e);
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Reload client lagged behind, missed {} messages.", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(t) => debug!("Reload client says: {}", t),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first takes the other down, releasing the
    // broadcast receiver right away.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Reload client disconnected.");
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ReloadMessage,
) -> anyhow::Result<()> {
    let payload = serde_json::to_string(message).map_err(|e| {
        error!("Failed to serialize reload message: {}", e);
        e
    })?;
    sender.send(Message::Text(payload)).await?;
    Ok(())
}
