// =============================================================================
// WebSocket vendor — generic JSON tick feed on a vendor-owned thread
// =============================================================================
//
// Each session runs on its own OS thread with a private single-threaded
// runtime, the way a vendor SDK owns its network thread.  The adapter only
// ever sees it through `VendorBridge` and the command channel.
//
// Outbound:  {"action": "subscribe" | "unsubscribe", "symbols": [..]}
// Inbound:   a tick object, an array of ticks, or {"type": "ticks", "data": [..]}
//            Objects with any other "type" are control frames and ignored.
// =============================================================================

use std::thread;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::vendor::{VendorBridge, VendorClient};
use super::VendorError;

enum Command {
    Send(String),
    Close,
}

struct Session {
    commands: mpsc::UnboundedSender<Command>,
}

pub struct WebSocketVendor {
    url: String,
    session: Mutex<Option<Session>>,
}

impl WebSocketVendor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send_command(&self, action: &str, symbols: &[String]) -> Result<(), VendorError> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(VendorError::NotConnected)?;
        session
            .commands
            .send(Command::Send(subscription_message(action, symbols)))
            .map_err(|_| VendorError::NotConnected)
    }
}

/// Wire form of a subscribe/unsubscribe request.
pub fn subscription_message(action: &str, symbols: &[String]) -> String {
    serde_json::json!({ "action": action, "symbols": symbols }).to_string()
}

impl VendorClient for WebSocketVendor {
    async fn connect(&self, bridge: VendorBridge) -> Result<(), VendorError> {
        if let Some(old) = self.session.lock().take() {
            let _ = old.commands.send(Command::Close);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let url = self.url.clone();

        thread::Builder::new()
            .name("vendor-ws".into())
            .spawn(move || session_thread(url, bridge, cmd_rx, ready_tx))
            .map_err(|e| VendorError::Connect(format!("failed to spawn vendor thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.session.lock() = Some(Session { commands: cmd_tx });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VendorError::Connect("vendor thread exited during handshake".into())),
        }
    }

    async fn disconnect(&self) -> Result<(), VendorError> {
        if let Some(session) = self.session.lock().take() {
            let _ = session.commands.send(Command::Close);
        }
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<(), VendorError> {
        self.send_command("subscribe", symbols)
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<(), VendorError> {
        self.send_command("unsubscribe", symbols)
    }
}

fn session_thread(
    url: String,
    bridge: VendorBridge,
    commands: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<Result<(), VendorError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(VendorError::Connect(format!("vendor runtime: {e}"))));
            return;
        }
    };
    runtime.block_on(run_session(url, bridge, commands, ready));
}

async fn run_session(
    url: String,
    bridge: VendorBridge,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<Result<(), VendorError>>,
) {
    info!(url = %url, "connecting to vendor WebSocket");

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let _ = ready.send(Err(VendorError::WebSocket(e)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!(url = %url, "connect abandoned by caller — closing socket");
        return;
    }
    info!(url = %url, "vendor WebSocket connected");

    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "vendor WebSocket send failed");
                        bridge.notify_disconnected(format!("send failed: {e}"));
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    info!(url = %url, "vendor WebSocket closed");
                    return;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_text(&text, &bridge),
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "vendor closed the WebSocket");
                    bridge.notify_disconnected(format!("closed by vendor: {frame:?}"));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "vendor WebSocket read error");
                    bridge.notify_disconnected(e.to_string());
                    return;
                }
                None => {
                    warn!("vendor WebSocket stream ended");
                    bridge.notify_disconnected("stream ended");
                    return;
                }
            },
        }
    }
}

fn handle_text(text: &str, bridge: &VendorBridge) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            bridge.notify_error(format!("unparseable vendor message: {e}"));
            return;
        }
    };

    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        if kind != "ticks" {
            debug!(kind, "vendor control frame ignored");
            return;
        }
    }
    bridge.send_ticks(vec![value]);
}
