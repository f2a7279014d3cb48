//! Control-plane client handling.
//!
//! Every accepted connection gets a client task. The task sends the
//! greeting, walks the authentication exchange when the transport has
//! a password, then registers itself with the bot and forwards parsed
//! requests. Writes go through a FIFO queue drained by a writer task,
//! so there is exactly one in-flight send per client; a failing send
//! tears the client down.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::bot::ControlMessage;
use crate::error::{BotError, Error, TransportError};
use crate::transport::frame::JsonCodec;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The greeting sent to every client before anything else.
pub fn greeting() -> Value {
    json!({
        "program": "slirc-bot",
        "major": env!("CARGO_PKG_VERSION_MAJOR").parse::<u64>().unwrap_or(0),
        "minor": env!("CARGO_PKG_VERSION_MINOR").parse::<u64>().unwrap_or(0),
        "patch": env!("CARGO_PKG_VERSION_PATCH").parse::<u64>().unwrap_or(0),
        "javascript": false,
        "ssl": cfg!(feature = "tls"),
    })
}

enum Outbound {
    Frame(Value),
    Shutdown,
}

#[derive(Clone)]
enum Sink {
    /// Socket-backed client: frames go through the writer task.
    Writer(UnboundedSender<Outbound>),
    /// Detached client: frames land directly on a channel.
    Direct(UnboundedSender<Value>),
}

/// Shared handle to one ready client, used by the bot to reply and to
/// broadcast events.
#[derive(Clone)]
pub struct ClientHandle {
    id: u64,
    sink: Sink,
}

impl ClientHandle {
    /// Build a handle that is not backed by a socket: everything sent
    /// to it lands on the returned receiver. Useful for embedders that
    /// do their own delivery, and for tests.
    pub fn detached(id: u64) -> (Self, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            ClientHandle {
                id,
                sink: Sink::Direct(tx),
            },
            rx,
        )
    }

    /// Unique identifier of the client connection.
    pub fn client_id(&self) -> u64 {
        self.id
    }

    /// Queue a JSON message. Returns false when the writer is gone.
    pub fn send(&self, value: Value) -> bool {
        match &self.sink {
            Sink::Writer(tx) => tx.send(Outbound::Frame(value)).is_ok(),
            Sink::Direct(tx) => tx.send(value).is_ok(),
        }
    }

    /// Flush the queue and close the connection.
    pub fn close(&self) {
        if let Sink::Writer(tx) = &self.sink {
            let _ = tx.send(Outbound::Shutdown);
        }
    }
}

/// Drive one client connection to completion.
pub(crate) async fn run_client<S>(
    stream: S,
    password: Option<String>,
    control: UnboundedSender<ControlMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut framed = Framed::new(stream, JsonCodec);

    if framed.send(greeting()).await.is_err() {
        return;
    }

    // Authentication happens before the client is registered; only
    // ready clients receive broadcasts.
    if let Some(password) = &password {
        match framed.next().await {
            Some(Ok(message)) => {
                if message.get("command").and_then(Value::as_str) != Some("auth") {
                    fail(&mut framed, TransportError::AuthRequired.into(), None).await;
                    return;
                }

                if message.get("password").and_then(Value::as_str) != Some(password.as_str()) {
                    fail(&mut framed, TransportError::InvalidAuth.into(), Some("auth")).await;
                    return;
                }

                if framed.send(json!({ "command": "auth" })).await.is_err() {
                    return;
                }
            }
            _ => return,
        }
    }

    let (mut sink, mut source) = framed.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ClientHandle {
        id,
        sink: Sink::Writer(tx),
    };

    if control.send(ControlMessage::Register(handle.clone())).is_err() {
        return;
    }

    let writer_control = control.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(value) => {
                    if sink.send(value).await.is_err() {
                        let _ = writer_control.send(ControlMessage::Closed(id));
                        break;
                    }
                }
                Outbound::Shutdown => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    loop {
        match source.next().await {
            Some(Ok(value)) => {
                if control.send(ControlMessage::Request(handle.clone(), value)).is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(client = id, "{}", e);
                handle.send(Error::from(BotError::InvalidMessage).to_wire(None));
                handle.close();
                break;
            }
            None => {
                debug!(client = id, "client disconnected");
                break;
            }
        }
    }

    let _ = control.send(ControlMessage::Closed(id));
}

/// Send one error reply and close the connection, flushing first.
async fn fail<S>(framed: &mut Framed<S, JsonCodec>, error: Error, command: Option<&str>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = framed.send(error.to_wire(command)).await;
    let _ = framed.close().await;
}
