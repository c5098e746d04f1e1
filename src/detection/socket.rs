//! Transport side of the socket session manager.
//!
//! A [`Connector`] opens one physical connection per call and reports its
//! lifecycle back into the controller queue as [`SocketEvent`]s tagged with the
//! connection id the controller allocated, so events from replaced sockets can
//! be recognised and dropped.

use crate::config::DetectionConfig;
use crate::detection::controller::{Event, EventSink};
use crate::detection::protocol::{Payload, ABNORMAL_CLOSURE};
use crate::error::Error;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code reported when the peer's close frame carried no status
pub const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Message(Payload),
    Close { code: u16, reason: String },
    Error(String),
}

pub trait SocketHandle: Send {
    fn is_open(&self) -> bool;

    fn send_text(&self, text: String) -> Result<(), Error>;

    /// Queue a binary frame. Completion is reported as [`Event::FrameSent`].
    fn send_binary(&self, data: Vec<u8>) -> Result<(), Error>;

    fn close(&mut self);
}

pub trait Connector: Send {
    fn open(&self, endpoint: &str, connection: u64) -> Result<Box<dyn SocketHandle>, Error>;
}

/// Reconnect delay for a close code
pub fn reconnect_backoff(code: u16, config: &DetectionConfig) -> Duration {
    if code == ABNORMAL_CLOSURE {
        Duration::from_millis(config.abnormal_close_backoff_ms)
    } else {
        Duration::from_millis(config.close_backoff_ms)
    }
}

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// WebSocket connector backed by tokio-tungstenite
pub struct WsConnector {
    sink: EventSink,
}

impl WsConnector {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str, connection: u64) -> Result<Box<dyn SocketHandle>, Error> {
        let (outbound, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(
            endpoint.to_string(),
            connection,
            self.sink.clone(),
            rx,
            open.clone(),
        ));

        Ok(Box::new(WsSocket { outbound, open }))
    }
}

struct WsSocket {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl WsSocket {
    fn queue(&self, message: Outbound) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::Transport("Socket is not open".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|_| Error::Transport("Socket task has exited".to_string()))
    }
}

impl SocketHandle for WsSocket {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), Error> {
        self.queue(Outbound::Text(text))
    }

    fn send_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.queue(Outbound::Binary(data))
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    endpoint: String,
    connection: u64,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    let emit = |event: SocketEvent| {
        let _ = sink.send(Event::Socket { connection, event });
    };

    let mut stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", endpoint, e);
            emit(SocketEvent::Error(e.to_string()));
            emit(SocketEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            });
            return;
        }
    };

    // Closed locally while the handshake was in flight. Nothing else can be
    // queued before the open flag is set.
    if let Ok(Outbound::Close) | Err(mpsc::error::TryRecvError::Disconnected) =
        outbound.try_recv()
    {
        let _ = stream.close(None).await;
        return;
    }

    open.store(true, Ordering::SeqCst);
    emit(SocketEvent::Open);

    let (mut write, mut read) = stream.split();

    let (code, reason) = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(SocketEvent::Message(Payload::Text(text))),
                Some(Ok(Message::Binary(data))) => emit(SocketEvent::Message(Payload::Binary(data))),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(SocketEvent::Error(e.to_string()));
                    break (ABNORMAL_CLOSURE, String::new());
                }
                None => break (ABNORMAL_CLOSURE, String::new()),
            },
            message = outbound.recv() => match message {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!("Failed to send control message: {}", e);
                    }
                }
                Some(Outbound::Binary(data)) => {
                    let result = write
                        .send(Message::Binary(data))
                        .await
                        .map_err(|e| Error::Transport(e.to_string()));
                    let _ = sink.send(Event::FrameSent { connection, result });
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing detection socket {}", connection);
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: Cow::Borrowed(""),
                        })))
                        .await;
                    open.store(false, Ordering::SeqCst);
                    return;
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    emit(SocketEvent::Close { code, reason });
}
