use crate::endpoint::redact;
use crate::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Something the socket reported
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Channels of one open socket. Dropping `outgoing` closes it.
#[derive(Debug)]
pub struct TransportHandle {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens sockets
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> impl Future<Output = Result<TransportHandle>> + Send;
}

/// Production connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportHandle> {
        let (stream, _response) =
            match tokio::time::timeout(self.connect_timeout, connect_async(url)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(ClientError::ConnectFailed(e.to_string())),
                Err(_) => return Err(ClientError::ConnectTimeout),
            };

        info!("WebSocket handshake with {} complete", redact(url));

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        tokio::spawn(pump(stream, outgoing_rx, incoming_tx));

        Ok(TransportHandle { outgoing, incoming })
    }
}

/// Moves frames between the socket and the channel pair until either side
/// goes away
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("WebSocket write failed: {}", e);
                        let _ = incoming.send(TransportEvent::Error(e.to_string()));
                        let _ = incoming.send(TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
                None => {
                    debug!("Outbound channel dropped, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if incoming.send(TransportEvent::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if incoming.send(TransportEvent::Text(text)).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    debug!("Server closed socket (code: {:?})", code);
                    let _ = incoming.send(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket read failed: {}", e);
                    let _ = incoming.send(TransportEvent::Error(e.to_string()));
                    let _ = incoming.send(TransportEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = incoming.send(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Test side of one opened socket
    pub struct MockLink {
        pub sent: mpsc::UnboundedReceiver<String>,
        pub inbound: mpsc::UnboundedSender<TransportEvent>,
    }

    impl MockLink {
        /// Drains everything the client wrote so far, parsed as JSON
        pub fn sent_frames(&mut self) -> Vec<serde_json::Value> {
            let mut frames = Vec::new();
            while let Ok(text) = self.sent.try_recv() {
                frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
            }
            frames
        }

        pub fn push_text(&self, text: &str) {
            self.inbound
                .send(TransportEvent::Text(text.to_string()))
                .expect("reader gone");
        }

        pub fn push_json(&self, value: serde_json::Value) {
            self.push_text(&value.to_string());
        }

        pub fn close(&self, code: u16, reason: &str) {
            let _ = self.inbound.send(TransportEvent::Closed {
                code: Some(code),
                reason: reason.to_string(),
            });
        }
    }

    #[derive(Default)]
    struct MockState {
        opened: Vec<String>,
        failing: bool,
        delay: Option<Duration>,
        queued: Vec<TransportEvent>,
        links: VecDeque<MockLink>,
    }

    #[derive(Clone, Default)]
    pub struct MockConnector {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Connector whose every open attempt fails
        pub fn failing() -> Self {
            let connector = Self::new();
            connector.set_failing(true);
            connector
        }

        /// Connector whose opens take `delay` to complete
        pub fn delayed(delay: Duration) -> Self {
            let connector = Self::new();
            connector.state.lock().unwrap().delay = Some(delay);
            connector
        }

        pub fn set_failing(&self, failing: bool) {
            self.state.lock().unwrap().failing = failing;
        }

        /// Events delivered on the next socket as soon as it opens
        pub fn queue_on_open(&self, event: TransportEvent) {
            self.state.lock().unwrap().queued.push(event);
        }

        pub fn open_count(&self) -> usize {
            self.state.lock().unwrap().opened.len()
        }

        pub fn opened_urls(&self) -> Vec<String> {
            self.state.lock().unwrap().opened.clone()
        }

        /// Oldest socket not yet taken by the test
        pub fn take_link(&self) -> MockLink {
            self.state
                .lock()
                .unwrap()
                .links
                .pop_front()
                .expect("no socket was opened")
        }
    }

    impl Connector for MockConnector {
        async fn open(&self, url: &str) -> Result<TransportHandle> {
            let delay = {
                let mut state = self.state.lock().unwrap();
                state.opened.push(url.to_string());
                state.delay
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock().unwrap();
            if state.failing {
                return Err(ClientError::ConnectFailed("connection refused".to_string()));
            }

            let (outgoing, sent) = mpsc::unbounded_channel();
            let (inbound, incoming) = mpsc::unbounded_channel();
            for event in state.queued.drain(..) {
                let _ = inbound.send(event);
            }
            state.links.push_back(MockLink { sent, inbound });

            Ok(TransportHandle { outgoing, incoming })
        }
    }
}
