//! Duplex WebSocket channel to the voice live service
//!
//! The socket is split into a read half and a write half, each owned by its
//! own task. Commands go in through [`Outbound`], an unbounded channel drained
//! by the writer task, so callers (including plain OS threads) never wait on
//! the network and commands reach the wire in the order they were issued.
//! Inbound frames are parsed by the reader task and delivered in arrival
//! order on an [`EventStream`], which ends when the socket closes.

use crate::audio::EncodedAudio;
use crate::error::{Result, VoiceError};
use crate::realtime::{parse_event, ClientCommand, ServerEvent, SessionConfig};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Inbound events in arrival order; `None` once the channel has closed.
pub type EventStream = mpsc::Receiver<Result<ServerEvent>>;

const EVENT_BUFFER: usize = 100;

/// How the client authenticates.
#[derive(Clone)]
pub enum Credential {
    /// Sent as the `api-key` header
    ApiKey(String),
    /// Sent as `Authorization: Bearer <token>`
    BearerToken(String),
}

impl Credential {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "api-key",
            Self::BearerToken(_) => "bearer-token",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.mode())
    }
}

/// Transport options for the WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub max_message_size: usize,
    /// Interval between keep-alive pings
    pub heartbeat_interval: Duration,
    /// Handshake timeout
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024,
            heartbeat_interval: Duration::from_secs(20),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub api_version: String,
    pub model: String,
    pub credential: Credential,
    pub options: ConnectOptions,
}

impl ConnectionConfig {
    /// Full realtime URL for this endpoint and model.
    pub fn url(&self) -> Result<Url> {
        let invalid = |reason: &str| {
            VoiceError::Connection(format!("invalid endpoint {:?}: {}", self.endpoint, reason))
        };

        let mut url = Url::parse(&self.endpoint).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(invalid(&format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme).map_err(|_| invalid("cannot switch scheme"))?;

        url.path_segments_mut()
            .map_err(|_| invalid("not a base URL"))?
            .pop_if_empty()
            .extend(["voice-live", "realtime"]);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("model", &self.model);
        Ok(url)
    }
}

/// Sending half of the duplex channel.
///
/// Every method only enqueues the command for the writer task and returns
/// immediately; a failed send on the wire surfaces later as the end of the
/// event stream. An error here means the writer is already gone.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl Outbound {
    /// Outbound handle plus the receiving end the writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| VoiceError::ChannelClosed)
    }

    pub fn update_session(&self, session: SessionConfig) -> Result<()> {
        self.send(ClientCommand::SessionUpdate { session })
    }

    pub fn append_audio(&self, audio: EncodedAudio) -> Result<()> {
        self.send(ClientCommand::AudioAppend { audio })
    }

    pub fn cancel_response(&self) -> Result<()> {
        self.send(ClientCommand::ResponseCancel)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Open the duplex channel and start its reader and writer tasks.
pub async fn connect(config: &ConnectionConfig) -> Result<(Outbound, EventStream)> {
    let url = config.url()?;
    info!("Connecting to voice live API at {} ({})", url, config.credential.mode());

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| VoiceError::Connection(e.to_string()))?;
    let headers = request.headers_mut();
    match &config.credential {
        Credential::ApiKey(key) => {
            let value = HeaderValue::from_str(key)
                .map_err(|e| VoiceError::Config(format!("invalid API key: {}", e)))?;
            headers.insert("api-key", value);
        }
        Credential::BearerToken(token) => {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| VoiceError::Config(format!("invalid access token: {}", e)))?;
            headers.insert("authorization", value);
        }
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.options.max_message_size);
    ws_config.max_frame_size = Some(config.options.max_message_size);

    let (ws_stream, resp) = tokio::time::timeout(
        config.options.timeout,
        connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| VoiceError::Connection(format!("timed out after {:?}", config.options.timeout)))?
    .map_err(|e| VoiceError::Connection(e.to_string()))?;

    debug!("WebSocket connection response: {:?}", resp.status());

    let (sink, stream) = ws_stream.split();
    let (outbound, command_rx) = Outbound::channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(run_writer(sink, command_rx, config.options.heartbeat_interval));
    tokio::spawn(run_reader(stream, event_tx));

    info!("Connected to voice live API");
    Ok((outbound, event_rx))
}

/// Serialize commands onto the socket in order, with periodic pings.
async fn run_writer(
    mut sink: WsSink,
    mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    heartbeat: Duration,
) {
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    info!("All senders dropped, closing WebSocket");
                    let _ = sink.close().await;
                    break;
                };
                let message = match encode(&command) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Failed to serialize {}: {}", command.kind(), e);
                        continue;
                    }
                };
                if !matches!(command, ClientCommand::AudioAppend { .. }) {
                    debug!("Sending {}", command.kind());
                }
                if let Err(e) = sink.send(message).await {
                    error!("Failed to send {}: {}", command.kind(), e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    warn!("Heartbeat failed: {}", e);
                    break;
                }
            }
        }
    }

    debug!("Writer task terminated");
}

fn encode(command: &ClientCommand) -> Result<Message> {
    Ok(Message::text(serde_json::to_string(command)?))
}

/// Parse inbound frames into events until the socket closes.
async fn run_reader(mut stream: WsStream, event_tx: mpsc::Sender<Result<ServerEvent>>) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF-8 binary message ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket error: {}", e);
                let _ = event_tx.send(Err(VoiceError::WebSocket(e))).await;
                break;
            }
        };

        match parse_event(&text) {
            Ok(event) => {
                if event_tx.send(Ok(event)).await.is_err() {
                    debug!("Event receiver dropped");
                    break;
                }
            }
            Err(e) => warn!("Skipping inbound message: {}", e),
        }
    }

    info!("Inbound message task terminated");
}
