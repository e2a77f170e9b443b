//! WebSocket transport using reqwest for negotiation and tokio-tungstenite for
//! the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hubline_shared::{decode_frame, handshake_request, parse_handshake_response, HubMessage};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, http::StatusCode, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{ConnectRequest, Connector, TransportError, TransportLink};
use crate::config::HubConfig;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Negotiate redirects to follow before giving up.
const MAX_REDIRECTS: usize = 5;

const WEBSOCKETS: &str = "WebSockets";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    negotiate_version: u32,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    /// Redirect to another endpoint (e.g. a managed relay).
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableTransport {
    transport: String,
}

/// Where to open the socket after negotiation.
#[derive(Debug)]
struct Endpoint {
    url: Url,
    access_token: Option<String>,
    connection_id: Option<String>,
}

/// Connects to a hub endpoint over WebSockets.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    http: reqwest::Client,
    hub_url: Url,
    skip_negotiation: bool,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &HubConfig) -> Result<Self, TransportError> {
        let hub_url = Url::parse(&config.hub_url)
            .map_err(|e| TransportError::Connect(format!("invalid hub url {}: {e}", config.hub_url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.handshake_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            http,
            hub_url,
            skip_negotiation: config.skip_negotiation,
            handshake_timeout: config.handshake_timeout,
        })
    }

    async fn negotiate(&self, access_token: Option<String>) -> Result<Endpoint, TransportError> {
        let mut hub_url = self.hub_url.clone();
        let mut access_token = access_token;

        for _ in 0..=MAX_REDIRECTS {
            let negotiate_url = negotiate_url(&hub_url)?;
            debug!(url = %negotiate_url, "negotiating");

            let mut request = self.http.post(negotiate_url);
            if let Some(token) = &access_token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Negotiate(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(TransportError::Unauthorized(format!("negotiate returned {status}")));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Negotiate(format!("negotiate returned {status}: {body}")));
            }

            let negotiated: NegotiateResponse = response
                .json()
                .await
                .map_err(|e| TransportError::Negotiate(e.to_string()))?;

            if let Some(error) = negotiated.error {
                return Err(TransportError::Negotiate(error));
            }

            if let Some(redirect) = negotiated.url {
                info!(url = %redirect, "negotiate redirected");
                hub_url = Url::parse(&redirect)
                    .map_err(|e| TransportError::Negotiate(format!("invalid redirect url: {e}")))?;
                if negotiated.access_token.is_some() {
                    access_token = negotiated.access_token;
                }
                continue;
            }

            if !negotiated.available_transports.is_empty()
                && !negotiated
                    .available_transports
                    .iter()
                    .any(|t| t.transport == WEBSOCKETS)
            {
                return Err(TransportError::Negotiate(
                    "server does not offer WebSockets".to_string(),
                ));
            }

            // Version 1 servers hand out a separate token for the socket
            let socket_id = if negotiated.negotiate_version >= 1 {
                negotiated.connection_token.or(negotiated.connection_id.clone())
            } else {
                negotiated.connection_id.clone()
            };

            let mut url = socket_url(&hub_url)?;
            if let Some(id) = socket_id {
                url.query_pairs_mut().append_pair("id", &id);
            }
            return Ok(Endpoint {
                url,
                access_token,
                connection_id: negotiated.connection_id,
            });
        }

        Err(TransportError::Negotiate(format!(
            "more than {MAX_REDIRECTS} negotiate redirects"
        )))
    }

    async fn open(&self, endpoint: Endpoint) -> Result<TransportLink, TransportError> {
        let mut url = endpoint.url;
        if let Some(token) = &endpoint.access_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }

        let (socket, _response) = connect_async(url.as_str()).await.map_err(classify)?;
        let (mut write, mut read) = socket.split();

        write
            .send(Message::Text(handshake_request().into()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let leftover = tokio::time::timeout(self.handshake_timeout, read_handshake(&mut read))
            .await
            .map_err(|_| TransportError::Connect("handshake response timed out".to_string()))??;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        // Messages batched behind the handshake response
        for parsed in decode_frame(&leftover) {
            match parsed {
                Ok(message) => {
                    let _ = incoming_tx.send(message);
                }
                Err(e) => warn!(error = %e, "dropping malformed hub message"),
            }
        }

        let connection_id = endpoint
            .connection_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let reader = tokio::spawn(read_loop(read, incoming_tx, connection_id.clone()));
        tokio::spawn(write_loop(write, outgoing_rx, connection_id.clone()));

        info!(connection_id = %connection_id, "hub socket open");
        Ok(TransportLink::new(connection_id, outgoing_tx, incoming_rx).with_tasks([reader.abort_handle()]))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        let endpoint = if self.skip_negotiation {
            Endpoint {
                url: socket_url(&self.hub_url)?,
                access_token: request.access_token,
                connection_id: None,
            }
        } else {
            self.negotiate(request.access_token).await?
        };
        self.open(endpoint).await
    }
}

/// Wait for the handshake response and return whatever followed it.
async fn read_handshake(read: &mut SplitStream<Socket>) -> Result<String, TransportError> {
    let mut buffer = String::new();
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                buffer.push_str(text.as_str());
                match parse_handshake_response(&buffer) {
                    Ok(rest) => return Ok(rest.to_string()),
                    Err(hubline_shared::ProtocolError::IncompleteHandshake) => continue,
                    Err(e) => return Err(TransportError::Handshake(e)),
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "socket closed during handshake");
                return Err(TransportError::Closed);
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
    Err(TransportError::Closed)
}

async fn read_loop(
    mut read: SplitStream<Socket>,
    incoming: mpsc::UnboundedSender<HubMessage>,
    connection_id: String,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for parsed in decode_frame(text.as_str()) {
                    match parsed {
                        Ok(message) => {
                            if incoming.send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(%connection_id, error = %e, "dropping malformed hub message"),
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                info!(%connection_id, ?frame, "hub socket received close frame");
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled by tungstenite
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%connection_id, error = %e, "hub socket read error");
                break;
            }
        }
    }
    debug!(%connection_id, "read task finished");
}

async fn write_loop(
    mut write: SplitSink<Socket, Message>,
    mut outgoing: mpsc::UnboundedReceiver<HubMessage>,
    connection_id: String,
) {
    while let Some(message) = outgoing.recv().await {
        match message.encode() {
            Ok(text) => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(%connection_id, error = %e, "hub socket send failed");
                    break;
                }
            }
            Err(e) => warn!(%connection_id, error = %e, "failed to encode hub message"),
        }
    }
    let _ = write.close().await;
    debug!(%connection_id, "write task finished");
}

fn negotiate_url(hub_url: &Url) -> Result<Url, TransportError> {
    let mut url = hub_url.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Negotiate(format!("cannot negotiate against {hub_url}")))?
        .pop_if_empty()
        .push("negotiate");
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

fn socket_url(hub_url: &Url) -> Result<Url, TransportError> {
    let scheme = match hub_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Connect(format!("unsupported scheme {other}")));
        }
    };
    let mut url = hub_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Connect(format!("cannot use {scheme} for {hub_url}")))?;
    Ok(url)
}

fn classify(error: tungstenite::Error) -> TransportError {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return TransportError::Unauthorized(format!("socket upgrade returned {status}"));
        }
    }
    TransportError::Connect(error.to_string())
}
