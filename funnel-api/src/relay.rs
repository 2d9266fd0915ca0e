//! Voice relay between a browser WebSocket and the realtime voice API
//!
//! The browser never sees the upstream API key: it talks to `/voice`, and
//! this module opens the upstream socket with the server's credentials and
//! pumps frames in both directions. When the upstream announces
//! `session.created`, the configured `session.update` is sent upstream before
//! the announcement is passed on to the browser. Ping/pong is answered by
//! each hop's own WebSocket implementation and is not forwarded. There is
//! no reconnection: when either side closes or fails, the other side is
//! closed as well.

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use funnel_common::config::VoiceConfig;
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Upstream connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid upstream header: {0}")]
    Header(String),
}

/// Transport-neutral WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl From<ClientMessage> for Frame {
    fn from(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::Text(text) => Frame::Text(text),
            ClientMessage::Binary(data) => Frame::Binary(data),
            ClientMessage::Ping(data) => Frame::Ping(data),
            ClientMessage::Pong(data) => Frame::Pong(data),
            ClientMessage::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for ClientMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => ClientMessage::Text(text),
            Frame::Binary(data) => ClientMessage::Binary(data),
            Frame::Ping(data) => ClientMessage::Ping(data),
            Frame::Pong(data) => ClientMessage::Pong(data),
            Frame::Close => ClientMessage::Close(None),
        }
    }
}

impl From<Frame> for UpstreamMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => UpstreamMessage::Text(text),
            Frame::Binary(data) => UpstreamMessage::Binary(data),
            Frame::Ping(data) => UpstreamMessage::Ping(data),
            Frame::Pong(data) => UpstreamMessage::Pong(data),
            Frame::Close => UpstreamMessage::Close(None),
        }
    }
}

/// Raw frames never reach application code
fn from_upstream(msg: UpstreamMessage) -> Option<Frame> {
    match msg {
        UpstreamMessage::Text(text) => Some(Frame::Text(text)),
        UpstreamMessage::Binary(data) => Some(Frame::Binary(data)),
        UpstreamMessage::Ping(data) => Some(Frame::Ping(data)),
        UpstreamMessage::Pong(data) => Some(Frame::Pong(data)),
        UpstreamMessage::Close(_) => Some(Frame::Close),
        UpstreamMessage::Frame(_) => None,
    }
}

/// `session.update` frame configuring voice, audio formats, transcription and VAD
pub fn session_update(config: &VoiceConfig) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": config.instructions,
            "voice": config.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": config.transcription_model,
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": config.vad_threshold,
                "prefix_padding_ms": config.prefix_padding_ms,
                "silence_duration_ms": config.silence_duration_ms,
            },
            "temperature": config.temperature,
            "max_response_output_tokens": "inf",
        }
    })
}

/// True for the upstream's `session.created` announcement
pub fn is_session_created(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "session.created"))
        .unwrap_or(false)
}

pub fn upstream_url(config: &VoiceConfig) -> String {
    format!("{}?model={}", config.upstream_url, config.model)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Side whose close or failure ended the session
    pub ended_by: Side,
    pub client_frames: u64,
    pub upstream_frames: u64,
}

async fn close_quietly<S>(sink: &mut S)
where
    S: Sink<Frame> + Unpin,
{
    let _ = sink.send(Frame::Close).await;
    let _ = sink.close().await;
}

/// Pump frames between both peers until one of them goes away
pub async fn relay<CTx, CRx, UTx, URx, CE, UE>(
    mut client_tx: CTx,
    mut client_rx: CRx,
    mut upstream_tx: UTx,
    mut upstream_rx: URx,
    session_update: &str,
) -> RelayOutcome
where
    CTx: Sink<Frame> + Unpin,
    CTx::Error: Display,
    CRx: Stream<Item = Result<Frame, CE>> + Unpin,
    CE: Display,
    UTx: Sink<Frame> + Unpin,
    UTx::Error: Display,
    URx: Stream<Item = Result<Frame, UE>> + Unpin,
    UE: Display,
{
    let mut client_frames = 0u64;
    let mut upstream_frames = 0u64;

    let ended_by = loop {
        tokio::select! {
            msg = client_rx.next() => match msg {
                Some(Ok(frame @ (Frame::Text(_) | Frame::Binary(_)))) => {
                    client_frames += 1;
                    if let Err(e) = upstream_tx.send(frame).await {
                        warn!("voice relay: upstream send failed: {}", e);
                        close_quietly(&mut client_tx).await;
                        break Side::Upstream;
                    }
                }
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => {}
                Some(Ok(Frame::Close)) | None => {
                    debug!("voice relay: client closed");
                    close_quietly(&mut upstream_tx).await;
                    break Side::Client;
                }
                Some(Err(e)) => {
                    warn!("voice relay: client error: {}", e);
                    close_quietly(&mut upstream_tx).await;
                    break Side::Client;
                }
            },
            msg = upstream_rx.next() => match msg {
                Some(Ok(frame @ (Frame::Text(_) | Frame::Binary(_)))) => {
                    upstream_frames += 1;
                    if let Frame::Text(text) = &frame {
                        if is_session_created(text) {
                            debug!("voice relay: session created, sending configuration");
                            if let Err(e) = upstream_tx.send(Frame::Text(session_update.to_string())).await {
                                warn!("voice relay: session.update failed: {}", e);
                                close_quietly(&mut client_tx).await;
                                break Side::Upstream;
                            }
                        }
                    }
                    if let Err(e) = client_tx.send(frame).await {
                        warn!("voice relay: client send failed: {}", e);
                        close_quietly(&mut upstream_tx).await;
                        break Side::Client;
                    }
                }
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => {}
                Some(Ok(Frame::Close)) | None => {
                    debug!("voice relay: upstream closed");
                    close_quietly(&mut client_tx).await;
                    break Side::Upstream;
                }
                Some(Err(e)) => {
                    warn!("voice relay: upstream error: {}", e);
                    close_quietly(&mut client_tx).await;
                    break Side::Upstream;
                }
            },
        }
    };

    RelayOutcome {
        ended_by,
        client_frames,
        upstream_frames,
    }
}

/// Open the upstream socket with the server's credentials
pub async fn connect_upstream(
    config: &VoiceConfig,
    api_key: &str,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, RelayError> {
    let mut request = upstream_url(config).into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| RelayError::Header(e.to_string()))?;
    request.headers_mut().insert("Authorization", bearer);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (stream, _response) = connect_async(request).await?;
    Ok(stream)
}

/// Serve one upgraded browser socket until either side closes
pub async fn run_session(socket: WebSocket, config: Arc<VoiceConfig>, api_key: String) {
    let (client_sink, client_stream) = socket.split();
    let mut client_tx = client_sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(ClientMessage::from(frame))));
    let client_rx = client_stream.map(|msg| msg.map(Frame::from));

    let upstream = match connect_upstream(&config, &api_key).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("voice relay: {}", e);
            close_quietly(&mut client_tx).await;
            return;
        }
    };
    info!("voice relay: connected to upstream");

    let (upstream_sink, upstream_stream) = upstream.split();
    let upstream_tx = upstream_sink.with(|frame: Frame| {
        future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(UpstreamMessage::from(frame)))
    });
    let upstream_rx = upstream_stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(msg) => from_upstream(msg).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });

    let update = session_update(&config).to_string();
    let outcome = relay(client_tx, client_rx, upstream_tx, upstream_rx, &update).await;
    info!(
        ended_by = ?outcome.ended_by,
        client_frames = outcome.client_frames,
        upstream_frames = outcome.upstream_frames,
        "voice relay: session ended"
    );
}
