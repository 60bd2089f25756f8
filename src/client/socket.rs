//! Outbound WebSocket connection
//!
//! Adds to what the WebSocket library already does:
//! - handshake timeout and message size limit
//! - keepalive pings and an idle read deadline
//! - graceful close with a bounded wait for the server's reply
//! - a deadline on every outbound write

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
        Error as WsError, Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::handler::{CloseEvent, Payload, SocketHandler, CLOSE_NO_STATUS};
use crate::config::{validate_url, ConnectionSettings};
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────

/// Tunables for a single connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Handshake timeout
    pub connect_timeout: Duration,

    /// Maximum silence from the server before giving up (None = never)
    pub idle_timeout: Option<Duration>,

    /// Keepalive ping interval (None = no pings)
    pub ping_interval: Option<Duration>,

    /// Wait for the server's close reply after we send ours
    pub close_grace: Duration,

    /// Longest a single frame write may take
    pub write_timeout: Duration,

    /// Largest accepted message
    pub max_message_bytes: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

impl From<&ConnectionSettings> for ConnectOptions {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            idle_timeout: settings.idle_timeout(),
            ping_interval: settings.ping_interval(),
            close_grace: settings.close_grace(),
            write_timeout: settings.write_timeout(),
            max_message_bytes: settings.max_message_bytes,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Messages may arrive
    Open,
    /// We sent a close frame and are waiting for the reply
    Closing,
    /// No further events
    Closed,
}

// ─────────────────────────────────────────────────────────────────
// Connect
// ─────────────────────────────────────────────────────────────────

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open WebSocket connection
pub struct Connection {
    url: Url,
    stream: Stream,
    options: ConnectOptions,
    state: ConnectionState,
}

/// Open a connection to `url`
///
/// Fails if the URL is not a `ws://`/`wss://` URL, the handshake does not
/// finish within `connect_timeout`, or the server refuses the upgrade.
pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Connection> {
    let url = validate_url(url)?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(options.max_message_bytes),
        max_frame_size: Some(options.max_message_bytes),
        ..Default::default()
    };

    info!(url = %url, "Connecting");

    let handshake = connect_async_with_config(url.as_str(), Some(ws_config), false);
    let (stream, response) = match tokio::time::timeout(options.connect_timeout, handshake).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(WsError::Http(response))) => {
            return Err(Error::HandshakeRejected {
                status: response.status().as_u16(),
            });
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(Error::connection_timeout(
                url.as_str(),
                options.connect_timeout.as_millis() as u64,
            ));
        }
    };

    info!(url = %url, status = response.status().as_u16(), "WebSocket connection established");

    Ok(Connection {
        url,
        stream,
        options: options.clone(),
        state: ConnectionState::Open,
    })
}

impl Connection {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Deliver events to `handler` until the connection ends
    ///
    /// When `shutdown` completes the connection is closed from our side. The
    /// returned event is the one passed to `on_close`. If the handler fails on
    /// a message the connection is closed with 1011, `on_close` still runs,
    /// and the handler's error is returned.
    pub async fn run<H, F>(&mut self, handler: &mut H, shutdown: F) -> Result<CloseEvent>
    where
        H: SocketHandler + ?Sized,
        F: Future<Output = ()>,
    {
        if self.state != ConnectionState::Open {
            return Err(WsError::AlreadyClosed.into());
        }

        let options = self.options.clone();
        let (mut write, mut read) = (&mut self.stream).split();

        let mut ping_timer = options.ping_interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut idle_deadline = options
            .idle_timeout
            .map(|timeout| Box::pin(tokio::time::sleep(timeout)));
        let mut close_deadline: Option<Pin<Box<Sleep>>> = None;
        let mut messages: u64 = 0;
        let mut failure: Option<Error> = None;

        tokio::pin!(shutdown);

        let event = loop {
            tokio::select! {
                _ = &mut shutdown, if self.state == ConnectionState::Open => {
                    info!("Closing connection");
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    // the grace period covers sending our frame and the reply
                    let deadline = Instant::now() + options.close_grace;
                    if let Err(reason) = write_by(deadline, write.send(WsMessage::Close(Some(frame)))).await {
                        warn!(reason = %reason, "Failed to send close frame");
                        break CloseEvent::abnormal(reason);
                    }
                    self.state = ConnectionState::Closing;
                    close_deadline = Some(Box::pin(tokio::time::sleep_until(deadline)));
                }

                _ = tick(&mut ping_timer) => {
                    trace!("Sending keepalive ping");
                    let deadline = Instant::now() + options.write_timeout;
                    if let Err(reason) = write_by(deadline, write.send(WsMessage::Ping(Vec::new()))).await {
                        warn!(reason = %reason, "Failed to send ping");
                        break CloseEvent::abnormal(reason);
                    }
                }

                _ = expire(&mut idle_deadline) => {
                    warn!(
                        idle_ms = options.idle_timeout.map(|d| d.as_millis() as u64),
                        "No frames received within idle timeout"
                    );
                    break CloseEvent::abnormal("idle timeout");
                }

                _ = expire(&mut close_deadline) => {
                    warn!("Server did not answer our close frame");
                    break CloseEvent::abnormal("close timed out");
                }

                msg = read.next() => {
                    if let (Some(timeout), Some(deadline)) = (options.idle_timeout, idle_deadline.as_mut()) {
                        deadline.as_mut().reset(Instant::now() + timeout);
                    }

                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            messages += 1;
                            if let Err(e) = deliver(self.state, handler, Payload::Text(text)).await {
                                let event = abandon(&mut write, options.write_timeout, &e).await;
                                failure = Some(e);
                                break event;
                            }
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            messages += 1;
                            if let Err(e) = deliver(self.state, handler, Payload::Binary(data)).await {
                                let event = abandon(&mut write, options.write_timeout, &e).await;
                                failure = Some(e);
                                break event;
                            }
                        }
                        Some(Ok(WsMessage::Ping(_))) => {
                            // the library queued the pong; push it out now
                            let deadline = Instant::now() + options.write_timeout;
                            if let Err(reason) = write_by(deadline, write.flush()).await {
                                break CloseEvent::abnormal(reason);
                            }
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            trace!("Pong received");
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let _ = write_by(Instant::now() + options.write_timeout, write.flush()).await;
                            break match frame {
                                Some(frame) => CloseEvent::clean(u16::from(frame.code), frame.reason.into_owned()),
                                None => CloseEvent::clean(CLOSE_NO_STATUS, ""),
                            };
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(WsError::ConnectionClosed)) => {
                            break CloseEvent::clean(CLOSE_NO_STATUS, "");
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break CloseEvent::abnormal(e.to_string());
                        }
                        None => {
                            break CloseEvent::abnormal("connection reset");
                        }
                    }
                }
            }
        };

        self.state = ConnectionState::Closed;

        info!(
            code = event.code,
            reason = %event.reason,
            clean = event.was_clean,
            messages,
            "Socket closed"
        );

        let closed = handler.on_close(&event).await;
        if let Some(e) = failure {
            return Err(e);
        }
        closed?;
        Ok(event)
    }
}

async fn deliver<H>(state: ConnectionState, handler: &mut H, payload: Payload) -> Result<()>
where
    H: SocketHandler + ?Sized,
{
    if state != ConnectionState::Open {
        debug!(kind = payload.kind(), "Dropping message received while closing");
        return Ok(());
    }

    debug!(kind = payload.kind(), bytes = payload.len(), "Message received");
    handler.on_message(payload).await
}

/// Await one outbound write, giving up at `deadline`
///
/// The error is the reason to report in the close event.
async fn write_by<F>(deadline: Instant, write: F) -> std::result::Result<(), String>
where
    F: Future<Output = std::result::Result<(), WsError>>,
{
    match tokio::time::timeout_at(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write timeout".to_string()),
    }
}

/// Close with 1011 after the handler failed on a message
async fn abandon<S>(write: &mut S, write_timeout: Duration, error: &Error) -> CloseEvent
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    warn!(error = %error, "Handler failed, closing connection");
    let frame = CloseFrame {
        code: CloseCode::Error,
        reason: "".into(),
    };
    let deadline = Instant::now() + write_timeout;
    if let Err(reason) = write_by(deadline, write.send(WsMessage::Close(Some(frame)))).await {
        debug!(reason = %reason, "Close frame not sent");
    }
    CloseEvent::abnormal(error.to_string())
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
