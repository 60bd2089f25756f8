//! Common test utilities and fixtures
//!
//! Provides a scripted chat server and a helper for running the probe binary
//! against it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// One thing the mock server does after accepting the connection
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Binary(Vec<u8>),
    Pause(Duration),
    /// Send a close frame and wait for the reply
    Close(Option<(u16, &'static str)>),
    /// Drop the TCP connection without a closing handshake
    Drop,
    /// Keep reading until the client closes
    AwaitClientClose,
}

/// What the server observed from the client
#[derive(Debug, Default, Clone)]
pub struct Observed {
    pub path: Option<String>,
    pub close_codes: Vec<Option<u16>>,
    pub pings: usize,
}

/// Scripted single-connection chat server
pub struct MockChatServer {
    addr: SocketAddr,
    observed: Arc<RwLock<Observed>>,
}

impl MockChatServer {
    /// Accept one WebSocket connection and play `script` on it
    pub async fn start(script: Vec<Step>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let observed = Arc::new(RwLock::new(Observed::default()));
        let record = observed.clone();

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };

            let path_record = record.clone();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path_record.write().path = Some(req.uri().path().to_string());
                Ok(resp)
            };
            let Ok(mut ws) = accept_hdr_async(tcp, callback).await else {
                return;
            };

            for step in script {
                match step {
                    Step::Text(text) => {
                        let _ = ws.send(WsMessage::Text(text)).await;
                    }
                    Step::Binary(data) => {
                        let _ = ws.send(WsMessage::Binary(data)).await;
                    }
                    Step::Pause(duration) => tokio::time::sleep(duration).await,
                    Step::Close(frame) => {
                        let frame = frame.map(|(code, reason)| CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        });
                        let _ = ws.close(frame).await;
                        // drain until the client's reply completes the handshake
                        while let Some(Ok(_)) = ws.next().await {}
                        return;
                    }
                    Step::Drop => return,
                    Step::AwaitClientClose => {
                        while let Some(Ok(msg)) = ws.next().await {
                            match msg {
                                WsMessage::Close(frame) => {
                                    record
                                        .write()
                                        .close_codes
                                        .push(frame.map(|f| u16::from(f.code)));
                                }
                                WsMessage::Ping(_) => record.write().pings += 1,
                                _ => {}
                            }
                        }
                        return;
                    }
                }
            }
        });

        Self { addr, observed }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/start", self.addr)
    }

    pub fn observed(&self) -> Observed {
        self.observed.read().clone()
    }
}

/// Serve one plain HTTP response instead of a WebSocket upgrade
pub async fn start_http_only(status_line: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((mut tcp, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = tcp.read(&mut buf).await;
            let response = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
            let _ = tcp.write_all(response.as_bytes()).await;
        }
    });

    format!("ws://{}/start", addr)
}

/// A URL on which nothing is listening
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/start", addr)
}

/// Probe command isolated from the user's config files and env
pub fn probe_cmd(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("chat-probe").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("CHAT_PROBE_CONFIG")
        .env_remove("CHAT_PROBE_URL")
        .env_remove("CHAT_PROBE_LOG_FILE")
        .env_remove("CHAT_PROBE_LOG_LEVEL")
        .env_remove("CHAT_PROBE_IDLE_TIMEOUT_MS")
        .env_remove("CHAT_PROBE_PING_INTERVAL_MS")
        .env_remove("CHAT_PROBE_CONNECT_TIMEOUT_MS")
        .env_remove("CHAT_PROBE_CLOSE_GRACE_MS")
        .env_remove("CHAT_PROBE_WRITE_TIMEOUT_MS")
        .env_remove("RUST_LOG")
        .timeout(Duration::from_secs(20));
    cmd
}

/// Run `chat-probe listen --url <url>` on a blocking thread
pub async fn run_listen(url: String, extra: &[&str]) -> std::process::Output {
    run_listen_with_env(url, extra, &[]).await
}

/// Same as [`run_listen`] with extra environment variables set
pub async fn run_listen_with_env(
    url: String,
    extra: &[&str],
    env: &[(&str, &str)],
) -> std::process::Output {
    let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();
    let env: Vec<(String, String)> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    tokio::task::spawn_blocking(move || {
        let home = TempDir::new().unwrap();
        probe_cmd(&home)
            .envs(env)
            .arg("listen")
            .arg("--url")
            .arg(url)
            .args(extra)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}
