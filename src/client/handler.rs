//! Socket event types and the handler seam

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Line written to the console when the socket closes
pub const CLOSED_LINE: &str = "socket closed";

/// Close code used when the connection ended without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code used when the close frame carried no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Data carried by one WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Binary(_) => "binary",
        }
    }
}

/// Why and how a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close status code (1006 when no close frame was exchanged)
    pub code: u16,

    /// Close reason from the peer, or a description of the failure
    pub reason: String,

    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    /// Peer sent a close frame
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    /// Connection ended without a closing handshake
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Receives the events of one connection
///
/// Calls are made sequentially from the connection task, so implementations
/// need no internal synchronization.
#[async_trait]
pub trait SocketHandler: Send {
    /// A data message arrived
    async fn on_message(&mut self, payload: Payload) -> Result<()>;

    /// The connection terminated; no further calls follow
    async fn on_close(&mut self, event: &CloseEvent) -> Result<()>;
}

/// Writes raw payloads and the close line to a console stream
pub struct ConsoleHandler<W> {
    writer: W,
}

impl ConsoleHandler<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleHandler<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_line(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> SocketHandler for ConsoleHandler<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn on_message(&mut self, payload: Payload) -> Result<()> {
        self.write_line(payload.as_bytes()).await
    }

    async fn on_close(&mut self, _event: &CloseEvent) -> Result<()> {
        self.write_line(CLOSED_LINE.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bytes() {
        assert_eq!(Payload::Text("hello".into()).as_bytes(), b"hello");
        assert_eq!(Payload::Binary(vec![0, 159, 146]).len(), 3);
        assert!(Payload::Text(String::new()).is_empty());
        assert_eq!(Payload::Binary(vec![]).kind(), "binary");
    }

    #[test]
    fn test_close_event_constructors() {
        let clean = CloseEvent::clean(1000, "bye");
        assert!(clean.was_clean);
        assert_eq!(clean.code, 1000);

        let abnormal = CloseEvent::abnormal("connection reset");
        assert!(!abnormal.was_clean);
        assert_eq!(abnormal.code, CLOSE_ABNORMAL);
    }

    #[tokio::test]
    async fn test_console_prints_payload_verbatim() {
        let mut console = ConsoleHandler::new(Vec::new());
        console
            .on_message(Payload::Text(r#"{"type":"chat_started"}"#.into()))
            .await
            .unwrap();
        console
            .on_message(Payload::Binary(b"raw\x01bytes".to_vec()))
            .await
            .unwrap();

        assert_eq!(
            console.into_inner(),
            b"{\"type\":\"chat_started\"}\nraw\x01bytes\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_console_close_line() {
        let mut console = ConsoleHandler::new(Vec::new());
        console
            .on_close(&CloseEvent::clean(1001, "going away"))
            .await
            .unwrap();

        assert_eq!(console.into_inner(), b"socket closed\n".to_vec());
    }
}
