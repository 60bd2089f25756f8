//! WebSocket client module
//!
//! Opens a single outbound connection and delivers its events to a
//! [`SocketHandler`]:
//! - one `on_message` call per data message, in arrival order
//! - exactly one `on_close` call when the connection terminates

mod handler;
mod socket;

pub use handler::*;
pub use socket::*;
