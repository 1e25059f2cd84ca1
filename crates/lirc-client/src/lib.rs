//! Async client for the LIRC daemon (`lircd`).
//!
//! This crate speaks lircd's line-based socket protocol over a Unix socket or
//! TCP. It sends commands, correlates their replies, and delivers the
//! daemon's unsolicited notifications (decoded button presses, SIGHUP
//! reloads) on an event channel.
//!
//! # Architecture
//!
//! - [`protocol`]: command serialization and the packet reader state machine
//! - [`transport`]: endpoints, socket setup and the line codec
//! - [`client`]: the session, its background reader task and the command API
//! - [`error`]: error types and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use lirc_client::{ClientConfig, Endpoint, LircClient, LircEvent};
//!
//! # async fn example() -> Result<(), lirc_client::Error> {
//! let endpoint: Endpoint = "/var/run/lirc/lircd".parse()?;
//! let (client, mut events) = LircClient::connect_to(&endpoint, ClientConfig::default()).await?;
//!
//! println!("lircd {}", client.get_version().await?);
//! client.send_once("Samsung", "KEY_POWER", 0).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let LircEvent::ButtonReceived(press) = event {
//!         println!("{} on {}", press.button.button, press.button.remote_control);
//!     }
//! }
//!
//! client.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
mod mailbox;
pub mod protocol;
pub mod transport;

// Re-export main client types
pub use client::{
    ClientConfig, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SEND_TIMEOUT, EventReceiver, EventSender,
    LircClient, LircEvent,
};

// Re-export error types
pub use error::{Error, Result};

// Re-export protocol types
pub use protocol::{
    ButtonInfo, Command, DecodedButton, Packet, PacketReader, ProtocolError, ResponsePacket,
};

// Re-export transport types
pub use transport::{
    CodecError, DEFAULT_SOCKET_PATH, DEFAULT_TCP_PORT, DaemonStream, Endpoint, LircCodec,
};
