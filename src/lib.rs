//! # slirc-bot
//!
//! An event-driven IRC client/bot framework: one long-lived server session
//! with protocol framing and parsing, per-channel user tracking across mode
//! changes and renames, paced outbound flood control, a typed event
//! dispatcher, and DCC file/chat negotiation over CTCP.
//!
//! ## Features
//!
//! - Connection lifecycle: registration handshake, nick-collision retries,
//!   TLS with optional verification bypass, reconnect and orderly teardown
//! - Line parser for RFC 1459/2812 traffic, including CTCP and DCC frames
//! - Channel registry with operator/voice prefixes kept current by the
//!   mode processor
//! - Outbound queue with priority prepend and optional duplicate compaction
//! - Handler trait with capability-scoped event delivery and a default
//!   handler for the replies the RFC expects
//! - One-shot RFC 1413 ident responder
//!
//! ## Quick Start
//!
//! ```no_run
//! use slirc_bot::{Client, ConnectionSettings, Event, Handler};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_event(&self, bot: &Client, event: &Event) {
//!         if let Event::Message { channel, text, .. } = event {
//!             let _ = bot.send_message(channel, text);
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), slirc_bot::BotError> {
//!     let bot = Client::new();
//!     bot.set_name("echobot");
//!     bot.add_handler(Echo);
//!     bot.connect(ConnectionSettings::new("irc.libera.chat")).await?;
//!     bot.join_channel("#slirc")?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod casemap;
pub mod channel;
pub mod client;
pub mod config;
pub mod ctcp;
pub mod dcc;
pub mod error;
pub mod event;
pub mod handler;
pub mod ident;

mod modes;
mod parser;
mod queue;
mod transport;

pub use self::casemap::{irc_eq, irc_to_lower};
pub use self::channel::User;
pub use self::client::Client;
pub use self::config::ConnectionSettings;
pub use self::ctcp::CTCP_DELIMITER;
pub use self::dcc::{
    ip_to_long, long_to_ip, DccChat, DccChatRequest, DccTransfer, TransferDirection,
    TransferState,
};
pub use self::error::{BotError, Result};
pub use self::event::{Event, EventCategory, Source};
pub use self::handler::{Capabilities, DefaultHandler, Handler};
pub use self::ident::IDENT_PORT;
pub use self::transport::MAX_LINE_LEN;
