//! # slirc-bot
//!
//! An IRC bot daemon. The bot keeps any number of IRC server
//! connections alive, reconnects them when they drop, and turns the
//! protocol traffic into high-level events. Every event is broadcast
//! to connected control clients as JSON, then delivered to plugins and
//! external hook executables, filtered by an ordered accept/drop rule
//! list.
//!
//! ## Architecture
//!
//! - [`message`] and [`codec`] cover the IRC line grammar and framing.
//! - [`session`] is the sans-IO per-server state machine; [`server`]
//!   wraps it with the socket, timers and the reconnect policy.
//! - [`rule`] resolves (server, channel, origin, plugin, event) probes
//!   to accept or drop, last matching rule wins.
//! - [`bot`] owns the registries and serialises event dispatch:
//!   broadcast first, then plugins, then hooks.
//! - [`transport`] is the JSON control plane over TCP, TLS or local
//!   sockets.
//!
//! ## Quick start
//!
//! ```no_run
//! use slirc_bot::bot::Bot;
//! use slirc_bot::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut bot = Bot::new();
//!
//!     let mut config = ServerConfig::new("local", "irc.example.org").unwrap();
//!     config.options.auto_reconnect = true;
//!
//!     let server = Server::new(config).unwrap();
//!     server.join("#test", None).unwrap();
//!     bot.servers_mut().add(server).unwrap();
//!
//!     bot.run().await;
//! }
//! ```

#![deny(clippy::all)]

pub mod bot;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod hook;
pub mod isupport;
pub mod message;
pub mod plugin;
pub mod rule;
pub mod server;
pub mod session;
pub mod transport;

pub use self::bot::Bot;
pub use self::config::Config;
pub use self::error::{
    BotError, Error, HookError, PluginError, Result, RuleError, ServerError, TransportError,
};
pub use self::event::{Event, EventKind, WhoisInfo};
pub use self::hook::{Hook, HookRegistry};
pub use self::isupport::PrefixMap;
pub use self::message::Message;
pub use self::plugin::{Plugin, PluginLoader, PluginMetadata, PluginRegistry};
pub use self::rule::{Rule, RuleAction, RuleSet};
pub use self::server::{Server, ServerConfig, ServerOptions, ServerRegistry};
pub use self::session::{ChannelRequest, Phase, Session};
pub use self::transport::{ClientHandle, TransportServer, TransportSpec};
