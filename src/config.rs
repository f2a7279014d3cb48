//! Typed configuration.
//!
//! The daemon reads one JSON document describing servers, transports,
//! rules, hooks and plugins to load. The server description shares its
//! field names with the `server-connect` control command, so the same
//! validation runs in both places and surfaces the same error kinds.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::bot::Bot;
use crate::error::{Error, ServerError};
use crate::hook::Hook;
use crate::rule::Rule;
use crate::server::{Server, ServerConfig, ServerOptions};
use crate::session::ChannelRequest;
use crate::transport::{TransportServer, TransportSpec};

/// A channel entry of a server description.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ChannelSpec {
    /// The channel name.
    pub name: String,
    /// The optional channel password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Wire- and file-level description of a server.
///
/// All fields beyond `name` and `hostname` are optional and default
/// to the values of [`ServerConfig::new`].
#[derive(Clone, Debug, Default)]
pub struct ServerSpec {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u64>,
    pub password: Option<String>,
    pub nickname: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub ctcp_version: Option<String>,
    pub command_char: Option<String>,
    pub reconnect_delay: Option<u64>,
    pub ping_timeout: Option<u64>,
    pub ipv4: Option<bool>,
    pub ipv6: Option<bool>,
    pub ssl: Option<bool>,
    pub auto_rejoin: Option<bool>,
    pub auto_reconnect: Option<bool>,
    pub join_invite: Option<bool>,
    pub channels: Vec<ChannelSpec>,
}

fn take_str(object: &Value, key: &str, error: ServerError) -> Result<Option<String>, Error> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(error.into()),
    }
}

fn take_uint(object: &Value, key: &str, error: ServerError) -> Result<Option<u64>, Error> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| error.into()),
    }
}

fn take_bool(object: &Value, key: &str, error: ServerError) -> Result<Option<bool>, Error> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(error.into()),
    }
}

impl ServerSpec {
    /// Extract a spec from a JSON object, reporting a dedicated error
    /// kind per mistyped field.
    pub fn from_value(object: &Value) -> Result<Self, Error> {
        let channels = match object.get("channels") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| ServerError::InvalidChannel)?,
        };

        Ok(ServerSpec {
            name: take_str(object, "name", ServerError::InvalidIdentifier)?,
            hostname: take_str(object, "hostname", ServerError::InvalidHostname)?,
            port: take_uint(object, "port", ServerError::InvalidPort)?,
            password: take_str(object, "password", ServerError::InvalidPassword)?,
            nickname: take_str(object, "nickname", ServerError::InvalidNickname)?,
            username: take_str(object, "username", ServerError::InvalidUsername)?,
            realname: take_str(object, "realname", ServerError::InvalidRealname)?,
            ctcp_version: take_str(object, "ctcpVersion", ServerError::InvalidCtcpVersion)?,
            command_char: take_str(object, "commandChar", ServerError::InvalidCommandChar)?,
            reconnect_delay: take_uint(
                object,
                "reconnectDelay",
                ServerError::InvalidReconnectDelay,
            )?,
            ping_timeout: take_uint(object, "pingTimeout", ServerError::InvalidPingTimeout)?,
            ipv4: take_bool(object, "ipv4", ServerError::InvalidFamily)?,
            ipv6: take_bool(object, "ipv6", ServerError::InvalidFamily)?,
            ssl: take_bool(object, "ssl", ServerError::SslDisabled)?,
            auto_rejoin: take_bool(object, "autoRejoin", ServerError::InvalidMessage)?,
            auto_reconnect: take_bool(object, "autoReconnect", ServerError::InvalidMessage)?,
            join_invite: take_bool(object, "joinInvite", ServerError::InvalidMessage)?,
            channels,
        })
    }

    /// Turn the spec into a validated configuration plus the channels
    /// to request.
    pub fn into_config(self) -> Result<(ServerConfig, Vec<ChannelRequest>), Error> {
        let name = self.name.ok_or(ServerError::InvalidIdentifier)?;
        let hostname = self.hostname.ok_or(ServerError::InvalidHostname)?;

        let mut config = ServerConfig::new(&name, &hostname)?;

        if let Some(port) = self.port {
            config.port = u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or(ServerError::InvalidPort)?;
        }
        if let Some(password) = self.password {
            config.password = (!password.is_empty()).then_some(password);
        }
        if let Some(nickname) = self.nickname {
            config.nickname = nickname;
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(realname) = self.realname {
            config.realname = realname;
        }
        if let Some(ctcp_version) = self.ctcp_version {
            config.ctcp_version = ctcp_version;
        }
        if let Some(command_char) = self.command_char {
            config.command_char = command_char;
        }
        if let Some(reconnect_delay) = self.reconnect_delay {
            config.reconnect_delay = reconnect_delay;
        }
        if let Some(ping_timeout) = self.ping_timeout {
            config.ping_timeout = ping_timeout;
        }

        config.options = ServerOptions {
            ipv4: self.ipv4.unwrap_or(true),
            ipv6: self.ipv6.unwrap_or(true),
            tls: self.ssl.unwrap_or(false),
            auto_rejoin: self.auto_rejoin.unwrap_or(false),
            auto_reconnect: self.auto_reconnect.unwrap_or(false),
            join_invite: self.join_invite.unwrap_or(false),
        };

        config.validate()?;

        let channels = self
            .channels
            .into_iter()
            .map(|c| ChannelRequest {
                name: c.name,
                password: c.password,
            })
            .collect();

        Ok((config, channels))
    }
}

/// A hook entry.
#[derive(Clone, Debug, Deserialize)]
pub struct HookSpec {
    /// Hook identifier.
    pub id: String,
    /// Path to the executable.
    pub path: String,
}

/// A plugin to load at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginSpec {
    /// Plugin identifier, resolved through the loader chain.
    pub name: String,
    /// Optional explicit path handed to the loaders.
    #[serde(default)]
    pub path: Option<String>,
}

/// The whole configuration document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Servers to connect at startup.
    pub servers: Vec<Value>,
    /// Control-plane endpoints.
    pub transports: Vec<Value>,
    /// Initial rule list, in order.
    pub rules: Vec<Rule>,
    /// Hooks to register.
    pub hooks: Vec<HookSpec>,
    /// Plugins to load.
    pub plugins: Vec<PluginSpec>,
}

impl Config {
    /// Load a configuration document from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Apply the configuration to a bot.
    ///
    /// Invalid entries are logged and skipped so one bad server does
    /// not keep the rest of the daemon down.
    pub async fn apply(self, bot: &mut Bot) {
        for entry in self.servers {
            match build_server(&entry) {
                Ok(server) => {
                    if let Err(e) = bot.servers_mut().add(server) {
                        warn!("skipping server: {}", e);
                    }
                }
                Err(e) => warn!("skipping server: {}", e),
            }
        }

        for rule in self.rules {
            bot.rules_mut().append(rule);
        }

        for spec in self.hooks {
            match Hook::new(&spec.id, &spec.path) {
                Ok(hook) => {
                    if let Err(e) = bot.hooks_mut().add(hook) {
                        warn!(hook = %spec.id, "skipping hook: {}", e);
                    }
                }
                Err(e) => warn!(hook = %spec.id, "skipping hook: {}", e),
            }
        }

        for spec in self.plugins {
            if let Err(e) = bot.load_plugin(&spec.name, spec.path.as_deref()).await {
                warn!(plugin = %spec.name, "skipping plugin: {}", e);
            }
        }

        for entry in self.transports {
            let spec: TransportSpec = match serde_json::from_value(entry) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("skipping transport: {}", e);
                    continue;
                }
            };

            match TransportServer::bind(&spec).await {
                Ok(transport) => bot.attach_transport(transport),
                Err(e) => warn!("skipping transport: {}", e),
            }
        }
    }
}

/// Build a started-but-disconnected server from a JSON description.
pub fn build_server(entry: &Value) -> Result<std::sync::Arc<Server>, Error> {
    let (config, channels) = ServerSpec::from_value(entry)?.into_config()?;
    let server = Server::new(config)?;

    for channel in channels {
        server.join(&channel.name, channel.password.as_deref())?;
    }

    Ok(server)
}
