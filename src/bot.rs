//! The bot: registry owner and event loop.
//!
//! The bot owns the four registries (servers, plugins, rules, hooks)
//! and the set of ready control clients. Its run loop serialises
//! everything: events coming from server drivers and requests coming
//! from transport clients are handled one at a time, so dispatch of
//! event N completes before event N+1 starts.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::event::{Event, EventKind};
use crate::hook::HookRegistry;
use crate::plugin::PluginRegistry;
use crate::rule::{RuleAction, RuleSet};
use crate::server::{Server, ServerRegistry};
use crate::transport::client::ClientHandle;
use crate::transport::{command, TransportServer};
use crate::error::{is_identifier, Error, PluginError};

/// Messages from server driver tasks to the bot loop.
pub(crate) enum BotSignal {
    /// A server produced an event.
    Event(Arc<Server>, EventKind),
    /// A driver terminated for good; the server leaves the registry.
    Terminated(String),
}

/// Messages from transport client tasks to the bot loop.
pub(crate) enum ControlMessage {
    /// A client finished its handshake and accepts broadcasts.
    Register(ClientHandle),
    /// A ready client sent a command.
    Request(ClientHandle, Value),
    /// A client went away.
    Closed(u64),
}

enum LoopItem {
    Signal(BotSignal),
    Control(ControlMessage),
}

/// Classify a message against one plugin: `Some(rest)` when it is a
/// command addressed to the plugin through the command character,
/// `None` when it is a plain message.
///
/// `!ask` alone addresses plugin `ask` with an empty message; `!ask
/// hello` addresses it with `hello`; `!ask123` does not address it at
/// all.
pub(crate) fn classify_command(
    message: &str,
    command_char: &str,
    plugin_id: &str,
) -> Option<String> {
    if command_char.is_empty() {
        return None;
    }

    let full = format!("{}{}", command_char, plugin_id);

    match message.find([' ', '\t']) {
        None => (message == full).then(String::new),
        Some(pos) => {
            (message[..pos] == full).then(|| message[pos + 1..].to_owned())
        }
    }
}

/// The daemon core.
pub struct Bot {
    servers: ServerRegistry,
    plugins: PluginRegistry,
    rules: RuleSet,
    hooks: HookRegistry,
    clients: HashMap<u64, ClientHandle>,
    signal_rx: UnboundedReceiver<BotSignal>,
    control_rx: UnboundedReceiver<ControlMessage>,
    control_tx: UnboundedSender<ControlMessage>,
}

impl Bot {
    /// Create an empty bot.
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Bot {
            servers: ServerRegistry::new(signal_tx),
            plugins: PluginRegistry::new(),
            rules: RuleSet::new(),
            hooks: HookRegistry::new(),
            clients: HashMap::new(),
            signal_rx,
            control_rx,
            control_tx,
        }
    }

    /// The server registry.
    pub fn servers(&self) -> &ServerRegistry {
        &self.servers
    }

    /// The server registry, mutable.
    pub fn servers_mut(&mut self) -> &mut ServerRegistry {
        &mut self.servers
    }

    /// The plugin registry.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// The plugin registry, mutable.
    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    /// The rule list.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The rule list, mutable.
    pub fn rules_mut(&mut self) -> &mut RuleSet {
        &mut self.rules
    }

    /// The hook registry.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// The hook registry, mutable.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Start accepting control clients on the given transport.
    pub fn attach_transport(&self, transport: TransportServer) {
        transport.spawn(self.control_tx.clone());
    }

    /// Add a ready client to the broadcast set.
    pub fn register_client(&mut self, client: ClientHandle) {
        self.clients.insert(client.client_id(), client);
    }

    /// Load a plugin through the loader chain.
    pub async fn load_plugin(&mut self, id: &str, path: Option<&str>) -> Result<(), Error> {
        if !is_identifier(id) {
            return Err(PluginError::InvalidIdentifier.into());
        }
        if self.plugins.has(id) {
            return Err(PluginError::AlreadyExists.into());
        }

        let plugin = self
            .plugins
            .open(id, path)
            .ok_or(PluginError::NotFound)?;

        self.plugins.add(plugin.clone())?;

        if let Err(e) = plugin.handle_load(self).await {
            warn!(plugin = %id, "load failed: {:#}", e);
            let _ = self.plugins.remove(id);
            return Err(PluginError::ExecError.into());
        }

        info!(plugin = %id, "plugin loaded");
        Ok(())
    }

    /// Unload a plugin. The plugin stays loaded when its unload
    /// handler fails.
    pub async fn unload_plugin(&mut self, id: &str) -> Result<(), Error> {
        if !is_identifier(id) {
            return Err(PluginError::InvalidIdentifier.into());
        }

        let plugin = self.plugins.require(id)?;

        if let Err(e) = plugin.handle_unload(self).await {
            warn!(plugin = %id, "unload failed: {:#}", e);
            return Err(PluginError::ExecError.into());
        }

        self.plugins.remove(id)?;
        info!(plugin = %id, "plugin unloaded");
        Ok(())
    }

    /// Ask a plugin to reload itself.
    pub async fn reload_plugin(&mut self, id: &str) -> Result<(), Error> {
        if !is_identifier(id) {
            return Err(PluginError::InvalidIdentifier.into());
        }

        let plugin = self.plugins.require(id)?;

        if let Err(e) = plugin.handle_reload(self).await {
            warn!(plugin = %id, "reload failed: {:#}", e);
            return Err(PluginError::ExecError.into());
        }

        Ok(())
    }

    /// Run the bot until every channel is closed.
    pub async fn run(&mut self) {
        loop {
            let item = tokio::select! {
                signal = self.signal_rx.recv() => signal.map(LoopItem::Signal),
                control = self.control_rx.recv() => control.map(LoopItem::Control),
            };

            match item {
                Some(LoopItem::Signal(BotSignal::Event(server, kind))) => {
                    self.dispatch(&server, &kind).await;
                }
                Some(LoopItem::Signal(BotSignal::Terminated(id))) => {
                    info!(server = %id, "server removed");
                    self.servers.forget(&id);
                }
                Some(LoopItem::Control(ControlMessage::Register(client))) => {
                    info!(client = client.client_id(), "transport client ready");
                    self.register_client(client);
                }
                Some(LoopItem::Control(ControlMessage::Request(client, value))) => {
                    command::execute(self, &client, value).await;
                }
                Some(LoopItem::Control(ControlMessage::Closed(id))) => {
                    debug!(client = id, "transport client closed");
                    self.clients.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Send an event JSON to every ready client, tearing down clients
    /// whose writer is gone.
    fn broadcast(&mut self, json: &Value) {
        let dead: Vec<u64> = self
            .clients
            .iter()
            .filter(|(_, client)| !client.send(json.clone()))
            .map(|(id, _)| *id)
            .collect();

        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// Deliver one event: broadcast first, then rule-filtered plugins
    /// in registration order, then hooks in registration order.
    pub async fn dispatch(&mut self, server: &Arc<Server>, kind: &EventKind) {
        debug!(server = %server.id(), "event {}", kind.name());

        self.broadcast(&kind.to_json(server.id()));

        for plugin in self.plugins.snapshot() {
            // Messages are re-routed per plugin: a command prefix turns
            // onMessage into onCommand with the prefix stripped.
            let (event_name, routed) = match kind {
                EventKind::Message {
                    origin,
                    channel,
                    message,
                } => match classify_command(message, server.command_char(), plugin.id()) {
                    Some(rest) => (
                        "onCommand",
                        EventKind::Message {
                            origin: origin.clone(),
                            channel: channel.clone(),
                            message: rest,
                        },
                    ),
                    None => ("onMessage", kind.clone()),
                },
                _ => (kind.name(), kind.clone()),
            };

            let action = self.rules.resolve(
                server.id(),
                kind.rule_channel(),
                kind.rule_origin(),
                plugin.id(),
                event_name,
            );

            if action == RuleAction::Drop {
                debug!(plugin = %plugin.id(), "event skipped on match");
                continue;
            }

            let event = Event {
                server: server.clone(),
                kind: routed,
            };

            let result = match &event.kind {
                EventKind::Connect => plugin.handle_connect(self, &event).await,
                EventKind::Disconnect => plugin.handle_disconnect(self, &event).await,
                EventKind::Invite { .. } => plugin.handle_invite(self, &event).await,
                EventKind::Join { .. } => plugin.handle_join(self, &event).await,
                EventKind::Kick { .. } => plugin.handle_kick(self, &event).await,
                EventKind::Me { .. } => plugin.handle_me(self, &event).await,
                EventKind::Message { .. } => {
                    if event_name == "onCommand" {
                        plugin.handle_command(self, &event).await
                    } else {
                        plugin.handle_message(self, &event).await
                    }
                }
                EventKind::Mode { .. } => plugin.handle_mode(self, &event).await,
                EventKind::Names { .. } => plugin.handle_names(self, &event).await,
                EventKind::Nick { .. } => plugin.handle_nick(self, &event).await,
                EventKind::Notice { .. } => plugin.handle_notice(self, &event).await,
                EventKind::Part { .. } => plugin.handle_part(self, &event).await,
                EventKind::Topic { .. } => plugin.handle_topic(self, &event).await,
                EventKind::Whois(_) => plugin.handle_whois(self, &event).await,
            };

            if let Err(e) = result {
                warn!(plugin = %plugin.id(), "handler failed: {:#}", e);
            }
        }

        if let Some(args) = kind.hook_args(server.id()) {
            for hook in self.hooks.snapshot() {
                if let Err(e) = hook.exec(&args).await {
                    warn!(hook = %hook.id(), "{}", e);
                }
            }
        }
    }
}

impl Default for Bot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_exact_command() {
        assert_eq!(classify_command("!ask", "!", "ask"), Some(String::new()));
        assert_eq!(
            classify_command("!ask hello", "!", "ask"),
            Some("hello".to_owned())
        );
    }

    #[test]
    fn test_classify_rejects_prefixes() {
        // A longer word must not trigger the plugin.
        assert_eq!(classify_command("!ask123", "!", "ask"), None);
        assert_eq!(classify_command("!as", "!", "ask"), None);
        assert_eq!(classify_command("ask hello", "!", "ask"), None);
        assert_eq!(classify_command("!reply hi", "!", "ask"), None);
    }

    #[test]
    fn test_classify_preserves_rest() {
        assert_eq!(
            classify_command("!ask  two  spaces", "!", "ask"),
            Some(" two  spaces".to_owned())
        );
    }

    #[test]
    fn test_classify_multichar_command_char() {
        assert_eq!(
            classify_command("$$ask hi", "$$", "ask"),
            Some("hi".to_owned())
        );
        assert_eq!(classify_command("!ask hi", "$$", "ask"), None);
        assert_eq!(classify_command("!ask hi", "", "ask"), None);
    }
}
