//! Plugins and the plugin registry.
//!
//! A plugin is any object implementing [`Plugin`]: an identifier, some
//! metadata, three string maps and a set of event handlers that all
//! default to no-ops. Plugins are shared (`Arc`) so dispatch can
//! iterate a snapshot while handlers call back into the bot; mutable
//! plugin state therefore lives behind interior mutability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bot::Bot;
use crate::error::{is_identifier, PluginError};
use crate::event::Event;

/// Descriptive plugin metadata, reported by `plugin-info`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginMetadata {
    /// Human readable name.
    pub name: String,
    /// Author of the plugin.
    pub author: String,
    /// License of the plugin.
    pub license: String,
    /// Short summary.
    pub summary: String,
    /// Version string.
    pub version: String,
}

/// The plugin interface.
///
/// Handlers receive the bot and the event that triggered them; the
/// event's kind is guaranteed to match the handler (a `handle_join`
/// only ever sees `EventKind::Join`). Errors are logged by the
/// dispatcher and never interrupt delivery to other plugins.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique identifier of the plugin.
    fn id(&self) -> &str;

    /// Plugin metadata.
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    /// Configuration options.
    fn options(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Replace the configuration options.
    fn set_options(&self, _options: HashMap<String, String>) {}

    /// Format strings.
    fn formats(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Replace the format strings.
    fn set_formats(&self, _formats: HashMap<String, String>) {}

    /// Paths the plugin may use.
    fn paths(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Replace the paths.
    fn set_paths(&self, _paths: HashMap<String, String>) {}

    /// Called right after the plugin was loaded.
    async fn handle_load(&self, _bot: &Bot) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before the plugin is unloaded.
    async fn handle_unload(&self, _bot: &Bot) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the plugin is asked to reload.
    async fn handle_reload(&self, _bot: &Bot) -> anyhow::Result<()> {
        Ok(())
    }

    /// A message addressed to this plugin via the command character.
    async fn handle_command(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A server completed identification.
    async fn handle_connect(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A server lost its connection.
    async fn handle_disconnect(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// An invite was received.
    async fn handle_invite(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// Someone joined a channel.
    async fn handle_join(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// Someone was kicked.
    async fn handle_kick(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A regular message.
    async fn handle_message(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A CTCP ACTION.
    async fn handle_me(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A mode change.
    async fn handle_mode(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A NAMES listing completed.
    async fn handle_names(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A nickname change.
    async fn handle_nick(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A notice.
    async fn handle_notice(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// Someone left a channel.
    async fn handle_part(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A topic change.
    async fn handle_topic(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    /// A WHOIS reply completed.
    async fn handle_whois(&self, _bot: &Bot, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Produces plugin instances from an identifier and optional path.
///
/// Loaders are consulted in registration order; the first one that
/// returns a plugin wins. Returning `None` passes the request on.
pub trait PluginLoader: Send + Sync {
    /// Try to open a plugin.
    fn open(&self, id: &str, path: Option<&str>) -> Option<Arc<dyn Plugin>>;
}

/// Owns the loaded plugins and the loader chain.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    loaders: Vec<Box<dyn PluginLoader>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader at the end of the chain.
    pub fn add_loader(&mut self, loader: Box<dyn PluginLoader>) {
        self.loaders.push(loader);
    }

    /// Loaded plugins in registration order.
    pub fn list(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Snapshot of the loaded plugins, for iteration during dispatch.
    pub fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }

    /// Whether a plugin with this identifier is loaded.
    pub fn has(&self, id: &str) -> bool {
        self.plugins.iter().any(|p| p.id() == id)
    }

    /// Find a loaded plugin.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.id() == id).cloned()
    }

    /// Find a loaded plugin or fail with `not_found`.
    pub fn require(&self, id: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        self.get(id).ok_or(PluginError::NotFound)
    }

    /// Register an already constructed plugin.
    pub fn add(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        if !is_identifier(plugin.id()) {
            return Err(PluginError::InvalidIdentifier);
        }
        if self.has(plugin.id()) {
            return Err(PluginError::AlreadyExists);
        }

        self.plugins.push(plugin);
        Ok(())
    }

    /// Remove a plugin from the registry.
    pub fn remove(&mut self, id: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        let index = self
            .plugins
            .iter()
            .position(|p| p.id() == id)
            .ok_or(PluginError::NotFound)?;

        Ok(self.plugins.remove(index))
    }

    /// Ask the loader chain for a plugin instance.
    pub fn open(&self, id: &str, path: Option<&str>) -> Option<Arc<dyn Plugin>> {
        self.loaders.iter().find_map(|l| l.open(id, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct MemoryPlugin {
        id: String,
        options: Mutex<HashMap<String, String>>,
    }

    impl MemoryPlugin {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(MemoryPlugin {
                id: id.to_owned(),
                options: Mutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait]
    impl Plugin for MemoryPlugin {
        fn id(&self) -> &str {
            &self.id
        }

        fn options(&self) -> HashMap<String, String> {
            self.options.lock().unwrap().clone()
        }

        fn set_options(&self, options: HashMap<String, String>) {
            *self.options.lock().unwrap() = options;
        }
    }

    struct MemoryLoader {
        known: Vec<String>,
    }

    impl PluginLoader for MemoryLoader {
        fn open(&self, id: &str, _path: Option<&str>) -> Option<Arc<dyn Plugin>> {
            if self.known.iter().any(|k| k == id) {
                Some(MemoryPlugin::new(id))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_registration_order_and_duplicates() {
        let mut registry = PluginRegistry::new();

        registry.add(MemoryPlugin::new("ask")).unwrap();
        registry.add(MemoryPlugin::new("reply")).unwrap();

        let ids: Vec<&str> = registry.list().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["ask", "reply"]);

        assert_eq!(
            registry.add(MemoryPlugin::new("ask")),
            Err(PluginError::AlreadyExists)
        );
        assert_eq!(
            registry.add(MemoryPlugin::new("bad id")),
            Err(PluginError::InvalidIdentifier)
        );
    }

    #[test]
    fn test_remove() {
        let mut registry = PluginRegistry::new();
        registry.add(MemoryPlugin::new("ask")).unwrap();

        assert!(registry.remove("ask").is_ok());
        assert!(matches!(registry.remove("ask"), Err(PluginError::NotFound)));
    }

    #[test]
    fn test_loader_chain_first_wins() {
        let mut registry = PluginRegistry::new();
        registry.add_loader(Box::new(MemoryLoader {
            known: vec!["ask".into()],
        }));
        registry.add_loader(Box::new(MemoryLoader {
            known: vec!["ask".into(), "reply".into()],
        }));

        assert!(registry.open("ask", None).is_some());
        assert!(registry.open("reply", None).is_some());
        assert!(registry.open("missing", None).is_none());
    }

    #[test]
    fn test_options_round_trip() {
        let plugin = MemoryPlugin::new("ask");
        let mut options = HashMap::new();
        options.insert("greeting".to_owned(), "hello".to_owned());

        plugin.set_options(options.clone());
        assert_eq!(plugin.options(), options);
    }
}
