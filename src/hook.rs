//! External hooks.
//!
//! A hook is an executable invoked with the event name and the event
//! fields as positional arguments. Its standard output is captured
//! line by line and logged at info level; the exit status is ignored.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::error::{is_identifier, HookError};

/// One registered hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hook {
    id: String,
    path: String,
}

impl Hook {
    /// Create a hook, validating the identifier and path.
    pub fn new(id: &str, path: &str) -> Result<Self, HookError> {
        if !is_identifier(id) {
            return Err(HookError::InvalidIdentifier);
        }
        if path.is_empty() {
            return Err(HookError::InvalidPath);
        }

        Ok(Hook {
            id: id.to_owned(),
            path: path.to_owned(),
        })
    }

    /// The hook identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path to the executable.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Spawn the executable and wait for it to finish.
    ///
    /// Everything the hook prints on stdout is logged. Spawn failures
    /// are reported as `exec_error`; a non-zero exit status is not an
    /// error.
    pub async fn exec(&self, args: &[String]) -> Result<(), HookError> {
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|_| HookError::ExecError)?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                info!(hook = %self.id, "{}", line);
            }
        }

        let _ = child.wait().await;
        Ok(())
    }
}

/// Owns the registered hooks, in registration order.
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered hooks in registration order.
    pub fn list(&self) -> &[Hook] {
        &self.hooks
    }

    /// Snapshot of the hooks, for iteration during dispatch.
    pub fn snapshot(&self) -> Vec<Hook> {
        self.hooks.clone()
    }

    /// Whether a hook with this identifier is registered.
    pub fn has(&self, id: &str) -> bool {
        self.hooks.iter().any(|h| h.id == id)
    }

    /// Register a hook. Duplicates (same id and path) are rejected.
    pub fn add(&mut self, hook: Hook) -> Result<(), HookError> {
        if self.hooks.contains(&hook) {
            return Err(HookError::AlreadyExists);
        }

        self.hooks.push(hook);
        Ok(())
    }

    /// Remove the hook with this identifier.
    pub fn remove(&mut self, id: &str) -> Result<Hook, HookError> {
        let index = self
            .hooks
            .iter()
            .position(|h| h.id == id)
            .ok_or(HookError::NotFound)?;

        Ok(self.hooks.remove(index))
    }

    /// Drop all hooks.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(Hook::new("notify", "/usr/local/bin/notify").is_ok());
        assert_eq!(
            Hook::new("bad id", "/bin/true").unwrap_err(),
            HookError::InvalidIdentifier
        );
        assert_eq!(Hook::new("notify", "").unwrap_err(), HookError::InvalidPath);
    }

    #[test]
    fn test_registry_duplicates() {
        let mut registry = HookRegistry::new();
        registry.add(Hook::new("notify", "/bin/true").unwrap()).unwrap();

        assert_eq!(
            registry.add(Hook::new("notify", "/bin/true").unwrap()),
            Err(HookError::AlreadyExists)
        );

        // Same id with a different path is a distinct hook.
        assert!(registry.add(Hook::new("notify", "/bin/false").unwrap()).is_ok());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut registry = HookRegistry::new();
        registry.add(Hook::new("notify", "/bin/true").unwrap()).unwrap();

        assert!(registry.remove("notify").is_ok());
        assert_eq!(registry.remove("notify"), Err(HookError::NotFound));
    }

    #[tokio::test]
    async fn test_exec_missing_binary() {
        let hook = Hook::new("ghost", "/nonexistent/hook").unwrap();
        assert_eq!(
            hook.exec(&["onConnect".into(), "local".into()]).await,
            Err(HookError::ExecError)
        );
    }

    #[tokio::test]
    async fn test_exec_ignores_exit_status() {
        let hook = Hook::new("fail", "/bin/false").unwrap();
        assert_eq!(hook.exec(&["onConnect".into(), "local".into()]).await, Ok(()));
    }
}
