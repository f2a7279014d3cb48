//! Error types for the bot daemon.
//!
//! Every subsystem has its own error enum. Each kind carries a stable
//! numeric code and a category string; the `(code, category, message)`
//! triple is what gets serialised onto the control-plane wire, so codes
//! must never be renumbered.

use thiserror::Error;

/// Convenience type alias for Results using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the bot itself, mostly at the control-plane boundary.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BotError {
    /// The connected peer is not a bot daemon.
    #[error("connected peer is not a slirc-bot daemon")]
    NotDaemon,

    /// The peer version is too different to talk to.
    #[error("incompatible version")]
    IncompatibleVersion,

    /// Authentication was required but not issued.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication was invalid.
    #[error("invalid authentication")]
    InvalidAuth,

    /// The message was not a valid JSON object.
    #[error("invalid message")]
    InvalidMessage,

    /// The specified command does not exist.
    #[error("invalid command")]
    InvalidCommand,

    /// The command requires more arguments.
    #[error("incomplete message")]
    IncompleteMessage,
}

/// Errors related to an IRC server or one of its operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerError {
    /// The specified server was not found.
    #[error("server not found")]
    NotFound,

    /// The specified identifier is invalid.
    #[error("invalid server identifier")]
    InvalidIdentifier,

    /// The server is not connected.
    #[error("server is not connected")]
    NotConnected,

    /// The server is already connected.
    #[error("server is already connected")]
    AlreadyConnected,

    /// A server with the same name already exists.
    #[error("server already exists")]
    AlreadyExists,

    /// The specified port number is invalid.
    #[error("invalid port number specified")]
    InvalidPort,

    /// The specified reconnect delay is invalid.
    #[error("invalid reconnect delay number")]
    InvalidReconnectDelay,

    /// The specified hostname was invalid.
    #[error("invalid hostname")]
    InvalidHostname,

    /// The channel was empty or invalid.
    #[error("invalid or empty channel")]
    InvalidChannel,

    /// The mode given was empty.
    #[error("invalid or empty mode")]
    InvalidMode,

    /// The nickname was empty or invalid.
    #[error("invalid nickname")]
    InvalidNickname,

    /// The username was empty or invalid.
    #[error("invalid username")]
    InvalidUsername,

    /// The realname was empty or invalid.
    #[error("invalid realname")]
    InvalidRealname,

    /// Invalid password property.
    #[error("invalid password")]
    InvalidPassword,

    /// Invalid ping timeout.
    #[error("invalid ping timeout")]
    InvalidPingTimeout,

    /// Invalid CTCP VERSION string.
    #[error("invalid CTCP VERSION")]
    InvalidCtcpVersion,

    /// Invalid command character.
    #[error("invalid command character")]
    InvalidCommandChar,

    /// Message (PRIVMSG) was invalid.
    #[error("invalid message")]
    InvalidMessage,

    /// TLS was requested but is disabled in this build.
    #[error("ssl is disabled")]
    SslDisabled,

    /// At least one of IPv4 or IPv6 must be enabled.
    #[error("invalid family")]
    InvalidFamily,
}

/// Errors related to plugins.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PluginError {
    /// The specified identifier is invalid.
    #[error("invalid plugin identifier")]
    InvalidIdentifier,

    /// The specified plugin is not found.
    #[error("plugin not found")]
    NotFound,

    /// The plugin was unable to run the function.
    #[error("plugin exec error")]
    ExecError,

    /// The plugin is already loaded.
    #[error("plugin already exists")]
    AlreadyExists,
}

/// Errors related to rules.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RuleError {
    /// Invalid action given.
    #[error("invalid rule action")]
    InvalidAction,

    /// Invalid rule index.
    #[error("invalid rule index")]
    InvalidIndex,
}

/// Errors related to hooks.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HookError {
    /// The specified identifier is invalid.
    #[error("invalid hook identifier")]
    InvalidIdentifier,

    /// The specified hook is not found.
    #[error("hook not found")]
    NotFound,

    /// Invalid path given.
    #[error("invalid path given")]
    InvalidPath,

    /// The hook was unable to run.
    #[error("hook exec error")]
    ExecError,

    /// The hook is already registered.
    #[error("hook already exists")]
    AlreadyExists,
}

/// Errors related to the control-plane transport.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Authentication was required but not issued.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication was invalid.
    #[error("invalid authentication")]
    InvalidAuth,

    /// The specified port number is invalid.
    #[error("invalid port number specified")]
    InvalidPort,

    /// The specified bind address is invalid.
    #[error("invalid address")]
    InvalidAddress,

    /// The specified hostname was invalid.
    #[error("invalid hostname")]
    InvalidHostname,

    /// Invalid socket path given.
    #[error("invalid path")]
    InvalidPath,

    /// At least one of IPv4 or IPv6 must be enabled.
    #[error("invalid family")]
    InvalidFamily,

    /// The certificate file could not be loaded.
    #[error("invalid certificate")]
    InvalidCertificate,

    /// The private key file could not be loaded.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// TLS was requested but is disabled in this build.
    #[error("ssl is disabled")]
    SslDisabled,

    /// The requested transport is not supported on this platform.
    #[error("not supported")]
    NotSupported,
}

macro_rules! impl_wire {
    ($ty:ident, $category:literal, [$($variant:ident = $code:literal),+ $(,)?]) => {
        impl $ty {
            /// Stable numeric code of this kind.
            pub fn code(self) -> u16 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            /// Category string of this subsystem.
            pub fn category(self) -> &'static str {
                $category
            }
        }
    };
}

impl_wire!(BotError, "bot", [
    NotDaemon = 1,
    IncompatibleVersion = 2,
    AuthRequired = 3,
    InvalidAuth = 4,
    InvalidMessage = 5,
    InvalidCommand = 6,
    IncompleteMessage = 7,
]);

impl_wire!(ServerError, "server", [
    NotFound = 1,
    InvalidIdentifier = 2,
    NotConnected = 3,
    AlreadyConnected = 4,
    AlreadyExists = 5,
    InvalidPort = 6,
    InvalidReconnectDelay = 7,
    InvalidHostname = 8,
    InvalidChannel = 9,
    InvalidMode = 10,
    InvalidNickname = 11,
    InvalidUsername = 12,
    InvalidRealname = 13,
    InvalidPassword = 14,
    InvalidPingTimeout = 15,
    InvalidCtcpVersion = 16,
    InvalidCommandChar = 17,
    InvalidMessage = 18,
    SslDisabled = 19,
    InvalidFamily = 20,
]);

impl_wire!(PluginError, "plugin", [
    InvalidIdentifier = 1,
    NotFound = 2,
    ExecError = 3,
    AlreadyExists = 4,
]);

impl_wire!(RuleError, "rule", [
    InvalidAction = 1,
    InvalidIndex = 2,
]);

impl_wire!(HookError, "hook", [
    InvalidIdentifier = 1,
    NotFound = 2,
    InvalidPath = 3,
    ExecError = 4,
    AlreadyExists = 5,
]);

impl_wire!(TransportError, "transport", [
    AuthRequired = 1,
    InvalidAuth = 2,
    InvalidPort = 3,
    InvalidAddress = 4,
    InvalidHostname = 5,
    InvalidPath = 6,
    InvalidFamily = 7,
    InvalidCertificate = 8,
    InvalidPrivateKey = 9,
    SslDisabled = 10,
    NotSupported = 11,
]);

/// Any subsystem error, as surfaced to the control-plane requester.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Bot(#[from] BotError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Stable numeric code of this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::Bot(e) => e.code(),
            Self::Server(e) => e.code(),
            Self::Plugin(e) => e.code(),
            Self::Rule(e) => e.code(),
            Self::Hook(e) => e.code(),
            Self::Transport(e) => e.code(),
        }
    }

    /// Category string of the originating subsystem.
    pub fn category(self) -> &'static str {
        match self {
            Self::Bot(e) => e.category(),
            Self::Server(e) => e.category(),
            Self::Plugin(e) => e.category(),
            Self::Rule(e) => e.category(),
            Self::Hook(e) => e.category(),
            Self::Transport(e) => e.category(),
        }
    }

    /// Serialise the error as a control-plane reply object.
    ///
    /// The `command` field is attached when the failing command is known.
    pub fn to_wire(self, command: Option<&str>) -> serde_json::Value {
        let mut object = serde_json::json!({
            "error": self.code(),
            "errorCategory": self.category(),
            "errorMessage": self.to_string(),
        });

        if let Some(name) = command {
            object["command"] = serde_json::Value::String(name.to_owned());
        }

        object
    }
}

/// Checks that a string is a valid identifier for servers, plugins and
/// hooks: one or more characters from `[A-Za-z0-9_-]`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_triple() {
        let err = Error::from(TransportError::AuthRequired);

        assert_eq!(err.code(), 1);
        assert_eq!(err.category(), "transport");
        assert_eq!(err.to_string(), "authentication required");
    }

    #[test]
    fn test_wire_object_with_command() {
        let json = Error::from(ServerError::InvalidChannel).to_wire(Some("server-join"));

        assert_eq!(json["error"], 9);
        assert_eq!(json["errorCategory"], "server");
        assert_eq!(json["errorMessage"], "invalid or empty channel");
        assert_eq!(json["command"], "server-join");
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ServerError::SslDisabled.code(), 19);
        assert_eq!(ServerError::InvalidFamily.code(), 20);
        assert_eq!(BotError::InvalidCommand.code(), 6);
        assert_eq!(RuleError::InvalidIndex.code(), 2);
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("local"));
        assert!(is_identifier("my_server-2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("no spaces"));
        assert!(!is_identifier("no!bang"));
    }
}
