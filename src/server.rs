//! IRC server handles and their connection driver.
//!
//! A [`Server`] couples an immutable [`ServerConfig`] with the sans-IO
//! [`Session`] behind a mutex. The driver task owns the socket: it
//! connects (with the reconnect policy), pumps incoming lines through
//! the session and drains the session's outbound queue one line at a
//! time, so outbound order is FIFO with a single send in flight.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::BotSignal;
use crate::connection::{Connector, IrcStream};
use crate::error::{is_identifier, ServerError};
use crate::event::EventKind;
use crate::message::Message;
use crate::session::{ChannelRequest, Phase, Session};

/// Option flags of a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    /// Connect using IPv4.
    pub ipv4: bool,
    /// Connect using IPv6.
    pub ipv6: bool,
    /// Use TLS.
    pub tls: bool,
    /// Rejoin a channel after being kicked.
    pub auto_rejoin: bool,
    /// Reconnect after losing the connection.
    pub auto_reconnect: bool,
    /// Join channels we are invited to.
    pub join_invite: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            ipv4: true,
            ipv6: true,
            tls: false,
            auto_rejoin: false,
            auto_reconnect: false,
            join_invite: false,
        }
    }
}

/// Static configuration of a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique identifier.
    pub id: String,
    /// Hostname to connect to.
    pub hostname: String,
    /// Port, 1..=65535.
    pub port: u16,
    /// Optional connection password.
    pub password: Option<String>,
    /// Initial nickname.
    pub nickname: String,
    /// Username (ident).
    pub username: String,
    /// Real name.
    pub realname: String,
    /// Reply to CTCP VERSION queries; empty disables the reply.
    pub ctcp_version: String,
    /// Prefix that addresses plugins in channel messages.
    pub command_char: String,
    /// Delay between reconnect attempts, in seconds.
    pub reconnect_delay: u64,
    /// Inactivity deadline for connects and reads, in seconds.
    pub ping_timeout: u64,
    /// Option flags.
    pub options: ServerOptions,
}

impl ServerConfig {
    /// Create a configuration with defaults, validating identifier and
    /// hostname.
    pub fn new(id: &str, hostname: &str) -> Result<Self, ServerError> {
        if !is_identifier(id) {
            return Err(ServerError::InvalidIdentifier);
        }
        if hostname.is_empty() {
            return Err(ServerError::InvalidHostname);
        }

        Ok(ServerConfig {
            id: id.to_owned(),
            hostname: hostname.to_owned(),
            port: 6667,
            password: None,
            nickname: "slircbot".to_owned(),
            username: "slircbot".to_owned(),
            realname: "slirc bot".to_owned(),
            ctcp_version: "slirc-bot".to_owned(),
            command_char: "!".to_owned(),
            reconnect_delay: 30,
            ping_timeout: 900,
            options: ServerOptions::default(),
        })
    }

    /// Check the whole configuration for consistency.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !is_identifier(&self.id) {
            return Err(ServerError::InvalidIdentifier);
        }
        if self.hostname.is_empty() {
            return Err(ServerError::InvalidHostname);
        }
        if self.port == 0 {
            return Err(ServerError::InvalidPort);
        }
        if self.nickname.is_empty() {
            return Err(ServerError::InvalidNickname);
        }
        if self.username.is_empty() {
            return Err(ServerError::InvalidUsername);
        }
        if self.realname.is_empty() {
            return Err(ServerError::InvalidRealname);
        }
        if self.command_char.is_empty() {
            return Err(ServerError::InvalidCommandChar);
        }
        if self.ping_timeout == 0 {
            return Err(ServerError::InvalidPingTimeout);
        }
        if !self.options.ipv4 && !self.options.ipv6 {
            return Err(ServerError::InvalidFamily);
        }
        if self.options.tls && !cfg!(feature = "tls") {
            return Err(ServerError::SslDisabled);
        }

        Ok(())
    }
}

/// One IRC server, shareable across the bot, dispatch handlers and the
/// driver task.
pub struct Server {
    config: ServerConfig,
    session: Mutex<Session>,
    notify: Notify,
    cancel: Mutex<CancellationToken>,
}

impl Server {
    /// Create a server from a validated configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;

        let session = Session::new(&config);

        Ok(Arc::new(Server {
            config,
            session: Mutex::new(session),
            notify: Notify::new(),
            cancel: Mutex::new(CancellationToken::new()),
        }))
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("session mutex poisoned")
    }

    /// The server identifier.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The full configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The command character addressing plugins.
    pub fn command_char(&self) -> &str {
        &self.config.command_char
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.session().phase()
    }

    /// Current nickname, tracking server-applied changes.
    pub fn nickname(&self) -> String {
        self.session().nickname().to_owned()
    }

    /// Channels currently joined, sorted.
    pub fn joined_channels(&self) -> Vec<String> {
        self.session().joined().iter().cloned().collect()
    }

    /// Channels requested so far.
    pub fn requested_channels(&self) -> Vec<ChannelRequest> {
        self.session().requested().to_vec()
    }

    /// Spawn (or respawn) the connection driver.
    ///
    /// A server owns at most one connection: a previous driver is
    /// cancelled before the new one starts.
    pub(crate) fn start(self: &Arc<Self>, tx: UnboundedSender<BotSignal>) {
        let token = {
            let mut cancel = self.cancel.lock().expect("cancel mutex poisoned");
            cancel.cancel();
            *cancel = CancellationToken::new();
            cancel.clone()
        };

        self.session().reset();
        tokio::spawn(drive(self.clone(), tx, token));
    }

    /// Stop the driver and drop the connection. Idempotent; emits no
    /// event.
    pub fn stop(&self) {
        self.cancel.lock().expect("cancel mutex poisoned").cancel();
        self.session().reset();
    }

    fn op<F>(&self, f: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut Session) -> Result<(), ServerError>,
    {
        f(&mut self.session())?;
        self.notify.notify_one();
        Ok(())
    }

    /// Invite `target` to `channel`.
    pub fn invite(&self, target: &str, channel: &str) -> Result<(), ServerError> {
        self.op(|s| s.invite(target, channel))
    }

    /// Join `channel`, remembering it for rejoin after reconnects.
    pub fn join(&self, channel: &str, password: Option<&str>) -> Result<(), ServerError> {
        self.op(|s| s.join(channel, password))
    }

    /// Kick `target` from `channel`.
    pub fn kick(&self, target: &str, channel: &str, reason: &str) -> Result<(), ServerError> {
        self.op(|s| s.kick(target, channel, reason))
    }

    /// Send a CTCP ACTION.
    pub fn me(&self, target: &str, message: &str) -> Result<(), ServerError> {
        self.op(|s| s.me(target, message))
    }

    /// Send a PRIVMSG.
    pub fn message(&self, target: &str, message: &str) -> Result<(), ServerError> {
        self.op(|s| s.message(target, message))
    }

    /// Change modes on a channel.
    pub fn mode(
        &self,
        channel: &str,
        mode: &str,
        limit: &str,
        user: &str,
        mask: &str,
    ) -> Result<(), ServerError> {
        self.op(|s| s.mode(channel, mode, limit, user, mask))
    }

    /// Request a NAMES listing.
    pub fn names(&self, channel: &str) -> Result<(), ServerError> {
        self.op(|s| s.names(channel))
    }

    /// Send a NOTICE.
    pub fn notice(&self, target: &str, message: &str) -> Result<(), ServerError> {
        self.op(|s| s.notice(target, message))
    }

    /// Leave a channel.
    pub fn part(&self, channel: &str, reason: &str) -> Result<(), ServerError> {
        self.op(|s| s.part(channel, reason))
    }

    /// Change a channel topic.
    pub fn topic(&self, channel: &str, topic: &str) -> Result<(), ServerError> {
        self.op(|s| s.topic(channel, topic))
    }

    /// Request WHOIS information.
    pub fn whois(&self, target: &str) -> Result<(), ServerError> {
        self.op(|s| s.whois(target))
    }

    /// Queue a raw line verbatim.
    pub fn send(&self, raw: &str) -> Result<(), ServerError> {
        self.op(|s| s.send_raw(raw))
    }

    /// Change the nickname.
    pub fn set_nickname(&self, nickname: &str) -> Result<(), ServerError> {
        self.op(|s| s.set_nickname(nickname))
    }
}

enum Exit {
    Lost,
    Cancelled,
}

async fn drive(
    server: Arc<Server>,
    tx: UnboundedSender<BotSignal>,
    cancel: CancellationToken,
) {
    let config = server.config().clone();
    let connector = Connector {
        ipv4: config.options.ipv4,
        ipv6: config.options.ipv6,
        tls: config.options.tls,
    };
    let deadline = Duration::from_secs(config.ping_timeout);

    loop {
        server.session().begin_connect();
        info!(server = %config.id, "connecting to {}:{}", config.hostname, config.port);

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            attempt = timeout(deadline, connector.connect(&config.hostname, config.port)) => attempt,
        };

        let stream = match attempt {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                warn!(server = %config.id, "{}", e);
                None
            }
            Err(_) => {
                warn!(server = %config.id, "connect timed out");
                None
            }
        };

        if let Some(mut stream) = stream {
            server.session().begin_identify();
            debug!(server = %config.id, "identifying");

            if let Exit::Cancelled = pump(&server, &mut stream, &tx, &cancel, deadline).await {
                return;
            }
        }

        server.session().reset();

        if !config.options.auto_reconnect {
            let _ = tx.send(BotSignal::Terminated(config.id.clone()));
            return;
        }

        // Only the reconnect path reports the disconnection.
        let _ = tx.send(BotSignal::Event(server.clone(), EventKind::Disconnect));
        info!(
            server = %config.id,
            "reconnecting in {} second(s)", config.reconnect_delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(config.reconnect_delay)) => {}
        }
    }
}

async fn pump(
    server: &Arc<Server>,
    stream: &mut IrcStream,
    tx: &UnboundedSender<BotSignal>,
    cancel: &CancellationToken,
    deadline: Duration,
) -> Exit {
    let id = server.id().to_owned();

    loop {
        // A replacement driver may own the session by now.
        if cancel.is_cancelled() {
            return Exit::Cancelled;
        }

        // Drain the outbound queue, one line in flight at a time.
        loop {
            let line = server.session().next_line();
            let Some(line) = line else { break };

            debug!(server = %id, "send: {}", line);
            if stream.send(line).await.is_err() {
                return Exit::Lost;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Exit::Cancelled,
            _ = server.notify.notified() => {}
            incoming = timeout(deadline, stream.next()) => match incoming {
                Err(_) => {
                    warn!(server = %id, "ping timeout");
                    return Exit::Lost;
                }
                Ok(None) => {
                    info!(server = %id, "connection closed by peer");
                    return Exit::Lost;
                }
                Ok(Some(Err(e))) => {
                    warn!(server = %id, "{}", e);
                    return Exit::Lost;
                }
                Ok(Some(Ok(line))) => {
                    debug!(server = %id, "recv: {}", line);

                    match Message::parse(&line) {
                        Ok(msg) => {
                            let events = server.session().feed(&msg);

                            for kind in events {
                                let _ = tx.send(BotSignal::Event(server.clone(), kind));
                            }
                        }
                        // A single undecodable message is skipped.
                        Err(e) => debug!(server = %id, "skipping message: {}", e),
                    }
                }
            }
        }
    }
}

/// Owns the active servers.
pub struct ServerRegistry {
    servers: Vec<Arc<Server>>,
    tx: UnboundedSender<BotSignal>,
}

impl ServerRegistry {
    pub(crate) fn new(tx: UnboundedSender<BotSignal>) -> Self {
        ServerRegistry {
            servers: Vec::new(),
            tx,
        }
    }

    /// Active servers, in registration order.
    pub fn list(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Snapshot of the active servers.
    pub fn snapshot(&self) -> Vec<Arc<Server>> {
        self.servers.clone()
    }

    /// Whether a server with this identifier exists.
    pub fn has(&self, id: &str) -> bool {
        self.servers.iter().any(|s| s.id() == id)
    }

    /// Find a server.
    pub fn get(&self, id: &str) -> Option<Arc<Server>> {
        self.servers.iter().find(|s| s.id() == id).cloned()
    }

    /// Find a server or fail with `not_found`.
    pub fn require(&self, id: &str) -> Result<Arc<Server>, ServerError> {
        self.get(id).ok_or(ServerError::NotFound)
    }

    /// Register a server and start its driver.
    pub fn add(&mut self, server: Arc<Server>) -> Result<(), ServerError> {
        if self.has(server.id()) {
            return Err(ServerError::AlreadyExists);
        }

        server.start(self.tx.clone());
        self.servers.push(server);
        Ok(())
    }

    /// Disconnect a server and remove it.
    pub fn remove(&mut self, id: &str) -> Result<(), ServerError> {
        let server = self.require(id)?;

        server.stop();
        self.servers.retain(|s| s.id() != id);
        Ok(())
    }

    /// Drop a server whose driver already terminated.
    pub(crate) fn forget(&mut self, id: &str) {
        self.servers.retain(|s| s.id() != id);
    }

    /// Disconnect and remove every server.
    pub fn clear(&mut self) {
        for server in &self.servers {
            server.stop();
        }
        self.servers.clear();
    }

    /// Force a reconnection of one server, or all of them.
    pub fn reconnect(&mut self, id: Option<&str>) -> Result<(), ServerError> {
        match id {
            Some(id) => {
                let server = self.require(id)?;
                server.stop();
                server.start(self.tx.clone());
            }
            None => {
                for server in &self.servers {
                    server.stop();
                    server.start(self.tx.clone());
                }
            }
        }

        Ok(())
    }
}
