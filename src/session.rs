//! Sans-IO per-server protocol state machine.
//!
//! The session performs no I/O. It consumes parsed [`Message`]s and
//! public operations, mutates its state and pushes raw outbound lines
//! onto an internal FIFO; the async driver in [`crate::server`] owns
//! the socket and moves lines out with [`Session::next_line`]. This
//! keeps the whole protocol surface testable without a network.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::ServerError;
use crate::event::{EventKind, WhoisInfo};
use crate::isupport::PrefixMap;
use crate::message::{nick_of, Message};
use crate::server::ServerConfig;

const RPL_ISUPPORT: u16 = 5;
const RPL_WHOISUSER: u16 = 311;
const RPL_ENDOFWHOIS: u16 = 318;
const RPL_WHOISCHANNELS: u16 = 319;
const RPL_NAMREPLY: u16 = 353;
const RPL_ENDOFNAMES: u16 = 366;
const RPL_ENDOFMOTD: u16 = 376;
const ERR_NOMOTD: u16 = 422;

/// Lifecycle phase of a server connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Not connected at all.
    #[default]
    Disconnected,
    /// Network connection in progress.
    Connecting,
    /// Sending the password, nick and user commands.
    Identifying,
    /// Ready for use.
    Connected,
}

impl Phase {
    /// Lowercase name for logs and introspection.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Identifying => "identifying",
            Phase::Connected => "connected",
        }
    }
}

/// A channel to join, with an optional password.
///
/// Requests are stable across reconnects so rejoining is automatic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRequest {
    /// The channel name.
    pub name: String,
    /// The optional channel password.
    pub password: Option<String>,
}

/// The protocol state machine of one server.
#[derive(Debug)]
pub struct Session {
    nickname: String,
    username: String,
    realname: String,
    password: Option<String>,
    ctcp_version: String,
    auto_rejoin: bool,
    join_invite: bool,

    phase: Phase,
    requested: Vec<ChannelRequest>,
    joined: BTreeSet<String>,
    prefixes: PrefixMap,
    queue: VecDeque<String>,
    names: HashMap<String, BTreeSet<String>>,
    whois: HashMap<String, WhoisInfo>,
}

impl Session {
    /// Create a session from a server configuration.
    pub fn new(config: &ServerConfig) -> Self {
        Session {
            nickname: config.nickname.clone(),
            username: config.username.clone(),
            realname: config.realname.clone(),
            password: config.password.clone(),
            ctcp_version: config.ctcp_version.clone(),
            auto_rejoin: config.options.auto_rejoin,
            join_invite: config.options.join_invite,
            phase: Phase::Disconnected,
            requested: Vec::new(),
            joined: BTreeSet::new(),
            prefixes: PrefixMap::default(),
            queue: VecDeque::new(),
            names: HashMap::new(),
            whois: HashMap::new(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current nickname. Tracks NICK changes applied by the server.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Channels currently joined.
    pub fn joined(&self) -> &BTreeSet<String> {
        &self.joined
    }

    /// Channels requested so far, join order preserved.
    pub fn requested(&self) -> &[ChannelRequest] {
        &self.requested
    }

    /// The ISUPPORT prefix table. Empty until a 005 reply arrived.
    pub fn prefixes(&self) -> &PrefixMap {
        &self.prefixes
    }

    /// Number of queued outbound lines.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// A network connection attempt is starting.
    pub fn begin_connect(&mut self) {
        self.phase = Phase::Connecting;
        self.joined.clear();
        self.names.clear();
        self.whois.clear();
    }

    /// The connection is established; emit the identification lines.
    ///
    /// Identification goes to the front of the queue so that operations
    /// queued while disconnected are flushed behind it.
    pub fn begin_identify(&mut self) {
        self.phase = Phase::Identifying;

        let mut ident = Vec::new();

        if let Some(password) = &self.password {
            ident.push(format!("PASS {}", password));
        }
        ident.push(format!("NICK {}", self.nickname));
        ident.push(format!(
            "USER {} unknown unknown :{}",
            self.username, self.realname
        ));

        for line in ident.into_iter().rev() {
            self.queue.push_front(line);
        }
    }

    /// The connection is gone. Pending lines and accumulators are
    /// dropped; channel requests survive for the next attempt.
    pub fn reset(&mut self) {
        self.phase = Phase::Disconnected;
        self.joined.clear();
        self.queue.clear();
        self.names.clear();
        self.whois.clear();
    }

    /// Pop the next outbound line.
    ///
    /// The queue only drains while identifying or connected.
    pub fn next_line(&mut self) -> Option<String> {
        match self.phase {
            Phase::Identifying | Phase::Connected => self.queue.pop_front(),
            _ => None,
        }
    }

    fn is_self(&self, target: &str) -> bool {
        nick_of(target) == self.nickname
    }

    fn push(&mut self, line: String) {
        self.queue.push_back(line);
    }

    fn push_join(&mut self, name: &str, password: Option<&str>) {
        match password {
            Some(p) if !p.is_empty() => self.push(format!("JOIN {} :{}", name, p)),
            _ => self.push(format!("JOIN {}", name)),
        }
    }

    fn record_request(&mut self, name: &str, password: Option<&str>) {
        let request = ChannelRequest {
            name: name.to_owned(),
            password: password.map(str::to_owned),
        };

        match self.requested.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = request,
            None => self.requested.push(request),
        }
    }

    /// Process one incoming message, returning the events it produced.
    pub fn feed(&mut self, msg: &Message) -> Vec<EventKind> {
        let mut events = Vec::new();

        if msg.is_numeric(RPL_ISUPPORT) {
            self.on_isupport(msg);
        } else if msg.is_numeric(RPL_ENDOFMOTD) || msg.is_numeric(ERR_NOMOTD) {
            self.on_connected(&mut events);
        } else if msg.is_numeric(RPL_NAMREPLY) {
            self.on_namreply(msg);
        } else if msg.is_numeric(RPL_ENDOFNAMES) {
            self.on_endofnames(msg, &mut events);
        } else if msg.is_numeric(RPL_WHOISUSER) {
            self.on_whoisuser(msg);
        } else if msg.is_numeric(RPL_WHOISCHANNELS) {
            self.on_whoischannels(msg);
        } else if msg.is_numeric(RPL_ENDOFWHOIS) {
            self.on_endofwhois(msg, &mut events);
        } else {
            match msg.command.as_str() {
                "PING" => self.push(format!("PONG :{}", msg.get(0))),
                "INVITE" => self.on_invite(msg, &mut events),
                "JOIN" => self.on_join(msg, &mut events),
                "KICK" => self.on_kick(msg, &mut events),
                "MODE" => events.push(EventKind::Mode {
                    origin: msg.prefix.clone().unwrap_or_default(),
                    channel: msg.get(0).to_owned(),
                    mode: msg.get(1).to_owned(),
                    limit: msg.get(2).to_owned(),
                    user: msg.get(3).to_owned(),
                    mask: msg.get(4).to_owned(),
                }),
                "NICK" => self.on_nick(msg, &mut events),
                "NOTICE" => events.push(EventKind::Notice {
                    origin: msg.prefix.clone().unwrap_or_default(),
                    channel: msg.get(0).to_owned(),
                    message: msg.get(1).to_owned(),
                }),
                "PART" => self.on_part(msg, &mut events),
                "PRIVMSG" => self.on_privmsg(msg, &mut events),
                "TOPIC" => events.push(EventKind::Topic {
                    origin: msg.prefix.clone().unwrap_or_default(),
                    channel: msg.get(0).to_owned(),
                    topic: msg.get(1).to_owned(),
                }),
                _ => {}
            }
        }

        events
    }

    fn on_isupport(&mut self, msg: &Message) {
        if let Some(map) = PrefixMap::from_isupport(&msg.args) {
            self.prefixes = map;
        }
    }

    fn on_connected(&mut self, events: &mut Vec<EventKind>) {
        self.phase = Phase::Connected;
        events.push(EventKind::Connect);

        let requests = self.requested.clone();
        for request in requests {
            self.push_join(&request.name, request.password.as_deref());
        }
    }

    fn on_invite(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        // Join the channel ourselves when configured to accept invites.
        if self.join_invite && self.is_self(msg.get(0)) {
            let _ = self.join(msg.get(1), None);
        }

        events.push(EventKind::Invite {
            origin: msg.prefix.clone().unwrap_or_default(),
            channel: msg.get(1).to_owned(),
            nickname: msg.get(0).to_owned(),
        });
    }

    fn on_join(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        let origin = msg.prefix.clone().unwrap_or_default();
        let channel = msg.get(0).to_owned();

        if self.is_self(&origin) {
            self.joined.insert(channel.clone());

            // Keep joined a subset of requested even for joins that
            // were not initiated through this session.
            if !self.requested.iter().any(|c| c.name == channel) {
                self.record_request(&channel, None);
            }
        }

        events.push(EventKind::Join { origin, channel });
    }

    fn on_kick(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        let channel = msg.get(0).to_owned();
        let target = msg.get(1).to_owned();

        if self.is_self(&target) {
            self.joined.remove(&channel);

            if self.auto_rejoin {
                let password = self
                    .requested
                    .iter()
                    .find(|c| c.name == channel)
                    .and_then(|c| c.password.clone());
                let _ = self.join(&channel, password.as_deref());
            }
        }

        events.push(EventKind::Kick {
            origin: msg.prefix.clone().unwrap_or_default(),
            channel,
            target,
            reason: msg.get(2).to_owned(),
        });
    }

    fn on_nick(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        let origin = msg.prefix.clone().unwrap_or_default();
        let nickname = msg.get(0).to_owned();

        if self.is_self(&origin) {
            self.nickname = nickname.clone();
        }

        events.push(EventKind::Nick { origin, nickname });
    }

    fn on_part(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        let origin = msg.prefix.clone().unwrap_or_default();
        let channel = msg.get(0).to_owned();

        if self.is_self(&origin) {
            self.joined.remove(&channel);
        }

        events.push(EventKind::Part {
            origin,
            channel,
            reason: msg.get(1).to_owned(),
        });
    }

    fn on_privmsg(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        let origin = msg.prefix.clone().unwrap_or_default();

        if let Some(payload) = msg.ctcp(1) {
            if let Some(action) = payload.strip_prefix("ACTION") {
                events.push(EventKind::Me {
                    origin,
                    target: msg.get(0).to_owned(),
                    message: action.strip_prefix(' ').unwrap_or(action).to_owned(),
                });
            } else if payload.starts_with("VERSION") && !self.ctcp_version.is_empty() {
                let reply = format!(
                    "NOTICE {} :\u{1}VERSION {}\u{1}",
                    nick_of(&origin),
                    self.ctcp_version
                );
                self.push(reply);
            }
            // Other CTCP queries are silently dropped.
        } else {
            events.push(EventKind::Message {
                origin,
                channel: msg.get(0).to_owned(),
                message: msg.get(1).to_owned(),
            });
        }
    }

    fn on_namreply(&mut self, msg: &Message) {
        // args: target, symbol, channel, names
        if msg.args.len() < 4 || msg.get(2).is_empty() || msg.get(3).is_empty() {
            return;
        }

        let channel = msg.get(2).to_owned();
        let stripped: Vec<String> = msg
            .get(3)
            .split_whitespace()
            .map(|n| self.prefixes.strip(n).to_owned())
            .collect();

        self.names.entry(channel).or_default().extend(stripped);
    }

    fn on_endofnames(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        // args: target, channel, text
        if msg.args.len() < 3 || msg.get(1).is_empty() {
            return;
        }

        if let Some(set) = self.names.remove(msg.get(1)) {
            events.push(EventKind::Names {
                channel: msg.get(1).to_owned(),
                names: set.into_iter().collect(),
            });
        }
    }

    fn on_whoisuser(&mut self, msg: &Message) {
        // args: target, nick, user, host, star, realname
        if msg.args.len() < 6
            || msg.get(1).is_empty()
            || msg.get(2).is_empty()
            || msg.get(3).is_empty()
            || msg.get(5).is_empty()
        {
            return;
        }

        let info = WhoisInfo {
            nick: msg.get(1).to_owned(),
            user: msg.get(2).to_owned(),
            hostname: msg.get(3).to_owned(),
            realname: msg.get(5).to_owned(),
            channels: Vec::new(),
        };

        self.whois.insert(info.nick.clone(), info);
    }

    fn on_whoischannels(&mut self, msg: &Message) {
        // args: target, nick, channels
        if msg.args.len() < 3 || msg.get(1).is_empty() || msg.get(2).is_empty() {
            return;
        }

        let channels: Vec<String> = msg
            .get(2)
            .split_whitespace()
            .map(|c| self.prefixes.strip(c).to_owned())
            .collect();

        if let Some(info) = self.whois.get_mut(msg.get(1)) {
            info.channels = channels;
        }
    }

    fn on_endofwhois(&mut self, msg: &Message, events: &mut Vec<EventKind>) {
        if let Some(info) = self.whois.remove(msg.get(1)) {
            events.push(EventKind::Whois(info));
        }
    }

    // -- public operations ------------------------------------------------
    //
    // Each op validates its arguments, then appends one raw line to the
    // queue. The queue drains once identification has started.

    /// Invite `target` to `channel`.
    pub fn invite(&mut self, target: &str, channel: &str) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidNickname);
        }
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.push(format!("INVITE {} {}", target, channel));
        Ok(())
    }

    /// Join `channel`, remembering it for automatic rejoin.
    ///
    /// The JOIN line is only sent while connected; otherwise the
    /// request is recorded and honored after identification.
    pub fn join(&mut self, channel: &str, password: Option<&str>) -> Result<(), ServerError> {
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.record_request(channel, password);

        if self.phase == Phase::Connected {
            self.push_join(channel, password);
        }

        Ok(())
    }

    /// Kick `target` from `channel`.
    pub fn kick(
        &mut self,
        target: &str,
        channel: &str,
        reason: &str,
    ) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidNickname);
        }
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        if reason.is_empty() {
            self.push(format!("KICK {} {}", channel, target));
        } else {
            self.push(format!("KICK {} {} :{}", channel, target, reason));
        }
        Ok(())
    }

    /// Send a CTCP ACTION to `target`.
    pub fn me(&mut self, target: &str, message: &str) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.push(format!("PRIVMSG {} :\u{1}ACTION {}\u{1}", target, message));
        Ok(())
    }

    /// Send a PRIVMSG to `target`.
    pub fn message(&mut self, target: &str, message: &str) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.push(format!("PRIVMSG {} :{}", target, message));
        Ok(())
    }

    /// Change modes on `channel`, emitting only non-empty trailing
    /// tokens.
    pub fn mode(
        &mut self,
        channel: &str,
        mode: &str,
        limit: &str,
        user: &str,
        mask: &str,
    ) -> Result<(), ServerError> {
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }
        if mode.is_empty() {
            return Err(ServerError::InvalidMode);
        }

        let mut line = format!("MODE {} {}", channel, mode);
        for token in [limit, user, mask] {
            if !token.is_empty() {
                line.push(' ');
                line.push_str(token);
            }
        }

        self.push(line);
        Ok(())
    }

    /// Request the NAMES listing of `channel`.
    pub fn names(&mut self, channel: &str) -> Result<(), ServerError> {
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.push(format!("NAMES {}", channel));
        Ok(())
    }

    /// Send a NOTICE to `target`.
    pub fn notice(&mut self, target: &str, message: &str) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        self.push(format!("NOTICE {} :{}", target, message));
        Ok(())
    }

    /// Leave `channel`, with an optional reason.
    pub fn part(&mut self, channel: &str, reason: &str) -> Result<(), ServerError> {
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        if reason.is_empty() {
            self.push(format!("PART {}", channel));
        } else {
            self.push(format!("PART {} :{}", channel, reason));
        }
        Ok(())
    }

    /// Change the topic of `channel`.
    pub fn topic(&mut self, channel: &str, topic: &str) -> Result<(), ServerError> {
        if channel.is_empty() {
            return Err(ServerError::InvalidChannel);
        }

        if topic.is_empty() {
            self.push(format!("TOPIC {}", channel));
        } else {
            self.push(format!("TOPIC {} :{}", channel, topic));
        }
        Ok(())
    }

    /// Request WHOIS information about `target`.
    pub fn whois(&mut self, target: &str) -> Result<(), ServerError> {
        if target.is_empty() {
            return Err(ServerError::InvalidNickname);
        }

        self.push(format!("WHOIS {} {}", target, target));
        Ok(())
    }

    /// Queue a raw line verbatim.
    pub fn send_raw(&mut self, raw: &str) -> Result<(), ServerError> {
        if raw.is_empty() {
            return Err(ServerError::InvalidMessage);
        }

        self.push(raw.to_owned());
        Ok(())
    }

    /// Change the nickname: sends NICK while connected, otherwise
    /// updates the stored nickname directly.
    pub fn set_nickname(&mut self, nickname: &str) -> Result<(), ServerError> {
        if nickname.is_empty() {
            return Err(ServerError::InvalidNickname);
        }

        if self.phase == Phase::Connected {
            self.push(format!("NICK {}", nickname));
        } else {
            self.nickname = nickname.to_owned();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::new("local", "irc.example.org").unwrap();
        config.nickname = "me".to_owned();
        config.username = "me".to_owned();
        config
    }

    fn connected_session(config: &ServerConfig) -> Session {
        let mut session = Session::new(config);
        session.begin_connect();
        session.begin_identify();
        // Drain the identification lines.
        while session.next_line().is_some() {}
        let events = session.feed(&Message::parse(":srv 376 me :End of /MOTD").unwrap());
        assert!(matches!(events.as_slice(), [EventKind::Connect]));
        session
    }

    fn drain(session: &mut Session) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = session.next_line() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_identification_order() {
        let mut cfg = config();
        cfg.password = Some("secret".to_owned());

        let mut session = Session::new(&cfg);
        session.begin_connect();

        // An op queued while connecting must flush after identification.
        session.message("#c", "early").unwrap();
        assert!(session.next_line().is_none());

        session.begin_identify();
        assert_eq!(
            drain(&mut session),
            vec![
                "PASS secret",
                "NICK me",
                "USER me unknown unknown :slirc bot",
                "PRIVMSG #c :early",
            ]
        );
    }

    #[test]
    fn test_ping_pong_no_event() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        let events = session.feed(&Message::parse("PING :irc.example").unwrap());

        assert!(events.is_empty());
        assert_eq!(session.next_line().as_deref(), Some("PONG :irc.example"));
    }

    #[test]
    fn test_connect_joins_requested_channels() {
        let cfg = config();
        let mut session = Session::new(&cfg);

        session.join("#a", None).unwrap();
        session.join("#b", Some("pw")).unwrap();

        session.begin_connect();
        session.begin_identify();
        drain(&mut session);

        session.feed(&Message::parse(":srv 422 me :No MOTD").unwrap());
        assert_eq!(drain(&mut session), vec!["JOIN #a", "JOIN #b :pw"]);
    }

    #[test]
    fn test_names_aggregation() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.feed(&Message::parse(":srv 005 me PREFIX=(ov)@+ :are supported").unwrap());

        assert!(session
            .feed(&Message::parse(":srv 353 me = #c :@alice +bob carol").unwrap())
            .is_empty());
        assert!(session
            .feed(&Message::parse(":srv 353 me = #c :dave").unwrap())
            .is_empty());

        let events =
            session.feed(&Message::parse(":srv 366 me #c :End of /NAMES list").unwrap());

        match events.as_slice() {
            [EventKind::Names { channel, names }] => {
                assert_eq!(channel, "#c");
                let expected: BTreeSet<&str> = ["alice", "bob", "carol", "dave"].into();
                let got: BTreeSet<&str> = names.iter().map(String::as_str).collect();
                assert_eq!(got, expected);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // The accumulator is cleared: a second end-of-names is silent.
        assert!(session
            .feed(&Message::parse(":srv 366 me #c :End of /NAMES list").unwrap())
            .is_empty());
    }

    #[test]
    fn test_self_kick_with_auto_rejoin() {
        let mut cfg = config();
        cfg.options.auto_rejoin = true;

        let mut session = connected_session(&cfg);
        session.join("#x", None).unwrap();
        drain(&mut session);
        session.feed(&Message::parse(":me!me@h JOIN #x").unwrap());
        assert!(session.joined().contains("#x"));

        let events = session.feed(&Message::parse(":srv KICK #x me :go").unwrap());

        assert!(!session.joined().contains("#x"));
        assert_eq!(drain(&mut session), vec!["JOIN #x"]);
        match events.as_slice() {
            [EventKind::Kick {
                channel,
                target,
                reason,
                ..
            }] => {
                assert_eq!(channel, "#x");
                assert_eq!(target, "me");
                assert_eq!(reason, "go");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_kick_rejoin_reuses_password() {
        let mut cfg = config();
        cfg.options.auto_rejoin = true;

        let mut session = connected_session(&cfg);
        session.join("#x", Some("pw")).unwrap();
        drain(&mut session);
        session.feed(&Message::parse(":me!me@h JOIN #x").unwrap());

        session.feed(&Message::parse(":srv KICK #x me :go").unwrap());
        assert_eq!(drain(&mut session), vec!["JOIN #x :pw"]);
    }

    #[test]
    fn test_kick_without_auto_rejoin() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.join("#x", None).unwrap();
        drain(&mut session);
        session.feed(&Message::parse(":me!me@h JOIN #x").unwrap());
        session.feed(&Message::parse(":srv KICK #x me :go").unwrap());

        assert!(!session.joined().contains("#x"));
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_join_part_bookkeeping() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.feed(&Message::parse(":me!me@h JOIN #a").unwrap());
        session.feed(&Message::parse(":other!o@h JOIN #a").unwrap());
        assert_eq!(session.joined().len(), 1);

        // joined stays a subset of requested names.
        assert!(session.requested().iter().any(|c| c.name == "#a"));

        session.feed(&Message::parse(":other!o@h PART #a :bye").unwrap());
        assert!(session.joined().contains("#a"));

        session.feed(&Message::parse(":me!me@h PART #a :bye").unwrap());
        assert!(!session.joined().contains("#a"));
    }

    #[test]
    fn test_nick_tracking() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        let events = session.feed(&Message::parse(":me!me@h NICK newme").unwrap());
        assert_eq!(session.nickname(), "newme");
        assert!(matches!(events.as_slice(), [EventKind::Nick { .. }]));

        // Someone else's change does not affect us.
        session.feed(&Message::parse(":other!o@h NICK whatever").unwrap());
        assert_eq!(session.nickname(), "newme");
    }

    #[test]
    fn test_set_nickname_connected_and_not() {
        let cfg = config();
        let mut session = Session::new(&cfg);

        session.set_nickname("fresh").unwrap();
        assert_eq!(session.nickname(), "fresh");
        assert_eq!(session.queue_len(), 0);

        let mut session = connected_session(&cfg);
        session.set_nickname("fresh").unwrap();
        assert_eq!(drain(&mut session), vec!["NICK fresh"]);
        // The stored nickname changes once the server confirms.
        assert_eq!(session.nickname(), "me");
    }

    #[test]
    fn test_invite_joins_when_configured() {
        let mut cfg = config();
        cfg.options.join_invite = true;

        let mut session = connected_session(&cfg);
        let events = session.feed(&Message::parse(":op!o@h INVITE me :#priv").unwrap());

        assert_eq!(drain(&mut session), vec!["JOIN #priv"]);
        match events.as_slice() {
            [EventKind::Invite {
                origin,
                channel,
                nickname,
            }] => {
                assert_eq!(origin, "op!o@h");
                assert_eq!(channel, "#priv");
                assert_eq!(nickname, "me");
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // Without the flag, the event is still emitted but no JOIN goes out.
        let cfg = config();
        let mut session = connected_session(&cfg);
        let events = session.feed(&Message::parse(":op!o@h INVITE me :#priv").unwrap());
        assert!(drain(&mut session).is_empty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_ctcp_action_and_version() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        let events = session
            .feed(&Message::parse(":n!u@h PRIVMSG #c :\u{1}ACTION waves\u{1}").unwrap());
        match events.as_slice() {
            [EventKind::Me {
                target, message, ..
            }] => {
                assert_eq!(target, "#c");
                assert_eq!(message, "waves");
            }
            other => panic!("unexpected events: {:?}", other),
        }

        let events =
            session.feed(&Message::parse(":n!u@h PRIVMSG me :\u{1}VERSION\u{1}").unwrap());
        assert!(events.is_empty());
        assert_eq!(
            drain(&mut session),
            vec!["NOTICE n :\u{1}VERSION slirc-bot\u{1}"]
        );

        // Unknown CTCP queries are dropped without reply.
        let events =
            session.feed(&Message::parse(":n!u@h PRIVMSG me :\u{1}TIME\u{1}").unwrap());
        assert!(events.is_empty());
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_ctcp_version_disabled() {
        let mut cfg = config();
        cfg.ctcp_version = String::new();

        let mut session = connected_session(&cfg);
        let events =
            session.feed(&Message::parse(":n!u@h PRIVMSG me :\u{1}VERSION\u{1}").unwrap());

        assert!(events.is_empty());
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_whois_aggregation() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.feed(&Message::parse(":srv 005 me PREFIX=(ov)@+ :are supported").unwrap());
        session.feed(&Message::parse(":srv 311 me alice al host * :Alice A").unwrap());
        session.feed(&Message::parse(":srv 319 me alice :@#a +#b #c").unwrap());

        let events = session.feed(&Message::parse(":srv 318 me alice :End of /WHOIS").unwrap());

        match events.as_slice() {
            [EventKind::Whois(info)] => {
                assert_eq!(info.nick, "alice");
                assert_eq!(info.user, "al");
                assert_eq!(info.hostname, "host");
                assert_eq!(info.realname, "Alice A");
                assert_eq!(info.channels, vec!["#a", "#b", "#c"]);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // Accumulator cleared.
        assert!(session
            .feed(&Message::parse(":srv 318 me alice :End of /WHOIS").unwrap())
            .is_empty());
    }

    #[test]
    fn test_mode_line_shape() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.mode("#c", "+o", "", "somebody", "").unwrap();
        assert_eq!(drain(&mut session), vec!["MODE #c +o somebody"]);

        assert_eq!(
            session.mode("", "+o", "", "", ""),
            Err(ServerError::InvalidChannel)
        );
        assert_eq!(
            session.mode("#c", "", "", "", ""),
            Err(ServerError::InvalidMode)
        );
    }

    #[test]
    fn test_op_validation() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        assert_eq!(session.invite("", "#c"), Err(ServerError::InvalidNickname));
        assert_eq!(session.join("", None), Err(ServerError::InvalidChannel));
        assert_eq!(session.kick("", "#c", ""), Err(ServerError::InvalidNickname));
        assert_eq!(session.whois(""), Err(ServerError::InvalidNickname));
        assert_eq!(session.send_raw(""), Err(ServerError::InvalidMessage));
        assert_eq!(session.set_nickname(""), Err(ServerError::InvalidNickname));
    }

    #[test]
    fn test_queue_survives_until_reset() {
        let cfg = config();
        let mut session = Session::new(&cfg);

        session.message("#c", "hello").unwrap();
        assert_eq!(session.queue_len(), 1);
        assert!(session.next_line().is_none());

        session.reset();
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_reconnect_restores_requests() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        session.join("#a", None).unwrap();
        drain(&mut session);
        session.feed(&Message::parse(":me!me@h JOIN #a").unwrap());

        session.reset();
        assert!(session.joined().is_empty());
        assert_eq!(session.requested().len(), 1);

        session.begin_connect();
        session.begin_identify();
        drain(&mut session);
        session.feed(&Message::parse(":srv 376 me :done").unwrap());
        assert_eq!(drain(&mut session), vec!["JOIN #a"]);
    }

    #[test]
    fn test_unparsed_commands_are_ignored() {
        let cfg = config();
        let mut session = connected_session(&cfg);

        assert!(session
            .feed(&Message::parse(":srv 001 me :Welcome").unwrap())
            .is_empty());
        assert!(session.feed(&Message::parse("ERROR :closing").unwrap()).is_empty());
    }
}
