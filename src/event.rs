//! Events produced by server sessions.
//!
//! An [`EventKind`] is the plain payload coming out of the sans-IO
//! session; an [`Event`] couples it with a shared handle to the
//! originating server so consumers can call back into it.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::server::Server;

/// Aggregated WHOIS information for one nickname.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhoisInfo {
    /// The user's nickname.
    pub nick: String,
    /// The user's username.
    pub user: String,
    /// The user's hostname.
    pub hostname: String,
    /// The user's real name.
    pub realname: String,
    /// Channels the user is on, prefixes stripped.
    pub channels: Vec<String>,
}

/// One high-level IRC event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Identification finished, the server is usable.
    Connect,
    /// The connection was lost and a reconnect is pending.
    Disconnect,
    /// Someone invited us to a channel.
    Invite {
        origin: String,
        channel: String,
        nickname: String,
    },
    /// Someone (possibly us) joined a channel.
    Join { origin: String, channel: String },
    /// Someone was kicked from a channel.
    Kick {
        origin: String,
        channel: String,
        target: String,
        reason: String,
    },
    /// A CTCP ACTION.
    Me {
        origin: String,
        target: String,
        message: String,
    },
    /// A regular PRIVMSG.
    Message {
        origin: String,
        channel: String,
        message: String,
    },
    /// A channel or user mode change.
    Mode {
        origin: String,
        channel: String,
        mode: String,
        limit: String,
        user: String,
        mask: String,
    },
    /// A complete NAMES listing for a channel.
    Names { channel: String, names: Vec<String> },
    /// Someone (possibly us) changed nickname.
    Nick { origin: String, nickname: String },
    /// A NOTICE.
    Notice {
        origin: String,
        channel: String,
        message: String,
    },
    /// Someone (possibly us) left a channel.
    Part {
        origin: String,
        channel: String,
        reason: String,
    },
    /// A topic change.
    Topic {
        origin: String,
        channel: String,
        topic: String,
    },
    /// A complete WHOIS reply.
    Whois(WhoisInfo),
}

impl EventKind {
    /// The event name used on the wire and in rule matching.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect => "onConnect",
            EventKind::Disconnect => "onDisconnect",
            EventKind::Invite { .. } => "onInvite",
            EventKind::Join { .. } => "onJoin",
            EventKind::Kick { .. } => "onKick",
            EventKind::Me { .. } => "onMe",
            EventKind::Message { .. } => "onMessage",
            EventKind::Mode { .. } => "onMode",
            EventKind::Names { .. } => "onNames",
            EventKind::Nick { .. } => "onNick",
            EventKind::Notice { .. } => "onNotice",
            EventKind::Part { .. } => "onPart",
            EventKind::Topic { .. } => "onTopic",
            EventKind::Whois(_) => "onWhois",
        }
    }

    /// The broadcast JSON object for this event.
    pub fn to_json(&self, server_id: &str) -> Value {
        match self {
            EventKind::Connect | EventKind::Disconnect => json!({
                "event": self.name(),
                "server": server_id,
            }),
            EventKind::Invite { origin, channel, .. } => json!({
                "event": "onInvite",
                "server": server_id,
                "origin": origin,
                "channel": channel,
            }),
            EventKind::Join { origin, channel } => json!({
                "event": "onJoin",
                "server": server_id,
                "origin": origin,
                "channel": channel,
            }),
            EventKind::Kick {
                origin,
                channel,
                target,
                reason,
            } => json!({
                "event": "onKick",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "target": target,
                "reason": reason,
            }),
            EventKind::Me {
                origin,
                target,
                message,
            } => json!({
                "event": "onMe",
                "server": server_id,
                "origin": origin,
                "target": target,
                "message": message,
            }),
            EventKind::Message {
                origin,
                channel,
                message,
            } => json!({
                "event": "onMessage",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "message": message,
            }),
            EventKind::Mode {
                origin,
                channel,
                mode,
                limit,
                user,
                mask,
            } => json!({
                "event": "onMode",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "mode": mode,
                "limit": limit,
                "user": user,
                "mask": mask,
            }),
            EventKind::Names { channel, names } => json!({
                "event": "onNames",
                "server": server_id,
                "channel": channel,
                "names": names,
            }),
            EventKind::Nick { origin, nickname } => json!({
                "event": "onNick",
                "server": server_id,
                "origin": origin,
                "nickname": nickname,
            }),
            EventKind::Notice {
                origin,
                channel,
                message,
            } => json!({
                "event": "onNotice",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "message": message,
            }),
            EventKind::Part {
                origin,
                channel,
                reason,
            } => json!({
                "event": "onPart",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "reason": reason,
            }),
            EventKind::Topic {
                origin,
                channel,
                topic,
            } => json!({
                "event": "onTopic",
                "server": server_id,
                "origin": origin,
                "channel": channel,
                "topic": topic,
            }),
            EventKind::Whois(info) => json!({
                "event": "onWhois",
                "server": server_id,
                "nickname": &info.nick,
                "username": &info.user,
                "hostname": &info.hostname,
                "realname": &info.realname,
            }),
        }
    }

    /// Positional arguments for hook invocation, starting with the
    /// event name. NAMES and WHOIS listings are not delivered to hooks.
    pub fn hook_args(&self, server_id: &str) -> Option<Vec<String>> {
        let args = match self {
            EventKind::Connect => vec!["onConnect".into(), server_id.into()],
            EventKind::Disconnect => vec!["onDisconnect".into(), server_id.into()],
            EventKind::Invite {
                origin,
                channel,
                nickname,
            } => vec![
                "onInvite".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                nickname.clone(),
            ],
            EventKind::Join { origin, channel } => vec![
                "onJoin".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
            ],
            EventKind::Kick {
                origin,
                channel,
                target,
                reason,
            } => vec![
                "onKick".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                target.clone(),
                reason.clone(),
            ],
            EventKind::Me {
                origin,
                target,
                message,
            } => vec![
                "onMe".into(),
                server_id.into(),
                origin.clone(),
                target.clone(),
                message.clone(),
            ],
            EventKind::Message {
                origin,
                channel,
                message,
            } => vec![
                "onMessage".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                message.clone(),
            ],
            EventKind::Mode {
                origin,
                channel,
                mode,
                limit,
                user,
                mask,
            } => vec![
                "onMode".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                mode.clone(),
                limit.clone(),
                user.clone(),
                mask.clone(),
            ],
            EventKind::Nick { origin, nickname } => vec![
                "onNick".into(),
                server_id.into(),
                origin.clone(),
                nickname.clone(),
            ],
            EventKind::Notice {
                origin,
                channel,
                message,
            } => vec![
                "onNotice".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                message.clone(),
            ],
            EventKind::Part {
                origin,
                channel,
                reason,
            } => vec![
                "onPart".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                reason.clone(),
            ],
            EventKind::Topic {
                origin,
                channel,
                topic,
            } => vec![
                "onTopic".into(),
                server_id.into(),
                origin.clone(),
                channel.clone(),
                topic.clone(),
            ],
            EventKind::Names { .. } | EventKind::Whois(_) => return None,
        };

        Some(args)
    }

    /// The channel used when probing the rule engine.
    ///
    /// Mode, nick and notice events carry a channel on the wire but
    /// probe with an empty one, as do connect/disconnect/whois.
    pub fn rule_channel(&self) -> &str {
        match self {
            EventKind::Invite { channel, .. }
            | EventKind::Join { channel, .. }
            | EventKind::Kick { channel, .. }
            | EventKind::Message { channel, .. }
            | EventKind::Names { channel, .. }
            | EventKind::Part { channel, .. }
            | EventKind::Topic { channel, .. } => channel,
            EventKind::Me { target, .. } => target,
            _ => "",
        }
    }

    /// The origin used when probing the rule engine.
    pub fn rule_origin(&self) -> &str {
        match self {
            EventKind::Invite { origin, .. }
            | EventKind::Join { origin, .. }
            | EventKind::Kick { origin, .. }
            | EventKind::Me { origin, .. }
            | EventKind::Message { origin, .. }
            | EventKind::Mode { origin, .. }
            | EventKind::Nick { origin, .. }
            | EventKind::Notice { origin, .. }
            | EventKind::Part { origin, .. }
            | EventKind::Topic { origin, .. } => origin,
            _ => "",
        }
    }
}

/// An event coupled with its originating server.
#[derive(Clone)]
pub struct Event {
    /// Shared handle to the server the event came from.
    pub server: Arc<Server>,
    /// The event payload.
    pub kind: EventKind,
}
