//! Control-plane commands.
//!
//! One handler per command name, all taking the bot and the parsed
//! request object and returning either the reply object or a typed
//! error. Error replies are serialised as the wire triple and the
//! requesting client is closed once the reply is flushed.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::bot::Bot;
use crate::config;
use crate::error::{
    is_identifier, BotError, Error, HookError, PluginError, RuleError, ServerError,
};
use crate::hook::Hook;
use crate::rule::{Rule, RuleAction, RuleSet};
use crate::transport::client::ClientHandle;

/// Dispatch one request from a ready client.
pub(crate) async fn execute(bot: &mut Bot, client: &ClientHandle, request: Value) {
    if !request.is_object() {
        refuse(client, BotError::InvalidMessage.into(), None);
        return;
    }

    let Some(name) = request.get("command").and_then(Value::as_str).map(str::to_owned)
    else {
        refuse(client, BotError::InvalidMessage.into(), None);
        return;
    };

    debug!(command = %name, "control command");

    match run(bot, &name, &request).await {
        Ok(reply) => {
            client.send(reply);
        }
        Err(error) => refuse(client, error, Some(&name)),
    }
}

/// Reply with an error and close the client once the reply flushed.
fn refuse(client: &ClientHandle, error: Error, command: Option<&str>) {
    client.send(error.to_wire(command));
    client.close();
}

async fn run(bot: &mut Bot, name: &str, args: &Value) -> Result<Value, Error> {
    match name {
        "plugin-config" => plugin_config(bot, args),
        "plugin-info" => plugin_info(bot, args),
        "plugin-list" => plugin_list(bot),
        "plugin-load" => {
            let id = identifier(args, "plugin", PluginError::InvalidIdentifier.into())?;
            let path = optional(args, "path", PluginError::InvalidIdentifier.into())?;
            bot.load_plugin(&id, (!path.is_empty()).then_some(path.as_str()))
                .await?;
            Ok(json!({ "command": "plugin-load" }))
        }
        "plugin-reload" => {
            let id = identifier(args, "plugin", PluginError::InvalidIdentifier.into())?;
            bot.reload_plugin(&id).await?;
            Ok(json!({ "command": "plugin-reload" }))
        }
        "plugin-unload" => {
            let id = identifier(args, "plugin", PluginError::InvalidIdentifier.into())?;
            bot.unload_plugin(&id).await?;
            Ok(json!({ "command": "plugin-unload" }))
        }
        "rule-add" => rule_add(bot, args),
        "rule-edit" => rule_edit(bot, args),
        "rule-info" => rule_info(bot, args),
        "rule-list" => rule_list(bot.rules()),
        "rule-move" => rule_move(bot, args),
        "rule-remove" => {
            let index = index_field(args, "index")?;
            bot.rules_mut().remove(index)?;
            Ok(json!({ "command": "rule-remove" }))
        }
        "server-connect" => server_connect(bot, args),
        "server-disconnect" => server_disconnect(bot, args),
        "server-info" => server_info(bot, args),
        "server-invite" => {
            let (server, target, channel) = server_target_channel(bot, args)?;
            server.invite(&target, &channel)?;
            Ok(json!({ "command": "server-invite" }))
        }
        "server-join" => {
            let server = server_of(bot, args)?;
            let channel = required(args, "channel", ServerError::InvalidChannel.into())?;
            let password = optional(args, "password", ServerError::InvalidPassword.into())?;
            server.join(&channel, (!password.is_empty()).then_some(password.as_str()))?;
            Ok(json!({ "command": "server-join" }))
        }
        "server-kick" => {
            let (server, target, channel) = server_target_channel(bot, args)?;
            let reason = optional(args, "reason", ServerError::InvalidMessage.into())?;
            server.kick(&target, &channel, &reason)?;
            Ok(json!({ "command": "server-kick" }))
        }
        "server-list" => {
            let list: Vec<&str> = bot.servers().list().iter().map(|s| s.id()).collect();
            Ok(json!({ "command": "server-list", "list": list }))
        }
        "server-me" => {
            let server = server_of(bot, args)?;
            let target = required(args, "target", ServerError::InvalidChannel.into())?;
            let message = optional(args, "message", ServerError::InvalidMessage.into())?;
            server.me(&target, &message)?;
            Ok(json!({ "command": "server-me" }))
        }
        "server-message" => {
            let server = server_of(bot, args)?;
            let target = required(args, "target", ServerError::InvalidChannel.into())?;
            let message = optional(args, "message", ServerError::InvalidMessage.into())?;
            server.message(&target, &message)?;
            Ok(json!({ "command": "server-message" }))
        }
        "server-mode" => {
            let server = server_of(bot, args)?;
            let channel = required(args, "channel", ServerError::InvalidChannel.into())?;
            let mode = required(args, "mode", ServerError::InvalidMode.into())?;
            let limit = optional(args, "limit", ServerError::InvalidMode.into())?;
            let user = optional(args, "user", ServerError::InvalidMode.into())?;
            let mask = optional(args, "mask", ServerError::InvalidMode.into())?;
            server.mode(&channel, &mode, &limit, &user, &mask)?;
            Ok(json!({ "command": "server-mode" }))
        }
        "server-nick" => {
            let server = server_of(bot, args)?;
            let nickname = required(args, "nickname", ServerError::InvalidNickname.into())?;
            server.set_nickname(&nickname)?;
            Ok(json!({ "command": "server-nick" }))
        }
        "server-notice" => {
            let server = server_of(bot, args)?;
            let target = required(args, "target", ServerError::InvalidChannel.into())?;
            let message = optional(args, "message", ServerError::InvalidMessage.into())?;
            server.notice(&target, &message)?;
            Ok(json!({ "command": "server-notice" }))
        }
        "server-part" => {
            let server = server_of(bot, args)?;
            let channel = required(args, "channel", ServerError::InvalidChannel.into())?;
            let reason = optional(args, "reason", ServerError::InvalidMessage.into())?;
            server.part(&channel, &reason)?;
            Ok(json!({ "command": "server-part" }))
        }
        "server-reconnect" => server_reconnect(bot, args),
        "server-topic" => {
            let server = server_of(bot, args)?;
            let channel = required(args, "channel", ServerError::InvalidChannel.into())?;
            let topic = optional(args, "topic", ServerError::InvalidMessage.into())?;
            server.topic(&channel, &topic)?;
            Ok(json!({ "command": "server-topic" }))
        }
        "hook-add" => {
            let id = identifier(args, "id", HookError::InvalidIdentifier.into())?;
            let path = required(args, "path", HookError::InvalidPath.into())?;
            bot.hooks_mut().add(Hook::new(&id, &path)?)?;
            Ok(json!({ "command": "hook-add" }))
        }
        "hook-list" => {
            let list: Vec<Value> = bot
                .hooks()
                .list()
                .iter()
                .map(|h| json!({ "id": h.id(), "path": h.path() }))
                .collect();
            Ok(json!({ "command": "hook-list", "list": list }))
        }
        "hook-remove" => {
            let id = identifier(args, "id", HookError::InvalidIdentifier.into())?;
            bot.hooks_mut().remove(&id)?;
            Ok(json!({ "command": "hook-remove" }))
        }
        _ => Err(BotError::InvalidCommand.into()),
    }
}

// -- field extraction -----------------------------------------------------

/// A required identifier-valued field.
fn identifier(args: &Value, key: &str, error: Error) -> Result<String, Error> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if is_identifier(value) => Ok(value.to_owned()),
        _ => Err(error),
    }
}

/// A required non-empty string field.
fn required(args: &Value, key: &str, error: Error) -> Result<String, Error> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(error),
    }
}

/// An optional string field: absent means empty, a non-string value is
/// an error.
fn optional(args: &Value, key: &str, error: Error) -> Result<String, Error> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(error),
    }
}

/// A required rule index.
fn index_field(args: &Value, key: &str) -> Result<usize, Error> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| RuleError::InvalidIndex.into())
}

fn server_of(bot: &Bot, args: &Value) -> Result<std::sync::Arc<crate::server::Server>, Error> {
    let id = identifier(args, "server", ServerError::InvalidIdentifier.into())?;
    Ok(bot.servers().require(&id)?)
}

fn server_target_channel(
    bot: &Bot,
    args: &Value,
) -> Result<(std::sync::Arc<crate::server::Server>, String, String), Error> {
    let server = server_of(bot, args)?;
    let target = required(args, "target", ServerError::InvalidNickname.into())?;
    let channel = required(args, "channel", ServerError::InvalidChannel.into())?;
    Ok((server, target, channel))
}

// -- plugin commands ------------------------------------------------------

fn plugin_config(bot: &Bot, args: &Value) -> Result<Value, Error> {
    let id = identifier(args, "plugin", PluginError::InvalidIdentifier.into())?;
    let plugin = bot.plugins().require(&id)?;

    if args.get("value").is_some() {
        let variable = args
            .get("variable")
            .and_then(Value::as_str)
            .ok_or(BotError::IncompleteMessage)?;
        let value = args
            .get("value")
            .and_then(Value::as_str)
            .ok_or(BotError::IncompleteMessage)?;

        let mut options = plugin.options();
        options.insert(variable.to_owned(), value.to_owned());
        plugin.set_options(options);

        return Ok(json!({ "command": "plugin-config" }));
    }

    let options = plugin.options();
    let mut variables = Map::new();

    match args.get("variable").and_then(Value::as_str) {
        Some(variable) => {
            let value = options.get(variable).cloned().unwrap_or_default();
            variables.insert(variable.to_owned(), Value::String(value));
        }
        None => {
            for (key, value) in options {
                variables.insert(key, Value::String(value));
            }
        }
    }

    Ok(json!({ "command": "plugin-config", "variables": variables }))
}

fn plugin_info(bot: &Bot, args: &Value) -> Result<Value, Error> {
    let id = identifier(args, "plugin", PluginError::InvalidIdentifier.into())?;
    let plugin = bot.plugins().require(&id)?;
    let metadata = plugin.metadata();

    Ok(json!({
        "command": "plugin-info",
        "author": metadata.author,
        "license": metadata.license,
        "summary": metadata.summary,
        "version": metadata.version,
    }))
}

fn plugin_list(bot: &Bot) -> Result<Value, Error> {
    let list: Vec<&str> = bot.plugins().list().iter().map(|p| p.id()).collect();

    Ok(json!({ "command": "plugin-list", "list": list }))
}

// -- rule commands --------------------------------------------------------

fn rule_to_json(rule: &Rule) -> Value {
    json!({
        "servers": &rule.servers,
        "channels": &rule.channels,
        "origins": &rule.origins,
        "plugins": &rule.plugins,
        "events": &rule.events,
        "action": rule.action.as_str(),
    })
}

fn set_from_value(value: Option<&Value>) -> std::collections::BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn rule_from_value(args: &Value) -> Result<Rule, Error> {
    let action = match args.get("action") {
        None => RuleAction::Accept,
        Some(value) => value
            .as_str()
            .ok_or(RuleError::InvalidAction)?
            .parse::<RuleAction>()?,
    };

    Ok(Rule {
        servers: set_from_value(args.get("servers")),
        channels: set_from_value(args.get("channels")),
        origins: set_from_value(args.get("origins")),
        plugins: set_from_value(args.get("plugins")),
        events: set_from_value(args.get("events")),
        action,
    })
}

fn rule_add(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    let rule = rule_from_value(args)?;
    let index = match args.get("index") {
        None => bot.rules().len(),
        Some(value) => value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(RuleError::InvalidIndex)?,
    };

    bot.rules_mut().insert(index, rule)?;
    Ok(json!({ "command": "rule-add" }))
}

fn rule_edit(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    let index = index_field(args, "index")?;

    // Work on a copy so a failure leaves the rule untouched.
    let mut rule = bot.rules().get(index)?.clone();

    for (key, set) in [
        ("servers", &mut rule.servers),
        ("channels", &mut rule.channels),
        ("origins", &mut rule.origins),
        ("plugins", &mut rule.plugins),
        ("events", &mut rule.events),
    ] {
        // Removal first, addition afterwards.
        for value in set_from_value(args.get(format!("remove-{}", key).as_str())) {
            set.remove(&value);
        }
        for value in set_from_value(args.get(format!("add-{}", key).as_str())) {
            set.insert(value);
        }
    }

    if let Some(action) = args.get("action") {
        rule.action = action
            .as_str()
            .ok_or(RuleError::InvalidAction)?
            .parse::<RuleAction>()?;
    }

    bot.rules_mut().replace(index, rule)?;
    Ok(json!({ "command": "rule-edit" }))
}

fn rule_info(bot: &Bot, args: &Value) -> Result<Value, Error> {
    let index = index_field(args, "index")?;
    let mut reply = rule_to_json(bot.rules().get(index)?);

    reply["command"] = Value::String("rule-info".to_owned());
    Ok(reply)
}

fn rule_list(rules: &RuleSet) -> Result<Value, Error> {
    let list: Vec<Value> = rules.list().iter().map(rule_to_json).collect();

    Ok(json!({ "command": "rule-list", "list": list }))
}

fn rule_move(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    let from = index_field(args, "from")?;
    let to = index_field(args, "to")?;

    bot.rules_mut().move_rule(from, to)?;
    Ok(json!({ "command": "rule-move" }))
}

// -- server commands ------------------------------------------------------

fn server_connect(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    let server = config::build_server(args)?;

    if bot.servers().has(server.id()) {
        return Err(ServerError::AlreadyExists.into());
    }

    bot.servers_mut().add(server)?;
    Ok(json!({ "command": "server-connect" }))
}

fn server_disconnect(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    match args.get("server") {
        None => bot.servers_mut().clear(),
        Some(_) => {
            let id = identifier(args, "server", ServerError::InvalidIdentifier.into())?;
            bot.servers_mut().remove(&id)?;
        }
    }

    Ok(json!({ "command": "server-disconnect" }))
}

fn server_reconnect(bot: &mut Bot, args: &Value) -> Result<Value, Error> {
    match args.get("server") {
        None => bot.servers_mut().reconnect(None)?,
        Some(_) => {
            let id = identifier(args, "server", ServerError::InvalidIdentifier.into())?;
            bot.servers_mut().reconnect(Some(&id))?;
        }
    }

    Ok(json!({ "command": "server-reconnect" }))
}

fn server_info(bot: &Bot, args: &Value) -> Result<Value, Error> {
    let server = server_of(bot, args)?;
    let config = server.config();

    Ok(json!({
        "command": "server-info",
        "name": &config.id,
        "hostname": &config.hostname,
        "port": config.port,
        "nickname": server.nickname(),
        "username": &config.username,
        "realname": &config.realname,
        "channels": server.joined_channels(),
        "ipv4": config.options.ipv4,
        "ipv6": config.options.ipv6,
        "ssl": config.options.tls,
    }))
}
