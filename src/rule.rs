//! Ordered accept/drop rules over event dispatch.
//!
//! A rule matches a probe (server, channel, origin, plugin, event) when
//! each of its five criteria sets is empty or contains the probe value.
//! Rules are kept in an ordered list; the action of the last matching
//! rule wins, and an empty list accepts everything.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// What a matching rule does with the event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// The event is delivered (default).
    #[default]
    Accept,
    /// The event is dropped.
    Drop,
}

impl RuleAction {
    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Accept => "accept",
            RuleAction::Drop => "drop",
        }
    }
}

impl FromStr for RuleAction {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(RuleAction::Accept),
            "drop" => Ok(RuleAction::Drop),
            _ => Err(RuleError::InvalidAction),
        }
    }
}

/// One filter entry.
///
/// An empty criteria set means "any". Servers, channels, origins and
/// plugins are matched case-insensitively; events are fixed enum names
/// and compare verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub servers: BTreeSet<String>,
    pub channels: BTreeSet<String>,
    pub origins: BTreeSet<String>,
    pub plugins: BTreeSet<String>,
    pub events: BTreeSet<String>,
    pub action: RuleAction,
}

fn match_set(set: &BTreeSet<String>, value: &str) -> bool {
    set.is_empty() || set.contains(value)
}

impl Rule {
    /// Whether this rule applies to the given probe.
    pub fn matches(
        &self,
        server: &str,
        channel: &str,
        origin: &str,
        plugin: &str,
        event: &str,
    ) -> bool {
        match_set(&self.servers, &server.to_lowercase())
            && match_set(&self.channels, &channel.to_lowercase())
            && match_set(&self.origins, &origin.to_lowercase())
            && match_set(&self.plugins, &plugin.to_lowercase())
            && match_set(&self.events, event)
    }
}

/// The ordered rule list.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create an empty rule list.
    pub fn new() -> Self {
        Self::default()
    }

    /// All rules, in evaluation order.
    pub fn list(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule at `index`.
    pub fn get(&self, index: usize) -> Result<&Rule, RuleError> {
        self.rules.get(index).ok_or(RuleError::InvalidIndex)
    }

    /// Append a rule at the end.
    pub fn append(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Insert a rule at `index`. `index == len` appends.
    pub fn insert(&mut self, index: usize, rule: Rule) -> Result<(), RuleError> {
        if index > self.rules.len() {
            return Err(RuleError::InvalidIndex);
        }

        self.rules.insert(index, rule);
        Ok(())
    }

    /// Remove and return the rule at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Rule, RuleError> {
        if index >= self.rules.len() {
            return Err(RuleError::InvalidIndex);
        }

        Ok(self.rules.remove(index))
    }

    /// Replace the rule at `index`.
    pub fn replace(&mut self, index: usize, rule: Rule) -> Result<(), RuleError> {
        match self.rules.get_mut(index) {
            Some(slot) => {
                *slot = rule;
                Ok(())
            }
            None => Err(RuleError::InvalidIndex),
        }
    }

    /// Move the rule at `from` so it lands at `to`.
    ///
    /// The rule is removed first and re-inserted at `min(to, len)`;
    /// moving an element onto itself is a successful no-op.
    pub fn move_rule(&mut self, from: usize, to: usize) -> Result<(), RuleError> {
        if from == to {
            return Ok(());
        }

        let rule = self.remove(from)?;
        let index = to.min(self.rules.len());
        self.rules.insert(index, rule);
        Ok(())
    }

    /// Resolve a probe against the list: the action of the last
    /// matching rule, or accept when nothing matches.
    pub fn resolve(
        &self,
        server: &str,
        channel: &str,
        origin: &str,
        plugin: &str,
        event: &str,
    ) -> RuleAction {
        let mut action = RuleAction::Accept;

        for rule in &self.rules {
            if rule.matches(server, channel, origin, plugin, event) {
                action = rule.action;
            }
        }

        action
    }
}
