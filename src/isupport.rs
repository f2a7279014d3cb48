//! ISUPPORT (numeric 005) handling.
//!
//! The only token the daemon cares about is `PREFIX=(modes)chars`,
//! which maps channel user modes to the sigils servers decorate
//! nicknames with in NAMES and WHOIS listings.

/// Upper bound on the number of mode/prefix pairs retained from a
/// PREFIX token. Pairs past this bound are ignored.
pub const MAX_PREFIX_MODES: usize = 16;

/// Mode-to-prefix table advertised by a server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixMap {
    pairs: Vec<(char, char)>,
}

impl PrefixMap {
    /// Parse the value of a `PREFIX=` token, e.g. `(ov)@+`.
    ///
    /// Returns `None` when the value is not of the `(modes)chars` form
    /// or either half is empty.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix('(')?;
        let close = rest.find(')')?;
        let modes = &rest[..close];
        let prefixes = &rest[close + 1..];

        if modes.is_empty() || prefixes.is_empty() {
            return None;
        }

        let pairs = modes
            .chars()
            .zip(prefixes.chars())
            .take(MAX_PREFIX_MODES)
            .collect();

        Some(PrefixMap { pairs })
    }

    /// Scan the arguments of a 005 reply for a `PREFIX=` token.
    pub fn from_isupport(args: &[String]) -> Option<Self> {
        args.iter()
            .find_map(|arg| arg.strip_prefix("PREFIX=").and_then(Self::parse))
    }

    /// Whether `c` is a known prefix sigil (`@`, `+`, ...).
    pub fn is_prefix(&self, c: char) -> bool {
        self.pairs.iter().any(|&(_, p)| p == c)
    }

    /// The prefix sigil for a mode character, if advertised.
    pub fn prefix_of(&self, mode: char) -> Option<char> {
        self.pairs.iter().find(|&&(m, _)| m == mode).map(|&(_, p)| p)
    }

    /// Strip one leading prefix sigil from a nickname or channel name,
    /// only when that sigil is in the table.
    pub fn strip<'a>(&self, name: &'a str) -> &'a str {
        match name.chars().next() {
            Some(c) if self.is_prefix(c) => &name[c.len_utf8()..],
            _ => name,
        }
    }

    /// Whether any pairs were recorded yet. The table stays empty until
    /// an ISUPPORT reply has been received.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}
