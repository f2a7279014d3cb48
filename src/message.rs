//! IRC message parsing and encoding.
//!
//! A message is `[":" prefix SPACE] command SPACE [params]`. Parameters
//! are space separated; the first parameter starting with `:` consumes
//! the rest of the line verbatim. The command is either a three-digit
//! numeric or a word.

use std::fmt;

use nom::{
    bytes::complete::take_while1,
    character::complete::char,
    combinator::opt,
    sequence::preceded,
    IResult,
};
use thiserror::Error;

/// Errors encountered when parsing IRC lines.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Line was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was invalid or missing.
    #[error("invalid command")]
    InvalidCommand,
}

/// Parse the message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name (letters or digits).
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

/// Parse the parameter list after the command.
///
/// Multiple consecutive spaces are treated as a single separator. A
/// parameter starting with `:` swallows the remainder of the line.
fn parse_params(input: &str) -> (Vec<&str>, bool) {
    let mut params = Vec::new();
    let mut trailing = false;
    let mut rest = input;

    while rest.starts_with(' ') {
        rest = rest.trim_start_matches(' ');

        if rest.is_empty() {
            break;
        }

        if let Some(after) = rest.strip_prefix(':') {
            params.push(after);
            trailing = true;
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    (params, trailing)
}

/// A parsed IRC message.
///
/// The optional `prefix` carries the originator (`nick!user@host` for
/// users, a plain name for servers). `args` holds all parameters with
/// the trailing marker already stripped.
#[derive(Clone, Debug, Eq)]
pub struct Message {
    /// Message origin, without the leading `:`.
    pub prefix: Option<String>,
    /// Command word or numeric.
    pub command: String,
    /// Parameters, trailing included as the last element.
    pub args: Vec<String>,
    /// Whether the last argument was written as a trailing parameter.
    ///
    /// Kept so that encoding a parsed message reproduces the input
    /// byte for byte.
    trailing: bool,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.command == other.command && self.args == other.args
    }
}

impl Message {
    /// Construct a message from parts.
    ///
    /// The trailing marker is inferred: the last argument is encoded as
    /// trailing when it is empty, contains a space or starts with `:`.
    pub fn new(prefix: Option<&str>, command: &str, args: &[&str]) -> Self {
        let trailing = args
            .last()
            .map(|a| a.is_empty() || a.contains(' ') || a.starts_with(':'))
            .unwrap_or(false);

        Message {
            prefix: prefix.map(str::to_owned),
            command: command.to_owned(),
            args: args.iter().map(|s| (*s).to_owned()).collect(),
            trailing,
        }
    }

    /// Parse one line, already stripped of its `\r\n` terminator.
    pub fn parse(line: &str) -> Result<Message, MessageParseError> {
        if line.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }

        let (rest, prefix) =
            opt(parse_prefix)(line).map_err(|_: nom::Err<nom::error::Error<&str>>| {
                MessageParseError::InvalidCommand
            })?;
        let rest = rest.trim_start_matches(' ');

        let (rest, command) =
            parse_command(rest).map_err(|_: nom::Err<nom::error::Error<&str>>| {
                MessageParseError::InvalidCommand
            })?;

        let (args, trailing) = parse_params(rest);

        Ok(Message {
            prefix: prefix.map(str::to_owned),
            command: command.to_owned(),
            args: args.into_iter().map(str::to_owned).collect(),
            trailing,
        })
    }

    /// Argument at `index`, or the empty string when absent.
    pub fn get(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// Whether the command is the given numeric reply.
    ///
    /// Numerics compare by value, so leading zeros are tolerated
    /// (`005`, `05` and `5` all match 5).
    pub fn is_numeric(&self, code: u16) -> bool {
        !self.command.is_empty()
            && self.command.chars().all(|c| c.is_ascii_digit())
            && self.command.parse::<u16>() == Ok(code)
    }

    /// Whether the argument at `index` is a CTCP payload, i.e. delimited
    /// by `\x01` bytes on both ends.
    pub fn is_ctcp(&self, index: usize) -> bool {
        let arg = self.get(index);

        arg.len() >= 2 && arg.starts_with('\u{1}') && arg.ends_with('\u{1}')
    }

    /// The inner CTCP payload of the argument at `index`.
    pub fn ctcp(&self, index: usize) -> Option<&str> {
        if self.is_ctcp(index) {
            let arg = self.get(index);
            Some(&arg[1..arg.len() - 1])
        } else {
            None
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        write!(f, "{}", self.command)?;

        for (i, arg) in self.args.iter().enumerate() {
            let last = i + 1 == self.args.len();
            let needs_colon =
                last && (self.trailing || arg.is_empty() || arg.contains(' ') || arg.starts_with(':'));

            if needs_colon {
                write!(f, " :{}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }

        Ok(())
    }
}

impl std::str::FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s)
    }
}

/// Extract the nickname from an origin prefix, i.e. everything before
/// the first `!`. A prefix without `!` is returned unchanged.
pub fn nick_of(origin: &str) -> &str {
    origin.split('!').next().unwrap_or(origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let msg = Message::parse("PING :irc.example").unwrap();

        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.args, vec!["irc.example"]);
    }

    #[test]
    fn test_parse_with_prefix() {
        let msg = Message::parse(":nick!user@host PRIVMSG #channel :Hello, world!").unwrap();

        assert_eq!(msg.prefix.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn test_parse_middle_params() {
        let msg = Message::parse(":srv 353 me = #c :@alice +bob carol").unwrap();

        assert_eq!(msg.command, "353");
        assert_eq!(msg.args, vec!["me", "=", "#c", "@alice +bob carol"]);
    }

    #[test]
    fn test_parse_collapses_extra_spaces() {
        let msg = Message::parse("JOIN   #test").unwrap();

        assert_eq!(msg.args, vec!["#test"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = Message::parse("TOPIC #chan :").unwrap();

        assert_eq!(msg.args, vec!["#chan", ""]);
    }

    #[test]
    fn test_parse_empty_line() {
        assert_eq!(Message::parse(""), Err(MessageParseError::EmptyMessage));
    }

    #[test]
    fn test_parse_missing_command() {
        assert_eq!(
            Message::parse(":prefix.only"),
            Err(MessageParseError::InvalidCommand)
        );
    }

    #[test]
    fn test_numeric_leading_zeros() {
        let msg = Message::parse(":srv 005 me PREFIX=(ov)@+ :are supported").unwrap();

        assert!(msg.is_numeric(5));
        assert!(!msg.is_numeric(6));

        let word = Message::parse("PING :x").unwrap();
        assert!(!word.is_numeric(5));
    }

    #[test]
    fn test_ctcp() {
        let msg = Message::parse(":n!u@h PRIVMSG #c :\u{1}ACTION waves\u{1}").unwrap();

        assert!(msg.is_ctcp(1));
        assert_eq!(msg.ctcp(1), Some("ACTION waves"));
        assert!(!msg.is_ctcp(0));
    }

    #[test]
    fn test_encode_round_trip() {
        for line in [
            "PING :irc.example",
            ":nick!user@host PRIVMSG #channel :Hello, world!",
            ":srv 353 me = #c :@alice +bob carol",
            ":srv 366 me #c :End of /NAMES list",
            "JOIN #test",
            ":n!u@h KICK #x me :go",
            "MODE #chan +o somebody",
        ] {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.to_string(), line, "round trip of {:?}", line);
        }
    }

    #[test]
    fn test_encode_constructed() {
        let msg = Message::new(None, "PRIVMSG", &["#c", "two words"]);
        assert_eq!(msg.to_string(), "PRIVMSG #c :two words");

        let msg = Message::new(None, "NAMES", &["#c"]);
        assert_eq!(msg.to_string(), "NAMES #c");
    }

    #[test]
    fn test_nick_of() {
        assert_eq!(nick_of("nick!user@host"), "nick");
        assert_eq!(nick_of("irc.example"), "irc.example");
        assert_eq!(nick_of(""), "");
    }
}
