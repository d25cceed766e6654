//! Nom-based splitting of raw server lines.
//!
//! A server line is `[:senderinfo] COMMAND [params...] [:trailing]`. The
//! sender info is broken into (nick, login, host) using the `!` and `@`
//! positions; lines without both separators come from the server itself and
//! keep the whole token as the nick.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::LineParseError;
use crate::event::Source;

/// Parse the sender info (the part after `:` and before the first space).
fn parse_sender(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name: a letter sequence or a three-digit numeric.
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

/// Parse the parameters following the command.
///
/// Regular parameters are space-separated; a parameter starting with `:`
/// consumes the remainder of the line verbatim, spaces included.
fn parse_params(input: &str) -> Vec<&str> {
    let mut params: Vec<&str> = Vec::new();
    let mut rest = input;

    while rest.as_bytes().first() == Some(&b' ') {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            break;
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            params.push(stripped);
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    params
}

/// One decoded server line.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ServerLine {
    /// Decoded sender, or `None` when the line carried no prefix.
    pub source: Option<Source>,
    /// Upper-cased command token.
    pub command: String,
    /// Numeric value of the command when it is a three-digit code.
    pub code: Option<u16>,
    /// All parameters in order; a trailing parameter is the last entry.
    pub params: Vec<String>,
}

impl ServerLine {
    pub fn parse(line: &str) -> Result<ServerLine, LineParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(LineParseError::EmptyLine);
        }

        let (rest, sender) =
            opt(parse_sender)(line).map_err(|_: nom::Err<nom::error::Error<&str>>| {
                LineParseError::InvalidCommand(line.to_string())
            })?;
        let (rest, _) = space0::<_, nom::error::Error<&str>>(rest)
            .map_err(|_| LineParseError::InvalidCommand(line.to_string()))?;
        let (rest, command) = parse_command(rest)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| {
                LineParseError::InvalidCommand(line.to_string())
            })?;

        let params = parse_params(rest)
            .into_iter()
            .map(str::to_string)
            .collect();

        let code = if command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit()) {
            command.parse::<u16>().ok()
        } else {
            None
        };

        Ok(ServerLine {
            source: sender.map(split_sender),
            command: command.to_ascii_uppercase(),
            code,
            params,
        })
    }

    /// First parameter with a leading `:` stripped, or `""`.
    pub fn target(&self) -> &str {
        self.params
            .first()
            .map(|t| t.strip_prefix(':').unwrap_or(t))
            .unwrap_or("")
    }

    /// Last parameter, conventionally the trailing text, or `""`.
    pub fn trailing(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }
}

/// Break `nick!login@host` into its parts. A token without both separators
/// is a server source: the whole token becomes the nick.
fn split_sender(sender: &str) -> Source {
    let exclaim = sender.find('!');
    let at = exclaim.and_then(|e| sender[e..].find('@').map(|a| e + a));
    match (exclaim, at) {
        (Some(e), Some(a)) => Source {
            nick: sender[..e].to_string(),
            login: sender[e + 1..a].to_string(),
            host: sender[a + 1..].to_string(),
        },
        _ => Source {
            nick: sender.to_string(),
            login: String::new(),
            host: String::new(),
        },
    }
}

/// Extract the response portion of a numeric reply.
///
/// The response starts four bytes past the position where the three-digit
/// code first appears after the sender info (the code plus one space). The
/// offset is applied to the raw line as-is; a line that ends at the code
/// yields an empty response.
pub(crate) fn numeric_response<'a>(line: &'a str, code: u16) -> &'a str {
    let code_str = format!("{:03}", code);
    let search_from = line.find(' ').map(|i| i + 1).unwrap_or(0);
    match line[search_from..].find(&code_str) {
        Some(idx) => line.get(search_from + idx + 4..).unwrap_or(""),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_message() {
        let line = ServerLine::parse(":alice!~a@host.example PRIVMSG #chan :hello world").unwrap();
        let source = line.source.unwrap();
        assert_eq!(source.nick, "alice");
        assert_eq!(source.login, "~a");
        assert_eq!(source.host, "host.example");
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#chan", "hello world"]);
        assert!(line.code.is_none());
    }

    #[test]
    fn test_parse_server_source() {
        let line = ServerLine::parse(":irc.example.net 004 nick irc.example.net v1 ao ov").unwrap();
        let source = line.source.unwrap();
        assert_eq!(source.nick, "irc.example.net");
        assert_eq!(source.login, "");
        assert_eq!(source.host, "");
        assert_eq!(line.code, Some(4));
    }

    #[test]
    fn test_parse_no_prefix() {
        let line = ServerLine::parse("NOTICE * :*** Looking up your hostname").unwrap();
        assert!(line.source.is_none());
        assert_eq!(line.command, "NOTICE");
        assert_eq!(line.trailing(), "*** Looking up your hostname");
    }

    #[test]
    fn test_command_case_folded() {
        let line = ServerLine::parse(":a!b@c privmsg #x :hi").unwrap();
        assert_eq!(line.command, "PRIVMSG");
    }

    #[test]
    fn test_trailing_keeps_spaces() {
        let line = ServerLine::parse(":a!b@c PRIVMSG #x :one  two   three").unwrap();
        assert_eq!(line.trailing(), "one  two   three");
    }

    #[test]
    fn test_empty_trailing() {
        let line = ServerLine::parse("PRIVMSG #x :").unwrap();
        assert_eq!(line.params, vec!["#x", ""]);
    }

    #[test]
    fn test_target_strips_colon() {
        let line = ServerLine::parse(":srv PING :token").unwrap();
        assert_eq!(line.target(), "token");
    }

    #[test]
    fn test_empty_line_rejected() {
        assert_eq!(ServerLine::parse("\r\n"), Err(LineParseError::EmptyLine));
    }

    #[test]
    fn test_numeric_response_extraction() {
        let line = ":srv 332 us #c :Topic here";
        assert_eq!(numeric_response(line, 332), "us #c :Topic here");

        let line = ":srv 366 us #c :End of /NAMES list";
        assert_eq!(numeric_response(line, 366), "us #c :End of /NAMES list");
    }

    #[test]
    fn test_numeric_response_truncated_line() {
        assert_eq!(numeric_response(":srv 001", 1), "");
    }
}
