//! CTCP frame handling.
//!
//! CTCP payloads ride inside a PRIVMSG trailing parameter, wrapped in a pair
//! of `\u{1}` delimiters. Only the request verbs served by the framework are
//! given their own variant; everything else falls through as unrecognized.

/// The CTCP delimiter character.
pub const CTCP_DELIMITER: char = '\u{1}';

/// A decoded CTCP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CtcpRequest<'a> {
    Version,
    Action(&'a str),
    Ping(&'a str),
    Time,
    Finger,
    Dcc(Vec<&'a str>),
    Unrecognized(&'a str),
}

/// Strip the surrounding delimiters from a trailing parameter, or `None` if
/// the text is not a CTCP frame.
pub(crate) fn unwrap_frame(trailing: &str) -> Option<&str> {
    trailing
        .strip_prefix(CTCP_DELIMITER)
        .and_then(|t| t.strip_suffix(CTCP_DELIMITER))
}

/// Decode the request inside an already-unwrapped CTCP frame.
pub(crate) fn decode(request: &str) -> CtcpRequest<'_> {
    let (verb, remainder) = match request.find(' ') {
        Some(idx) => (&request[..idx], &request[idx + 1..]),
        None => (request, ""),
    };

    match verb {
        "VERSION" => CtcpRequest::Version,
        "ACTION" => CtcpRequest::Action(remainder),
        "PING" => CtcpRequest::Ping(remainder),
        "TIME" => CtcpRequest::Time,
        "FINGER" => CtcpRequest::Finger,
        "DCC" => CtcpRequest::Dcc(remainder.split_whitespace().collect()),
        _ => CtcpRequest::Unrecognized(request),
    }
}

/// Wrap `payload` in CTCP delimiters.
pub(crate) fn wrap(payload: &str) -> String {
    format!("{}{}{}", CTCP_DELIMITER, payload, CTCP_DELIMITER)
}
