//! Typed events delivered to registered handlers.
//!
//! Every decoded server line becomes one or more [`Event`] values. Granular
//! mode events mirror the left-to-right walk of a MODE string and are always
//! followed by the aggregate [`Event::Mode`] carrying the raw string.

use crate::channel::User;
use crate::dcc::{DccChatRequest, DccTransfer};

/// The origin of a server-forwarded line: `nick!login@host`.
///
/// For lines originating from the server itself, `nick` holds the server
/// name and `login`/`host` are empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    pub nick: String,
    pub login: String,
    pub host: String,
}

impl Source {
    pub fn new(
        nick: impl Into<String>,
        login: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            nick: nick.into(),
            login: login.into(),
            host: host.into(),
        }
    }
}

/// Broad event families used for handler capability filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventCategory {
    /// Connection lifecycle, pings, raw numeric replies.
    ServerComm,
    /// Conversation traffic: messages, notices, CTCP, topics, DCC offers.
    Chat,
    /// Membership and mode bookkeeping.
    Administrative,
}

/// An event dispatched to handlers.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    // Connection lifecycle
    Connected,
    Disconnected,

    /// The server sent `PING`; the payload is everything after `PING `.
    ServerPing { payload: String },
    /// A numeric reply. `response` is the raw text following the code.
    ServerResponse { code: u16, response: String },
    /// A line that matched no routing rule.
    Unknown { line: String },

    // Conversation
    Message { channel: String, sender: Source, text: String },
    PrivateMessage { sender: Source, text: String },
    Action { sender: Source, target: String, text: String },
    Notice { sender: Source, target: String, text: String },

    // CTCP requests addressed to us
    Version { sender: Source, target: String },
    Ping { sender: Source, target: String, token: String },
    Time { sender: Source, target: String },
    Finger { sender: Source, target: String },

    // Membership
    Join { channel: String, user: Source },
    Part { channel: String, user: Source },
    NickChange { old_nick: String, login: String, host: String, new_nick: String },
    Kick { channel: String, kicker: Source, recipient: String, reason: String },
    Quit { user: Source, reason: String },

    /// A topic became known, either via a TOPIC command (`changed: true`)
    /// or via the 332/333 reply pair (`changed: false`).
    Topic {
        channel: String,
        topic: String,
        set_by: String,
        epoch_ms: i64,
        changed: bool,
    },
    /// One row of a LIST reply.
    ChannelInfo { channel: String, user_count: u32, topic: String },
    /// Complete user list for a channel, after the end-of-names reply.
    UserList { channel: String, users: Vec<User> },
    Invite { target: String, sender: Source, channel: String },

    // Aggregate mode lines
    Mode { channel: String, source: Source, mode: String },
    UserMode { target: String, source: Source, mode: String },

    // Granular channel mode changes, in mode-string order
    Op { channel: String, source: Source, recipient: String },
    Deop { channel: String, source: Source, recipient: String },
    Voice { channel: String, source: Source, recipient: String },
    Devoice { channel: String, source: Source, recipient: String },
    SetChannelKey { channel: String, source: Source, key: String },
    RemoveChannelKey { channel: String, source: Source, key: String },
    SetChannelLimit { channel: String, source: Source, limit: u32 },
    RemoveChannelLimit { channel: String, source: Source },
    SetChannelBan { channel: String, source: Source, mask: String },
    RemoveChannelBan { channel: String, source: Source, mask: String },
    SetTopicProtection { channel: String, source: Source },
    RemoveTopicProtection { channel: String, source: Source },
    SetNoExternalMessages { channel: String, source: Source },
    RemoveNoExternalMessages { channel: String, source: Source },
    SetInviteOnly { channel: String, source: Source },
    RemoveInviteOnly { channel: String, source: Source },
    SetModerated { channel: String, source: Source },
    RemoveModerated { channel: String, source: Source },
    SetPrivate { channel: String, source: Source },
    RemovePrivate { channel: String, source: Source },
    SetSecret { channel: String, source: Source },
    RemoveSecret { channel: String, source: Source },

    // DCC negotiation
    IncomingFileTransfer { transfer: DccTransfer },
    IncomingChatRequest { request: DccChatRequest },
    /// The peer acknowledged our resume request; the external transfer loop
    /// should continue from `transfer.progress`.
    FileTransferResumed { transfer: DccTransfer },
}

impl Event {
    /// The capability family this event belongs to.
    pub fn category(&self) -> EventCategory {
        use Event::*;
        match self {
            Connected | Disconnected | ServerPing { .. } | ServerResponse { .. }
            | Unknown { .. } | ChannelInfo { .. } | UserList { .. } => EventCategory::ServerComm,

            Message { .. } | PrivateMessage { .. } | Action { .. } | Notice { .. }
            | Version { .. } | Ping { .. } | Time { .. } | Finger { .. } | Topic { .. }
            | Invite { .. } | IncomingFileTransfer { .. } | IncomingChatRequest { .. }
            | FileTransferResumed { .. } => EventCategory::Chat,

            _ => EventCategory::Administrative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let e = Event::ServerPing {
            payload: "x".into(),
        };
        assert_eq!(e.category(), EventCategory::ServerComm);

        let e = Event::Message {
            channel: "#c".into(),
            sender: Source::new("a", "b", "c"),
            text: "hi".into(),
        };
        assert_eq!(e.category(), EventCategory::Chat);

        let e = Event::Op {
            channel: "#c".into(),
            source: Source::default(),
            recipient: "bob".into(),
        };
        assert_eq!(e.category(), EventCategory::Administrative);
    }
}
