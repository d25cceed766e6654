//! Per-channel user bookkeeping.
//!
//! The registry maps lower-cased channel names to their member tables,
//! keyed by lower-cased nick. Every mutation and every enumeration happens
//! under one lock; snapshots are copied out before the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::casemap::{irc_eq, irc_to_lower};

/// A channel member: a status prefix plus a nick.
///
/// Two users are equal iff their nicks match under RFC 1459 case folding;
/// the prefix is metadata. `@` marks an operator, `+` a voiced user.
#[derive(Clone, Debug, Eq)]
pub struct User {
    prefix: String,
    nick: String,
}

impl User {
    pub fn new(prefix: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            nick: nick.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_op(&self) -> bool {
        self.prefix.contains('@')
    }

    pub fn has_voice(&self) -> bool {
        self.prefix.contains('+')
    }

    /// Rebuild the canonical prefix from op/voice flags: `@+`, `@`, `+` or
    /// the empty string.
    pub(crate) fn with_flags(nick: impl Into<String>, op: bool, voice: bool) -> Self {
        let mut prefix = String::new();
        if op {
            prefix.push('@');
        }
        if voice {
            prefix.push('+');
        }
        Self {
            prefix,
            nick: nick.into(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        irc_eq(&self.nick, &other.nick)
    }
}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        irc_to_lower(&self.nick).hash(state);
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.nick)
    }
}

/// Channel membership tables for the current session.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    inner: Mutex<HashMap<String, HashMap<String, User>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record, creating the channel on first use.
    pub fn add_user(&self, channel: &str, user: User) {
        let mut channels = self.inner.lock().unwrap();
        channels
            .entry(irc_to_lower(channel))
            .or_default()
            .insert(irc_to_lower(user.nick()), user);
    }

    /// Replace the record for `nick` in `channel` with the result of `f`.
    /// The closure sees the existing record if there is one; a record is
    /// created either way so mode changes for unknown users still stick.
    pub fn update_user(&self, channel: &str, nick: &str, f: impl FnOnce(Option<&User>) -> User) {
        let mut channels = self.inner.lock().unwrap();
        let members = channels.entry(irc_to_lower(channel)).or_default();
        let key = irc_to_lower(nick);
        let replacement = f(members.get(&key));
        members.insert(key, replacement);
    }

    /// Remove a user from one channel.
    pub fn remove_user(&self, channel: &str, nick: &str) {
        let mut channels = self.inner.lock().unwrap();
        if let Some(members) = channels.get_mut(&irc_to_lower(channel)) {
            members.remove(&irc_to_lower(nick));
        }
    }

    /// Remove a user from every channel; used for QUIT by someone else.
    pub fn remove_user_everywhere(&self, nick: &str) {
        let key = irc_to_lower(nick);
        let mut channels = self.inner.lock().unwrap();
        for members in channels.values_mut() {
            members.remove(&key);
        }
    }

    /// Carry a user's record (with its prefix) over to a new nick, in every
    /// channel the old nick appears in.
    pub fn rename_user(&self, old_nick: &str, new_nick: &str) {
        let old_key = irc_to_lower(old_nick);
        let mut channels = self.inner.lock().unwrap();
        for members in channels.values_mut() {
            if let Some(user) = members.remove(&old_key) {
                members.insert(
                    irc_to_lower(new_nick),
                    User::new(user.prefix().to_string(), new_nick),
                );
            }
        }
    }

    /// Drop one channel outright; used when we part or are kicked.
    pub fn remove_channel(&self, channel: &str) {
        self.inner.lock().unwrap().remove(&irc_to_lower(channel));
    }

    /// Drop everything; used on connect and on QUIT by our own nick.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Names of all channels we are currently in (lower-cased).
    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of the members of one channel.
    pub fn users(&self, channel: &str) -> Vec<User> {
        self.inner
            .lock()
            .unwrap()
            .get(&irc_to_lower(channel))
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a single member record.
    pub fn get_user(&self, channel: &str, nick: &str) -> Option<User> {
        self.inner
            .lock()
            .unwrap()
            .get(&irc_to_lower(channel))
            .and_then(|members| members.get(&irc_to_lower(nick)).cloned())
    }
}
