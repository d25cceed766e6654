//! Channel mode-string interpretation.
//!
//! A MODE line like `+o-v bob bob` is walked character by character with a
//! running `+`/`-` sign. Each recognized letter produces one granular event
//! and, where the letter takes an argument in that direction, consumes the
//! next argument token. The aggregate [`Event::Mode`] with the raw string is
//! appended after all granular events.

use crate::channel::{ChannelRegistry, User};
use crate::event::{Event, Source};

#[derive(Clone, Copy, PartialEq)]
enum Sign {
    Plus,
    Minus,
}

/// Interpret a channel mode string, updating member prefixes in `registry`
/// and returning the events to dispatch, in order.
pub(crate) fn process_channel_modes(
    registry: &ChannelRegistry,
    channel: &str,
    source: &Source,
    mode: &str,
) -> Vec<Event> {
    let mut events = Vec::new();
    let mut tokens = mode.split_whitespace();
    let spec = tokens.next().unwrap_or("");
    let mut args = tokens;

    let mut sign: Option<Sign> = None;

    for c in spec.chars() {
        match c {
            '+' => sign = Some(Sign::Plus),
            '-' => sign = Some(Sign::Minus),
            _ => {
                let Some(sign) = sign else { continue };
                let added = sign == Sign::Plus;
                let chan = channel.to_string();
                let src = source.clone();

                match c {
                    'o' => {
                        let Some(arg) = args.next() else { continue };
                        registry.update_user(channel, arg, |existing| {
                            let voice = existing.map(User::has_voice).unwrap_or(false);
                            User::with_flags(arg, added, voice)
                        });
                        events.push(if added {
                            Event::Op { channel: chan, source: src, recipient: arg.to_string() }
                        } else {
                            Event::Deop { channel: chan, source: src, recipient: arg.to_string() }
                        });
                    }
                    'v' => {
                        let Some(arg) = args.next() else { continue };
                        registry.update_user(channel, arg, |existing| {
                            let op = existing.map(User::is_op).unwrap_or(false);
                            User::with_flags(arg, op, added)
                        });
                        events.push(if added {
                            Event::Voice { channel: chan, source: src, recipient: arg.to_string() }
                        } else {
                            Event::Devoice { channel: chan, source: src, recipient: arg.to_string() }
                        });
                    }
                    'k' => {
                        let Some(arg) = args.next() else { continue };
                        events.push(if added {
                            Event::SetChannelKey { channel: chan, source: src, key: arg.to_string() }
                        } else {
                            Event::RemoveChannelKey { channel: chan, source: src, key: arg.to_string() }
                        });
                    }
                    'l' => {
                        if added {
                            let Some(arg) = args.next() else { continue };
                            if let Ok(limit) = arg.parse::<u32>() {
                                events.push(Event::SetChannelLimit { channel: chan, source: src, limit });
                            }
                        } else {
                            events.push(Event::RemoveChannelLimit { channel: chan, source: src });
                        }
                    }
                    'b' => {
                        let Some(arg) = args.next() else { continue };
                        events.push(if added {
                            Event::SetChannelBan { channel: chan, source: src, mask: arg.to_string() }
                        } else {
                            Event::RemoveChannelBan { channel: chan, source: src, mask: arg.to_string() }
                        });
                    }
                    't' => events.push(if added {
                        Event::SetTopicProtection { channel: chan, source: src }
                    } else {
                        Event::RemoveTopicProtection { channel: chan, source: src }
                    }),
                    'n' => events.push(if added {
                        Event::SetNoExternalMessages { channel: chan, source: src }
                    } else {
                        Event::RemoveNoExternalMessages { channel: chan, source: src }
                    }),
                    'i' => events.push(if added {
                        Event::SetInviteOnly { channel: chan, source: src }
                    } else {
                        Event::RemoveInviteOnly { channel: chan, source: src }
                    }),
                    'm' => events.push(if added {
                        Event::SetModerated { channel: chan, source: src }
                    } else {
                        Event::RemoveModerated { channel: chan, source: src }
                    }),
                    'p' => events.push(if added {
                        Event::SetPrivate { channel: chan, source: src }
                    } else {
                        Event::RemovePrivate { channel: chan, source: src }
                    }),
                    's' => events.push(if added {
                        Event::SetSecret { channel: chan, source: src }
                    } else {
                        Event::RemoveSecret { channel: chan, source: src }
                    }),
                    // Unrecognized letters carry no argument we can account
                    // for; skip them without consuming one.
                    _ => {}
                }
            }
        }
    }

    events.push(Event::Mode {
        channel: channel.to_string(),
        source: source.clone(),
        mode: mode.to_string(),
    });

    events
}
