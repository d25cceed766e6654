//! Event handler registration and dispatch plumbing.
//!
//! Handlers are held in registration order; dispatch walks a snapshot of
//! the list so handlers may be added or removed while events are in
//! flight. A handler only sees events whose category its capability set
//! covers.

use std::sync::{Arc, Mutex};

use crate::client::Client;
use crate::event::{Event, EventCategory};

/// The event families a handler wants delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub server_comm: bool,
    pub chat: bool,
    pub administrative: bool,
}

impl Capabilities {
    /// Every event family.
    pub const FULL: Capabilities = Capabilities {
        server_comm: true,
        chat: true,
        administrative: true,
    };

    pub const SERVER_COMM: Capabilities = Capabilities {
        server_comm: true,
        chat: false,
        administrative: false,
    };

    pub const CHAT: Capabilities = Capabilities {
        server_comm: false,
        chat: true,
        administrative: false,
    };

    pub const ADMINISTRATIVE: Capabilities = Capabilities {
        server_comm: false,
        chat: false,
        administrative: true,
    };

    /// Combine two capability sets.
    pub fn union(self, other: Capabilities) -> Capabilities {
        Capabilities {
            server_comm: self.server_comm || other.server_comm,
            chat: self.chat || other.chat,
            administrative: self.administrative || other.administrative,
        }
    }

    /// Does this set cover events of `category`?
    pub fn allows(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::ServerComm => self.server_comm,
            EventCategory::Chat => self.chat,
            EventCategory::Administrative => self.administrative,
        }
    }
}

/// A registered event consumer.
///
/// `on_event` runs on the reader task; implementations should enqueue
/// outbound traffic rather than block. A panicking handler is logged and
/// does not take the connection down.
pub trait Handler: Send + Sync {
    /// Which event families to deliver. Defaults to everything.
    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    fn on_event(&self, bot: &Client, event: &Event);
}

pub(crate) struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
    default: Mutex<Option<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// A registry with the default handler pre-installed.
    pub fn new() -> Self {
        let default: Arc<dyn Handler> = Arc::new(DefaultHandler);
        Self {
            handlers: Mutex::new(vec![default.clone()]),
            default: Mutex::new(Some(default)),
        }
    }

    pub fn add(&self, handler: Arc<dyn Handler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    /// Unregister the built-in default handler. Returns whether it was
    /// still registered.
    pub fn remove_default(&self) -> bool {
        let Some(default) = self.default.lock().unwrap().take() else {
            return false;
        };
        self.handlers
            .lock()
            .unwrap()
            .retain(|h| !Arc::ptr_eq(h, &default));
        true
    }

    /// Stable copy of the current handler list, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.lock().unwrap().clone()
    }
}

/// Supplies the replies RFC 1459 expects from every client: PONG for server
/// pings, and NOTICE-wrapped answers for CTCP VERSION, PING, TIME and
/// FINGER. Registered out of the box; remove it to take over these replies
/// yourself.
pub struct DefaultHandler;

impl Handler for DefaultHandler {
    fn on_event(&self, bot: &Client, event: &Event) {
        match event {
            Event::ServerPing { payload } => {
                bot.send_raw_line(&format!("PONG {}", payload));
            }
            Event::Version { sender, .. } => {
                bot.send_raw_line(&format!(
                    "NOTICE {} :\u{1}VERSION {}\u{1}",
                    sender.nick,
                    bot.version()
                ));
            }
            Event::Ping { sender, token, .. } => {
                bot.send_raw_line(&format!(
                    "NOTICE {} :\u{1}PING {}\u{1}",
                    sender.nick, token
                ));
            }
            Event::Time { sender, .. } => {
                bot.send_raw_line(&format!(
                    "NOTICE {} :\u{1}TIME {}\u{1}",
                    sender.nick,
                    chrono::Local::now().to_rfc2822()
                ));
            }
            Event::Finger { sender, .. } => {
                bot.send_raw_line(&format!(
                    "NOTICE {} :\u{1}FINGER {}\u{1}",
                    sender.nick,
                    bot.finger()
                ));
            }
            _ => {}
        }
    }
}
