//! The connection engine and public bot surface.
//!
//! One [`Client`] owns one server session at a time. A reader task decodes
//! lines and routes them through the dispatcher; a sender task drains the
//! outbound queue with inter-message pacing; handlers observe typed events
//! and talk back through the queue or the raw write path.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use encoding_rs::Encoding;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::casemap::{irc_eq, irc_to_lower};
use crate::channel::{ChannelRegistry, User};
use crate::config::{ConnectionSettings, Identity};
use crate::ctcp::{self, CtcpRequest};
use crate::dcc::{self, DccChat, DccChatRequest, DccManager, DccTransfer, TransferState};
use crate::error::{BotError, Result};
use crate::event::{Event, Source};
use crate::handler::{Handler, HandlerRegistry};
use crate::ident;
use crate::modes;
use crate::parser::{numeric_response, ServerLine};
use crate::queue::OutboundQueue;
use crate::transport::{self, LineReader};

const RPL_MYINFO: u16 = 4;
const RPL_LIST: u16 = 322;
const RPL_TOPIC: u16 = 332;
const RPL_TOPICINFO: u16 = 333;
const RPL_NAMREPLY: u16 = 353;
const RPL_ENDOFNAMES: u16 = 366;
const ERR_NICKNAMEINUSE: u16 = 433;
const ERR_TARGETTOOFAST: u16 = 439;

/// How long a read may block before we probe the server with a PING.
const READ_IDLE: Duration = Duration::from_secs(290);

/// Pause between queued sends, overridable per client.
const DEFAULT_MESSAGE_DELAY_MS: u64 = 1000;

const DEFAULT_CHANNEL_PREFIXES: &str = "#&+!";

struct Options {
    verbose: AtomicBool,
    auto_nick_change: AtomicBool,
    message_delay_ms: AtomicU64,
    queue_compaction: AtomicBool,
    channel_prefixes: Mutex<String>,
    dcc_ports: Mutex<Vec<u16>>,
    dcc_public_address: Mutex<Option<Ipv4Addr>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: AtomicBool::new(false),
            auto_nick_change: AtomicBool::new(false),
            message_delay_ms: AtomicU64::new(DEFAULT_MESSAGE_DELAY_MS),
            queue_compaction: AtomicBool::new(false),
            channel_prefixes: Mutex::new(DEFAULT_CHANNEL_PREFIXES.to_string()),
            dcc_ports: Mutex::new(Vec::new()),
            dcc_public_address: Mutex::new(None),
        }
    }
}

struct Shared {
    settings: Mutex<Option<ConnectionSettings>>,
    identity: Mutex<Identity>,
    options: Options,
    queue: OutboundQueue,
    writer: tokio::sync::Mutex<Option<transport::LineWriter>>,
    local_addr: Mutex<Option<SocketAddr>>,
    channels: ChannelRegistry,
    topics: Mutex<HashMap<String, String>>,
    handlers: HandlerRegistry,
    dcc: DccManager,
    connected: AtomicBool,
    disposed: AtomicBool,
    sender_started: AtomicBool,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// An IRC client. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                settings: Mutex::new(None),
                identity: Mutex::new(Identity::default()),
                options: Options::default(),
                queue: OutboundQueue::new(),
                writer: tokio::sync::Mutex::new(None),
                local_addr: Mutex::new(None),
                channels: ChannelRegistry::new(),
                topics: Mutex::new(HashMap::new()),
                handlers: HandlerRegistry::new(),
                dcc: DccManager::new(),
                connected: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                sender_started: AtomicBool::new(false),
                reader_task: Mutex::new(None),
            }),
        }
    }

    // === Connection lifecycle ===

    /// Open a session and register with the server. Fails with
    /// [`BotError::AlreadyConnected`] while a session is live.
    pub async fn connect(&self, settings: ConnectionSettings) -> Result<()> {
        if self.is_connected() {
            return Err(BotError::AlreadyConnected(settings.host));
        }

        *self.shared.settings.lock().unwrap() = Some(settings.clone());
        self.shared.channels.clear();
        self.shared.topics.lock().unwrap().clear();

        let encoding = self.shared.identity.lock().unwrap().encoding;
        let (mut reader, writer, local_addr) = transport::connect(&settings, encoding).await?;
        *self.shared.local_addr.lock().unwrap() = local_addr;
        *self.shared.writer.lock().await = Some(writer);

        if let Err(e) = self.register(&mut reader, &settings).await {
            *self.shared.writer.lock().await = None;
            return Err(e);
        }

        self.shared.disposed.store(false, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);

        if !self.shared.sender_started.swap(true, Ordering::SeqCst) {
            let client = self.clone();
            tokio::spawn(async move { client.sender_loop().await });
        }
        if self.shared.options.queue_compaction.load(Ordering::SeqCst) {
            let client = self.clone();
            tokio::spawn(async move { client.compactor_loop().await });
        }
        let client = self.clone();
        let handle = tokio::spawn(async move { client.reader_loop(reader).await });
        *self.shared.reader_task.lock().unwrap() = Some(handle);

        info!(server = %settings.host, port = settings.port, "registered with server");
        self.dispatch_event(&Event::Connected);
        Ok(())
    }

    /// Reconnect with the settings of the last `connect` call.
    pub async fn reconnect(&self) -> Result<()> {
        let settings = self
            .shared
            .settings
            .lock()
            .unwrap()
            .clone()
            .ok_or(BotError::NotConnected)?;
        self.connect(settings).await
    }

    /// Ask the server to close the session.
    pub fn disconnect(&self) {
        self.quit_server("");
    }

    /// Send `QUIT` with a reason; the server closes the socket, which the
    /// reader observes as EOF.
    pub fn quit_server(&self, reason: &str) {
        self.send_raw_line(&format!("QUIT :{}", reason));
    }

    /// Tear the session down without a disconnect event: stop the sender,
    /// abort the reader and drop the socket.
    pub async fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.queue.close();
        if let Some(handle) = self.shared.reader_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.shared.writer.lock().await = None;
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Answer one RFC 1413 ident query with the configured login, then shut
    /// the responder down. A bind failure surfaces to the caller; the main
    /// connection does not depend on it.
    pub async fn start_ident_server(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", ident::IDENT_PORT)).await?;
        let username = self.shared.identity.lock().unwrap().login.clone();
        tokio::spawn(ident::serve_one(listener, username));
        Ok(())
    }

    async fn register(&self, reader: &mut LineReader, settings: &ConnectionSettings) -> Result<()> {
        let (name, login, real_name) = {
            let id = self.shared.identity.lock().unwrap();
            (id.name.clone(), id.login.clone(), id.real_name.clone())
        };

        if let Some(password) = &settings.password {
            self.raw_write(&format!("PASS {}", password)).await;
        }
        let mut tried_nick = name.clone();
        self.raw_write(&format!("NICK {}", tried_nick)).await;
        self.raw_write(&format!("USER {} 8 * :{}", login, real_name))
            .await;

        let mut suffix = 1u32;
        loop {
            let line = reader.read_line().await?.ok_or_else(|| {
                BotError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection during registration",
                ))
            })?;
            if line.is_empty() {
                continue;
            }

            // Until the server settles our registration, the working nick
            // is whatever we most recently asked for.
            self.shared.identity.lock().unwrap().nick = tried_nick.clone();

            self.handle_line(&line);

            match registration_code(&line) {
                Some(RPL_MYINFO) => break,
                Some(ERR_NICKNAMEINUSE) => {
                    if self.shared.options.auto_nick_change.load(Ordering::SeqCst) {
                        suffix += 1;
                        tried_nick = format!("{}{}", name, suffix);
                        self.raw_write(&format!("NICK {}", tried_nick)).await;
                    } else {
                        return Err(BotError::NickAlreadyInUse(tried_nick));
                    }
                }
                Some(ERR_TARGETTOOFAST) => {}
                Some(code) if (400..600).contains(&code) => {
                    return Err(BotError::Irc(line));
                }
                _ => {}
            }
        }
        Ok(())
    }

    // === Background tasks ===

    async fn reader_loop(&self, mut reader: LineReader) {
        loop {
            match tokio::time::timeout(READ_IDLE, reader.read_line()).await {
                Err(_) => {
                    // Idle too long: probe the server directly, bypassing
                    // the paced queue.
                    let now = chrono::Utc::now().timestamp();
                    self.raw_write(&format!("PING {}", now)).await;
                }
                Ok(Ok(Some(line))) => {
                    if !line.is_empty() {
                        self.handle_line(&line);
                    }
                }
                Ok(Ok(None)) => {
                    debug!("server closed the connection");
                    break;
                }
                Ok(Err(e)) => {
                    warn!("read error: {}", e);
                    break;
                }
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.writer.lock().await = None;
        if !self.shared.disposed.load(Ordering::SeqCst) {
            self.dispatch_event(&Event::Disconnected);
        }
    }

    async fn sender_loop(&self) {
        loop {
            let delay = self.shared.options.message_delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match self.shared.queue.next().await {
                Some(line) => self.raw_write(&line).await,
                None => break,
            }
        }
        debug!("sender loop stopped");
    }

    async fn compactor_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if !self.shared.options.queue_compaction.load(Ordering::SeqCst)
                || !self.is_connected()
            {
                break;
            }
            self.shared.queue.compact();
        }
    }

    // === Dispatch ===

    /// Deliver an event to every handler whose capabilities cover it, in
    /// registration order. A panicking handler is logged and skipped; the
    /// connection survives handler faults.
    pub(crate) fn dispatch_event(&self, event: &Event) {
        let category = event.category();
        for handler in self.shared.handlers.snapshot() {
            if !handler.capabilities().allows(category) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_event(self, event)));
            if let Err(panic) = outcome {
                warn!("handler panicked on {:?}: {}", category, panic_message(&panic));
            }
        }
    }

    /// Decode one raw server line and route it.
    pub(crate) fn handle_line(&self, line: &str) {
        if self.verbose() {
            trace!("<<<{}", line);
        }

        if let Some(payload) = line.strip_prefix("PING ") {
            self.dispatch_event(&Event::ServerPing {
                payload: payload.to_string(),
            });
            return;
        }

        let parsed = match ServerLine::parse(line) {
            Ok(parsed) => parsed,
            Err(_) => {
                self.dispatch_event(&Event::Unknown {
                    line: line.to_string(),
                });
                return;
            }
        };

        if let Some(code) = parsed.code {
            self.process_server_response(code, line);
            return;
        }

        let source = parsed.source.clone().unwrap_or_default();
        let target = parsed.target().to_string();

        match parsed.command.as_str() {
            "PRIVMSG" => {
                let text = parsed.params.get(1).cloned().unwrap_or_default();
                if let Some(frame) = ctcp::unwrap_frame(&text) {
                    self.handle_ctcp(line, &source, &target, frame);
                } else if self.is_channel(&target) {
                    self.dispatch_event(&Event::Message {
                        channel: target,
                        sender: source,
                        text,
                    });
                } else {
                    self.dispatch_event(&Event::PrivateMessage {
                        sender: source,
                        text,
                    });
                }
            }
            "JOIN" => {
                self.shared
                    .channels
                    .add_user(&target, User::new("", source.nick.clone()));
                self.dispatch_event(&Event::Join {
                    channel: target,
                    user: source,
                });
            }
            "PART" => {
                if irc_eq(&source.nick, &self.nick()) {
                    self.shared.channels.remove_channel(&target);
                } else {
                    self.shared.channels.remove_user(&target, &source.nick);
                }
                self.dispatch_event(&Event::Part {
                    channel: target,
                    user: source,
                });
            }
            "NICK" => {
                let new_nick = target;
                self.shared.channels.rename_user(&source.nick, &new_nick);
                if irc_eq(&source.nick, &self.nick()) {
                    self.shared.identity.lock().unwrap().nick = new_nick.clone();
                }
                self.dispatch_event(&Event::NickChange {
                    old_nick: source.nick,
                    login: source.login,
                    host: source.host,
                    new_nick,
                });
            }
            "NOTICE" => {
                let text = parsed.params.get(1).cloned().unwrap_or_default();
                self.dispatch_event(&Event::Notice {
                    sender: source,
                    target,
                    text,
                });
            }
            "QUIT" => {
                let reason = parsed.trailing().to_string();
                if irc_eq(&source.nick, &self.nick()) {
                    self.shared.channels.clear();
                } else {
                    self.shared.channels.remove_user_everywhere(&source.nick);
                }
                self.dispatch_event(&Event::Quit {
                    user: source,
                    reason,
                });
            }
            "KICK" => {
                let recipient = parsed.params.get(1).cloned().unwrap_or_default();
                let reason = parsed.params.get(2).cloned().unwrap_or_default();
                self.shared.channels.remove_user(&target, &recipient);
                if irc_eq(&recipient, &self.nick()) {
                    self.shared.channels.remove_channel(&target);
                }
                self.dispatch_event(&Event::Kick {
                    channel: target,
                    kicker: source,
                    recipient,
                    reason,
                });
            }
            "MODE" => {
                let mode = mode_text(&parsed.params);
                if self.is_channel(&target) {
                    let events = modes::process_channel_modes(
                        &self.shared.channels,
                        &target,
                        &source,
                        &mode,
                    );
                    for event in &events {
                        self.dispatch_event(event);
                    }
                } else {
                    self.dispatch_event(&Event::UserMode {
                        target,
                        source,
                        mode,
                    });
                }
            }
            "TOPIC" => {
                self.dispatch_event(&Event::Topic {
                    channel: target,
                    topic: parsed.trailing().to_string(),
                    set_by: source.nick.clone(),
                    epoch_ms: chrono::Utc::now().timestamp_millis(),
                    changed: true,
                });
            }
            "INVITE" => {
                self.dispatch_event(&Event::Invite {
                    target,
                    sender: source,
                    channel: parsed.trailing().to_string(),
                });
            }
            _ => {
                self.dispatch_event(&Event::Unknown {
                    line: line.to_string(),
                });
            }
        }
    }

    fn handle_ctcp(&self, line: &str, source: &Source, target: &str, frame: &str) {
        match ctcp::decode(frame) {
            CtcpRequest::Version => self.dispatch_event(&Event::Version {
                sender: source.clone(),
                target: target.to_string(),
            }),
            CtcpRequest::Action(text) => self.dispatch_event(&Event::Action {
                sender: source.clone(),
                target: target.to_string(),
                text: text.to_string(),
            }),
            CtcpRequest::Ping(token) => self.dispatch_event(&Event::Ping {
                sender: source.clone(),
                target: target.to_string(),
                token: token.to_string(),
            }),
            CtcpRequest::Time => self.dispatch_event(&Event::Time {
                sender: source.clone(),
                target: target.to_string(),
            }),
            CtcpRequest::Finger => self.dispatch_event(&Event::Finger {
                sender: source.clone(),
                target: target.to_string(),
            }),
            CtcpRequest::Dcc(args) => {
                if !self.shared.dcc.process_request(self, source, &args) {
                    self.dispatch_event(&Event::Unknown {
                        line: line.to_string(),
                    });
                }
            }
            CtcpRequest::Unrecognized(_) => {
                self.dispatch_event(&Event::Unknown {
                    line: line.to_string(),
                });
            }
        }
    }

    fn process_server_response(&self, code: u16, line: &str) {
        let response = numeric_response(line, code).to_string();

        match code {
            RPL_LIST => {
                let mut fields = response.split_whitespace();
                let _ = fields.next();
                let channel = fields.next().unwrap_or_default().to_string();
                let user_count = fields
                    .next()
                    .and_then(|c| c.parse::<u32>().ok())
                    .unwrap_or(0);
                let topic = response
                    .split_once(':')
                    .map(|(_, t)| t.to_string())
                    .unwrap_or_default();
                self.dispatch_event(&Event::ChannelInfo {
                    channel,
                    user_count,
                    topic,
                });
            }
            RPL_TOPIC => {
                let channel = response
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let topic = response
                    .split_once(':')
                    .map(|(_, t)| t.to_string())
                    .unwrap_or_default();
                self.shared
                    .topics
                    .lock()
                    .unwrap()
                    .insert(irc_to_lower(&channel), topic);
            }
            RPL_TOPICINFO => {
                let mut fields = response.split_whitespace();
                let _ = fields.next();
                let channel = fields.next().unwrap_or_default().to_string();
                let set_by = fields.next().unwrap_or_default().to_string();
                let epoch_ms = fields
                    .next()
                    .and_then(|ts| ts.parse::<i64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(0);
                let topic = self
                    .shared
                    .topics
                    .lock()
                    .unwrap()
                    .remove(&irc_to_lower(&channel))
                    .unwrap_or_default();
                self.dispatch_event(&Event::Topic {
                    channel,
                    topic,
                    set_by,
                    epoch_ms,
                    changed: false,
                });
            }
            RPL_NAMREPLY => {
                if let Some(list_start) = response.find(" :") {
                    let channel = response[..list_start]
                        .rsplit(' ')
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    for token in response[list_start + 2..].split_whitespace() {
                        let prefix = match token.chars().next() {
                            Some('@') => "@",
                            Some('+') => "+",
                            Some('.') => ".",
                            _ => "",
                        };
                        let nick = &token[prefix.len()..];
                        if !nick.is_empty() {
                            self.shared
                                .channels
                                .add_user(&channel, User::new(prefix, nick));
                        }
                    }
                }
            }
            RPL_ENDOFNAMES => {
                let channel = response
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let users = self.shared.channels.users(&channel);
                self.dispatch_event(&Event::UserList { channel, users });
            }
            _ => {}
        }

        self.dispatch_event(&Event::ServerResponse { code, response });
    }

    // === Outbound ===

    /// Write a line immediately through the raw path, bypassing the paced
    /// queue. Fire-and-forget: write errors drop the line; a dead socket
    /// is detected by the reader.
    pub fn send_raw_line(&self, line: &str) {
        let client = self.clone();
        let line = line.to_string();
        tokio::spawn(async move { client.raw_write(&line).await });
    }

    pub(crate) async fn raw_write(&self, line: &str) {
        if self.verbose() {
            trace!(">>>{}", line);
        }
        let mut guard = self.shared.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                if let Err(e) = writer.write_line(line).await {
                    debug!("dropping outbound line after write error: {}", e);
                }
            }
            None => debug!("dropping outbound line; no live connection"),
        }
    }

    /// Queue a raw line behind pending traffic.
    pub fn send_raw_line_via_queue(&self, line: &str) -> Result<()> {
        self.shared.queue.add(line)
    }

    /// Queue a raw line ahead of pending non-priority traffic.
    pub fn send_raw_line_priority(&self, line: &str) -> Result<()> {
        self.shared.queue.add_front(line)
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("PRIVMSG {} :{}", target, text))
    }

    pub fn send_action(&self, target: &str, action: &str) -> Result<()> {
        self.send_ctcp_command(target, &format!("ACTION {}", action))
    }

    pub fn send_notice(&self, target: &str, text: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("NOTICE {} :{}", target, text))
    }

    /// Queue a CTCP request wrapped in a PRIVMSG.
    pub fn send_ctcp_command(&self, target: &str, command: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("PRIVMSG {} :{}", target, ctcp::wrap(command)))
    }

    pub fn join_channel(&self, channel: &str) -> Result<()> {
        self.shared.queue.add(&format!("JOIN {}", channel))
    }

    pub fn join_channel_with_key(&self, channel: &str, key: &str) -> Result<()> {
        self.shared.queue.add(&format!("JOIN {} {}", channel, key))
    }

    pub fn part_channel(&self, channel: &str) -> Result<()> {
        self.shared.queue.add(&format!("PART {}", channel))
    }

    pub fn part_channel_with_reason(&self, channel: &str, reason: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("PART {} :{}", channel, reason))
    }

    pub fn set_topic(&self, channel: &str, topic: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("TOPIC {} :{}", channel, topic))
    }

    pub fn kick(&self, channel: &str, nick: &str) -> Result<()> {
        self.kick_with_reason(channel, nick, "")
    }

    pub fn kick_with_reason(&self, channel: &str, nick: &str, reason: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("KICK {} {} :{}", channel, nick, reason))
    }

    pub fn set_mode(&self, target: &str, mode: &str) -> Result<()> {
        self.shared.queue.add(&format!("MODE {} {}", target, mode))
    }

    pub fn op(&self, channel: &str, nick: &str) -> Result<()> {
        self.set_mode(channel, &format!("+o {}", nick))
    }

    pub fn deop(&self, channel: &str, nick: &str) -> Result<()> {
        self.set_mode(channel, &format!("-o {}", nick))
    }

    pub fn voice(&self, channel: &str, nick: &str) -> Result<()> {
        self.set_mode(channel, &format!("+v {}", nick))
    }

    pub fn devoice(&self, channel: &str, nick: &str) -> Result<()> {
        self.set_mode(channel, &format!("-v {}", nick))
    }

    pub fn ban(&self, channel: &str, hostmask: &str) -> Result<()> {
        self.set_mode(channel, &format!("+b {}", hostmask))
    }

    pub fn unban(&self, channel: &str, hostmask: &str) -> Result<()> {
        self.set_mode(channel, &format!("-b {}", hostmask))
    }

    pub fn send_invite(&self, nick: &str, channel: &str) -> Result<()> {
        self.shared
            .queue
            .add(&format!("INVITE {} :{}", nick, channel))
    }

    pub fn list_channels(&self, parameters: Option<&str>) -> Result<()> {
        match parameters {
            Some(parameters) => self.shared.queue.add(&format!("LIST {}", parameters)),
            None => self.shared.queue.add("LIST"),
        }
    }

    pub fn who(&self, mask: &str) -> Result<()> {
        self.shared.queue.add(&format!("WHO {}", mask))
    }

    /// Ask the server for a new nick; the change only sticks once the
    /// server echoes it back as a NICK event.
    pub fn change_nick(&self, new_nick: &str) -> Result<()> {
        self.shared.queue.add(&format!("NICK {}", new_nick))
    }

    /// Identify with NickServ. Sent raw so the password does not linger in
    /// the queue.
    pub fn identify(&self, password: &str) {
        self.send_raw_line(&format!("NICKSERV IDENTIFY {}", password));
    }

    // === DCC ===

    /// Accept an incoming file offer. With `resume_at`, the transfer is
    /// parked and a resume handshake is sent; the returned record reflects
    /// the new state for the external transfer loop.
    pub fn dcc_receive_file(&self, transfer: &DccTransfer, resume_at: Option<u64>) -> DccTransfer {
        let mut accepted = transfer.clone();
        match resume_at {
            Some(progress) => {
                accepted.progress = progress;
                accepted.state = TransferState::Resuming;
                self.shared.dcc.park_awaiting_resume(accepted.clone());
                let filename = accepted.filename.clone().unwrap_or_default();
                let _ = self.send_ctcp_command(
                    &accepted.peer.nick,
                    &format!("DCC RESUME {} {} {}", filename, accepted.port, progress),
                );
            }
            None => accepted.state = TransferState::Transferring,
        }
        accepted
    }

    /// Offer a DCC chat to `nick` and wait up to `accept_timeout` for the
    /// callback. `None` on any failure.
    pub async fn dcc_send_chat_request(
        &self,
        nick: &str,
        accept_timeout: Duration,
    ) -> Option<DccChat> {
        let ports = self.shared.options.dcc_ports.lock().unwrap().clone();
        let public = *self.shared.options.dcc_public_address.lock().unwrap();
        let local = self.shared.local_addr.lock().unwrap().map(|a| a.ip());
        dcc::initiate_chat(self, nick, &ports, public, local, accept_timeout).await
    }

    /// Connect out to a peer whose chat offer we received.
    pub async fn dcc_accept_chat_request(&self, request: &DccChatRequest) -> Option<DccChat> {
        dcc::accept_chat(request).await
    }

    // === Handlers ===

    pub fn add_handler(&self, handler: impl Handler + 'static) {
        self.shared.handlers.add(Arc::new(handler));
    }

    /// Drop the built-in handler that answers PING/VERSION/TIME/FINGER.
    pub fn remove_default_handler(&self) -> bool {
        self.shared.handlers.remove_default()
    }

    // === Accessors ===

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The nick the server currently knows us by.
    pub fn nick(&self) -> String {
        self.shared.identity.lock().unwrap().nick.clone()
    }

    /// The nick we ask for at registration.
    pub fn name(&self) -> String {
        self.shared.identity.lock().unwrap().name.clone()
    }

    pub fn login(&self) -> String {
        self.shared.identity.lock().unwrap().login.clone()
    }

    pub fn real_name(&self) -> String {
        self.shared.identity.lock().unwrap().real_name.clone()
    }

    pub fn version(&self) -> String {
        self.shared.identity.lock().unwrap().version.clone()
    }

    pub fn finger(&self) -> String {
        self.shared.identity.lock().unwrap().finger.clone()
    }

    /// Channels we are currently confirmed to be in.
    pub fn channels(&self) -> Vec<String> {
        self.shared.channels.channels()
    }

    /// Snapshot of the known members of `channel`.
    pub fn users(&self, channel: &str) -> Vec<User> {
        self.shared.channels.users(channel)
    }

    pub fn outgoing_queue_size(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn server(&self) -> Option<String> {
        self.shared
            .settings
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.host.clone())
    }

    pub fn port(&self) -> Option<u16> {
        self.shared.settings.lock().unwrap().as_ref().map(|s| s.port)
    }

    pub fn is_tls(&self) -> bool {
        self.shared
            .settings
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.tls)
            .unwrap_or(false)
    }

    // === Setters ===

    /// Set the nick to request at the next registration. Also updates the
    /// working nick while no session is live.
    pub fn set_name(&self, name: &str) {
        let mut id = self.shared.identity.lock().unwrap();
        id.name = name.to_string();
        if !self.is_connected() {
            id.nick = name.to_string();
        }
    }

    pub fn set_login(&self, login: &str) {
        self.shared.identity.lock().unwrap().login = login.to_string();
    }

    pub fn set_real_name(&self, real_name: &str) {
        self.shared.identity.lock().unwrap().real_name = real_name.to_string();
    }

    pub fn set_version(&self, version: &str) {
        self.shared.identity.lock().unwrap().version = version.to_string();
    }

    pub fn set_finger(&self, finger: &str) {
        self.shared.identity.lock().unwrap().finger = finger.to_string();
    }

    /// Charset for the wire, applied at the next `connect`.
    pub fn set_encoding(&self, encoding: &'static Encoding) {
        self.shared.identity.lock().unwrap().encoding = encoding;
    }

    /// Log every line crossing the wire at trace level.
    pub fn set_verbose(&self, verbose: bool) {
        self.shared.options.verbose.store(verbose, Ordering::SeqCst);
    }

    pub fn verbose(&self) -> bool {
        self.shared.options.verbose.load(Ordering::SeqCst)
    }

    /// Pause between queued sends.
    pub fn set_message_delay(&self, delay: Duration) {
        self.shared
            .options
            .message_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.shared.options.message_delay_ms.load(Ordering::SeqCst))
    }

    /// Retry with a numbered nick when the server reports ours taken.
    pub fn set_auto_nick_change(&self, enabled: bool) {
        self.shared
            .options
            .auto_nick_change
            .store(enabled, Ordering::SeqCst);
    }

    /// Characters that mark a message target as a channel.
    pub fn set_channel_prefixes(&self, prefixes: &str) {
        *self.shared.options.channel_prefixes.lock().unwrap() = prefixes.to_string();
    }

    /// Enable the periodic dedup pass over the outbound queue.
    pub fn set_queue_compaction(&self, enabled: bool) {
        self.shared
            .options
            .queue_compaction
            .store(enabled, Ordering::SeqCst);
    }

    /// Ports to offer for outgoing DCC sessions; empty means any free port.
    pub fn set_dcc_ports(&self, ports: Vec<u16>) {
        *self.shared.options.dcc_ports.lock().unwrap() = ports;
    }

    /// Address to advertise in DCC offers, overriding the session socket's
    /// local address.
    pub fn set_dcc_public_address(&self, address: Ipv4Addr) {
        *self.shared.options.dcc_public_address.lock().unwrap() = Some(address);
    }

    fn is_channel(&self, target: &str) -> bool {
        match target.chars().next() {
            Some(c) => self
                .shared
                .options
                .channel_prefixes
                .lock()
                .unwrap()
                .contains(c),
            None => false,
        }
    }
}

/// Mode string of a MODE line: every parameter after the target, rejoined.
/// The parser has already split the line and stripped a trailing `:`, so no
/// re-scan of the raw text is needed.
fn mode_text(params: &[String]) -> String {
    match params.get(1..) {
        Some(rest) => rest.join(" "),
        None => String::new(),
    }
}

/// The numeric code of a registration-phase line, if it carries one.
fn registration_code(line: &str) -> Option<u16> {
    let mut tokens = line.split_ascii_whitespace();
    let first = tokens.next()?;
    let candidate = if first.starts_with(':') {
        tokens.next()?
    } else {
        first
    };
    if candidate.len() == 3 && candidate.bytes().all(|b| b.is_ascii_digit()) {
        candidate.parse().ok()
    } else {
        None
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
