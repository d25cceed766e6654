//! DCC negotiation: file-transfer offers, resume bookkeeping and chat
//! side-channels.
//!
//! Only the negotiation envelope lives here. The byte-level file loop is an
//! external collaborator; the framework tracks each transfer through
//! `Queued -> Resuming -> Transferring -> Done` and tells it where to pick
//! up after a resume handshake.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::casemap::irc_eq;
use crate::client::Client;
use crate::error::{BotError, Result};
use crate::event::{Event, Source};

/// Which side of the wire initiated the transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// Negotiation state of a transfer, as seen by the external byte loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Queued,
    Resuming,
    Transferring,
    Done,
}

/// One negotiated (or in-negotiation) DCC transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct DccTransfer {
    pub direction: TransferDirection,
    pub peer: Source,
    /// Offered file name; `None` marks a chat session.
    pub filename: Option<String>,
    /// Peer address as the base-10 32-bit integer from the wire.
    pub address: u32,
    pub port: u16,
    /// Advertised size in bytes; -1 when the offer did not parse.
    pub size: i64,
    /// Byte offset the transfer will continue from.
    pub progress: u64,
    pub state: TransferState,
}

/// An incoming `DCC CHAT` offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DccChatRequest {
    pub peer: Source,
    pub address: u32,
    pub port: u16,
}

/// Pack four address bytes into the wire integer: big-endian base-256.
pub fn ip_to_long(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 4 {
        return Err(BotError::InvalidArgument(format!(
            "IP byte slice must have length 4, got {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

/// Unpack the wire integer back into four address bytes.
pub fn long_to_ip(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Tracks transfers parked between a RESUME request and its ACCEPT.
#[derive(Debug, Default)]
pub(crate) struct DccManager {
    awaiting_resume: Mutex<Vec<DccTransfer>>,
}

impl DccManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a transfer until the peer answers the resume handshake.
    pub fn park_awaiting_resume(&self, mut transfer: DccTransfer) {
        transfer.state = TransferState::Resuming;
        self.awaiting_resume.lock().unwrap().push(transfer);
    }

    pub(crate) fn awaiting_resume_count(&self) -> usize {
        self.awaiting_resume.lock().unwrap().len()
    }

    fn take_awaiting(&self, nick: &str, port: u16) -> Option<DccTransfer> {
        let mut list = self.awaiting_resume.lock().unwrap();
        let idx = list
            .iter()
            .position(|t| t.port == port && irc_eq(&t.peer.nick, nick))?;
        Some(list.remove(idx))
    }

    /// Handle the argument list of a CTCP `DCC` request. Returns `false`
    /// when the verb is not one we understand, so the dispatcher can emit
    /// an unknown-line event instead.
    pub(crate) fn process_request(&self, bot: &Client, source: &Source, args: &[&str]) -> bool {
        match args.first().copied() {
            Some("SEND") => {
                let (Some(filename), Some(addr), Some(port)) =
                    (args.get(1), args.get(2), args.get(3))
                else {
                    warn!("malformed DCC SEND from {}", source.nick);
                    return true;
                };
                let (Ok(address), Ok(port)) = (addr.parse::<u32>(), port.parse::<u16>()) else {
                    warn!("unparseable DCC SEND address/port from {}", source.nick);
                    return true;
                };
                let size = args
                    .get(4)
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(-1);

                let transfer = DccTransfer {
                    direction: TransferDirection::Incoming,
                    peer: source.clone(),
                    filename: Some((*filename).to_string()),
                    address,
                    port,
                    size,
                    progress: 0,
                    state: TransferState::Queued,
                };
                bot.dispatch_event(&Event::IncomingFileTransfer { transfer });
                true
            }
            Some("RESUME") => {
                let (Some(port), Some(progress)) = (args.get(2), args.get(3)) else {
                    warn!("malformed DCC RESUME from {}", source.nick);
                    return true;
                };
                let (Ok(port), Ok(progress)) = (port.parse::<u16>(), progress.parse::<u64>())
                else {
                    warn!("unparseable DCC RESUME from {}", source.nick);
                    return true;
                };
                if let Some(mut transfer) = self.take_awaiting(&source.nick, port) {
                    transfer.progress = progress;
                    // The reply names the file literally; peers key the
                    // handshake on (nick, port) and ignore it.
                    let _ = bot.send_ctcp_command(
                        &source.nick,
                        &format!("DCC ACCEPT file.ext {} {}", port, progress),
                    );
                }
                true
            }
            Some("ACCEPT") => {
                let (Some(port), Some(progress)) = (args.get(2), args.get(3)) else {
                    warn!("malformed DCC ACCEPT from {}", source.nick);
                    return true;
                };
                let (Ok(port), Ok(progress)) = (port.parse::<u16>(), progress.parse::<u64>())
                else {
                    warn!("unparseable DCC ACCEPT from {}", source.nick);
                    return true;
                };
                if let Some(mut transfer) = self.take_awaiting(&source.nick, port) {
                    transfer.progress = progress;
                    transfer.state = TransferState::Transferring;
                    bot.dispatch_event(&Event::FileTransferResumed { transfer });
                }
                true
            }
            Some("CHAT") => {
                let (Some(addr), Some(port)) = (args.get(2), args.get(3)) else {
                    warn!("malformed DCC CHAT from {}", source.nick);
                    return true;
                };
                let (Ok(address), Ok(port)) = (addr.parse::<u32>(), port.parse::<u16>()) else {
                    warn!("unparseable DCC CHAT from {}", source.nick);
                    return true;
                };
                bot.dispatch_event(&Event::IncomingChatRequest {
                    request: DccChatRequest {
                        peer: source.clone(),
                        address,
                        port,
                    },
                });
                true
            }
            _ => false,
        }
    }
}

/// An established DCC chat session, independent of the server connection.
pub struct DccChat {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DccChat {
    pub(crate) fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Read one line from the peer. `Ok(None)` signals the peer hung up.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\r') || line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Send one line to the peer.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await
    }
}

/// Offer a DCC chat to `nick` and wait for the peer to call back.
///
/// Binds to the first usable port of `ports` (any free port when the list
/// is empty), advertises `public` or else the session socket's local
/// address, and accepts exactly one connection. Every failure path reports
/// "no session" rather than an error.
pub(crate) async fn initiate_chat(
    bot: &Client,
    nick: &str,
    ports: &[u16],
    public: Option<Ipv4Addr>,
    local: Option<IpAddr>,
    accept_timeout: Duration,
) -> Option<DccChat> {
    let listener = bind_chat_listener(ports).await?;
    let port = listener.local_addr().ok()?.port();

    let ip = public
        .or(match local {
            Some(IpAddr::V4(v4)) => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST);
    let ip_num = ip_to_long(&ip.octets()).ok()?;

    let _ = bot.send_ctcp_command(nick, &format!("DCC CHAT chat {} {}", ip_num, port));

    match tokio::time::timeout(accept_timeout, listener.accept()).await {
        Ok(Ok((stream, peer))) => {
            debug!("DCC chat callback from {}", peer);
            Some(DccChat::new(stream))
        }
        Ok(Err(e)) => {
            debug!("DCC chat accept failed: {}", e);
            None
        }
        Err(_) => {
            debug!("DCC chat offer to {} timed out", nick);
            None
        }
    }
}

/// Connect out to a peer that offered us a chat session.
pub(crate) async fn accept_chat(request: &DccChatRequest) -> Option<DccChat> {
    let ip = Ipv4Addr::from(long_to_ip(request.address));
    match TcpStream::connect((ip, request.port)).await {
        Ok(stream) => Some(DccChat::new(stream)),
        Err(e) => {
            debug!("DCC chat connect to {}:{} failed: {}", ip, request.port, e);
            None
        }
    }
}

async fn bind_chat_listener(ports: &[u16]) -> Option<TcpListener> {
    if ports.is_empty() {
        return TcpListener::bind(("0.0.0.0", 0)).await.ok();
    }
    for &port in ports {
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            return Some(listener);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ip_round_trip_known_values() {
        let bytes = [192, 168, 0, 1];
        let n = ip_to_long(&bytes).unwrap();
        assert_eq!(n, 3_232_235_521);
        assert_eq!(long_to_ip(n), bytes);
    }

    #[test]
    fn test_ip_to_long_rejects_bad_length() {
        assert!(matches!(
            ip_to_long(&[1, 2, 3]),
            Err(BotError::InvalidArgument(_))
        ));
        assert!(matches!(
            ip_to_long(&[1, 2, 3, 4, 5]),
            Err(BotError::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_ip_round_trip(b0: u8, b1: u8, b2: u8, b3: u8) {
            let bytes = [b0, b1, b2, b3];
            let n = ip_to_long(&bytes).unwrap();
            prop_assert_eq!(long_to_ip(n), bytes);
        }

        #[test]
        fn prop_long_round_trip(n: u32) {
            let bytes = long_to_ip(n);
            prop_assert_eq!(ip_to_long(&bytes).unwrap(), n);
        }
    }

    #[test]
    fn test_take_awaiting_matches_nick_case_insensitively() {
        let manager = DccManager::new();
        manager.park_awaiting_resume(DccTransfer {
            direction: TransferDirection::Outgoing,
            peer: Source::new("Peer", "p", "h"),
            filename: Some("file.txt".into()),
            address: 0,
            port: 5000,
            size: 1024,
            progress: 0,
            state: TransferState::Queued,
        });

        assert!(manager.take_awaiting("peer", 5001).is_none());
        assert_eq!(manager.awaiting_resume_count(), 1);

        let t = manager.take_awaiting("PEER", 5000).unwrap();
        assert_eq!(t.state, TransferState::Resuming);
        assert_eq!(manager.awaiting_resume_count(), 0);
    }
}
