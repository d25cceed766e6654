//! One-shot RFC 1413 ident responder.
//!
//! Some IRC servers query port 113 for the connecting user's login before
//! accepting the registration. This responder answers exactly one query
//! with the configured username and then shuts down; it also shuts down
//! after sixty seconds of nobody asking.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// The well-known ident port.
pub const IDENT_PORT: u16 = 113;

const IDENT_LINGER: Duration = Duration::from_secs(60);

/// Answer a single ident query on `listener`, then stop.
pub(crate) async fn serve_one(listener: TcpListener, username: String) {
    let accepted = tokio::time::timeout(IDENT_LINGER, listener.accept()).await;

    let (stream, peer) = match accepted {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            warn!("ident accept failed: {}", e);
            return;
        }
        Err(_) => {
            debug!("ident responder timed out without a query");
            return;
        }
    };

    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut query = String::new();

    let read_result = tokio::time::timeout(IDENT_LINGER, reader.read_line(&mut query)).await;
    if !matches!(read_result, Ok(Ok(n)) if n > 0) {
        debug!("ident query from {} never arrived", peer);
        return;
    }

    let query = query.trim();
    let reply = format!("{} : USERID : UNIX : {}\r\n", query, username);
    if let Err(e) = write.write_all(reply.as_bytes()).await {
        warn!("ident reply to {} failed: {}", peer, e);
        return;
    }
    let _ = write.flush().await;
    debug!("answered ident query from {}", peer);
}
