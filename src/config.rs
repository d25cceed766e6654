//! Per-connection settings and the bot's identity.

use encoding_rs::Encoding;

/// Immutable description of one server connection.
///
/// A copy of the settings used by the most recent `connect` is retained so
/// that `reconnect` can replay them.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection password, sent as `PASS` before registration if set.
    pub password: Option<String>,
    /// Wrap the session in TLS.
    pub tls: bool,
    /// Verify the server certificate when `tls` is on.
    pub verify_tls: bool,
}

impl ConnectionSettings {
    /// Plain-TCP settings for `host` on the default IRC port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 6667,
            password: None,
            tls: false,
            verify_tls: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }
}

/// Who the bot is on the network.
///
/// `name` is the nick we ask for; `nick` is whatever the server currently
/// knows us as and is only rewritten from confirmed server events once
/// registration has completed.
#[derive(Clone, Debug)]
pub(crate) struct Identity {
    pub name: String,
    pub nick: String,
    pub login: String,
    pub real_name: String,
    pub version: String,
    pub finger: String,
    pub encoding: &'static Encoding,
}

impl Default for Identity {
    fn default() -> Self {
        let name = "slircbot".to_string();
        Self {
            nick: name.clone(),
            name,
            login: "slircbot".to_string(),
            real_name: concat!("slirc-bot ", env!("CARGO_PKG_VERSION")).to_string(),
            version: concat!("slirc-bot ", env!("CARGO_PKG_VERSION")).to_string(),
            finger: "I'm a bot, there is nothing to see here.".to_string(),
            encoding: encoding_rs::UTF_8,
        }
    }
}
