//! Framed line I/O over TCP or TLS.
//!
//! Inbound lines are read up to CRLF and decoded with the configured
//! charset. Outbound lines are encoded, hard-truncated so that the total
//! with CRLF never exceeds [`MAX_LINE_LEN`] bytes, and written with a flush
//! per line.

use std::net::SocketAddr;
use std::sync::Arc;

use encoding_rs::Encoding;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{
    self,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::config::ConnectionSettings;
use crate::error::{BotError, Result};

/// Hard cap on one outbound line, CRLF included.
pub const MAX_LINE_LEN: usize = 512;

/// Inbound lines longer than this are truncated rather than buffered
/// without bound.
const MAX_INBOUND_LINE_LEN: usize = 8191;

pub(crate) enum LineReader {
    Tcp {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        encoding: &'static Encoding,
    },
    Tls {
        reader: BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>,
        encoding: &'static Encoding,
    },
}

pub(crate) enum LineWriter {
    Tcp {
        writer: tokio::net::tcp::OwnedWriteHalf,
        encoding: &'static Encoding,
    },
    Tls {
        writer: tokio::io::WriteHalf<TlsStream<TcpStream>>,
        encoding: &'static Encoding,
    },
}

/// Open the session socket described by `settings` and split it into framed
/// halves. Also reports the socket's local address, which DCC uses as the
/// outward-facing default.
pub(crate) async fn connect(
    settings: &ConnectionSettings,
    encoding: &'static Encoding,
) -> Result<(LineReader, LineWriter, Option<SocketAddr>)> {
    let stream = TcpStream::connect((settings.host.as_str(), settings.port)).await?;

    if let Err(e) = enable_keepalive(&stream) {
        warn!("failed to enable TCP keepalive: {}", e);
    }
    let local_addr = stream.local_addr().ok();

    if settings.tls {
        let config = tls_config(settings.verify_tls)?;
        let connector = TlsConnector::from(Arc::new(config));
        let name = ServerName::try_from(settings.host.clone())
            .map_err(|_| BotError::InvalidArgument(format!("bad TLS name: {}", settings.host)))?;
        let tls = connector.connect(name, stream).await?;
        let (read, write) = tokio::io::split(tls);
        Ok((
            LineReader::Tls {
                reader: BufReader::new(read),
                encoding,
            },
            LineWriter::Tls {
                writer: write,
                encoding,
            },
            local_addr,
        ))
    } else {
        let (read, write) = stream.into_split();
        Ok((
            LineReader::Tcp {
                reader: BufReader::new(read),
                encoding,
            },
            LineWriter::Tcp {
                writer: write,
                encoding,
            },
            local_addr,
        ))
    }
}

fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};
    use std::time::Duration;

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    sock.set_tcp_keepalive(&keepalive)
}

fn tls_config(verify: bool) -> Result<rustls::ClientConfig> {
    if verify {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs()? {
            let _ = roots.add(cert);
        }
        Ok(rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    } else {
        Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth())
    }
}

/// Certificate verifier that accepts anything; installed when the caller
/// turns certificate verification off.
#[derive(Debug)]
struct NoVerification(rustls::crypto::CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl LineReader {
    /// Read one CRLF-delimited line. `Ok(None)` signals EOF.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            LineReader::Tcp { reader, encoding } => read_line_limited(reader, *encoding).await,
            LineReader::Tls { reader, encoding } => read_line_limited(reader, *encoding).await,
        }
    }
}

impl LineWriter {
    /// Encode, truncate and write one line, flushing before returning.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            LineWriter::Tcp { writer, encoding } => {
                let bytes = encode_line(line, *encoding);
                writer.write_all(&bytes).await?;
                writer.flush().await
            }
            LineWriter::Tls { writer, encoding } => {
                let bytes = encode_line(line, *encoding);
                writer.write_all(&bytes).await?;
                writer.flush().await
            }
        }
    }
}

/// Encode `line` and append CRLF, truncating the payload so the result is
/// at most [`MAX_LINE_LEN`] bytes. UTF-8 payloads are cut on a character
/// boundary; other charsets are cut at the byte limit.
pub(crate) fn encode_line(line: &str, encoding: &'static Encoding) -> Vec<u8> {
    const MAX_PAYLOAD: usize = MAX_LINE_LEN - 2;

    let mut bytes = if encoding == encoding_rs::UTF_8 {
        truncate_utf8_safe(line, MAX_PAYLOAD).as_bytes().to_vec()
    } else {
        let (encoded, _, _) = encoding.encode(line);
        let mut encoded = encoded.into_owned();
        encoded.truncate(MAX_PAYLOAD);
        encoded
    };

    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Truncate to at most `max_bytes` without splitting a multi-byte
/// codepoint.
fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn read_line_limited<R>(
    reader: &mut BufReader<R>,
    encoding: &'static Encoding,
) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line: Vec<u8> = Vec::with_capacity(512);
    let mut truncated = false;

    loop {
        let buffer = reader.fill_buf().await?;

        if buffer.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }

        let newline_pos = buffer.iter().position(|&b| b == b'\n');
        let to_consume = newline_pos.map_or(buffer.len(), |idx| idx + 1);

        if line.len().saturating_add(to_consume) > MAX_INBOUND_LINE_LEN {
            let available = MAX_INBOUND_LINE_LEN.saturating_sub(line.len());
            line.extend_from_slice(&buffer[..available.min(buffer.len())]);
            truncated = true;
        } else if !truncated {
            line.extend_from_slice(&buffer[..to_consume]);
        }

        reader.consume(to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    if truncated {
        warn!(length = line.len(), "inbound line truncated at cap");
    }

    while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
        line.pop();
    }

    let (decoded, _, _) = encoding.decode(&line);
    Ok(Some(decoded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_line_appends_crlf() {
        let bytes = encode_line("PRIVMSG #c :hi", encoding_rs::UTF_8);
        assert_eq!(bytes, b"PRIVMSG #c :hi\r\n");
    }

    #[test]
    fn test_encode_line_truncates_to_cap() {
        let long = format!("PRIVMSG #c :{}", "x".repeat(600));
        let bytes = encode_line(&long, encoding_rs::UTF_8);
        assert_eq!(bytes.len(), MAX_LINE_LEN);
        assert!(bytes.ends_with(b"\r\n"));
    }

    #[test]
    fn test_encode_line_respects_char_boundary() {
        // 509 ASCII bytes followed by a 3-byte codepoint straddling the cap.
        let long = format!("{}\u{20AC}zzzz", "a".repeat(509));
        let bytes = encode_line(&long, encoding_rs::UTF_8);
        assert!(bytes.len() <= MAX_LINE_LEN);
        assert!(bytes.ends_with(b"\r\n"));
        // Payload must still be valid UTF-8.
        let payload = &bytes[..bytes.len() - 2];
        assert!(std::str::from_utf8(payload).is_ok());
        assert_eq!(payload.len(), 509);
    }

    #[test]
    fn test_encode_line_non_utf8_charset() {
        let bytes = encode_line("PRIVMSG #c :héllo", encoding_rs::WINDOWS_1252);
        // é encodes to a single 0xE9 byte in windows-1252.
        assert!(bytes.contains(&0xE9));
        assert!(bytes.ends_with(b"\r\n"));
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let data: &[u8] = b":srv NOTICE * :hi\r\nPING :x\r\n";
        let mut reader = BufReader::new(data);
        let line = read_line_limited(&mut reader, encoding_rs::UTF_8)
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some(":srv NOTICE * :hi"));
        let line = read_line_limited(&mut reader, encoding_rs::UTF_8)
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("PING :x"));
        let line = read_line_limited(&mut reader, encoding_rs::UTF_8)
            .await
            .unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn test_read_line_without_trailing_newline() {
        let data: &[u8] = b"NOTICE * :partial";
        let mut reader = BufReader::new(data);
        let line = read_line_limited(&mut reader, encoding_rs::UTF_8)
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("NOTICE * :partial"));
    }
}
