use crate::config::{ClientConfig, WebSocketConfig};
use crate::connection::{ConnState, Connection, SharedState};
use crate::error::Error;
use crate::request::{construct_http_request, HttpRequest};
use crate::stream::SocketFlowStream;
use crate::write::{Writer, WriterKind};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use pki_types::ServerName;
use rand::random;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tokio_rustls::{TlsConnector, TlsStream};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const CLIENT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const SERVER_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}

/// Wraps `stream` into a `Connection`, spawning the read task that drives
/// `ReadStream::poll_messages` for the lifetime of the connection.
fn spawn_connection(
    stream: SocketFlowStream,
    config: WebSocketConfig,
    kind: WriterKind,
) -> Result<Connection, Error> {
    let peer_addr = stream.peer_addr()?;
    let local_addr = stream.local_addr()?;

    let (read_half, write_half) = tokio::io::split(stream);
    let buf_reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(Writer::new(write_half, kind)));
    let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
    let state = SharedState::new(ConnState::Connected);

    let mut read_stream = crate::read::ReadStream::new(
        buf_reader,
        read_tx.clone(),
        writer.clone(),
        config.clone(),
        kind,
    );
    let task_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = read_stream.poll_messages().await {
            if let Some(code) = err.outbound_close_code() {
                let _ = read_stream.send_close_frame(code).await;
            }
            let _ = read_tx.send(Err(err)).await;
        }
        task_state.set(ConnState::Closed);
    });

    Ok(Connection::new(
        writer, read_rx, state, config, peer_addr, local_addr,
    ))
}

/// Performs the client-side opening handshake (RFC 6455 §4.1) against
/// `ws_url`, timing out after 30 seconds.
pub async fn connect_async(ws_url: &str) -> Result<Connection, Error> {
    connect_async_with_config(ws_url, ClientConfig::default()).await
}

pub async fn connect_async_with_config(
    ws_url: &str,
    config: ClientConfig,
) -> Result<Connection, Error> {
    timeout(CLIENT_HANDSHAKE_TIMEOUT, connect_async_inner(ws_url, config)).await?
}

async fn connect_async_inner(ws_url: &str, config: ClientConfig) -> Result<Connection, Error> {
    let key = generate_websocket_key();
    let (request, host_with_port, host, url_wants_tls) = construct_http_request(ws_url, &key)?;
    let use_tls = url_wants_tls || config.secure;

    let tcp_stream = TcpStream::connect(&host_with_port).await?;
    apply_keepalive(&tcp_stream, config.keepalive)?;

    let mut stream = if use_tls {
        let tls_config = Arc::new(build_client_tls_config(&config)?);
        let connector = TlsConnector::from(tls_config);
        let server_name = ServerName::try_from(host.as_str())?.to_owned();
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        SocketFlowStream::Secure(tokio_rustls::TlsStream::Client(tls_stream))
    } else {
        SocketFlowStream::Plain(tcp_stream)
    };

    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::NoUpgrade);
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Response::new(&mut headers);
    parsed.parse(&response)?;

    if parsed.code != Some(101) {
        return Err(Error::NoUpgrade);
    }

    let upgrade_ok = parsed
        .headers
        .iter()
        .any(|h| h.name.eq_ignore_ascii_case("upgrade") && h.value.eq_ignore_ascii_case(b"websocket"));
    if !upgrade_ok {
        return Err(Error::NoUpgrade);
    }

    let accept_value = parsed
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|h| String::from_utf8_lossy(h.value).to_string())
        .ok_or(Error::InvalidAcceptKey)?;

    if accept_value != generate_websocket_accept_value(&key) {
        return Err(Error::InvalidAcceptKey);
    }

    spawn_connection(stream, config.web_socket_config, WriterKind::Client)
}

/// Performs the server-side opening handshake (RFC 6455 §4.2) over an
/// already-accepted (and already TLS-wrapped, if applicable) `stream`.
pub async fn accept_async(stream: SocketFlowStream) -> Result<Connection, Error> {
    accept_async_with_config(stream, WebSocketConfig::default()).await
}

pub async fn accept_async_with_config(
    stream: SocketFlowStream,
    config: WebSocketConfig,
) -> Result<Connection, Error> {
    timeout(SERVER_HANDSHAKE_TIMEOUT, accept_async_inner(stream, config)).await?
}

async fn accept_async_inner(
    stream: SocketFlowStream,
    config: WebSocketConfig,
) -> Result<Connection, Error> {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let request = HttpRequest::parse_http_request(&mut buf_reader).await?;

    if !request.header_contains_token("connection", "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    if !request.header_contains_token("upgrade", "websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    let key = request
        .get_header_value("sec-websocket-key")
        .ok_or(Error::NoSecWebsocketKey)?;
    let accept_value = generate_websocket_accept_value(key);

    let mut write_half = write_half;
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_value
    );
    write_half.write_all(response.as_bytes()).await?;

    let stream = buf_reader.into_inner().unsplit(write_half);
    spawn_connection(stream, config, WriterKind::Server)
}

pub(crate) fn apply_keepalive(
    stream: &TcpStream,
    keepalive: crate::config::Keepalive,
) -> Result<(), Error> {
    use socket2::{SockRef, TcpKeepalive};

    let socket_ref = SockRef::from(stream);
    let keepalive_opts = TcpKeepalive::new()
        .with_time(keepalive.idle)
        .with_interval(keepalive.interval)
        .with_retries(keepalive.count);
    socket_ref.set_tcp_keepalive(&keepalive_opts)?;
    Ok(())
}

fn build_client_tls_config(config: &ClientConfig) -> Result<tokio_rustls::rustls::ClientConfig, Error> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();

    if let Some(ca_file) = &config.ca_file {
        let mut reader = std::io::BufReader::new(std::fs::File::open(ca_file)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?)?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_value_matches_rfc6455_fixture() {
        // RFC 6455 §1.3 worked example.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(
            generate_websocket_accept_value(key),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_bytes_base64_and_unique() {
        let a = generate_websocket_key();
        let b = generate_websocket_key();
        assert_ne!(a, b);
        let decoded = BASE64_STANDARD.decode(&a).unwrap();
        assert_eq!(decoded.len(), 16);
    }
}
