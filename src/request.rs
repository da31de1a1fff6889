use crate::error::Error;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, ReadHalf};
use tokio::time::{timeout, Duration};
use url::Url;

const HTTP_REQUEST_DELIMITER: &str = "\r\n\r\n";
const SERVER_HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Parses a ws/wss URL into the pieces needed to open the TCP connection and
/// build the handshake request (client side): the request string itself,
/// the `host:port` to dial, the bare hostname (for TLS SNI), and whether the
/// scheme calls for TLS.
pub fn construct_http_request(
    ws_url: &str,
    key: &str,
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    let http_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(http_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        request_path,
        request_host_field,
        key,
    );

    Ok((request, host_with_port, String::from(host), use_tls))
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Reads and parses a server-side handshake request off `reader`,
    /// timing out after 10 seconds so a connection that completes the TCP
    /// handshake but never sends HTTP can't tie up a read task forever.
    pub async fn parse_http_request<T: AsyncReadExt + Unpin>(
        reader: &mut BufReader<ReadHalf<T>>,
    ) -> Result<HttpRequest, Error> {
        let mut buffer = String::new();

        timeout(SERVER_HANDSHAKE_READ_TIMEOUT, async {
            loop {
                let bytes_read = reader.read_line(&mut buffer).await?;
                if bytes_read == 0 || buffer.ends_with(HTTP_REQUEST_DELIMITER) {
                    break;
                }
            }
            Ok::<(), std::io::Error>(())
        })
        .await??;

        let header_part = buffer
            .strip_suffix(HTTP_REQUEST_DELIMITER)
            .ok_or(Error::IncompleteHTTPRequest)?;

        let mut lines = header_part.lines();
        let request_line = lines.next().ok_or(Error::InvalidHTTPRequestLine)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(Error::MissingHTTPMethod)?.to_string();
        let uri = parts.next().ok_or(Error::MissingHTTPUri)?.to_string();
        let version = parts.next().ok_or(Error::MissingHTTPVersion)?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        Ok(HttpRequest {
            method,
            uri,
            version,
            headers,
        })
    }

    pub fn get_header_value(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    /// True if `header` contains `token` as one of its comma-separated,
    /// case-insensitively matched values — how RFC 7230 says `Connection`
    /// and `Upgrade` tokens should be matched, rather than requiring an
    /// exact single-value match.
    pub fn header_contains_token(&self, header: &str, token: &str) -> bool {
        match self.get_header_value(header) {
            Some(value) => value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_with_port() {
        let (request, host_with_port, host, use_tls) =
            construct_http_request("ws://localhost:8080/chat", "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        assert_eq!(host_with_port, "localhost:8080");
        assert_eq!(host, "localhost");
        assert!(!use_tls);
        assert!(request.starts_with("GET /chat HTTP/1.1"));
        assert!(request.contains("Host: localhost:8080"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn wss_scheme_implies_tls_and_default_port() {
        let (request, host_with_port, _, use_tls) =
            construct_http_request("wss://example.com/", "key").unwrap();
        assert!(use_tls);
        assert_eq!(host_with_port, "example.com:443");
        assert!(request.contains("Host: example.com"));
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let result = construct_http_request("ftp://localhost:8080", "key");
        assert!(matches!(result, Err(Error::InvalidSchemeURL)));
    }

    #[test]
    fn rejects_url_with_no_host() {
        let result = construct_http_request("ws://:8080", "key");
        assert!(result.is_err());
    }
}
