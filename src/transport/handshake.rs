//! WebSocket opening handshake: upgrade request, 101 response, accept check.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

/// Fixed GUID from RFC 6455 §1.3 used to derive `Sec-WebSocket-Accept`.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generate a `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

/// The accept value the server must echo for `key`:
/// `base64(SHA-1(key + GUID))`.
pub fn accept_for_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the upgrade request. `host_header` carries the original host, with
/// the port omitted when it is the scheme default.
pub fn build_request(host_header: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// A parsed handshake response.
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Find the end of the response head (`\r\n\r\n`) in `buf`. Returns the
/// offset of the first byte after the terminator.
pub fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse the response head. `head` must include the terminating blank line.
pub fn parse_response(head: &[u8]) -> Option<Response> {
    let text = std::str::from_utf8(head).ok()?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next()?;
    // "HTTP/1.1 101 Switching Protocols"
    let status = status_line.split_whitespace().nth(1)?.parse().ok()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Some(Response { status, headers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matches_rfc_example() {
        // The worked example from RFC 6455 §1.3.
        assert_eq!(
            accept_for_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_decode_to_16_bytes() {
        let key = generate_key();
        let raw = BASE64.decode(&key).unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(generate_key(), key);
    }

    #[test]
    fn request_has_required_headers() {
        let req = build_request("control.example.com", "/agent", "abc123");
        assert!(req.starts_with("GET /agent HTTP/1.1\r\n"));
        assert!(req.contains("Host: control.example.com\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: abc123\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parse_response_extracts_status_and_headers() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: xyz\r\n\r\n";
        let end = head_end(head).unwrap();
        assert_eq!(end, head.len());
        let resp = parse_response(head).unwrap();
        assert_eq!(resp.status, 101);
        assert_eq!(resp.header("sec-websocket-accept"), Some("xyz"));
        assert_eq!(resp.header("UPGRADE"), Some("websocket"));
    }

    #[test]
    fn non_switching_status_parses() {
        let head = b"HTTP/1.1 403 Forbidden\r\n\r\n";
        let resp = parse_response(head).unwrap();
        assert_eq!(resp.status, 403);
    }
}
