//! Protocol handler seam
//!
//! The runtime moves bytes; a [`ProtocolHandler`] decides what they mean.
//! Handlers run on data worker threads, once per successful read, and never
//! concurrently for the same connection.

use crate::connection::ConnCtx;

use tracing::debug;

/// Interprets bytes received on a connection
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Called after each successful read with the bytes just received.
    ///
    /// Must not block indefinitely: the calling data worker serves no other
    /// connection until this returns.
    fn on_data(&self, ctx: &mut ConnCtx<'_>);
}

impl<F> ProtocolHandler for F
where
    F: Fn(&mut ConnCtx<'_>) + Send + Sync + 'static,
{
    fn on_data(&self, ctx: &mut ConnCtx<'_>) {
        self(ctx)
    }
}

// ── Canned HTTP ──

const HELLO_BODY: &[u8] = b"HelloWorld\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Default limit on an unterminated header block
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

fn make_hello_response() -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Server: rookery\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: {}\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         \r\n",
        HELLO_BODY.len()
    )
    .into_bytes()
    .into_iter()
    .chain(HELLO_BODY.iter().copied())
    .collect()
}

/// Offset just past the first `\r\n\r\n`, if any
fn header_block_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|at| at + HEADER_END.len())
}

/// Reference handler: one fixed response per request header block.
///
/// Request bodies are not parsed; the connection is kept open.
#[derive(Debug, Clone)]
pub struct CannedHttp {
    response: Vec<u8>,
    max_header_bytes: usize,
}

impl CannedHttp {
    pub fn new() -> Self {
        Self::with_response(make_hello_response())
    }

    /// Answer every header block with `response`, written verbatim.
    pub fn with_response(response: Vec<u8>) -> Self {
        Self {
            response,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }

    /// Close connections that send this many bytes without a header terminator
    pub fn max_header_bytes(mut self, n: usize) -> Self {
        self.max_header_bytes = n;
        self
    }

    pub fn response(&self) -> &[u8] {
        &self.response
    }
}

impl Default for CannedHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for CannedHttp {
    fn on_data(&self, ctx: &mut ConnCtx<'_>) {
        while let Some(end) = header_block_end(ctx.pending()) {
            ctx.consume(end);
            if let Err(e) = ctx.write_all(&self.response) {
                debug!(conn = %ctx.id(), error = %e, "response write failed");
                ctx.close();
                return;
            }
        }
        if ctx.pending().len() > self.max_header_bytes {
            debug!(conn = %ctx.id(), pending = ctx.pending().len(), "header block too large");
            ctx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use rookery_core::{ConnId, CoreId};
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn conn() -> (TcpStream, Connection) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(l.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let (server, peer) = l.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, Connection::new(server, CoreId::new(0), peer))
    }

    fn read_available(client: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = client.read(&mut buf) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_response_shape() {
        let resp = make_hello_response();
        assert!(resp.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with(b"\r\n\r\nHelloWorld\n"));
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains("Content-Length: 11\r\n"));
    }

    #[test]
    fn test_header_block_end() {
        assert_eq!(header_block_end(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        assert_eq!(header_block_end(b"GET / HTTP/1.1\r\n"), None);
        assert_eq!(header_block_end(b""), None);
    }

    #[test]
    fn test_one_response_per_header_block() {
        let (mut client, mut conn) = conn();
        let http = CannedHttp::new();
        let id = ConnId::new(0, 0);

        // Split across calls: nothing until the terminator arrives.
        http.on_data(&mut conn.ctx(id, b"GET / HTTP/1.1\r\nHost: x\r"));
        assert_eq!(conn.pending_len(), 24);
        http.on_data(&mut conn.ctx(id, b"\n\r\nGET /a HTTP/1.1\r\n\r\nGET /b"));
        assert_eq!(conn.pending_len(), 6);
        assert!(!conn.close_requested());

        let got = read_available(&mut client);
        let mut expected = http.response().to_vec();
        expected.extend_from_slice(http.response());
        assert_eq!(got, expected);
    }

    #[test]
    fn test_configured_response_is_written_verbatim() {
        let (mut client, mut conn) = conn();
        let payload = b"HTTP/1.1 204 No Content\r\nServer: Apache\r\n\r\n".to_vec();
        let http = CannedHttp::with_response(payload.clone());
        assert_eq!(http.response(), &payload[..]);

        http.on_data(&mut conn.ctx(ConnId::new(0, 0), b"GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(read_available(&mut client), payload);
        assert_eq!(conn.pending_len(), 0);
    }

    #[test]
    fn test_oversized_header_requests_close() {
        let (_client, mut conn) = conn();
        let http = CannedHttp::new().max_header_bytes(8);
        http.on_data(&mut conn.ctx(ConnId::new(0, 0), b"0123456789"));
        assert!(conn.close_requested());
    }

    #[test]
    fn test_closure_handler() {
        let (mut client, mut conn) = conn();
        let echo = |ctx: &mut ConnCtx<'_>| {
            let n = ctx.pending().len();
            let data = ctx.pending().to_vec();
            ctx.consume(n);
            ctx.write_all(&data).unwrap();
        };
        echo.on_data(&mut conn.ctx(ConnId::new(0, 0), b"abc"));
        assert_eq!(read_available(&mut client), b"abc");
    }
}
