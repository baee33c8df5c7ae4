//! Responses and how they go out on the wire

use crate::server::headers::Headers;

use std::io::{self, Write};

/// A complete response, built by a `Handler` and written by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>
}

impl Response {
    /// An empty response with the canonical reason phrase for `status`
    pub fn new(status: u16) -> Response {
        Response {
            status,
            reason: String::from(reason_phrase(status)),
            headers: Headers::new(),
            body: Vec::new()
        }
    }

    pub fn with_body(status: u16, content_type: &str, body: Vec<u8>)
                     -> Response
    {
        let mut res = Response::new(status);
        res.headers.append("Content-Type", Vec::from(content_type.as_bytes()));
        res.body = body;
        res
    }

    /// Whether the response asks for the connection to be closed
    pub fn closes(&self) -> bool {
        self.headers.has_token("Connection", "close")
    }

    /// Fills in the framing headers for `keep_alive`.
    ///
    /// The body always goes out whole and unencoded, so whatever
    /// `Content-Length` or `Transfer-Encoding` the handler set is replaced
    /// by the real body length.
    pub fn prepare(&mut self, version: u8, keep_alive: bool) {
        self.headers.remove("Transfer-Encoding");
        let length = self.body.len().to_string();
        self.headers.set("Content-Length", length.into_bytes());

        if !keep_alive {
            self.headers.set("Connection", Vec::from(&b"close"[..]));
        }
        else if version == 0 {
            self.headers.set("Connection", Vec::from(&b"keep-alive"[..]));
        }
    }

    /// Writes the status line, headers and, unless `head_only`, the body.
    ///
    /// Returns the number of body bytes written.
    pub fn write_to<W: Write>(&self, mut sink: W, head_only: bool)
                              -> io::Result<u64>
    {
        let mut head = Vec::with_capacity(256);
        write!(head, "HTTP/1.1 {} {}\r\n", self.status, self.reason)?;

        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value);
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        sink.write_all(&head)?;

        let sent = if head_only || self.body.is_empty() {
            0
        }
        else {
            sink.write_all(&self.body)?;
            self.body.len() as u64
        };

        sink.flush()?;
        Ok(sent)
    }
}

/// The reason phrase registered for a status code
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown"
    }
}

pub mod error_messages {
    use super::Response;

    fn page(code: u16, body: &'static [u8]) -> Response {
        Response::with_body(code, "text/html", Vec::from(body))
    }

    /// The error page for `code`, for codes the server itself produces
    pub fn for_status(code: u16) -> Response {
        match code {
            400 => error_400(),
            404 => error_404(),
            405 => error_405(),
            408 => error_408(),
            411 => error_411(),
            413 => error_413(),
            502 => error_502(),
            504 => error_504(),
            _ => error_500()
        }
    }

    pub fn error_500() -> Response {
        page(500, ERROR_500)
    }

    const ERROR_500: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Internal Error</h1><p>Something went wrong on my side.</p><p>There's nothing you can do; maybe come back later.</p></body></html>";

    pub fn error_405() -> Response {
        page(405, ERROR_405)
    }

    const ERROR_405: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Method Not Allowed</h1><p>This resource doesn't understand that request method. Sorry about that.</p></body></html>";

    pub fn error_404() -> Response {
        page(404, ERROR_404)
    }

    const ERROR_404: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Not Found</h1><p>Nothing is mounted at that path. Sorry.</p></body></html>";

    pub fn error_400() -> Response {
        page(400, ERROR_400)
    }

    const ERROR_400: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Request</h1><p>Your request had some kind of bad syntax. Are you using netcat?</p></body></html>";

    pub fn error_408() -> Response {
        page(408, ERROR_408)
    }

    const ERROR_408: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Request Timeout</h1><p>Your request took too long to arrive.</p></body></html>";

    pub fn error_411() -> Response {
        page(411, ERROR_411)
    }

    const ERROR_411: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Length Required</h1><p>Request bodies need a Content-Length here.</p></body></html>";

    pub fn error_413() -> Response {
        page(413, ERROR_413)
    }

    const ERROR_413: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Payload Too Large</h1><p>That request body is bigger than I accept.</p></body></html>";

    pub fn error_502() -> Response {
        page(502, ERROR_502)
    }

    const ERROR_502: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Gateway</h1><p>The application behind this server failed to answer properly.</p></body></html>";

    pub fn error_504() -> Response {
        page(504, ERROR_504)
    }

    const ERROR_504: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Gateway Timeout</h1><p>The application behind this server took too long to answer.</p></body></html>";
}

#[cfg(test)]
mod test {
    use super::*;
    use super::error_messages::*;

    #[test]
    fn new_uses_canonical_reason() {
        assert_eq!(Response::new(502).reason, "Bad Gateway");
        assert_eq!(Response::new(299).reason, "Unknown");
    }

    #[test]
    fn prepare_adds_framing() {
        let mut res = Response::with_body(200, "text/plain",
                                          b"hello".to_vec());
        res.prepare(1, false);

        assert_eq!(res.headers.get_str("Content-Length"), Some("5"));
        assert_eq!(res.headers.get_str("Connection"), Some("close"));
        assert!(res.closes());
    }

    #[test]
    fn prepare_says_keep_alive_to_1_0() {
        let mut res = Response::new(200);
        res.prepare(0, true);

        assert_eq!(res.headers.get_str("Content-Length"), Some("0"));
        assert_eq!(res.headers.get_str("Connection"), Some("keep-alive"));
    }

    #[test]
    fn prepare_replaces_wrong_framing() {
        let mut res = Response::with_body(200, "text/plain",
                                          b"hello".to_vec());
        res.headers.append("Content-Length", b"2".to_vec());
        res.headers.append("content-length", b"7".to_vec());
        res.headers.append("Transfer-Encoding", b"chunked".to_vec());
        res.prepare(1, true);

        assert_eq!(res.headers.get_all("Content-Length").collect::<Vec<_>>(),
                   vec![&b"5"[..]]);
        assert!(!res.headers.contains("Transfer-Encoding"));
    }

    #[test]
    fn write_to_serializes_in_order() {
        let mut res = Response::with_body(201, "text/plain", b"hi".to_vec());
        res.headers.append("Set-Cookie", b"a=1".to_vec());
        res.headers.append("Set-Cookie", b"b=2".to_vec());
        res.prepare(1, true);

        let mut out = Vec::new();
        assert_eq!(res.write_to(&mut out, false).unwrap(), 2);
        assert_eq!(&out[..],
                   &b"HTTP/1.1 201 Created\r\nContent-Type: text/plain\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 2\r\n\r\nhi"[..]);
    }

    #[test]
    fn write_to_head_only_skips_body() {
        let mut res = Response::with_body(200, "text/plain", b"hi".to_vec());
        res.prepare(1, true);

        let mut out = Vec::new();
        assert_eq!(res.write_to(&mut out, true).unwrap(), 0);
        assert!(out.ends_with(b"Content-Length: 2\r\n\r\n"));
    }

    #[test]
    fn error_pages_carry_their_status() {
        for &code in &[400, 404, 405, 408, 411, 413, 500, 502, 504] {
            let page = for_status(code);
            assert_eq!(page.status, code);
            assert!(!page.body.is_empty());
        }
    }
}
