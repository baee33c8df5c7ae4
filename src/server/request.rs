//! Reading requests off a connection

use crate::config::deadline_after;
use crate::errors::{Error, Result};
use crate::server::headers::Headers;
use crate::uri::{normalize_path, split_target};

use httparse;

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::str;
use std::time::{Duration, Instant};

/// Longest request head we buffer before giving up on the client
pub const MAX_HEAD_LEN: usize = 8192;
const MAX_HEADERS: usize = 64;

/// The request line and header block
#[derive(Debug, Clone)]
pub struct Head {
    pub method: String,
    pub target: String,
    /// `x` in `HTTP/1.x`
    pub version: u8,
    pub headers: Headers
}

impl Head {
    /// The protocol as it appears on the request line
    pub fn protocol(&self) -> &'static str {
        if self.version == 0 { "HTTP/1.0" } else { "HTTP/1.1" }
    }
}

/// Parses a request head out of the front of `buffer`.
///
/// Returns the number of bytes the head took up, or `None` if more input is
/// needed.
pub fn parse_head(buffer: &[u8]) -> Result<Option<(usize, Head)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let consumed = match req.parse(buffer)? {
        httparse::Status::Complete(consumed) => consumed,
        httparse::Status::Partial => return Ok(None)
    };

    let mut parsed = Headers::new();
    for header in req.headers.iter() {
        parsed.append(header.name, Vec::from(header.value));
    }

    let head = Head {
        method: String::from(req.method.ok_or(Error::RequestIncomplete)?),
        target: String::from(req.path.ok_or(Error::RequestIncomplete)?),
        version: req.version.ok_or(Error::RequestIncomplete)?,
        headers: parsed
    };

    Ok(Some((consumed, head)))
}

/// An incoming request from the client, body included
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// The request-target exactly as sent
    pub target: String,
    /// Percent-decoded, slash-collapsed path
    pub path: Vec<u8>,
    /// Raw query string, without the `'?'`
    pub query: String,
    pub version: u8,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr
}

impl Request {
    pub fn new(head: Head, body: Vec<u8>, remote_addr: SocketAddr,
               local_addr: SocketAddr) -> Result<Request>
    {
        let (path, query) = {
            let (path, query) = split_target(&head.target);
            (normalize_path(path.as_bytes())?, String::from(query))
        };

        Ok(Request {
            method: head.method,
            target: head.target,
            path,
            query,
            version: head.version,
            headers: head.headers,
            body,
            remote_addr,
            local_addr
        })
    }

    pub fn protocol(&self) -> &'static str {
        if self.version == 0 { "HTTP/1.0" } else { "HTTP/1.1" }
    }

    /// Whether the client is willing to send another request on this
    /// connection
    pub fn wants_keep_alive(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            false
        }
        else if self.version == 0 {
            self.headers.has_token("Connection", "keep-alive")
        }
        else {
            true
        }
    }
}

/// Reads one request after another from a stream.
///
/// Bytes read past the end of one request (a pipelined follow-up) stay
/// buffered for the next.
pub struct RequestReader<S> {
    stream: S,
    buffer: Vec<u8>,
    request_timeout: Option<Duration>,
    /// When the request being read has to be complete by
    deadline: Option<Instant>
}

impl<S: Read + Write> RequestReader<S> {
    pub fn new(stream: S) -> RequestReader<S> {
        RequestReader {
            stream,
            buffer: Vec::with_capacity(4096),
            request_timeout: None,
            deadline: None
        }
    }

    /// Limits how long one request, head and body, may take to arrive.
    ///
    /// The clock starts with the request's first byte, so idle time between
    /// requests does not count. A read already waiting when the limit runs
    /// out can still take up to the socket's read timeout.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = Some(timeout);
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Reads the next request head.
    ///
    /// `Ok(None)` means the client went away, or stayed idle past the read
    /// timeout, between requests.
    pub fn read_head(&mut self) -> Result<Option<Head>> {
        self.deadline = None;
        if !self.buffer.is_empty() {
            self.start_clock();
        }

        loop {
            if !self.buffer.is_empty() {
                if let Some((consumed, head)) = parse_head(&self.buffer)? {
                    self.buffer.drain(.. consumed);
                    return Ok(Some(head));
                }

                if self.buffer.len() >= MAX_HEAD_LEN {
                    return Err(Error::HeadTooLarge);
                }
            }

            match self.fill() {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(Error::RequestIncomplete),
                Ok(_) => self.start_clock(),
                Err(Error::RequestTimeout) if self.buffer.is_empty() =>
                    return Ok(None),
                Err(e) => return Err(e)
            }
        }
    }

    /// Reads the body announced by `head`.
    pub fn read_body(&mut self, head: &Head, limit: usize) -> Result<Vec<u8>> {
        if head.headers.contains("Transfer-Encoding") {
            return Err(Error::LengthRequired);
        }

        let length = match content_length(&head.headers)? {
            Some(length) => length,
            None => return Ok(Vec::new())
        };

        if length > limit {
            return Err(Error::BodyTooLarge);
        }

        if self.buffer.len() < length && head.version > 0 &&
            head.headers.has_token("Expect", "100-continue")
        {
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            self.stream.flush()?;
        }

        while self.buffer.len() < length {
            if self.fill()? == 0 {
                return Err(Error::RequestIncomplete);
            }
        }

        Ok(self.buffer.drain(.. length).collect())
    }

    fn start_clock(&mut self) {
        if self.deadline.is_none() {
            self.deadline = self.request_timeout.map(deadline_after);
        }
    }

    fn fill(&mut self) -> Result<usize> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::RequestTimeout);
            }
        }

        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(read) => {
                    self.buffer.extend_from_slice(&chunk[.. read]);
                    return Ok(read);
                },
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock ||
                    e.kind() == io::ErrorKind::TimedOut =>
                    return Err(Error::RequestTimeout),
                Err(e) => return Err(Error::Io(e))
            }
        }
    }
}

/// The declared body length. Conflicting or unparseable values are an error.
fn content_length(headers: &Headers) -> Result<Option<usize>> {
    let mut length = None;

    for value in headers.get_all("Content-Length") {
        let parsed = str::from_utf8(value).ok()
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or(Error::Parse(httparse::Error::HeaderValue))?;

        match length {
            Some(previous) if previous != parsed =>
                return Err(Error::Parse(httparse::Error::HeaderValue)),
            _ => length = Some(parsed)
        }
    }

    Ok(length)
}
