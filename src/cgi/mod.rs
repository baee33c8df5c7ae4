//! Run CGI/1.1 scripts and process their response messages

pub mod env;
pub mod handler;
pub mod parser;
pub mod process;

pub use self::handler::CgiHandler;

use crate::server::Response;

use std::str;

/// A status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason_phrase: Vec<u8>
}

/// A header line as the script wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Vec<u8>,
    pub content: Vec<u8>
}

/// A parsed CGI response document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiResponse {
    /// From the `Status` header, if the script sent one
    pub status: Option<Status>,
    /// Every other header, in the order the script wrote them
    pub headers: Vec<Header>,
    pub body: Vec<u8>
}

impl CgiResponse {
    /// The status code to send the client.
    ///
    /// An explicit `Status` wins; a bare `Location` is a client redirect;
    /// anything else is a `200`.
    pub fn status_code(&self) -> u16 {
        match self.status {
            Some(ref status) => status.code,
            None if self.header("Location").is_some() => 302,
            None => 200
        }
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.content.as_slice())
    }
}

impl From<CgiResponse> for Response {
    fn from(cgi: CgiResponse) -> Response {
        let mut res = Response::new(cgi.status_code());

        if let Some(Status { ref reason_phrase, .. }) = cgi.status {
            if !reason_phrase.is_empty() {
                res.reason = String::from_utf8_lossy(reason_phrase)
                    .into_owned();
            }
        }

        for Header { name, content } in cgi.headers {
            match str::from_utf8(&name) {
                Ok(name) => res.headers.append(name, content),
                Err(_) => warn!("Dropping CGI header with a non-UTF-8 name")
            }
        }

        res.body = cgi.body;
        res
    }
}
