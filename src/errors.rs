//! Error handling for the CGI server

use httparse;

use std::error;
use std::fmt;
use std::io;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise within the application
#[derive(Debug)]
pub enum Error {
    /// The listening socket could not be bound. Fatal at startup.
    Bind(String, io::Error),
    /// Startup configuration that only becomes invalid once assembled
    Config(String),
    Parse(httparse::Error),
    Io(io::Error),
    HeadTooLarge,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    RequestIncomplete,
    RequestTimeout,
    LengthRequired,
    BodyTooLarge,
    /// The script could not be started at all
    CgiInvocation(io::Error),
    /// The script ran past its deadline and was killed
    CgiTimeout,
    /// The script's output is not a CGI document
    CgiProtocol(String)
}

impl Error {
    /// The status code a client should see for a request that failed this way
    pub fn status_code(&self) -> u16 {
        match *self {
            Error::Parse(_) |
            Error::HeadTooLarge |
            Error::PathNotInOriginForm |
            Error::IllegalPercentEncoding |
            Error::RequestIncomplete => 400,
            Error::RequestTimeout => 408,
            Error::LengthRequired => 411,
            Error::BodyTooLarge => 413,
            Error::CgiTimeout => 504,
            Error::CgiInvocation(_) | Error::CgiProtocol(_) => 502,
            Error::Bind(..) | Error::Config(_) | Error::Io(_) => 500
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Bind(ref addr, ref e) =>
                write!(f, "could not bind {}: {}", addr, e),
            Error::Config(ref message) => write!(f, "{}", message),
            Error::Parse(ref e) => write!(f, "malformed request: {}", e),
            Error::Io(ref e) => write!(f, "{}", e),
            Error::HeadTooLarge => write!(f, "request head too large"),
            Error::PathNotInOriginForm =>
                write!(f, "request target is not in origin form"),
            Error::IllegalPercentEncoding =>
                write!(f, "illegal percent-encoding in request path"),
            Error::RequestIncomplete =>
                write!(f, "connection closed mid-request"),
            Error::RequestTimeout => write!(f, "timed out reading request"),
            Error::LengthRequired =>
                write!(f, "request body without Content-Length"),
            Error::BodyTooLarge => write!(f, "request body too large"),
            Error::CgiInvocation(ref e) =>
                write!(f, "could not run CGI script: {}", e),
            Error::CgiTimeout => write!(f, "CGI script timed out"),
            Error::CgiProtocol(ref message) =>
                write!(f, "bad CGI response: {}", message)
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Bind(_, ref e) |
            Error::Io(ref e) |
            Error::CgiInvocation(ref e) => Some(e),
            Error::Parse(ref e) => Some(e),
            _ => None
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Error {
        Error::Parse(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
