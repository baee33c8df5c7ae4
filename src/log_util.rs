//! Smol utilities for logging

use crate::config::LogSink;

use env_logger::{Builder, Target};
use log::LevelFilter;

use std::ascii;
use std::env;
use std::fs::OpenOptions;
use std::io;

/// Environment variable holding an `env_logger` filter, e.g. `debug`
pub const LOG_ENV: &str = "CGI_SERVER_LOG";

/// Make an Ascii-safe string
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter()
        .flat_map(|&b| ascii::escape_default(b))
        .map(char::from)
        .collect()
}

/// Installs the operational logger, writing to `sink`.
///
/// Defaults to `info`; `CGI_SERVER_LOG` overrides the filter.
pub fn init(sink: &LogSink) -> io::Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);

    if let Ok(var) = env::var(LOG_ENV) {
        builder.parse_filters(&var);
    }

    match *sink {
        LogSink::Stdout => { builder.target(Target::Stdout); },
        LogSink::Stderr => { builder.target(Target::Stderr); },
        LogSink::File(ref path) => {
            let file = OpenOptions::new().create(true).append(true)
                .open(path)?;
            builder.target(Target::Pipe(Box::new(file)));
        }
    }

    builder.try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[test]
fn ascii_escape_escapes_control_and_high_bytes() {
    assert_eq!(ascii_escape(b"plain"), "plain");
    assert_eq!(ascii_escape(b"line\n"), "line\\n");
    assert_eq!(ascii_escape(b"\xff\"q"), "\\xff\\\"q");
}
