//! A small Web server that answers every request by running one CGI script.
//!
//! Call it like this:
//!
//!     cgi-server -f config.toml
//!
//! or, without a config file:
//!
//!     cgi-server -s /var/www/cgi-bin/app.cgi -p 8000
//!
//! The config file is in the [TOML format][toml] because it’s commonly used in
//! the Rust ecosystem. Here is an example, with the defaults for every key
//! but `cgi.script`, which is required:
//!
//! ```toml
//! [listen]
//! address = "127.0.0.1"
//! port = 8080
//! read_timeout = 30
//! write_timeout = 30
//! request_timeout = 60
//! keep_alive = true
//! max_body = 1048576
//!
//! [cgi]
//! script = "/var/www/cgi-bin/app.cgi"
//! mount = "/"
//! # path = "/usr/local/bin:/usr/bin:/bin"
//! timeout = 60
//! max_concurrent = 0
//!
//! [log]
//! access = ["-"]
//! error = "stderr"
//! queue = 1024
//!
//! [shutdown]
//! mode = "graceful"
//! grace_period = 10
//! ```
//!
//! Command-line flags win over the file. If a key is of the wrong type, the
//! server will bail, so don’t do that.
//!
//! Operational messages are filtered through the `CGI_SERVER_LOG` environment
//! variable, in `env_logger` syntax.
//!
//! [toml]: https://github.com/toml-lang/toml

extern crate chrono;
extern crate clap;
extern crate env_logger;
extern crate httparse;
extern crate libc;
#[macro_use] extern crate log;
extern crate nom;
extern crate signal_hook;
extern crate toml;

mod access_log;
mod cgi;
mod config;
mod errors;
mod log_util;
mod server;
mod signals;
mod uri;

use access_log::AccessLog;
use config::{Config, LogSink};
use config::parser::{self, parse_file};
use server::Server;

use clap::{App, Arg, ArgMatches};

use std::io::{stderr, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

/// How long to wait at exit for queued access log lines
const ACCESS_LOG_FLUSH: Duration = Duration::from_secs(5);

fn main() {
    let matches = App::new("cgi-server")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Alex Hill <alexander.d.hill.89@gmail.com>")
        .about("Serves HTTP by running a CGI script for each request")
        .arg(Arg::with_name("config_file")
             .short("f")
             .value_name("FILE")
             .help("The TOML file with server configuration")
             .takes_value(true))
        .arg(Arg::with_name("bind")
             .short("b")
             .long("bind")
             .value_name("ADDR")
             .help("Address to listen on")
             .takes_value(true))
        .arg(Arg::with_name("port")
             .short("p")
             .long("port")
             .value_name("PORT")
             .help("Port to listen on")
             .takes_value(true))
        .arg(Arg::with_name("script")
             .short("s")
             .long("script")
             .value_name("SCRIPT")
             .help("The CGI script to run for every request")
             .takes_value(true))
        .get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(messages) => {
            init_logging(&LogSink::Stderr);
            for message in messages {
                error!("{}", message);
            }
            exit(1);
        }
    };

    init_logging(&config.log.error);

    let access_log = AccessLog::start(&config.log.access, config.log.queue);
    let mode = config.shutdown.mode;

    let server = match Server::bind(config, access_log.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    if let Err(e) = signals::install(server.shutdown_handle(), mode) {
        error!("Could not install signal handlers: {}", e);
        exit(1);
    }

    server.start();
    if !access_log.flush(ACCESS_LOG_FLUSH) {
        warn!("Some access log lines may not have been written");
    }
    info!("Server stopped");
}

fn init_logging(sink: &LogSink) {
    if let Err(e) = log_util::init(sink) {
        let _ = writeln!(stderr(),
                         "cgi-server: Error when initializing logging: {}", e);
        exit(1);
    }
}

/// Reads the config file, if any, and applies command-line overrides.
///
/// Errors come back as messages, because logging is not set up yet.
fn load_config(matches: &ArgMatches) -> Result<Config, Vec<String>> {
    let mut config = match matches.value_of_os("config_file") {
        Some(file) => match parse_file(file) {
            Ok(c) => c,
            Err(parser::Error::Io(e)) => return Err(vec![
                format!("Error opening config file {:?}: {}", file, e)]),
            Err(parser::Error::Parse(e)) => return Err(vec![
                format!("Errors parsing config file {:?}", file),
                format!("Config file error at line {} column {}: {}",
                        e.line, e.column, e.desc)]),
            Err(parser::Error::Validation(message)) => return Err(vec![
                format!("Error in config file: {}", message)])
        },
        None => Config::default()
    };

    if let Some(address) = matches.value_of("bind") {
        config.listen.address = String::from(address);
    }

    if let Some(port) = matches.value_of("port") {
        config.listen.port = match port.parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => return Err(vec![format!("Invalid port {:?}", port)])
        };
    }

    if let Some(script) = matches.value_of_os("script") {
        config.cgi.script = Some(PathBuf::from(script));
    }

    config.finalize().map_err(|message| vec![message])
}
