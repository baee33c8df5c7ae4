use super::*;
use toml::Value;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match toml.parse::<Value>() {
        Ok(table) => config_from_table(&table),
        Err(e) => Err(Error::Parse(message_from_error(&e)))
    }
}

fn config_from_table(table: &Value) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    if let Some(address) = string(table, "listen.address", "bind address")? {
        config.listen.address = address;
    }

    if let Some(p) = port(table, "listen.port")? {
        config.listen.port = p;
    }

    if let Some(t) = seconds(table, "listen.read_timeout")? {
        config.listen.read_timeout = t;
    }

    if let Some(t) = seconds(table, "listen.write_timeout")? {
        config.listen.write_timeout = t;
    }

    if let Some(t) = seconds(table, "listen.request_timeout")? {
        config.listen.request_timeout = t;
    }

    match lookup(table, "listen.keep_alive") {
        Some(&Value::Boolean(b)) => config.listen.keep_alive = b,
        Some(val) => return Err(Error::Validation(
            format!("Expected keep_alive to be a boolean, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    if let Some(n) = count(table, "listen.max_body")? {
        config.listen.max_body = n;
    }

    if let Some(path) = string(table, "cgi.script", "script path")? {
        config.cgi.script = Some(PathBuf::from(path));
    }

    if let Some(mount) = string(table, "cgi.mount", "mount prefix")? {
        config.cgi.mount = mount;
    }

    config.cgi.path_env = string(table, "cgi.path", "PATH override")?;

    if let Some(t) = seconds(table, "cgi.timeout")? {
        config.cgi.timeout = t;
    }

    if let Some(n) = count(table, "cgi.max_concurrent")? {
        config.cgi.max_concurrent = n;
    }

    match lookup(table, "log.access") {
        Some(&Value::String(ref name)) =>
            config.log.access = vec![LogSink::from_name(name)],
        Some(&Value::Array(ref names)) => {
            let mut sinks = Vec::with_capacity(names.len());
            for name in names {
                match *name {
                    Value::String(ref name) =>
                        sinks.push(LogSink::from_name(name)),
                    ref val => return Err(Error::Validation(
                        format!("Expected access log destinations to be \
                                 strings, got a {}", val.type_str())
                    ))
                }
            }
            config.log.access = sinks;
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected the access log to be a string or an array, \
                     got a {}", val.type_str())
        )),
        None => ()
    }

    if let Some(name) = string(table, "log.error", "error log")? {
        config.log.error = LogSink::from_name(&name);
    }

    if let Some(n) = count(table, "log.queue")? {
        if n == 0 {
            return Err(Error::Validation(
                String::from("The access log queue must hold at least one line")
            ));
        }
        config.log.queue = n;
    }

    match string(table, "shutdown.mode", "shutdown mode")? {
        Some(ref mode) if mode == "graceful" =>
            config.shutdown.mode = ShutdownMode::Graceful,
        Some(ref mode) if mode == "immediate" =>
            config.shutdown.mode = ShutdownMode::Immediate,
        Some(mode) => return Err(Error::Validation(
            format!("Unknown shutdown mode {:?}; expected \"graceful\" or \
                     \"immediate\"", mode)
        )),
        None => ()
    }

    if let Some(t) = seconds(table, "shutdown.grace_period")? {
        config.shutdown.grace_period = t;
    }

    Ok(config)
}

/// Follows a dotted key path through nested tables
fn lookup<'a>(table: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(table, |value, key| value.get(key))
}

fn string(table: &Value, key: &str, what: &str)
          -> Result<Option<String>, Error>
{
    match lookup(table, key) {
        Some(&Value::String(ref s)) => Ok(Some(s.clone())),
        Some(val) => Err(Error::Validation(
            format!("Expected the {} to be a string, got a {}",
                    what, val.type_str())
        )),
        None => Ok(None)
    }
}

fn port(table: &Value, key: &str) -> Result<Option<u16>, Error> {
    match lookup(table, key) {
        Some(&Value::Integer(p))
            if p <= u16::MAX as i64 &&
            p > 0 => Ok(Some(p as u16)),
        Some(&Value::Integer(p)) => Err(Error::Validation(
            format!("The given port {} is out of range", p)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected the port to be an integer, got a {}",
                    val.type_str())
        )),
        None => Ok(None)
    }
}

fn count(table: &Value, key: &str) -> Result<Option<usize>, Error> {
    match lookup(table, key) {
        Some(&Value::Integer(n)) if n >= 0 => Ok(Some(n as usize)),
        Some(&Value::Integer(n)) => Err(Error::Validation(
            format!("{} must not be negative, got {}", key, n)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected {} to be an integer, got a {}",
                    key, val.type_str())
        )),
        None => Ok(None)
    }
}

/// Durations are whole seconds, positive and at most `MAX_DURATION`
fn seconds(table: &Value, key: &str) -> Result<Option<Duration>, Error> {
    let max = MAX_DURATION.as_secs() as i64;

    match lookup(table, key) {
        Some(&Value::Integer(n)) if n > 0 && n <= max =>
            Ok(Some(Duration::from_secs(n as u64))),
        Some(&Value::Integer(n)) => Err(Error::Validation(
            format!("{} must be between 1 and {} seconds, got {}", key, max, n)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected {} to be an integer number of seconds, got a {}",
                    key, val.type_str())
        )),
        None => Ok(None)
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(ErrorMessage),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

/// An owned, rendered version of a TOML syntax error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    /// One-based; zero when the parser could not say
    pub line: usize,
    pub column: usize
}

fn message_from_error(error: &toml::de::Error) -> ErrorMessage {
    let (line, column) = error.line_col()
        .map_or((0, 0), |(line, column)| (line + 1, column + 1));

    ErrorMessage {
        desc: error.to_string(),
        line,
        column
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_str("").unwrap();
        assert_eq!(config.listen.address, "127.0.0.1");
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.listen.request_timeout, Duration::from_secs(60));
        assert_eq!(config.cgi.mount, "/");
        assert_eq!(config.cgi.script, None);
        assert_eq!(config.log.access, vec![LogSink::Stdout]);
        assert_eq!(config.log.error, LogSink::Stderr);
        assert_eq!(config.shutdown.mode, ShutdownMode::Graceful);
    }

    #[test]
    fn full_file() {
        let config = parse_str(r#"
            [listen]
            address = "0.0.0.0"
            port = 9090
            read_timeout = 5
            request_timeout = 20
            keep_alive = false
            max_body = 4096

            [cgi]
            script = "/var/www/cgi-bin/public-inbox.cgi"
            mount = "/inbox"
            path = "/usr/bin:/bin"
            timeout = 12
            max_concurrent = 4

            [log]
            access = ["-", "/var/log/cgi-access.log"]
            error = "/var/log/cgi-error.log"

            [shutdown]
            mode = "immediate"
            grace_period = 3
        "#).unwrap();

        assert_eq!(config.listen.address, "0.0.0.0");
        assert_eq!(config.listen.port, 9090);
        assert_eq!(config.listen.read_timeout, Duration::from_secs(5));
        assert_eq!(config.listen.write_timeout, Duration::from_secs(30));
        assert_eq!(config.listen.request_timeout, Duration::from_secs(20));
        assert!(!config.listen.keep_alive);
        assert_eq!(config.listen.max_body, 4096);
        assert_eq!(config.cgi.script,
                   Some(PathBuf::from("/var/www/cgi-bin/public-inbox.cgi")));
        assert_eq!(config.cgi.mount, "/inbox");
        assert_eq!(config.cgi.path_env, Some(String::from("/usr/bin:/bin")));
        assert_eq!(config.cgi.timeout, Duration::from_secs(12));
        assert_eq!(config.cgi.max_concurrent, 4);
        assert_eq!(config.log.access,
                   vec![LogSink::Stdout,
                        LogSink::File(PathBuf::from("/var/log/cgi-access.log"))]);
        assert_eq!(config.log.error,
                   LogSink::File(PathBuf::from("/var/log/cgi-error.log")));
        assert_eq!(config.shutdown.mode, ShutdownMode::Immediate);
        assert_eq!(config.shutdown.grace_period, Duration::from_secs(3));
    }

    #[test]
    fn single_access_log_string() {
        let config = parse_str("[log]\naccess = \"stderr\"\n").unwrap();
        assert_eq!(config.log.access, vec![LogSink::Stderr]);
    }

    #[test]
    fn port_out_of_range() {
        match parse_str("[listen]\nport = 70000\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
        match parse_str("[listen]\nport = 0\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn durations_out_of_range() {
        for toml in &["[cgi]\nscript = \"/bin/true\"\ntimeout = 9223372036854775807\n",
                      "[shutdown]\ngrace_period = 31536001\n",
                      "[listen]\nread_timeout = -5\n"] {
            match parse_str(toml) {
                Err(Error::Validation(_)) => (),
                other => panic!("{:?} gave {:?}", toml, other)
            }
        }

        let config = parse_str("[shutdown]\ngrace_period = 31536000\n")
            .unwrap();
        assert_eq!(config.shutdown.grace_period, MAX_DURATION);
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_str("[listen]\nport = \"80\"\n").is_err());
        assert!(parse_str("[cgi]\nscript = 3\n").is_err());
        assert!(parse_str("[cgi]\ntimeout = 0\n").is_err());
        assert!(parse_str("[log]\naccess = [1]\n").is_err());
        assert!(parse_str("[shutdown]\nmode = \"later\"\n").is_err());
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        match parse_str("[listen\nport = 1\n") {
            Err(Error::Parse(message)) => assert!(message.line >= 1),
            other => panic!("{:?}", other)
        }
    }
}
