pub mod parser;

use std::env;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// The longest any configured duration may be
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// `timeout` from now, with `timeout` clamped to `MAX_DURATION` so the sum
/// cannot overflow
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_DURATION)
}

/// A holder for app configuration
///
/// Built once at startup, then shared read-only between connections.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenConfig,
    pub cgi: CgiConfig,
    pub log: LogConfig,
    pub shutdown: ShutdownConfig
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen: Default::default(),
            cgi: Default::default(),
            log: Default::default(),
            shutdown: Default::default()
        }
    }
}

impl Config {
    /// Checks the settings that may come from several places and makes the
    /// script path absolute.
    ///
    /// Relative script paths are resolved against the current working
    /// directory, once, so that later `chdir`s cannot change their meaning.
    pub fn finalize(mut self) -> Result<Config, String> {
        let script = match self.cgi.script.take() {
            Some(s) => s,
            None => return Err(String::from(
                "No CGI script given; set cgi.script or pass -s"))
        };

        let script = if script.is_absolute() {
            script
        }
        else {
            let cwd = env::current_dir().map_err(|e: io::Error| format!(
                "Could not resolve script path {:?}: {}", script, e))?;
            cwd.join(script)
        };

        if !self.cgi.mount.starts_with('/') {
            return Err(format!("The mount prefix {:?} must start with '/'",
                               self.cgi.mount));
        }

        self.cgi.script = Some(script);
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Address to bind, as accepted by `TcpListener::bind`
    pub address: String,
    /// Port number to listen on
    pub port: u16,
    /// Longest wait for any one read or write
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Longest a whole request, head and body, may take to arrive
    pub request_timeout: Duration,
    /// Whether connections may carry more than one request
    pub keep_alive: bool,
    /// Largest request body accepted, in bytes
    pub max_body: usize
}

impl Default for ListenConfig {
    fn default() -> ListenConfig {
        ListenConfig {
            address: String::from("127.0.0.1"),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            keep_alive: true,
            max_body: 1024 * 1024
        }
    }
}

#[derive(Debug, Clone)]
pub struct CgiConfig {
    /// The script run for every request. Absolute after `finalize`.
    pub script: Option<PathBuf>,
    /// URL path prefix handed to the script; becomes `SCRIPT_NAME`
    pub mount: String,
    /// Replaces `PATH` in the script's environment
    pub path_env: Option<String>,
    /// Longest a single script run may take
    pub timeout: Duration,
    /// Most scripts running at once; zero means no limit
    pub max_concurrent: usize
}

impl Default for CgiConfig {
    fn default() -> CgiConfig {
        CgiConfig {
            script: None,
            mount: String::from("/"),
            path_env: None,
            timeout: Duration::from_secs(60),
            max_concurrent: 0
        }
    }
}

/// Somewhere log lines can go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stdout,
    Stderr,
    File(PathBuf)
}

impl LogSink {
    /// `"-"` and `"stdout"` are standard output, `"stderr"` is standard error,
    /// anything else is a file path.
    pub fn from_name(name: &str) -> LogSink {
        match name {
            "-" | "stdout" => LogSink::Stdout,
            "stderr" => LogSink::Stderr,
            path => LogSink::File(PathBuf::from(path))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Every access log line goes to each of these, in order
    pub access: Vec<LogSink>,
    /// Operational messages
    pub error: LogSink,
    /// Access log lines buffered before new ones are dropped
    pub queue: usize
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            access: vec![LogSink::Stdout],
            error: LogSink::Stderr,
            queue: 1024
        }
    }
}

/// What the first termination signal does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting, drain in-flight requests, then exit
    Graceful,
    /// Kill running scripts and exit at once
    Immediate
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub mode: ShutdownMode,
    /// How long in-flight requests get to finish
    pub grace_period: Duration
}

impl Default for ShutdownConfig {
    fn default() -> ShutdownConfig {
        ShutdownConfig {
            mode: ShutdownMode::Graceful,
            grace_period: Duration::from_secs(10)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finalize_requires_a_script() {
        assert!(Config::default().finalize().is_err());
    }

    #[test]
    fn finalize_resolves_relative_scripts() {
        let mut config = Config::default();
        config.cgi.script = Some(PathBuf::from("cgi-bin/app.cgi"));

        let config = config.finalize().unwrap();
        let expected = env::current_dir().unwrap().join("cgi-bin/app.cgi");
        assert_eq!(config.cgi.script, Some(expected));
    }

    #[test]
    fn finalize_keeps_absolute_scripts() {
        let mut config = Config::default();
        config.cgi.script = Some(PathBuf::from("/var/www/cgi-bin/app.cgi"));

        let config = config.finalize().unwrap();
        assert_eq!(config.cgi.script,
                   Some(PathBuf::from("/var/www/cgi-bin/app.cgi")));
    }

    #[test]
    fn finalize_rejects_relative_mounts() {
        let mut config = Config::default();
        config.cgi.script = Some(PathBuf::from("/app.cgi"));
        config.cgi.mount = String::from("cgi");
        assert!(config.finalize().is_err());
    }

    #[test]
    fn deadlines_are_clamped() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::new(u64::MAX, 0));
        assert!(deadline <= Instant::now() + MAX_DURATION);
        assert!(deadline > before + Duration::from_secs(60));
    }

    #[test]
    fn sink_names() {
        assert_eq!(LogSink::from_name("-"), LogSink::Stdout);
        assert_eq!(LogSink::from_name("stderr"), LogSink::Stderr);
        assert_eq!(LogSink::from_name("/var/log/access.log"),
                   LogSink::File(PathBuf::from("/var/log/access.log")));
    }
}
