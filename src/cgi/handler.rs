//! A handler that runs one CGI script per request

use crate::cgi::CgiResponse;
use crate::cgi::env::{CgiEnvironment, ScriptContext};
use crate::cgi::parser::parse_document;
use crate::cgi::process::{kill_group, ProcessTracker, Slots};
use crate::config::{deadline_after, Config};
use crate::errors::{Error, Result};
use crate::log_util::ascii_escape;
use crate::server::{Handler, Request, Response};
use crate::server::response::error_messages::*;

use std::env;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running script is checked for exit
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Runs the configured script for each request it is given
pub struct CgiHandler {
    script: PathBuf,
    mount: String,
    path_env: Option<OsString>,
    timeout: Duration,
    slots: Option<Slots>,
    processes: Arc<ProcessTracker>
}

impl CgiHandler {
    /// `script` should be absolute; it is not checked here, so a script that
    /// goes missing later only fails the requests that need it.
    pub fn new(script: PathBuf, config: &Config, processes: Arc<ProcessTracker>)
               -> CgiHandler
    {
        let path_env = match config.cgi.path_env {
            Some(ref path) => Some(OsString::from(path)),
            None => env::var_os("PATH")
        };

        let slots = match config.cgi.max_concurrent {
            0 => None,
            n => Some(Slots::new(n))
        };

        CgiHandler {
            script,
            mount: config.cgi.mount.clone(),
            path_env,
            timeout: config.cgi.timeout,
            slots,
            processes
        }
    }

    /// Builds the environment for `req`
    pub fn environment(&self, req: &Request) -> CgiEnvironment {
        let ctx = ScriptContext {
            script: &self.script,
            mount: &self.mount,
            path_env: self.path_env.as_ref().map(OsString::as_os_str)
        };

        CgiEnvironment::build(req, &ctx)
    }

    /// Runs the script for `req` and parses what it printed.
    ///
    /// Waiting for a launch slot counts against the timeout.
    pub fn dispatch(&self, req: &Request) -> Result<CgiResponse> {
        let deadline = deadline_after(self.timeout);
        let env = self.environment(req);

        let _slot = match self.slots {
            Some(ref slots) => match slots.acquire(deadline) {
                Some(slot) => Some(slot),
                None => return Err(Error::CgiTimeout)
            },
            None => None
        };

        let output = self.run(&env, &req.body, deadline)?;
        parse_document(&output)
    }

    fn run(&self, env: &CgiEnvironment, body: &[u8], deadline: Instant)
           -> Result<Vec<u8>>
    {
        let mut command = Command::new(&self.script);
        command.env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(dir) = self.script.parent() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(Error::CgiInvocation)?;
        let pgid = child.id();
        let _registration = self.processes.register(pgid);
        debug!("Started CGI script {:?} for {:?} as process group {}",
               self.script, env.get("PATH_INFO"), pgid);

        feed_stdin(&mut child, body);
        let stdout = collect_stdout(&mut child);
        log_stderr(&mut child, pgid);

        let status = match wait_until(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!("CGI script {:?} ran past its deadline; killing \
                       process group {}", self.script, pgid);
                terminate(&mut child, pgid);
                return Err(Error::CgiTimeout);
            },
            Err(e) => {
                terminate(&mut child, pgid);
                return Err(Error::Io(e));
            }
        };

        if !status.success() {
            warn!("CGI script {:?} exited with {}", self.script, status);
        }

        // The script is gone, but something it started may still hold stdout
        let output = match stdout {
            Some(rx) => match receive_until(&rx, deadline) {
                Ok(output) => output,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Output of CGI script {:?} still open at its \
                           deadline; killing process group {}",
                          self.script, pgid);
                    if let Err(e) = kill_group(pgid) {
                        debug!("Could not kill process group {}: {}", pgid, e);
                    }
                    return Err(Error::CgiTimeout);
                },
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Io(
                    io::Error::new(io::ErrorKind::Other,
                                   "stdout reader went away")))
            },
            None => Ok(Vec::new())
        };

        Ok(output?)
    }
}

/// Writes the request body to the script on its own thread, so a script that
/// prints before reading cannot deadlock against us.
fn feed_stdin(child: &mut Child, body: &[u8]) {
    let mut stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => return
    };

    if body.is_empty() {
        // Dropping stdin gives the script EOF
        return;
    }

    let body = Vec::from(body);
    thread::spawn(move || {
        if let Err(e) = stdin.write_all(&body) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                debug!("Error writing request body to CGI script: {}", e);
            }
        }
    });
}

fn collect_stdout(child: &mut Child)
                  -> Option<Receiver<io::Result<Vec<u8>>>>
{
    let stdout: ChildStdout = child.stdout.take()?;
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut stdout = stdout;
        let mut output = Vec::new();
        let result = stdout.read_to_end(&mut output).map(|_| output);
        let _ = tx.send(result);
    });

    Some(rx)
}

fn log_stderr(child: &mut Child, pgid: u32) {
    let stderr = match child.stderr.take() {
        Some(stderr) => stderr,
        None => return
    };

    thread::spawn(move || {
        for line in BufReader::new(stderr).split(b'\n') {
            match line {
                Ok(line) => warn!("CGI script [{}]: {}", pgid,
                                  ascii_escape(&line)),
                Err(_) => break
            }
        }
    });
}

/// Polls `child` until it exits or `deadline` passes (`Ok(None)`)
fn wait_until(child: &mut Child, deadline: Instant)
              -> io::Result<Option<ExitStatus>>
{
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        thread::sleep(WAIT_POLL.min(deadline - now));
    }
}

fn receive_until<T>(rx: &Receiver<T>, deadline: Instant)
                    -> ::std::result::Result<T, RecvTimeoutError>
{
    let now = Instant::now();
    let remaining = if deadline > now { deadline - now }
                    else { Duration::from_millis(0) };
    rx.recv_timeout(remaining)
}

/// Kills the whole group while `child` is still unreaped, so its pid can
/// not have been reused, then reaps it
fn terminate(child: &mut Child, pgid: u32) {
    if let Err(e) = kill_group(pgid) {
        debug!("Could not kill process group {}: {}", pgid, e);
    }

    if let Err(e) = child.wait() {
        warn!("Could not reap CGI process {}: {}", pgid, e);
    }
}

impl Handler for CgiHandler {
    fn handle(&self, req: &Request) -> Response {
        match self.dispatch(req) {
            Ok(cgi) => Response::from(cgi),
            Err(e) => {
                warn!("Error running CGI script {:?}: {}", self.script, e);
                error_messages_for(&e)
            }
        }
    }
}

fn error_messages_for(e: &Error) -> Response {
    match *e {
        Error::CgiTimeout => error_504(),
        Error::CgiInvocation(_) | Error::CgiProtocol(_) => error_502(),
        _ => error_500()
    }
}
