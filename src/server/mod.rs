//! Server functionality
//!
//! One thread per connection. Each thread reads requests off its socket,
//! hands them to the `Handler` and writes the responses back, in order, until
//! either side closes or the server starts shutting down.

pub mod headers;
pub mod request;
pub mod response;
pub mod router;

pub use self::request::{Head, Request, RequestReader};
pub use self::response::{error_messages, Response};

use crate::access_log::{AccessLog, AccessLogEntry};
use crate::cgi::CgiHandler;
use crate::cgi::process::ProcessTracker;
use crate::config::{deadline_after, Config};
use crate::errors::{Error, Result};
use crate::server::router::Router;

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How often the accept loop looks for a shutdown request while idle
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Methods passed through to the script. Anything else gets a `405`.
pub const CGI_METHODS: &[&str] =
    &["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Values which can handle requests
pub trait Handler: Send + Sync {
    fn handle(&self, req: &Request) -> Response;
}

impl<F> Handler for F where F: Fn(&Request) -> Response + Send + Sync {
    fn handle(&self, req: &Request) -> Response {
        self(req)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared between the accept loop, the connections and `ShutdownHandle`s
struct ShutdownState {
    stopping: AtomicBool,
    in_flight: Mutex<usize>,
    drained: Condvar,
    processes: Arc<ProcessTracker>
}

impl ShutdownState {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn begin_request(&self) -> InFlight {
        *lock(&self.in_flight) += 1;
        InFlight { state: self }
    }

    fn in_flight(&self) -> usize {
        *lock(&self.in_flight)
    }

    /// Waits for every in-flight request to finish; `false` if `deadline`
    /// came first
    fn wait_drained(&self, deadline: Instant) -> bool {
        let mut in_flight = lock(&self.in_flight);

        while *in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            in_flight = self.drained.wait_timeout(in_flight, deadline - now)
                .unwrap_or_else(PoisonError::into_inner).0;
        }

        true
    }
}

/// Counts one request from the moment its head is read until its response
/// is written
struct InFlight<'a> {
    state: &'a ShutdownState
}

impl<'a> Drop for InFlight<'a> {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.state.in_flight);
        *in_flight -= 1;
        if *in_flight == 0 {
            self.state.drained.notify_all();
        }
    }
}

/// Stops a running `Server` from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>
}

impl ShutdownHandle {
    /// Stops accepting connections. `Server::start` returns once in-flight
    /// requests are done or the grace period is over.
    pub fn shutdown(&self) {
        if !self.state.stopping.swap(true, Ordering::SeqCst) {
            info!("Shutting down; no longer accepting connections");
        }
    }

    /// Kills every running script and exits the process
    pub fn force(&self) -> ! {
        self.state.stopping.store(true, Ordering::SeqCst);
        warn!("Exiting immediately with {} requests in flight",
              self.state.in_flight());
        self.state.processes.kill_all();
        log::logger().flush();
        process::exit(0)
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }
}

/// A bound listener plus everything its connections share
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    access_log: AccessLog,
    state: Arc<ShutdownState>
}

impl Server {
    /// Binds the configured address and mounts the CGI script.
    ///
    /// `config` must have been through `Config::finalize`.
    pub fn bind(config: Config, access_log: AccessLog) -> Result<Server> {
        let script = match config.cgi.script {
            Some(ref script) => script.clone(),
            None => return Err(Error::Config(
                String::from("No CGI script configured")))
        };

        if !script.is_file() {
            warn!("CGI script {:?} does not exist; requests will fail with \
                   502 until it does", script);
        }

        let processes = Arc::new(ProcessTracker::new());
        let mut router = Router::new();
        router.route(&config.cgi.mount, CGI_METHODS,
                     CgiHandler::new(script, &config, processes.clone()));

        Server::with_parts(config, router, processes, access_log)
    }

    /// Binds the configured address and sends every request to `handler`
    pub fn with_handler<H: Handler + 'static>(config: Config, handler: H,
                                              access_log: AccessLog)
                                              -> Result<Server>
    {
        Server::with_parts(config, handler, Arc::new(ProcessTracker::new()),
                           access_log)
    }

    fn with_parts<H: Handler + 'static>(config: Config, handler: H,
                                        processes: Arc<ProcessTracker>,
                                        access_log: AccessLog)
                                        -> Result<Server>
    {
        let address = format!("{}:{}", config.listen.address,
                              config.listen.port);
        let listener = TcpListener::bind((config.listen.address.as_str(),
                                          config.listen.port))
            .map_err(|e| Error::Bind(address.clone(), e))?;
        listener.set_nonblocking(true)
            .map_err(|e| Error::Bind(address, e))?;
        let local_addr = listener.local_addr()?;

        Ok(Server {
            listener,
            local_addr,
            config: Arc::new(config),
            handler: Arc::new(handler),
            access_log,
            state: Arc::new(ShutdownState {
                stopping: AtomicBool::new(false),
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                processes
            })
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { state: self.state.clone() }
    }

    pub fn shutdown(&self) {
        self.shutdown_handle().shutdown()
    }

    /// Accepts connections until shut down, then drains.
    ///
    /// Failed accepts are logged and never end the loop.
    pub fn start(&self) {
        info!("Listening on {}", self.local_addr);

        while !self.state.is_stopping() {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock =>
                    thread::sleep(ACCEPT_POLL),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    // Typically out of file descriptors; let some close
                    warn!("Failed connection: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        self.drain();
    }

    fn drain(&self) {
        let deadline = deadline_after(self.config.shutdown.grace_period);

        if self.state.wait_drained(deadline) {
            info!("All requests finished");
        }
        else {
            warn!("Grace period over with {} requests in flight; killing \
                   {} CGI process groups", self.state.in_flight(),
                  self.state.processes.len());
            self.state.processes.kill_all();
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let conn = Connection {
            config: self.config.clone(),
            handler: self.handler.clone(),
            access_log: self.access_log.clone(),
            state: self.state.clone(),
            peer
        };

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || conn.serve(stream));

        if let Err(e) = spawned {
            warn!("Could not start a thread for {}: {}", peer, e);
        }
    }
}

struct Connection {
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    access_log: AccessLog,
    state: Arc<ShutdownState>,
    peer: SocketAddr
}

impl Connection {
    fn serve(self, stream: TcpStream) {
        let local_addr = match self.configure(&stream) {
            Ok(addr) => addr,
            Err(e) => {
                debug!("Dropping connection from {}: {}", self.peer, e);
                return;
            }
        };

        let mut reader = RequestReader::new(stream);
        reader.set_request_timeout(self.config.listen.request_timeout);
        loop {
            match self.exchange(&mut reader, local_addr) {
                Ok(true) => (),
                Ok(false) => break,
                Err(e) => {
                    debug!("Connection from {} ended: {}", self.peer, e);
                    break;
                }
            }
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<SocketAddr> {
        // Accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.listen.read_timeout))?;
        stream.set_write_timeout(Some(self.config.listen.write_timeout))?;
        stream.local_addr()
    }

    /// Serves one request. `Ok(true)` if the connection stays open.
    fn exchange(&self, reader: &mut RequestReader<TcpStream>,
                local_addr: SocketAddr) -> io::Result<bool>
    {
        let mut entry = AccessLogEntry::begin(self.peer.ip());

        let head = match reader.read_head() {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.reject(reader, entry, &e, false);
                return Ok(false);
            }
        };

        let _in_flight = self.state.begin_request();
        entry.request(&head);

        let head_only = head.method == "HEAD";
        let req = reader.read_body(&head, self.config.listen.max_body)
            .and_then(|body| Request::new(head, body, self.peer, local_addr));
        let req = match req {
            Ok(req) => req,
            Err(e) => {
                self.reject(reader, entry, &e, head_only);
                return Ok(false);
            }
        };

        let mut res = self.handler.handle(&req);
        let keep_alive = req.wants_keep_alive() &&
            self.config.listen.keep_alive &&
            !self.state.is_stopping() &&
            !res.closes();
        res.prepare(req.version, keep_alive);

        let sent = res.write_to(reader.get_mut(), head_only);
        entry.finish(res.status, *sent.as_ref().unwrap_or(&0));
        self.access_log.record(&entry);
        debug!("{} {} from {}: {} in {:?}", req.method, req.target, self.peer,
               res.status, entry.elapsed());

        sent.map(|_| keep_alive)
    }

    /// Answers a request that never reached the handler, then gives up on
    /// the connection
    fn reject(&self, reader: &mut RequestReader<TcpStream>,
              mut entry: AccessLogEntry, err: &Error, head_only: bool)
    {
        if let Error::Io(ref e) = *err {
            debug!("Error reading from {}: {}", self.peer, e);
            return;
        }

        info!("Rejecting request from {}: {}", self.peer, err);

        let status = err.status_code();
        let mut res = error_messages::for_status(status);
        res.prepare(1, false);

        let sent = res.write_to(reader.get_mut(), head_only).unwrap_or(0);
        entry.finish(status, sent);
        self.access_log.record(&entry);
    }
}
