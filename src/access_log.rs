//! Combined-log-format access logging
//!
//! Request threads format their line and hand it to a bounded queue; one
//! writer thread drains the queue into every configured sink. A full queue
//! or a broken sink costs log lines, never requests.

use crate::config::LogSink;
use crate::server::Head;

use chrono::{DateTime, Local};

use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

/// Everything the combined log format says about one request
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    pub client: IpAddr,
    /// When the request started arriving
    pub time: DateTime<Local>,
    pub method: Option<String>,
    pub target: Option<String>,
    pub protocol: Option<&'static str>,
    pub status: u16,
    /// Response body bytes sent
    pub bytes: u64,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    started: Instant,
    elapsed: Duration
}

impl AccessLogEntry {
    pub fn begin(client: IpAddr) -> AccessLogEntry {
        AccessLogEntry {
            client,
            time: Local::now(),
            method: None,
            target: None,
            protocol: None,
            status: 0,
            bytes: 0,
            referer: None,
            user_agent: None,
            started: Instant::now(),
            elapsed: Duration::from_secs(0)
        }
    }

    /// Fills in what the request head tells us
    pub fn request(&mut self, head: &Head) {
        self.method = Some(head.method.clone());
        self.target = Some(head.target.clone());
        self.protocol = Some(head.protocol());
        self.referer = head.headers.get("Referer")
            .map(|v| String::from_utf8_lossy(v).into_owned());
        self.user_agent = head.headers.get("User-Agent")
            .map(|v| String::from_utf8_lossy(v).into_owned());
    }

    pub fn finish(&mut self, status: u16, bytes: u64) {
        self.status = status;
        self.bytes = bytes;
        self.elapsed = self.started.elapsed();
    }

    /// Time from `begin` to `finish`
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Renders the entry as one combined-log-format line, without the
    /// trailing newline
    pub fn combined(&self) -> String {
        let mut line = String::with_capacity(160);

        let _ = write!(line, "{} - - [{}] ", self.client,
                       self.time.format("%d/%b/%Y:%H:%M:%S %z"));

        match (&self.method, &self.target, self.protocol) {
            (&Some(ref method), &Some(ref target), Some(protocol)) => {
                line.push('"');
                push_escaped(&mut line, method);
                line.push(' ');
                push_escaped(&mut line, target);
                line.push(' ');
                line.push_str(protocol);
                line.push('"');
            },
            _ => line.push_str("\"-\"")
        }

        let _ = write!(line, " {} ", self.status);
        if self.bytes == 0 {
            line.push('-');
        }
        else {
            let _ = write!(line, "{}", self.bytes);
        }

        for field in &[&self.referer, &self.user_agent] {
            line.push_str(" \"");
            match **field {
                Some(ref value) => push_escaped(&mut line, value),
                None => line.push('-')
            }
            line.push('"');
        }

        line
    }
}

fn push_escaped(line: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '"' => line.push_str("\\\""),
            '\\' => line.push_str("\\\\"),
            c if c.is_control() => { let _ = write!(line, "\\x{:02x}", c as u32); },
            c => line.push(c)
        }
    }
}

enum Message {
    Line(String),
    /// Acknowledged once every line queued before it is written
    Flush(Sender<()>)
}

/// A handle for sending access log lines to the writer thread
#[derive(Clone)]
pub struct AccessLog {
    queue: Option<SyncSender<Message>>
}

impl AccessLog {
    /// Opens the sinks and starts the writer thread.
    ///
    /// Sinks that cannot be opened are reported and skipped.
    pub fn start(sinks: &[LogSink], capacity: usize) -> AccessLog {
        let mut writers: Vec<Box<dyn Write + Send>> = Vec::new();

        for sink in sinks {
            match open(sink) {
                Ok(w) => writers.push(w),
                Err(e) => warn!("Could not open access log {:?}: {}", sink, e)
            }
        }

        AccessLog::to_writers(writers, capacity)
    }

    /// Starts a writer thread over already-open writers
    pub fn to_writers(writers: Vec<Box<dyn Write + Send>>, capacity: usize)
                      -> AccessLog
    {
        if writers.is_empty() {
            return AccessLog::disabled();
        }

        let (sender, receiver) = mpsc::sync_channel(capacity);
        let spawned = thread::Builder::new()
            .name(String::from("access-log"))
            .spawn(move || write_lines(receiver, writers));

        match spawned {
            Ok(_) => AccessLog { queue: Some(sender) },
            Err(e) => {
                warn!("Could not start the access log writer: {}", e);
                AccessLog::disabled()
            }
        }
    }

    /// A log that discards everything
    pub fn disabled() -> AccessLog {
        AccessLog { queue: None }
    }

    /// Queues one line for `entry`. Never blocks.
    pub fn record(&self, entry: &AccessLogEntry) {
        let queue = match self.queue {
            Some(ref q) => q,
            None => return
        };

        match queue.try_send(Message::Line(entry.combined())) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) =>
                debug!("Access log queue full; dropped a line"),
            Err(TrySendError::Disconnected(_)) =>
                debug!("Access log writer is gone; dropped a line")
        }
    }

    /// Waits up to `timeout` for the writer to catch up with every line
    /// recorded so far. `false` if it did not.
    pub fn flush(&self, timeout: Duration) -> bool {
        let queue = match self.queue {
            Some(ref q) => q,
            None => return true
        };

        let (ack, done) = mpsc::channel();
        if queue.send(Message::Flush(ack)).is_err() {
            return false;
        }

        done.recv_timeout(timeout).is_ok()
    }
}

fn open(sink: &LogSink) -> io::Result<Box<dyn Write + Send>> {
    Ok(match *sink {
        LogSink::Stdout => Box::new(io::stdout()),
        LogSink::Stderr => Box::new(io::stderr()),
        LogSink::File(ref path) => Box::new(
            OpenOptions::new().create(true).append(true).open(path)?)
    })
}

fn write_lines(messages: Receiver<Message>,
               mut writers: Vec<Box<dyn Write + Send>>)
{
    for message in messages {
        let mut line = match message {
            Message::Line(line) => line,
            Message::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        line.push('\n');
        for writer in writers.iter_mut() {
            // Best effort: a failing sink must not take the others down
            let _ = writer.write_all(line.as_bytes())
                .and_then(|_| writer.flush());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::request::parse_head;

    use chrono::TimeZone;

    use std::sync::{Arc, Mutex};

    fn entry_for(raw: &[u8]) -> AccessLogEntry {
        let (_, head) = parse_head(raw).unwrap().unwrap();
        let mut entry = AccessLogEntry::begin("192.0.2.7".parse().unwrap());
        entry.time = Local.timestamp_opt(1_000_000_000, 0).unwrap();
        entry.request(&head);
        entry
    }

    fn timestamp() -> String {
        Local.timestamp_opt(1_000_000_000, 0).unwrap()
            .format("%d/%b/%Y:%H:%M:%S %z").to_string()
    }

    #[test]
    fn combined_line_with_all_fields() {
        let mut entry = entry_for(b"GET /inbox/?q=a HTTP/1.1\r\nReferer: http://example.com/\r\nUser-Agent: curl/7.47.1\r\n\r\n");
        entry.finish(200, 1234);

        assert_eq!(entry.combined(),
                   format!("192.0.2.7 - - [{}] \"GET /inbox/?q=a HTTP/1.1\" 200 1234 \"http://example.com/\" \"curl/7.47.1\"",
                           timestamp()));
    }

    #[test]
    fn combined_line_with_missing_fields() {
        let mut entry = entry_for(b"HEAD / HTTP/1.0\r\n\r\n");
        entry.finish(404, 0);

        assert_eq!(entry.combined(),
                   format!("192.0.2.7 - - [{}] \"HEAD / HTTP/1.0\" 404 - \"-\" \"-\"",
                           timestamp()));
    }

    #[test]
    fn combined_line_without_request() {
        let mut entry = AccessLogEntry::begin("192.0.2.7".parse().unwrap());
        entry.finish(400, 10);

        assert!(entry.combined().contains("] \"-\" 400 10 \"-\" \"-\""));
    }

    #[test]
    fn quotes_are_escaped() {
        let mut entry = entry_for(b"GET / HTTP/1.1\r\nUser-Agent: evil\" agent\r\n\r\n");
        entry.finish(200, 1);

        assert!(entry.combined().ends_with("\"evil\\\" agent\""));
    }

    /// A writer the test can look into afterwards
    #[derive(Clone)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lines_reach_every_sink_despite_broken_ones() {
        let first = Shared(Arc::new(Mutex::new(Vec::new())));
        let second = Shared(Arc::new(Mutex::new(Vec::new())));
        let log = AccessLog::to_writers(
            vec![Box::new(Broken), Box::new(first.clone()),
                 Box::new(second.clone())],
            16);

        let mut entry = entry_for(b"GET /a HTTP/1.1\r\n\r\n");
        entry.finish(200, 5);
        log.record(&entry);
        log.record(&entry);

        let deadline = Instant::now() + Duration::from_secs(5);
        while second.0.lock().unwrap().len() < 2 * (entry.combined().len() + 1)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }

        let expected = format!("{}\n{}\n", entry.combined(), entry.combined());
        assert_eq!(String::from_utf8(first.0.lock().unwrap().clone()).unwrap(),
                   expected);
        assert_eq!(String::from_utf8(second.0.lock().unwrap().clone()).unwrap(),
                   expected);
    }

    #[test]
    fn disabled_log_accepts_records() {
        let mut entry = entry_for(b"GET /a HTTP/1.1\r\n\r\n");
        entry.finish(200, 5);
        AccessLog::disabled().record(&entry);
        assert!(AccessLog::disabled().flush(Duration::from_secs(1)));
    }

    /// A writer slow enough that lines are still queued when `flush` is called
    #[derive(Clone)]
    struct Slow(Shared);

    impl Write for Slow {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(20));
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_waits_for_queued_lines() {
        let sink = Shared(Arc::new(Mutex::new(Vec::new())));
        let log = AccessLog::to_writers(vec![Box::new(Slow(sink.clone()))], 16);

        let mut entry = entry_for(b"GET /a HTTP/1.1\r\n\r\n");
        entry.finish(200, 5);
        for _ in 0..5 {
            log.record(&entry);
        }

        assert!(log.flush(Duration::from_secs(5)));
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written.lines().count(), 5);
    }
}
