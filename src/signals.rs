//! Turning SIGINT and SIGTERM into shutdowns

use crate::config::ShutdownMode;
use crate::server::ShutdownHandle;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use std::io;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Shutdown,
    Force
}

/// What a termination signal does, given whether a shutdown is under way
fn action(mode: ShutdownMode, stopping: bool) -> Action {
    match mode {
        ShutdownMode::Immediate => Action::Force,
        ShutdownMode::Graceful if stopping => Action::Force,
        ShutdownMode::Graceful => Action::Shutdown
    }
}

/// Watches for termination signals on a background thread.
///
/// In graceful mode the first signal starts a shutdown and the next one
/// forces it; in immediate mode any signal forces it.
pub fn install(handle: ShutdownHandle, mode: ShutdownMode) -> io::Result<()> {
    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;

    thread::Builder::new()
        .name(String::from("signals"))
        .spawn(move || {
            for signal in signals.forever() {
                info!("Received signal {}", signal);

                match action(mode, handle.is_stopping()) {
                    Action::Shutdown => handle.shutdown(),
                    Action::Force => handle.force()
                }
            }
        })?;

    Ok(())
}
