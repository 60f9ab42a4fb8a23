//! Process termination hook.
//!
//! The JTAG master has to be handed back (slave mode on the legacy driver,
//! a deinit request on the remote controller) before the process exits, so
//! the binary waits for SIGINT or SIGTERM next to the running operation.
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use tokio::signal::unix::{Signal, SignalKind, signal};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// SIGINT and SIGTERM listeners. At most one set exists per process.
pub struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<TerminationSignals> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Termination signals already installed",
            ));
        }
        let listeners = signal(SignalKind::interrupt())
            .and_then(|interrupt| Ok((interrupt, signal(SignalKind::terminate())?)));
        match listeners {
            Ok((interrupt, terminate)) => {
                log::debug!("Installed SIGINT/SIGTERM handlers");
                Ok(TerminationSignals {
                    interrupt,
                    terminate,
                })
            }
            Err(e) => {
                INSTALLED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Waits for the next signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn installs_once() {
        let mut signals = TerminationSignals::install().unwrap();
        let second = TerminationSignals::install();
        assert!(matches!(second, Err(e) if e.kind() == io::ErrorKind::AlreadyExists));

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();
        assert_eq!(signals.recv().await, "SIGTERM");
    }
}
