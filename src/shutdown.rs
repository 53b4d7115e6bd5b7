//! Termination signals for a running command.
//!
//! `main` races the command against [`Shutdown::recv`]. Losing the race drops
//! the command future, and with it any scratch directory, before exiting.

use std::fmt;
use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Hangup,
    Interrupt,
    Terminate,
}

impl ExitSignal {
    /// `128 + signo`, as a shell reports it.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitSignal::Hangup => 129,
            ExitSignal::Interrupt => 130,
            ExitSignal::Terminate => 143,
        }
    }
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitSignal::Hangup => "SIGHUP",
            ExitSignal::Interrupt => "SIGINT",
            ExitSignal::Terminate => "SIGTERM",
        })
    }
}

pub struct Shutdown {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl Shutdown {
    /// Install the handlers. Must be called inside the runtime; signals that
    /// arrive from here on are held until [`recv`](Self::recv).
    pub fn listen() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    pub async fn recv(&mut self) -> ExitSignal {
        tokio::select! {
            _ = self.hangup.recv() => ExitSignal::Hangup,
            _ = self.interrupt.recv() => ExitSignal::Interrupt,
            _ = self.terminate.recv() => ExitSignal::Terminate,
        }
    }
}
