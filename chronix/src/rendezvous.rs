//! Two-state rendezvous between the scheduler thread and a component-owned
//! thread.
//!
//! Some components want their own thread of control, e.g. to wrap a blocking
//! producer. Such a thread must never run concurrently with the scheduler in
//! model time: at any instant either the scheduler or the component thread is
//! live, never both. This module provides the handshake that enforces this.
//!
//! A [`rendezvous()`] call returns a [`Host`]/[`Guest`] pair built from two
//! zero-capacity channels. The host side lives with the component (on the
//! scheduler thread) and grants one *turn* at a time; the guest side lives on
//! the component thread and blocks between turns:
//!
//! ```
//! use std::thread;
//!
//! use chronix::rendezvous::rendezvous;
//!
//! let (host, guest) = rendezvous();
//!
//! let worker = thread::spawn(move || {
//!     let mut turns = 0;
//!     while guest.await_turn().is_ok() {
//!         turns += 1; // runs while the host blocks
//!         if guest.yield_turn().is_err() {
//!             break;
//!         }
//!     }
//!     turns
//! });
//!
//! assert_eq!(host.turn(), Ok(()));
//! assert_eq!(host.turn(), Ok(()));
//! drop(host); // the guest observes the disconnection and winds down
//! assert_eq!(worker.join().unwrap(), 2);
//! ```

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// Creates a connected [`Host`]/[`Guest`] pair.
pub fn rendezvous() -> (Host, Guest) {
    // Zero-capacity channels: every send is itself a rendezvous.
    let (grant_tx, grant_rx) = sync_channel(0);
    let (yield_tx, yield_rx) = sync_channel(0);

    (
        Host {
            grant: grant_tx,
            yielded: yield_rx,
        },
        Guest {
            granted: grant_rx,
            yielding: yield_tx,
        },
    )
}

/// Error returned when the peer of a rendezvous is gone.
///
/// The guest observes this when the host was dropped (typically because the
/// owning component was torn down or a stop propagated); the host observes it
/// when the guest thread exited.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TurnError {}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the rendezvous peer is disconnected")
    }
}

impl Error for TurnError {}

/// Scheduler-side half of a rendezvous.
///
/// Dropping the host permanently unblocks the guest with an error, which is
/// how a stop request is propagated to the component thread.
#[derive(Debug)]
pub struct Host {
    grant: SyncSender<()>,
    yielded: Receiver<()>,
}

impl Host {
    /// Grants one turn to the guest and blocks until the guest yields it
    /// back.
    pub fn turn(&self) -> Result<(), TurnError> {
        self.grant.send(()).map_err(|_| TurnError {})?;
        self.yielded.recv().map_err(|_| TurnError {})
    }
}

/// Component-thread-side half of a rendezvous.
#[derive(Debug)]
pub struct Guest {
    granted: Receiver<()>,
    yielding: SyncSender<()>,
}

impl Guest {
    /// Blocks until the host grants a turn.
    pub fn await_turn(&self) -> Result<(), TurnError> {
        self.granted.recv().map_err(|_| TurnError {})
    }

    /// Gives the turn back to the host.
    pub fn yield_turn(&self) -> Result<(), TurnError> {
        self.yielding.send(()).map_err(|_| TurnError {})
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn turns_alternate() {
        let (host, guest) = rendezvous();

        let worker = thread::spawn(move || {
            let mut log = Vec::new();
            for i in 0.. {
                if guest.await_turn().is_err() {
                    break;
                }
                log.push(i);
                if guest.yield_turn().is_err() {
                    break;
                }
            }
            log
        });

        for _ in 0..3 {
            host.turn().unwrap();
        }
        drop(host);

        assert_eq!(worker.join().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn guest_exit_is_seen_by_host() {
        let (host, guest) = rendezvous();

        let worker = thread::spawn(move || {
            guest.await_turn().unwrap();
            guest.yield_turn().unwrap();
            // Guest drops here.
        });

        assert_eq!(host.turn(), Ok(()));
        worker.join().unwrap();
        assert_eq!(host.turn(), Err(TurnError {}));
    }
}
