//! A small fixed-capacity set of `(fd, interest)` pairs, translating
//! between the engine's abstract interest flags and the OS's `poll(2)`
//! readiness flags.

use crate::error::{Error, Result};
use filedescriptor::SocketDescriptor;

bitflags::bitflags! {
    /// Interest/readiness flags the engine reasons about. These are
    /// deliberately narrower than the raw `POLL*` constants: a watcher only
    /// ever cares whether it can read, can write, or the peer hung up.
    pub struct Interest: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const CLOSE = 0b100;
    }
}

impl Interest {
    /// Translate to the OS `events` mask passed to `poll(2)`.
    pub fn to_poll_events(self) -> i16 {
        let mut events: i16 = 0;
        if self.intersects(Interest::READ | Interest::CLOSE) {
            events |= libc_poll::POLLIN | libc_poll::POLLHUP;
        }
        if self.contains(Interest::WRITE) {
            events |= libc_poll::POLLOUT;
        }
        events
    }

    /// Translate an OS `revents` mask back into the engine's interest
    /// flags.
    pub fn from_poll_revents(revents: i16) -> Interest {
        let mut interest = Interest::empty();
        if revents & (libc_poll::POLLIN | libc_poll::POLLPRI) != 0 {
            interest |= Interest::READ;
        }
        if revents & libc_poll::POLLHUP != 0 {
            interest |= Interest::CLOSE;
        }
        if revents & (libc_poll::POLLOUT | libc_poll::POLLWRBAND) != 0 {
            interest |= Interest::WRITE;
        }
        interest
    }
}

/// The handful of `POLL*` constants this module needs, isolated so the
/// rest of the module reads in terms of [`Interest`] rather than raw
/// bitmasks. `POLLPRI`/`POLLWRBAND` have no portable equivalent outside
/// of `libc`, so they are sourced from there directly; `filedescriptor`
/// (used for the actual cross-platform `poll()` call below) only commits
/// to `POLLIN`/`POLLOUT`/`POLLHUP`.
mod libc_poll {
    #[cfg(unix)]
    pub use libc::{POLLHUP, POLLIN, POLLOUT, POLLPRI, POLLWRBAND};

    #[cfg(not(unix))]
    pub use filedescriptor::{POLLHUP, POLLIN, POLLOUT};
    #[cfg(not(unix))]
    pub const POLLPRI: i16 = 0;
    #[cfg(not(unix))]
    pub const POLLWRBAND: i16 = 0;
}

#[derive(Clone, Copy)]
struct Entry {
    fd: SocketDescriptor,
    interest: Interest,
    revents: Interest,
}

/// A fixed-capacity table of `(fd, interest)` pairs. `update` merges new
/// interest into an existing entry or inserts a new one; entries whose
/// interest becomes empty are swept out by the caller (see [`Self::sweep`]).
pub struct PollSet {
    entries: Vec<Entry>,
    capacity: usize,
}

impl PollSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `add` and `remove` into the interest recorded for `fd`:
    /// `(interest | add) & !remove`. If `fd` is unknown and `add` is
    /// non-empty, a new entry is inserted (failing with
    /// [`Error::TooManyFds`] if the table is already full). A
    /// remove-only call against an fd that isn't present is a no-op
    /// success, per spec.
    pub fn update(&mut self, fd: SocketDescriptor, add: Interest, remove: Interest) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.fd == fd) {
            entry.interest = (entry.interest | add) & !remove;
            return Ok(());
        }

        let interest = add & !remove;
        if interest.is_empty() {
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(Error::TooManyFds(format!(
                "poll set at capacity ({})",
                self.capacity
            )));
        }
        self.entries.push(Entry {
            fd,
            interest,
            revents: Interest::empty(),
        });
        Ok(())
    }

    /// Drop every entry whose interest has become empty.
    pub fn sweep(&mut self) {
        self.entries.retain(|e| !e.interest.is_empty());
    }

    /// Build the `pollfd` array poll(2) expects, in the same order as
    /// [`Self::iter_readiness`] reports results.
    pub fn to_pollfds(&self) -> Vec<filedescriptor::pollfd> {
        self.entries
            .iter()
            .map(|e| filedescriptor::pollfd {
                fd: e.fd,
                events: e.interest.to_poll_events(),
                revents: 0,
            })
            .collect()
    }

    /// Record the `revents` poll(2) reported, in the order produced by
    /// [`Self::to_pollfds`].
    pub fn record_readiness(&mut self, pollfds: &[filedescriptor::pollfd]) {
        debug_assert_eq!(pollfds.len(), self.entries.len());
        for (entry, pfd) in self.entries.iter_mut().zip(pollfds.iter()) {
            entry.revents = Interest::from_poll_revents(pfd.revents);
        }
    }

    /// Iterate `(fd, readiness)` for every entry that reported
    /// non-empty readiness since the last `record_readiness`.
    pub fn iter_readiness(&self) -> impl Iterator<Item = (SocketDescriptor, Interest)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.revents.is_empty())
            .map(|e| (e.fd, e.revents))
    }
}
