//! Generation bookkeeping for playlist fetches.
//!
//! Fetches run concurrently with event handling, so an older request can
//! resolve after a newer one. Each scheduled fetch carries a ticket; a result
//! is applied only if its ticket is newer than the last applied one.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshTicket {
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct RefreshSchedule {
    issued: u64,
    applied: u64,
}

impl RefreshSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket {
            generation: self.issued,
        }
    }

    /// Claims the right to apply a result for `ticket`. Returns false for
    /// results superseded by an already applied newer fetch.
    pub fn accept(&mut self, ticket: RefreshTicket) -> bool {
        if ticket.generation <= self.applied {
            return false;
        }
        self.applied = ticket.generation;
        true
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }
}
