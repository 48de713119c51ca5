//! Acknowledgement ledger for out-of-order completion.
//!
//! Streams complete events concurrently, so acknowledgements arrive out
//! of global-sequence order. The checkpoint may only record positions
//! where *everything* at or below has been processed — resuming from a
//! checkpoint must never skip an unfinished event. The ledger turns the
//! unordered ack feed into that contiguous watermark.

use std::collections::BTreeSet;

/// Tracks acknowledged event sequences and exposes the highest
/// contiguous one.
#[derive(Debug)]
pub struct AckLedger {
    watermark: u64,
    pending: BTreeSet<u64>,
}

impl AckLedger {
    /// Start a ledger at a resume position; everything at or below it
    /// counts as already acknowledged.
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self {
            watermark: start,
            pending: BTreeSet::new(),
        }
    }

    /// Record one acknowledgement and return the (possibly advanced)
    /// watermark.
    ///
    /// Sequences at or below the watermark are ignored; at-least-once
    /// delivery can replay events the checkpoint already covers.
    pub fn ack(&mut self, sequence: u64) -> u64 {
        if sequence > self.watermark {
            self.pending.insert(sequence);
        }
        while self.pending.remove(&(self.watermark + 1)) {
            self.watermark += 1;
        }
        self.watermark
    }

    /// Highest sequence with no unacknowledged event at or below it.
    #[must_use]
    pub const fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Number of acknowledgements waiting on an earlier event.
    #[must_use]
    pub fn gap_size(&self) -> usize {
        self.pending.len()
    }
}
