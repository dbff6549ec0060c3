// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Operations exchanged between replicas.
//!
//! An operation describes one mutation of the document in a form that can be
//! merged with concurrent operations: an Insert carries the full character
//! record (identity, clock snapshot, value), a Delete names its target by
//! id. Neither depends on the receiver's current state to mean the same
//! thing everywhere.
//!
//! Each operation also carries the visible `position` it acted on, as seen
//! by the replica that applied it. Position is *not* used to place records
//! (the record total order does that); it feeds cursor transformation, which
//! needs to know where in the sequence each edit landed.

use crate::clock::VectorClock;
use crate::record::CharId;
use crate::record::CharRecord;

/// A single document mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// A character came into existence.
    Insert {
        /// The new record, clock snapshot included.
        record: CharRecord,
        /// The visible index the record landed at.
        position: u32,
    },

    /// A character was deleted.
    Delete {
        /// The id of the tombstoned character.
        target: CharId,
        /// The visible index the character occupied before deletion.
        position: u32,
        /// The issuing replica's clock at the time of the delete.
        clock: VectorClock,
    },
}

impl Operation {
    /// The issuing replica's clock at the time of issue.
    ///
    /// For an Insert this is the record's own origin clock; the two are
    /// snapshots of the same instant.
    pub fn clock(&self) -> &VectorClock {
        return match self {
            Operation::Insert { record, .. } => &record.origin_clock,
            Operation::Delete { clock, .. } => clock,
        };
    }

    /// The visible index the operation acted on.
    pub fn position(&self) -> u32 {
        return match self {
            Operation::Insert { position, .. } => *position,
            Operation::Delete { position, .. } => *position,
        };
    }
}
