// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Remote caret tracking and transformation.
//!
//! Peers report their caret as a position plus the clock they observed it
//! under. The receiver cannot use the position directly: its own document
//! may contain edits the reporter had not seen when the report was made.
//!
//! The transform replays every logged operation *strictly after* the
//! reported clock:
//!
//! - an insert at a position at or before the caret shifts it right,
//! - a delete strictly before the caret shifts it left (floored at zero).
//!
//! Operations *concurrent* with the report do not transform it: their effect
//! on the reporter's caret is unknown, and leaving the caret in place is the
//! least surprising policy.
//!
//! Reports are last-writer-wins per site by clock. Stored carets are also
//! shifted incrementally as strictly-later operations arrive, so remote
//! carets stay current between reports.

use std::collections::BTreeMap;

use crate::clock::ClockOrder;
use crate::clock::VectorClock;
use crate::op::Operation;
use crate::site::SiteId;

/// A peer's last reported caret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorReport {
    /// Visible caret position, transformed into the local document.
    pub position: u32,
    /// Optional selection endpoints, transformed the same way.
    pub selection: Option<(u32, u32)>,
    /// The reporter's clock when the report was made. Kept at its original
    /// value even as `position` is shifted by later operations.
    pub clock: VectorClock,
}

/// Shift a single position for one operation known to be strictly after the
/// report.
fn shift_position(position: u32, op: &Operation) -> u32 {
    return match op {
        Operation::Insert { position: p, .. } => {
            if *p <= position {
                position + 1
            } else {
                position
            }
        }
        Operation::Delete { position: p, .. } => {
            if *p < position {
                position.saturating_sub(1)
            } else {
                position
            }
        }
    };
}

/// Replay the log over a reported position.
///
/// Only operations whose clock is strictly after `report_clock` apply;
/// concurrent operations are skipped.
pub fn transform_position(report_clock: &VectorClock, position: u32, log: &[Operation]) -> u32 {
    let mut transformed = position;
    for op in log {
        if report_clock.causal_cmp(op.clock()) == ClockOrder::Before {
            transformed = shift_position(transformed, op);
        }
    }
    return transformed;
}

/// Last-writer-wins registry of peer carets.
#[derive(Clone, Debug, Default)]
pub struct CursorRegistry {
    cursors: BTreeMap<SiteId, CursorReport>,
}

impl CursorRegistry {
    /// Create an empty registry.
    pub fn new() -> CursorRegistry {
        return CursorRegistry {
            cursors: BTreeMap::new(),
        };
    }

    /// Admit a report under last-writer-wins.
    ///
    /// A report loses only when its clock is strictly before the stored one;
    /// concurrent reports take latest arrival. Returns false for a stale
    /// report.
    pub fn admit(&mut self, site: SiteId, report: CursorReport) -> bool {
        if let Some(existing) = self.cursors.get(&site) {
            if report.clock.causal_cmp(&existing.clock) == ClockOrder::Before {
                return false;
            }
        }
        self.cursors.insert(site, report);
        return true;
    }

    /// The stored caret for a site.
    pub fn get(&self, site: &SiteId) -> Option<&CursorReport> {
        return self.cursors.get(site);
    }

    /// Forget a departed peer.
    pub fn remove(&mut self, site: &SiteId) {
        self.cursors.remove(site);
    }

    /// Iterate over all stored carets.
    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, &CursorReport)> {
        return self.cursors.iter();
    }

    /// Shift every stored caret for a newly applied operation.
    ///
    /// Only carets whose report clock is strictly before the operation's
    /// clock move. Returns the sites whose carets changed, with their new
    /// positions.
    pub fn shift_for_op(&mut self, op: &Operation) -> Vec<(SiteId, u32, Option<(u32, u32)>)> {
        let mut moved = Vec::new();
        for (site, report) in self.cursors.iter_mut() {
            if report.clock.causal_cmp(op.clock()) != ClockOrder::Before {
                continue;
            }
            let position = shift_position(report.position, op);
            let selection = report
                .selection
                .map(|(start, end)| (shift_position(start, op), shift_position(end, op)));
            if position != report.position || selection != report.selection {
                report.position = position;
                report.selection = selection;
                moved.push((site.clone(), position, selection));
            }
        }
        return moved;
    }

    /// True if `clock` is dominated by every stored report clock.
    ///
    /// Used to bound the operation log: an operation already behind every
    /// peer's report can never transform a future in-order report.
    pub fn dominates_all(&self, clock: &VectorClock) -> bool {
        if self.cursors.is_empty() {
            return false;
        }
        return self
            .cursors
            .values()
            .all(|report| clock.dominated_by(&report.clock));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CharId;
    use crate::record::CharRecord;

    fn clock_of(entries: &[(&str, u64)]) -> VectorClock {
        let mut clock = VectorClock::new();
        for (site, time) in entries {
            clock.observe(&SiteId::new(*site), *time);
        }
        return clock;
    }

    fn insert_op(position: u32, clock: VectorClock) -> Operation {
        return Operation::Insert {
            record: CharRecord {
                value: 'x',
                id: CharId::new(SiteId::new("s-xx"), position as u64),
                origin_clock: clock,
                visible: true,
            },
            position,
        };
    }

    fn delete_op(position: u32, clock: VectorClock) -> Operation {
        return Operation::Delete {
            target: CharId::new(SiteId::new("s-xx"), position as u64),
            position,
            clock,
        };
    }

    #[test]
    fn strictly_later_insert_shifts_right() {
        let report = clock_of(&[("s-aa", 4)]);
        let log = vec![insert_op(3, clock_of(&[("s-aa", 4), ("s-bb", 1)]))];

        assert_eq!(transform_position(&report, 10, &log), 11);
        assert_eq!(transform_position(&report, 2, &log), 2);
        // Insert exactly at the caret pushes it right.
        assert_eq!(transform_position(&report, 3, &log), 4);
    }

    #[test]
    fn concurrent_operations_do_not_transform() {
        let report = clock_of(&[("s-aa", 4)]);
        let log = vec![
            insert_op(0, clock_of(&[("s-bb", 1)])),
            insert_op(1, clock_of(&[("s-bb", 2)])),
            insert_op(2, clock_of(&[("s-bb", 3)])),
        ];

        assert_eq!(transform_position(&report, 5, &log), 5);
    }

    #[test]
    fn strictly_later_delete_shifts_left_floored() {
        let report = clock_of(&[("s-aa", 1)]);
        let later = clock_of(&[("s-aa", 1), ("s-bb", 1)]);
        let log = vec![delete_op(0, later.clone()), delete_op(0, later)];

        assert_eq!(transform_position(&report, 1, &log), 0);
        // Already at zero: the floor holds.
        assert_eq!(transform_position(&report, 0, &log), 0);
        // Delete at the caret itself does not move it.
        let log = vec![delete_op(5, clock_of(&[("s-aa", 2)]))];
        assert_eq!(transform_position(&clock_of(&[("s-aa", 1)]), 5, &log), 5);
    }

    #[test]
    fn lww_rejects_causally_stale_reports() {
        let site = SiteId::new("s-bb");
        let mut registry = CursorRegistry::new();

        assert!(registry.admit(
            site.clone(),
            CursorReport {
                position: 5,
                selection: None,
                clock: clock_of(&[("s-bb", 2)]),
            },
        ));

        // Older clock loses.
        assert!(!registry.admit(
            site.clone(),
            CursorReport {
                position: 1,
                selection: None,
                clock: clock_of(&[("s-bb", 1)]),
            },
        ));
        assert_eq!(registry.get(&site).unwrap().position, 5);

        // Newer clock wins.
        assert!(registry.admit(
            site.clone(),
            CursorReport {
                position: 9,
                selection: None,
                clock: clock_of(&[("s-bb", 3)]),
            },
        ));
        assert_eq!(registry.get(&site).unwrap().position, 9);
    }

    #[test]
    fn shift_for_op_moves_only_older_carets() {
        let mut registry = CursorRegistry::new();
        registry.admit(
            SiteId::new("s-bb"),
            CursorReport {
                position: 10,
                selection: Some((8, 12)),
                clock: clock_of(&[("s-aa", 4)]),
            },
        );
        registry.admit(
            SiteId::new("s-cc"),
            CursorReport {
                position: 10,
                selection: None,
                clock: clock_of(&[("s-cc", 7)]),
            },
        );

        // Strictly after s-bb's report, concurrent with s-cc's.
        let op = insert_op(3, clock_of(&[("s-aa", 4), ("s-dd", 1)]));
        let moved = registry.shift_for_op(&op);

        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].0, SiteId::new("s-bb"));
        assert_eq!(moved[0].1, 11);
        assert_eq!(moved[0].2, Some((9, 13)));
        assert_eq!(registry.get(&SiteId::new("s-cc")).unwrap().position, 10);
    }

    #[test]
    fn dominates_all_requires_a_report() {
        let mut registry = CursorRegistry::new();
        let old = clock_of(&[("s-aa", 1)]);

        assert!(!registry.dominates_all(&old));

        registry.admit(
            SiteId::new("s-bb"),
            CursorReport {
                position: 0,
                selection: None,
                clock: clock_of(&[("s-aa", 3), ("s-bb", 2)]),
            },
        );

        assert!(registry.dominates_all(&old));
        assert!(!registry.dominates_all(&clock_of(&[("s-aa", 9)])));
    }
}
