// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Vector clocks for tracking causality across replicas.
//!
//! Each replica maintains a counter; the clock maps site ids to the highest
//! counter observed from that site. A missing entry reads as zero.
//!
//! Two comparisons live here:
//!
//! - The *causal* comparison (`causal_cmp`, `happens_before`,
//!   `concurrent_with`): a partial order used by the protocol to decide
//!   whether one event was known to another.
//! - The *lexicographic* comparison (`lex_cmp`): a total order over clock
//!   values used to position characters in the document. It walks the union
//!   of site keys in ascending site order and decides at the first differing
//!   component. Unlike the causal order it is total, and it depends only on
//!   the two clock values, so every replica agrees on it.
//!
//! Complexity: tick O(log n), merge O(n), both comparisons O(n), where n is
//! the number of sites.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::site::SiteId;

/// The outcome of comparing two clocks under the causal partial order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockOrder {
    /// The clocks are identical.
    Equal,
    /// Self happened strictly before the other clock.
    Before,
    /// Self happened strictly after the other clock.
    After,
    /// Neither dominates: the clocks are concurrent.
    Concurrent,
}

/// A vector clock: a partial mapping from site id to logical time.
///
/// The map is ordered so that iteration visits sites in ascending
/// lexicographic order, which is what `lex_cmp` requires and what gives the
/// clock a canonical JSON encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<SiteId, u64>,
}

impl VectorClock {
    /// Create an empty clock (all components zero).
    pub fn new() -> VectorClock {
        return VectorClock {
            entries: BTreeMap::new(),
        };
    }

    /// Get the component for a site. Missing entries read as zero.
    pub fn get(&self, site: &SiteId) -> u64 {
        return *self.entries.get(site).unwrap_or(&0);
    }

    /// Increment the component for a site. Returns the new value.
    pub fn tick(&mut self, site: &SiteId) -> u64 {
        let entry = self.entries.entry(site.clone()).or_insert(0);
        *entry += 1;
        return *entry;
    }

    /// Raise a single component to at least `time`.
    pub fn observe(&mut self, site: &SiteId, time: u64) {
        let entry = self.entries.entry(site.clone()).or_insert(0);
        *entry = (*entry).max(time);
    }

    /// Merge with another clock: the componentwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (site, time) in &other.entries {
            let entry = self.entries.entry(site.clone()).or_insert(0);
            *entry = (*entry).max(*time);
        }
    }

    /// True if every component of self is <= the corresponding component of
    /// other. Equal clocks are dominated in both directions.
    pub fn dominated_by(&self, other: &VectorClock) -> bool {
        for (site, time) in &self.entries {
            if *time > other.get(site) {
                return false;
            }
        }
        return true;
    }

    /// Compare under the causal partial order.
    pub fn causal_cmp(&self, other: &VectorClock) -> ClockOrder {
        let forward = self.dominated_by(other);
        let backward = other.dominated_by(self);
        return match (forward, backward) {
            (true, true) => ClockOrder::Equal,
            (true, false) => ClockOrder::Before,
            (false, true) => ClockOrder::After,
            (false, false) => ClockOrder::Concurrent,
        };
    }

    /// Check if this clock causally precedes another.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        return self.causal_cmp(other) == ClockOrder::Before;
    }

    /// Check if two clocks are concurrent (neither happens-before the other).
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        return self.causal_cmp(other) == ClockOrder::Concurrent;
    }

    /// Compare under the lexicographic total order.
    ///
    /// Walks the union of site keys in ascending site order; at the first
    /// site where the components differ, the smaller component is less.
    /// Returns `Equal` only for identical clock values.
    pub fn lex_cmp(&self, other: &VectorClock) -> Ordering {
        let mut ours = self.entries.iter().peekable();
        let mut theirs = other.entries.iter().peekable();

        loop {
            match (ours.peek().copied(), theirs.peek().copied()) {
                (None, None) => return Ordering::Equal,
                (Some((site_a, time_a)), Some((site_b, time_b))) => {
                    match site_a.cmp(site_b) {
                        // Site present only on our side: the other reads 0.
                        Ordering::Less => {
                            if *time_a != 0 {
                                return Ordering::Greater;
                            }
                            ours.next();
                        }
                        Ordering::Greater => {
                            if *time_b != 0 {
                                return Ordering::Less;
                            }
                            theirs.next();
                        }
                        Ordering::Equal => match time_a.cmp(time_b) {
                            Ordering::Equal => {
                                ours.next();
                                theirs.next();
                            }
                            unequal => return unequal,
                        },
                    }
                }
                (Some((_, time_a)), None) => {
                    if *time_a != 0 {
                        return Ordering::Greater;
                    }
                    ours.next();
                }
                (None, Some((_, time_b))) => {
                    if *time_b != 0 {
                        return Ordering::Less;
                    }
                    theirs.next();
                }
            }
        }
    }

    /// Iterate over the (site, time) entries in ascending site order.
    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, u64)> {
        return self.entries.iter().map(|(site, time)| (site, *time));
    }

    /// True if no component has ever been set.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }
}
