// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Character identifiers and records.
//!
//! # Identity
//!
//! Every character ever inserted is identified by a `CharId`: the site that
//! created it plus a per-site monotone counter. The pair is globally unique
//! assuming site ids are unique and counters never repeat, and it is never
//! reused within a document's history.
//!
//! # Total order
//!
//! Records are ordered by `(origin_clock, site, counter)`: first the
//! lexicographic clock comparison, then the site id, then the counter. The
//! order is total because ids are unique, and replica-independent because it
//! reads only data embedded in the record itself. The document keeps its
//! sequence sorted by this order, which is what makes insertion commute.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::clock::VectorClock;
use crate::site::SiteId;
use crate::site::BROADCAST;

/// A globally unique, immutable identifier for a single character.
///
/// The derived `Ord` compares site lexicographically, then counter
/// numerically: exactly the tie-break the document order needs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharId {
    /// The site that inserted the character.
    pub site: SiteId,
    /// That site's character counter at insertion time.
    pub counter: u64,
}

impl CharId {
    /// Create a new character id.
    pub fn new(site: SiteId, counter: u64) -> CharId {
        return CharId { site, counter };
    }
}

/// Error parsing a `"<site>-<counter>"` character id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    /// The string has no `-` separating site from counter.
    #[error("char id has no site/counter separator: {0:?}")]
    MissingSeparator(String),
    /// The counter is not a non-negative integer.
    #[error("char id has a malformed counter: {0:?}")]
    BadCounter(String),
    /// The site half is the reserved broadcast target.
    #[error("char id uses the reserved broadcast site: {0:?}")]
    ReservedSite(String),
}

impl std::fmt::Display for CharId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}-{}", self.site, self.counter);
    }
}

impl FromStr for CharId {
    type Err = IdParseError;

    /// Parse the textual `"<site>-<counter>"` form.
    ///
    /// Site ids may themselves contain `-`, so the split happens at the
    /// last separator.
    fn from_str(s: &str) -> Result<CharId, IdParseError> {
        let (site, counter) = s
            .rsplit_once('-')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
        let counter = counter
            .parse::<u64>()
            .map_err(|_| IdParseError::BadCounter(s.to_string()))?;
        if site == BROADCAST {
            return Err(IdParseError::ReservedSite(s.to_string()));
        }
        return Ok(CharId::new(SiteId::new(site), counter));
    }
}

impl Serialize for CharId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        return serializer.collect_str(self);
    }
}

impl<'de> Deserialize<'de> for CharId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<CharId, D::Error> {
        let s = String::deserialize(deserializer)?;
        return s.parse().map_err(serde::de::Error::custom);
    }
}

/// One character of the replicated document.
///
/// A record is created by an insert and lives forever; deletion flips
/// `visible` to false exactly once, leaving a tombstone that anchors
/// position references from operations still in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharRecord {
    /// The code point.
    pub value: char,
    /// The globally unique identity of this character.
    pub id: CharId,
    /// Snapshot of the origin replica's clock when the character was created.
    pub origin_clock: VectorClock,
    /// False once the character has been deleted.
    pub visible: bool,
}

impl CharRecord {
    /// Compare two records under the document total order:
    /// `(origin_clock, site, counter)`.
    pub fn total_cmp(&self, other: &CharRecord) -> Ordering {
        return self
            .origin_clock
            .lex_cmp(&other.origin_clock)
            .then_with(|| self.id.cmp(&other.id));
    }
}
