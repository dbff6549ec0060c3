// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Replica and message identity.
//!
//! A replica is identified by an opaque site id, unique across the document's
//! history and compared by lexicographic byte order. Every envelope a replica
//! originates carries a message id that is unique across all replicas and
//! time: the site id, the wall clock, and a random salt.

use rand_core::OsRng;
use rand_core::RngCore;
use serde::Deserialize;
use serde::Serialize;

/// The target string reserved for addressing all peers.
pub const BROADCAST: &str = "broadcast";

/// Render bytes as lowercase hex.
fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    return out;
}

/// A short random hex token from the OS RNG.
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    return hex(&bytes);
}

/// An opaque site identifier, unique per replica.
///
/// Sites are ordered by lexicographic byte order; this order breaks ties
/// between characters whose clocks compare equal, so it must agree on every
/// replica. The derived `Ord` on the inner string is exactly that order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    /// Wrap a host-chosen site id.
    ///
    /// Panics if the id collides with the reserved broadcast target.
    pub fn new(id: impl Into<String>) -> SiteId {
        let id = id.into();
        if id == BROADCAST {
            panic!("site id may not be the reserved broadcast target");
        }
        return SiteId(id);
    }

    /// Generate a fresh random site id from the OS RNG.
    pub fn generate() -> SiteId {
        return SiteId(format!("s-{}", random_token()));
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// An opaque message identifier, unique across replicas and time.
///
/// The protocol never looks inside a message id; it only compares them for
/// equality (deduplication) and echoes them back in acknowledgements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Mint a new message id for an envelope originated by `site` at `now_ms`.
    pub fn generate(site: &SiteId, now_ms: u64) -> MessageId {
        return MessageId(format!("{}-{}-{}", site, now_ms, random_token()));
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.0);
    }
}
