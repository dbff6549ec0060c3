// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Tandem - the collaborative editing core of a multi-replica text editor.
//!
//! A character-level CRDT plus its transport-agnostic synchronization
//! protocol. Any number of replicas may mutate the same document
//! concurrently; given eventual message delivery they converge to
//! byte-identical text, with no central coordination and no dependence on
//! network ordering.
//!
//! The crate owns the document, the causality tracking, and the delivery
//! protocol. The host owns everything else: the view, the transport, the
//! timers. It drives a [`replica::Replica`] with local edits, received
//! bytes, and clock ticks, and acts on the events each command returns.
//!
//! # Quick Start
//!
//! ```
//! use tandem::replica::{Event, Replica};
//! use tandem::site::SiteId;
//!
//! let mut alice = Replica::new(SiteId::new("alice"));
//! let mut bob = Replica::new(SiteId::new("bob"));
//!
//! // Alice types; her replica hands back envelopes to broadcast.
//! let mut wire = Vec::new();
//! for (i, ch) in "hi".chars().enumerate() {
//!     for event in alice.local_insert(i as u32, ch) {
//!         if let Event::Broadcast(envelope) = event {
//!             wire.push(envelope.encode());
//!         }
//!     }
//! }
//!
//! // The transport delivers them to Bob, in any order, any number of times.
//! for bytes in &wire {
//!     bob.apply_inbound(bytes);
//! }
//!
//! assert_eq!(alice.text(), "hi");
//! assert_eq!(bob.text(), "hi");
//! ```

pub mod clock;
pub mod cursor;
pub mod delivery;
pub mod document;
pub mod envelope;
pub mod op;
pub mod record;
pub mod replica;
pub mod site;
