// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! At-least-once delivery: pending acknowledgements and duplicate
//! suppression.
//!
//! # Outbound
//!
//! Every operation envelope goes into a pending table when broadcast. A
//! matching ack removes it; [`Delivery::tick`] re-broadcasts entries whose
//! age exceeds an exponential backoff (base × 2^retries, capped), and after
//! `max_retries` drops the entry and reports the failure. The document is
//! consistent whether or not delivery succeeds.
//!
//! # Inbound
//!
//! A bounded set of recently seen message ids suppresses duplicates. When
//! the set outgrows its threshold the oldest half is dropped, so a duplicate
//! delayed past the window can be re-applied; idempotence at the document
//! layer makes that safe.
//!
//! # Offline
//!
//! While offline the table freezes: nothing retransmits and no retries are
//! consumed (the host cannot send anyway). On the online signal entries are
//! already past their timeout, so the next tick re-broadcasts them all —
//! that catch-up burst is the only reconnect handling the protocol needs.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::envelope::Envelope;
use crate::site::MessageId;

/// Tunables for the delivery layer.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryConfig {
    /// First retransmission fires this long after the original send.
    pub retransmit_base_ms: u64,
    /// Backoff ceiling.
    pub retransmit_cap_ms: u64,
    /// Retransmissions before an entry is dropped and reported failed.
    pub max_retries: u32,
    /// Seen-set size that triggers dropping the oldest half.
    pub seen_threshold: usize,
}

impl Default for DeliveryConfig {
    fn default() -> DeliveryConfig {
        return DeliveryConfig {
            retransmit_base_ms: 1_000,
            retransmit_cap_ms: 8_000,
            max_retries: 3,
            seen_threshold: 1_000,
        };
    }
}

/// An unacknowledged outbound envelope.
#[derive(Clone, Debug)]
struct PendingEntry {
    envelope: Envelope,
    sent_at_ms: u64,
    retries: u32,
}

/// What one tick decided to do.
#[derive(Clone, Debug, Default)]
pub struct TickBatch {
    /// Envelopes to re-broadcast.
    pub resend: Vec<Envelope>,
    /// Message ids whose retries are exhausted.
    pub failed: Vec<MessageId>,
}

/// The delivery state of one replica.
#[derive(Clone, Debug)]
pub struct Delivery {
    config: DeliveryConfig,
    pending: BTreeMap<MessageId, PendingEntry>,
    seen_order: VecDeque<MessageId>,
    seen: FxHashSet<MessageId>,
    online: bool,
}

impl Delivery {
    /// Create an online delivery layer.
    pub fn new(config: DeliveryConfig) -> Delivery {
        return Delivery {
            config,
            pending: BTreeMap::new(),
            seen_order: VecDeque::new(),
            seen: FxHashSet::default(),
            online: true,
        };
    }

    /// Number of unacknowledged envelopes.
    pub fn pending_len(&self) -> usize {
        return self.pending.len();
    }

    /// Whether the layer is currently scheduling retransmissions.
    pub fn is_online(&self) -> bool {
        return self.online;
    }

    /// Start or stop retransmission scheduling.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Track an outbound envelope until its ack arrives.
    pub fn track(&mut self, envelope: Envelope, now_ms: u64) {
        self.pending.insert(
            envelope.message_id.clone(),
            PendingEntry {
                envelope,
                sent_at_ms: now_ms,
                retries: 0,
            },
        );
    }

    /// Remove the entry an ack refers to. Returns false for unknown ids
    /// (late acks for already-dropped entries are normal).
    pub fn acknowledge(&mut self, ack_id: &MessageId) -> bool {
        return self.pending.remove(ack_id).is_some();
    }

    /// Record an inbound message id. Returns true the first time, false for
    /// a duplicate inside the window.
    pub fn note_seen(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        self.seen.insert(id.clone());
        self.seen_order.push_back(id.clone());

        if self.seen_order.len() > self.config.seen_threshold {
            // Drop the oldest half.
            let drop = self.seen_order.len() / 2;
            for _ in 0..drop {
                if let Some(old) = self.seen_order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }

        return true;
    }

    /// Drive retransmission. Returns envelopes to re-broadcast and ids whose
    /// retries are exhausted.
    pub fn tick(&mut self, now_ms: u64) -> TickBatch {
        let mut batch = TickBatch::default();
        if !self.online {
            return batch;
        }

        let mut exhausted = Vec::new();
        for (id, entry) in self.pending.iter_mut() {
            let timeout = self.config.retransmit_base_ms.saturating_mul(
                1u64 << entry.retries.min(32),
            );
            let timeout = timeout.min(self.config.retransmit_cap_ms);
            if now_ms.saturating_sub(entry.sent_at_ms) < timeout {
                continue;
            }
            if entry.retries >= self.config.max_retries {
                exhausted.push(id.clone());
                continue;
            }
            entry.retries += 1;
            entry.sent_at_ms = now_ms;
            debug!(message_id = %id, retries = entry.retries, "retransmitting");
            batch.resend.push(entry.envelope.clone());
        }

        for id in exhausted {
            self.pending.remove(&id);
            debug!(message_id = %id, "delivery failed, retries exhausted");
            batch.failed.push(id);
        }

        return batch;
    }
}
