// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! The replica: one site's complete collaborative-editing state machine.
//!
//! A replica is driven by three event sources — local edits, inbound
//! envelopes, and timer ticks — each processed to completion before the
//! next. All mutation goes through `&mut Replica`, so the type system
//! enforces that no handler interleaves with another on the same state.
//!
//! Commands return [`Event`]s instead of invoking callbacks: the host
//! drains the returned effects after each command (broadcast these bytes,
//! refresh the view, move that caret). This keeps the core free of host
//! closures and makes every exchange scriptable in tests.
//!
//! Time is injected. `tick` takes the wall clock in milliseconds; envelope
//! timestamps use the same clock domain, captured when the envelope is
//! built. Tests drive schedules with synthetic times.

use std::collections::BTreeMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::clock::VectorClock;
use crate::cursor::transform_position;
use crate::cursor::CursorRegistry;
use crate::cursor::CursorReport;
use crate::delivery::Delivery;
use crate::delivery::DeliveryConfig;
use crate::document::DeleteOutcome;
use crate::document::Document;
use crate::document::GcReport;
use crate::envelope::Envelope;
use crate::envelope::Payload;
use crate::envelope::Target;
use crate::envelope::WireOperation;
use crate::op::Operation;
use crate::record::CharId;
use crate::record::CharRecord;
use crate::site::random_token;
use crate::site::MessageId;
use crate::site::SiteId;

/// Milliseconds since the Unix epoch.
fn unix_millis() -> u64 {
    return SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
}

/// Tunables for one replica.
#[derive(Clone, Copy, Debug)]
pub struct ReplicaConfig {
    /// Delivery-layer knobs (backoff, retries, seen-set bound).
    pub delivery: DeliveryConfig,
    /// How often `tick` emits a presence heartbeat.
    pub presence_interval_ms: u64,
    /// Silence after which a peer is considered gone.
    pub peer_timeout_ms: u64,
    /// Operation-log length that triggers compaction.
    pub max_op_log: usize,
}

impl Default for ReplicaConfig {
    fn default() -> ReplicaConfig {
        return ReplicaConfig {
            delivery: DeliveryConfig::default(),
            presence_interval_ms: 5_000,
            peer_timeout_ms: 30_000,
            max_op_log: 1_024,
        };
    }
}

/// An effect the host must act on.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Encode and hand this envelope to the transport.
    Broadcast(Envelope),
    /// A remote operation changed the document; refresh the view.
    RemoteApplied(Operation),
    /// A peer's caret moved (fresh report or shifted by a later edit).
    CursorUpdated {
        site: SiteId,
        position: u32,
        selection: Option<(u32, u32)>,
    },
    /// First contact with a peer.
    PeerJoined(SiteId),
    /// A peer went silent past the timeout.
    PeerLeft(SiteId),
    /// An outbound operation exhausted its retries.
    DeliveryFailed { message_id: MessageId },
}

/// How an inbound envelope was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyStatus {
    /// The envelope was dispatched and took effect (possibly idempotently).
    Applied,
    /// A delete arrived before its insert and is parked by target id.
    Buffered,
    /// The message id was already in the seen window.
    Duplicate,
    /// The envelope came from this replica.
    Loopback,
    /// The envelope was addressed to a different site.
    Ignored,
    /// The bytes did not parse; nothing reached the document.
    Malformed,
}

/// The status of an apply plus the effects it produced.
#[derive(Clone, Debug)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    pub events: Vec<Event>,
}

/// Everything a host needs to persist to restart a replica.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub site: SiteId,
    pub clock: VectorClock,
    pub records: Vec<CharRecord>,
}

/// What this replica knows about one peer.
#[derive(Clone, Debug)]
struct PeerState {
    /// Send time of the last envelope seen from the peer.
    last_seen_ms: u64,
    /// Componentwise max of every clock seen on the peer's operations and
    /// cursor reports. Gates tombstone GC.
    observed_clock: VectorClock,
}

/// One site's replica of the shared document.
pub struct Replica {
    site: SiteId,
    session: String,
    config: ReplicaConfig,
    clock: VectorClock,
    /// Per-replica character counter, independent of the vector clock.
    counter: u64,
    document: Document,
    /// Applied operations, newest last. Feeds cursor transformation.
    log: Vec<Operation>,
    delivery: Delivery,
    cursors: CursorRegistry,
    peers: BTreeMap<SiteId, PeerState>,
    /// Deletes that overtook their insert, keyed by target id.
    pending_deletes: FxHashMap<CharId, Operation>,
    last_presence_ms: u64,
    last_cursor_report: Option<(u32, Option<(u32, u32)>)>,
    malformed_count: u64,
}

impl Replica {
    /// Create a replica with default configuration.
    pub fn new(site: SiteId) -> Replica {
        return Replica::with_config(site, ReplicaConfig::default());
    }

    /// Create a replica with explicit configuration.
    pub fn with_config(site: SiteId, config: ReplicaConfig) -> Replica {
        return Replica {
            site,
            session: random_token(),
            clock: VectorClock::new(),
            counter: 0,
            document: Document::new(),
            log: Vec::new(),
            delivery: Delivery::new(config.delivery),
            cursors: CursorRegistry::new(),
            peers: BTreeMap::new(),
            pending_deletes: FxHashMap::default(),
            last_presence_ms: 0,
            last_cursor_report: None,
            malformed_count: 0,
            config,
        };
    }

    /// Rebuild a replica from a persisted snapshot.
    ///
    /// The counter resumes one past the highest local counter in the
    /// snapshot, so restarted replicas never reuse a character id.
    pub fn restore(snapshot: ReplicaSnapshot, config: ReplicaConfig) -> Replica {
        let document = Document::from_records(snapshot.records);
        let counter = document
            .records()
            .iter()
            .filter(|r| r.id.site == snapshot.site)
            .map(|r| r.id.counter)
            .max()
            .map_or(0, |max| max + 1);

        let mut replica = Replica::with_config(snapshot.site, config);
        replica.clock = snapshot.clock;
        replica.counter = counter;
        replica.document = document;
        return replica;
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// This replica's site id.
    pub fn site(&self) -> &SiteId {
        return &self.site;
    }

    /// The current vector clock.
    pub fn clock(&self) -> &VectorClock {
        return &self.clock;
    }

    /// The visible text, as a point-in-time copy.
    pub fn text(&self) -> String {
        return self.document.text();
    }

    /// Number of visible characters.
    pub fn visible_len(&self) -> usize {
        return self.document.visible_len();
    }

    /// The full document, tombstones included.
    pub fn document(&self) -> &Document {
        return &self.document;
    }

    /// The last known caret for a peer, in local coordinates.
    pub fn peer_cursor(&self, site: &SiteId) -> Option<&CursorReport> {
        return self.cursors.get(site);
    }

    /// Sites this replica currently considers present.
    pub fn peers(&self) -> impl Iterator<Item = &SiteId> {
        return self.peers.keys();
    }

    /// Outbound envelopes still awaiting acknowledgement.
    pub fn pending_acks(&self) -> usize {
        return self.delivery.pending_len();
    }

    /// Inbound envelopes that failed to parse since startup.
    pub fn malformed_count(&self) -> u64 {
        return self.malformed_count;
    }

    /// Point-in-time state for persistence.
    pub fn snapshot(&self) -> ReplicaSnapshot {
        return ReplicaSnapshot {
            site: self.site.clone(),
            clock: self.clock.clone(),
            records: self.document.records().to_vec(),
        };
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Insert `value` at a visible position (clamped to `[0, visible_len]`).
    ///
    /// Applies locally, then returns the envelope to broadcast.
    pub fn local_insert(&mut self, position: u32, value: char) -> Vec<Event> {
        let now = unix_millis();
        let clamped = (position as usize).min(self.document.visible_len()) as u32;

        self.clock.tick(&self.site);
        let id = CharId::new(self.site.clone(), self.counter);
        self.counter += 1;

        let record = CharRecord {
            value,
            id,
            origin_clock: self.clock.clone(),
            visible: true,
        };
        let landed = self.document.insert(record.clone());
        debug_assert!(landed.is_some(), "local char ids never repeat");

        let op = Operation::Insert {
            record,
            position: clamped,
        };
        self.push_log(op.clone());

        let envelope = self.make_envelope(
            Payload::Operation(WireOperation::from(&op)),
            Target::Broadcast,
            now,
        );
        self.delivery.track(envelope.clone(), now);
        return vec![Event::Broadcast(envelope)];
    }

    /// Delete the character at a visible position.
    ///
    /// Out-of-range positions are a no-op: nothing is emitted and the clock
    /// does not advance.
    pub fn local_delete(&mut self, position: u32) -> Vec<Event> {
        let now = unix_millis();
        let record = match self.document.record_at_visible(position as usize) {
            Some(record) => record.clone(),
            None => return Vec::new(),
        };

        self.clock.tick(&self.site);
        self.document.tombstone(&record.id);

        let op = Operation::Delete {
            target: record.id,
            position,
            clock: self.clock.clone(),
        };
        self.push_log(op.clone());

        let envelope = self.make_envelope(
            Payload::Operation(WireOperation::from(&op)),
            Target::Broadcast,
            now,
        );
        self.delivery.track(envelope.clone(), now);
        return vec![Event::Broadcast(envelope)];
    }

    /// Report this replica's caret to peers.
    ///
    /// Consecutive identical reports are suppressed; cadence is otherwise
    /// the host's business. Cursor envelopes are fire-and-forget: they are
    /// neither acknowledged nor retransmitted.
    pub fn report_cursor(&mut self, position: u32, selection: Option<(u32, u32)>) -> Vec<Event> {
        if self.last_cursor_report == Some((position, selection)) {
            return Vec::new();
        }
        self.last_cursor_report = Some((position, selection));

        let now = unix_millis();
        let envelope = self.make_envelope(
            Payload::Cursor {
                position,
                selection,
                clock: self.clock.clone(),
            },
            Target::Broadcast,
            now,
        );
        return vec![Event::Broadcast(envelope)];
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Apply one received envelope.
    pub fn apply_inbound(&mut self, bytes: &[u8]) -> ApplyOutcome {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                self.malformed_count += 1;
                warn!(%error, "dropping malformed envelope");
                return ApplyOutcome {
                    status: ApplyStatus::Malformed,
                    events: Vec::new(),
                };
            }
        };

        if envelope.origin_site == self.site {
            return ApplyOutcome {
                status: ApplyStatus::Loopback,
                events: Vec::new(),
            };
        }
        if let Target::Site(target) = &envelope.target {
            if target != &self.site {
                return ApplyOutcome {
                    status: ApplyStatus::Ignored,
                    events: Vec::new(),
                };
            }
        }

        let mut events = Vec::new();
        self.note_peer(&envelope.origin_site, envelope.send_time, &mut events);

        if !self.delivery.note_seen(&envelope.message_id) {
            return ApplyOutcome {
                status: ApplyStatus::Duplicate,
                events,
            };
        }

        let now = unix_millis();
        let status = match envelope.payload.clone() {
            Payload::Operation(wire) => {
                self.apply_operation(Operation::from(wire), &envelope, now, &mut events)
            }
            Payload::Ack { ack_id } => {
                self.delivery.acknowledge(&ack_id);
                ApplyStatus::Applied
            }
            Payload::Cursor {
                position,
                selection,
                clock,
            } => {
                self.apply_cursor(&envelope.origin_site, position, selection, clock, &mut events);
                ApplyStatus::Applied
            }
            Payload::Presence { .. } => {
                // note_peer already refreshed liveness.
                ApplyStatus::Applied
            }
        };

        return ApplyOutcome { status, events };
    }

    /// Apply a remote operation: merge clocks, mutate, ack.
    fn apply_operation(
        &mut self,
        op: Operation,
        envelope: &Envelope,
        now: u64,
        events: &mut Vec<Event>,
    ) -> ApplyStatus {
        self.clock.merge(op.clock());
        self.observe_peer_clock(&envelope.origin_site, op.clock());

        let status = match &op {
            Operation::Insert { record, .. } => {
                if self.document.insert(record.clone()).is_some() {
                    let id = record.id.clone();
                    self.push_log(op.clone());
                    events.push(Event::RemoteApplied(op.clone()));
                    events.extend(self.cursor_shifts(&op));

                    // A buffered delete may have been waiting for this
                    // insert; the character dies the moment it is born.
                    if let Some(delete) = self.pending_deletes.remove(&id) {
                        if let DeleteOutcome::Deleted { .. } = self.document.tombstone(&id) {
                            self.push_log(delete.clone());
                            events.push(Event::RemoteApplied(delete.clone()));
                            events.extend(self.cursor_shifts(&delete));
                        }
                    }
                }
                // A record we already hold is an idempotent re-delivery.
                ApplyStatus::Applied
            }
            Operation::Delete { target, .. } => match self.document.tombstone(target) {
                DeleteOutcome::Deleted { .. } => {
                    self.push_log(op.clone());
                    events.push(Event::RemoteApplied(op.clone()));
                    events.extend(self.cursor_shifts(&op));
                    ApplyStatus::Applied
                }
                DeleteOutcome::AlreadyDeleted => ApplyStatus::Applied,
                DeleteOutcome::Unknown => {
                    debug!(id = %target, "delete overtook its insert, buffering");
                    self.pending_deletes.insert(target.clone(), op.clone());
                    ApplyStatus::Buffered
                }
            },
        };

        // Receipt is acknowledged whether the effect was fresh, idempotent,
        // or parked: the sender only needs to know it can stop resending.
        let ack = self.make_envelope(
            Payload::Ack {
                ack_id: envelope.message_id.clone(),
            },
            Target::Site(envelope.origin_site.clone()),
            now,
        );
        events.push(Event::Broadcast(ack));

        return status;
    }

    /// Transform and store a peer's caret report.
    fn apply_cursor(
        &mut self,
        origin: &SiteId,
        position: u32,
        selection: Option<(u32, u32)>,
        clock: VectorClock,
        events: &mut Vec<Event>,
    ) {
        self.observe_peer_clock(origin, &clock);

        let visible_len = self.document.visible_len() as u32;
        let transformed = transform_position(&clock, position, &self.log).min(visible_len);
        let selection = selection.map(|(start, end)| {
            (
                transform_position(&clock, start, &self.log).min(visible_len),
                transform_position(&clock, end, &self.log).min(visible_len),
            )
        });

        let admitted = self.cursors.admit(
            origin.clone(),
            CursorReport {
                position: transformed,
                selection,
                clock,
            },
        );
        if admitted {
            events.push(Event::CursorUpdated {
                site: origin.clone(),
                position: transformed,
                selection,
            });
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Drive retransmission, presence, and peer expiry.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Event> {
        let mut events = Vec::new();

        let batch = self.delivery.tick(now_ms);
        for envelope in batch.resend {
            events.push(Event::Broadcast(envelope));
        }
        for message_id in batch.failed {
            events.push(Event::DeliveryFailed { message_id });
        }

        if self.delivery.is_online()
            && now_ms.saturating_sub(self.last_presence_ms) >= self.config.presence_interval_ms
        {
            self.last_presence_ms = now_ms;
            let presence = self.make_envelope(
                Payload::Presence {
                    session: self.session.clone(),
                    timestamp: now_ms,
                },
                Target::Broadcast,
                now_ms,
            );
            events.push(Event::Broadcast(presence));
        }

        let expired: Vec<SiteId> = self
            .peers
            .iter()
            .filter(|(_, peer)| {
                now_ms.saturating_sub(peer.last_seen_ms) > self.config.peer_timeout_ms
            })
            .map(|(site, _)| site.clone())
            .collect();
        for site in expired {
            self.peers.remove(&site);
            self.cursors.remove(&site);
            debug!(peer = %site, "peer timed out");
            events.push(Event::PeerLeft(site));
        }

        return events;
    }

    /// Signal transport availability.
    ///
    /// While offline, outbound envelopes accumulate unacknowledged and no
    /// retries are consumed; the first tick after coming back online
    /// re-broadcasts everything past due. No other replay is needed.
    pub fn set_online(&mut self, online: bool) {
        self.delivery.set_online(online);
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Prune old tombstones, keeping the `keep` most recent.
    ///
    /// A tombstone is pruned only when its origin clock is dominated by
    /// every known peer's observed clock — otherwise some peer may not have
    /// seen the delete yet, and pruning could resurrect the character there.
    /// Unstable tombstones are retained and counted in the report.
    pub fn gc(&mut self, keep_recent_tombstones: u32) -> GcReport {
        let peers = &self.peers;
        let report = self.document.gc(keep_recent_tombstones as usize, |record| {
            peers
                .values()
                .all(|peer| record.origin_clock.dominated_by(&peer.observed_clock))
        });
        if report.retained_unstable > 0 {
            debug!(
                retained = report.retained_unstable,
                "gc kept tombstones not yet stable on all peers"
            );
        }
        return report;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn make_envelope(&self, payload: Payload, target: Target, now_ms: u64) -> Envelope {
        return Envelope {
            message_id: MessageId::generate(&self.site, now_ms),
            origin_site: self.site.clone(),
            target,
            send_time: now_ms,
            payload,
        };
    }

    fn push_log(&mut self, op: Operation) {
        self.log.push(op);
        self.compact_log();
    }

    /// Bound the transform log.
    ///
    /// Operations already dominated by every peer's report clock can never
    /// transform a future in-order report, so they go first; if that is not
    /// enough (or no reports exist), the oldest entries go.
    fn compact_log(&mut self) {
        if self.log.len() <= self.config.max_op_log {
            return;
        }

        let cursors = &self.cursors;
        self.log.retain(|op| !cursors.dominates_all(op.clock()));

        if self.log.len() > self.config.max_op_log {
            let excess = self.log.len() - self.config.max_op_log;
            self.log.drain(..excess);
        }
    }

    /// Register or refresh a peer on any envelope from it.
    fn note_peer(&mut self, site: &SiteId, seen_ms: u64, events: &mut Vec<Event>) {
        match self.peers.get_mut(site) {
            Some(peer) => {
                peer.last_seen_ms = peer.last_seen_ms.max(seen_ms);
            }
            None => {
                self.peers.insert(
                    site.clone(),
                    PeerState {
                        last_seen_ms: seen_ms,
                        observed_clock: VectorClock::new(),
                    },
                );
                events.push(Event::PeerJoined(site.clone()));
            }
        }
    }

    /// Fold a clock seen on a peer's traffic into its observed clock.
    fn observe_peer_clock(&mut self, site: &SiteId, clock: &VectorClock) {
        if let Some(peer) = self.peers.get_mut(site) {
            peer.observed_clock.merge(clock);
        }
    }

    /// Shifts of stored peer carets caused by a newly applied operation.
    fn cursor_shifts(&mut self, op: &Operation) -> Vec<Event> {
        return self
            .cursors
            .shift_for_op(op)
            .into_iter()
            .map(|(site, position, selection)| Event::CursorUpdated {
                site,
                position,
                selection,
            })
            .collect();
    }
}
