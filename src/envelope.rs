// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! The wire unit exchanged between replicas.
//!
//! An envelope wraps one of four payload kinds — operation, acknowledgement,
//! cursor report, presence heartbeat — together with its message id, origin
//! site, target, and send time. The encoding is self-describing JSON; field
//! names and value shapes are normative for interoperability:
//!
//! - `clock` is an object mapping site id strings to non-negative integers,
//! - character ids are the textual concatenation `"<site>-<counter>"`,
//! - `target` is either the string `"broadcast"` or a site id.
//!
//! Serialize → deserialize → serialize is byte-stable: map keys are sorted
//! and field order is fixed by the types here.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::clock::VectorClock;
use crate::op::Operation;
use crate::record::CharId;
use crate::record::CharRecord;
use crate::site::BROADCAST;
use crate::site::MessageId;
use crate::site::SiteId;

/// Error decoding inbound bytes.
///
/// Malformed envelopes are dropped at the protocol boundary; they never
/// reach the document.
#[derive(Debug, Error)]
pub enum WireError {
    /// The bytes are not a well-formed envelope (bad JSON, unknown kind,
    /// missing field, malformed id).
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Who an envelope is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// All peers.
    Broadcast,
    /// One specific site (used for acks).
    Site(SiteId),
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        return match self {
            Target::Broadcast => serializer.serialize_str(BROADCAST),
            Target::Site(site) => site.serialize(serializer),
        };
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Target, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == BROADCAST {
            return Ok(Target::Broadcast);
        }
        return Ok(Target::Site(SiteId::new(s)));
    }
}

/// An operation as it appears on the wire.
///
/// The wire form is internally tagged by `type` and spells out the record's
/// origin site redundantly alongside its id, per the format contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireOperation {
    Insert {
        position: u32,
        clock: VectorClock,
        record: WireRecord,
    },
    Delete {
        position: u32,
        clock: VectorClock,
        target_id: CharId,
    },
}

/// A character record as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub value: char,
    pub id: CharId,
    pub origin_site: SiteId,
    pub origin_clock: VectorClock,
    pub visible: bool,
}

impl From<&Operation> for WireOperation {
    fn from(op: &Operation) -> WireOperation {
        return match op {
            Operation::Insert { record, position } => WireOperation::Insert {
                position: *position,
                clock: record.origin_clock.clone(),
                record: WireRecord {
                    value: record.value,
                    id: record.id.clone(),
                    origin_site: record.id.site.clone(),
                    origin_clock: record.origin_clock.clone(),
                    visible: record.visible,
                },
            },
            Operation::Delete {
                target,
                position,
                clock,
            } => WireOperation::Delete {
                position: *position,
                clock: clock.clone(),
                target_id: target.clone(),
            },
        };
    }
}

impl From<WireOperation> for Operation {
    fn from(wire: WireOperation) -> Operation {
        return match wire {
            WireOperation::Insert {
                position, record, ..
            } => Operation::Insert {
                record: CharRecord {
                    value: record.value,
                    id: record.id,
                    origin_clock: record.origin_clock,
                    visible: record.visible,
                },
                position,
            },
            WireOperation::Delete {
                position,
                clock,
                target_id,
            } => Operation::Delete {
                target: target_id,
                position,
                clock,
            },
        };
    }
}

/// The payload of an envelope, adjacently tagged as `kind` + `payload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Payload {
    /// A document mutation; the only kind that is acknowledged and
    /// retransmitted.
    Operation(WireOperation),
    /// Acknowledges receipt of the envelope with id `ack_id`.
    Ack { ack_id: MessageId },
    /// A caret report, last-writer-wins per site.
    Cursor {
        position: u32,
        selection: Option<(u32, u32)>,
        clock: VectorClock,
    },
    /// A liveness heartbeat.
    Presence { session: String, timestamp: u64 },
}

impl Payload {
    /// The wire name of this payload's kind.
    pub fn kind(&self) -> &'static str {
        return match self {
            Payload::Operation(_) => "operation",
            Payload::Ack { .. } => "ack",
            Payload::Cursor { .. } => "cursor",
            Payload::Presence { .. } => "presence",
        };
    }
}

/// One wire unit: routing metadata plus a tagged payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub origin_site: SiteId,
    pub target: Target,
    pub send_time: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Vec<u8> {
        return serde_json::to_vec(self).expect("envelope types always serialize");
    }

    /// Decode from the JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Envelope, WireError> {
        return Ok(serde_json::from_slice(bytes)?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_insert() -> Envelope {
        let site = SiteId::new("s-aa");
        let mut clock = VectorClock::new();
        clock.tick(&site);

        let op = Operation::Insert {
            record: CharRecord {
                value: 'x',
                id: CharId::new(site.clone(), 0),
                origin_clock: clock,
                visible: true,
            },
            position: 0,
        };

        return Envelope {
            message_id: MessageId::generate(&site, 1_000),
            origin_site: site,
            target: Target::Broadcast,
            send_time: 1_000,
            payload: Payload::Operation(WireOperation::from(&op)),
        };
    }

    #[test]
    fn roundtrip_is_byte_stable() {
        let envelope = sample_insert();

        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn wire_shape_matches_the_format_contract() {
        let envelope = sample_insert();
        let value: serde_json::Value = serde_json::from_slice(&envelope.encode()).unwrap();

        assert_eq!(value["kind"], "operation");
        assert_eq!(value["target"], "broadcast");
        assert_eq!(value["payload"]["type"], "insert");
        assert_eq!(value["payload"]["record"]["id"], "s-aa-0");
        assert_eq!(value["payload"]["record"]["origin_site"], "s-aa");
        assert_eq!(value["payload"]["clock"]["s-aa"], 1);
    }

    #[test]
    fn ack_roundtrip() {
        let site = SiteId::new("s-bb");
        let envelope = Envelope {
            message_id: MessageId::generate(&site, 2_000),
            origin_site: site.clone(),
            target: Target::Site(SiteId::new("s-aa")),
            send_time: 2_000,
            payload: Payload::Ack {
                ack_id: MessageId::generate(&site, 1_000),
            },
        };

        let decoded = Envelope::decode(&envelope.encode()).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.payload.kind(), "ack");
    }

    #[test]
    fn cursor_selection_survives_roundtrip() {
        let site = SiteId::new("s-aa");
        let envelope = Envelope {
            message_id: MessageId::generate(&site, 3_000),
            origin_site: site,
            target: Target::Broadcast,
            send_time: 3_000,
            payload: Payload::Cursor {
                position: 4,
                selection: Some((2, 6)),
                clock: VectorClock::new(),
            },
        };

        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(b"{\"kind\":\"warp\"}").is_err());
    }

    #[test]
    fn operation_wire_conversion_roundtrips() {
        let site = SiteId::new("s-aa");
        let mut clock = VectorClock::new();
        clock.tick(&site);

        let op = Operation::Delete {
            target: CharId::new(site, 3),
            position: 7,
            clock,
        };

        let wire = WireOperation::from(&op);
        assert_eq!(Operation::from(wire), op);
    }
}
