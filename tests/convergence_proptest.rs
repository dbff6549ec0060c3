// model = "claude-opus-4-5"
// created = "2026-08-01"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Property-based convergence tests: random edit scripts, adversarial
//! delivery orders, duplicate injection.

use proptest::prelude::*;
use tandem::replica::{Event, Replica};
use tandem::site::SiteId;

// =============================================================================
// Test helpers
// =============================================================================

/// A random editing operation, positioned by percentage of the current
/// document length.
#[derive(Clone, Debug)]
enum EditOp {
    Insert { pos_pct: f64, value: char },
    Delete { pos_pct: f64 },
}

fn arbitrary_edit_op() -> impl Strategy<Value = EditOp> {
    return prop_oneof![
        3 => (0.0..=1.0f64, 0u8..26)
            .prop_map(|(pos_pct, i)| EditOp::Insert {
                pos_pct,
                value: (b'a' + i) as char,
            }),
        1 => (0.0..=1.0f64,).prop_map(|(pos_pct,)| EditOp::Delete { pos_pct }),
    ];
}

/// Apply an edit locally, returning the encoded envelopes to broadcast.
fn apply_edit(replica: &mut Replica, op: &EditOp) -> Vec<Vec<u8>> {
    let len = replica.visible_len();
    let events = match op {
        EditOp::Insert { pos_pct, value } => {
            let pos = ((*pos_pct * len as f64) as usize).min(len) as u32;
            replica.local_insert(pos, *value)
        }
        EditOp::Delete { pos_pct } => {
            if len == 0 {
                return Vec::new();
            }
            let pos = ((*pos_pct * len as f64) as usize).min(len - 1) as u32;
            replica.local_delete(pos)
        }
    };
    return events
        .into_iter()
        .filter_map(|event| match event {
            Event::Broadcast(envelope) => Some(envelope.encode()),
            _ => None,
        })
        .collect();
}

fn deliver(replica: &mut Replica, packets: &[Vec<u8>]) {
    for packet in packets {
        replica.apply_inbound(packet);
    }
}

fn assert_same_document(a: &Replica, b: &Replica) {
    assert_eq!(a.text(), b.text());
    assert_eq!(a.document().records(), b.document().records());
}

/// Reorder packets by a key stream: a cheap deterministic shuffle.
fn shuffled(packets: &[Vec<u8>], keys: &[u32]) -> Vec<Vec<u8>> {
    if keys.is_empty() {
        return packets.to_vec();
    }
    let mut indexed: Vec<(u32, usize)> = (0..packets.len())
        .map(|i| (keys[i % keys.len()], i))
        .collect();
    indexed.sort();
    return indexed
        .into_iter()
        .map(|(_, i)| packets[i].clone())
        .collect();
}

const SITES: [&str; 3] = ["s-aa", "s-bb", "s-cc"];

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Replicas editing with no exchange at all (every operation concurrent
    /// with every other) converge under forward, reversed, and shuffled
    /// delivery.
    #[test]
    fn isolated_edits_converge_under_any_delivery_order(
        script in prop::collection::vec((0usize..3, arbitrary_edit_op()), 1..40),
        keys in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let mut sources: Vec<Replica> = SITES
            .iter()
            .map(|site| Replica::new(SiteId::new(*site)))
            .collect();

        let mut packets = Vec::new();
        for (which, op) in &script {
            packets.extend(apply_edit(&mut sources[*which], op));
        }

        let mut forward = Replica::new(SiteId::new("s-f"));
        let mut backward = Replica::new(SiteId::new("s-g"));
        let mut scrambled = Replica::new(SiteId::new("s-h"));

        deliver(&mut forward, &packets);
        let reversed: Vec<Vec<u8>> = packets.iter().rev().cloned().collect();
        deliver(&mut backward, &reversed);
        deliver(&mut scrambled, &shuffled(&packets, &keys));

        assert_same_document(&forward, &backward);
        assert_same_document(&forward, &scrambled);
    }

    /// Duplicated delivery changes nothing: applying every packet twice
    /// (and the whole stream twice over) equals applying it once.
    #[test]
    fn duplicate_delivery_is_idempotent(
        script in prop::collection::vec((0usize..3, arbitrary_edit_op()), 1..30),
    ) {
        let mut sources: Vec<Replica> = SITES
            .iter()
            .map(|site| Replica::new(SiteId::new(*site)))
            .collect();

        let mut packets = Vec::new();
        for (which, op) in &script {
            packets.extend(apply_edit(&mut sources[*which], op));
        }

        let mut once = Replica::new(SiteId::new("s-f"));
        let mut twice = Replica::new(SiteId::new("s-g"));

        deliver(&mut once, &packets);
        for packet in &packets {
            twice.apply_inbound(packet);
            twice.apply_inbound(packet);
        }
        deliver(&mut twice, &packets);

        assert_same_document(&once, &twice);
    }

    /// With full exchange after every step (a causally deep history), all
    /// sources agree, and a fresh replica replaying a shuffled stream
    /// reaches the same document.
    #[test]
    fn synced_edits_replay_onto_an_empty_replica(
        script in prop::collection::vec((0usize..3, arbitrary_edit_op()), 1..30),
        keys in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let mut sources: Vec<Replica> = SITES
            .iter()
            .map(|site| Replica::new(SiteId::new(*site)))
            .collect();

        let mut packets = Vec::new();
        for (which, op) in &script {
            let fresh = apply_edit(&mut sources[*which], op);
            for (other, replica) in sources.iter_mut().enumerate() {
                if other != *which {
                    deliver(replica, &fresh);
                }
            }
            packets.extend(fresh);
        }

        assert_same_document(&sources[0], &sources[1]);
        assert_same_document(&sources[1], &sources[2]);

        let mut observer = Replica::new(SiteId::new("s-f"));
        deliver(&mut observer, &shuffled(&packets, &keys));
        assert_same_document(&sources[0], &observer);
    }

    /// No two records ever compare equal under the document total order.
    #[test]
    fn total_order_is_unique(
        script in prop::collection::vec((0usize..3, arbitrary_edit_op()), 1..30),
    ) {
        let mut sources: Vec<Replica> = SITES
            .iter()
            .map(|site| Replica::new(SiteId::new(*site)))
            .collect();

        let mut packets = Vec::new();
        for (which, op) in &script {
            packets.extend(apply_edit(&mut sources[*which], op));
        }

        let mut observer = Replica::new(SiteId::new("s-f"));
        deliver(&mut observer, &packets);

        let records = observer.document().records();
        for window in records.windows(2) {
            prop_assert_eq!(
                window[0].total_cmp(&window[1]),
                std::cmp::Ordering::Less
            );
        }
    }
}
