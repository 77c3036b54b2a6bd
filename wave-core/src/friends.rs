//! Relationship store: the friend-request state machine and its
//! persistence.
//!
//! At most one record per address. Records are mutated only through the
//! transition operations here; invalid transitions return `false` with no
//! mutation. Every mutation persists immediately; `last_seen` refreshes are
//! the exception and ride along with the host's periodic snapshot.

use tracing::{debug, info, warn};

use crate::addr::HwAddr;
use crate::clock::Millis;
use crate::frame::Announce;
use crate::storage::KvStore;

const COUNT_KEY: &str = "friend_count";

/// Friend relationship status for one peer address.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum RelationshipStatus {
    /// No record exists (the query default; never stored).
    #[default]
    None,
    /// Local side sent a request and awaits the peer's answer.
    RequestSent,
    /// Peer requested; awaiting the local operator's answer.
    RequestReceived,
    /// Mutual friends.
    Accepted,
}

impl RelationshipStatus {
    fn as_int(self) -> i64 {
        match self {
            RelationshipStatus::None => 0,
            RelationshipStatus::RequestSent => 1,
            RelationshipStatus::RequestReceived => 2,
            RelationshipStatus::Accepted => 3,
        }
    }

    fn from_int(v: i64) -> Option<Self> {
        match v {
            0 => Some(RelationshipStatus::None),
            1 => Some(RelationshipStatus::RequestSent),
            2 => Some(RelationshipStatus::RequestReceived),
            3 => Some(RelationshipStatus::Accepted),
            _ => None,
        }
    }
}

/// One persisted relationship. Labels are snapshots, refreshed on update.
#[derive(Debug, Clone)]
pub struct RelationshipRecord {
    pub addr: HwAddr,
    pub owner: String,
    pub device: String,
    pub status: RelationshipStatus,
    pub last_seen: Millis,
    /// When the last outbound request was sent (retry/backoff bookkeeping).
    pub last_request_sent_at: Millis,
    /// True after accepting a request, until the peer's receipt of our
    /// acknowledging flag is inferred. Drives one extra unicast per cycle.
    pub pending_ack: bool,
}

/// All relationship records, keyed by address, persisted to the key-value
/// store as a count plus per-index fields.
#[derive(Debug, Default)]
pub struct RelationshipStore {
    records: Vec<RelationshipRecord>,
}

fn key(index: usize, field: &str) -> String {
    format!("friend_{index}_{field}")
}

impl RelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all records. A record that fails to parse is dropped with a
    /// warning; the rest load normally.
    pub fn load(&mut self, store: &dyn KvStore) {
        self.records.clear();
        let count = store.get_int(COUNT_KEY).unwrap_or(0).max(0) as usize;
        for i in 0..count {
            let Some(addr) = store
                .get_string(&key(i, "addr"))
                .and_then(|s| s.parse::<HwAddr>().ok())
            else {
                warn!(index = i, "dropping relationship record with bad address");
                continue;
            };
            let Some(status) = store
                .get_int(&key(i, "status"))
                .and_then(RelationshipStatus::from_int)
            else {
                warn!(index = i, addr = %addr, "dropping relationship record with bad status");
                continue;
            };
            self.records.push(RelationshipRecord {
                addr,
                owner: store.get_string(&key(i, "owner")).unwrap_or_default(),
                device: store.get_string(&key(i, "device")).unwrap_or_default(),
                status,
                last_seen: Millis::new(store.get_int(&key(i, "last_seen")).unwrap_or(0) as u32),
                last_request_sent_at: Millis::new(
                    store.get_int(&key(i, "req_at")).unwrap_or(0) as u32
                ),
                pending_ack: store.get_int(&key(i, "pending")).unwrap_or(0) != 0,
            });
        }
        debug!(count = self.records.len(), "loaded relationship records");
    }

    /// Persist all records, erasing any stale trailing indices.
    pub fn save(&self, store: &mut dyn KvStore) {
        let old = store.get_int(COUNT_KEY).unwrap_or(0).max(0) as usize;
        store.set_int(COUNT_KEY, self.records.len() as i64);
        for (i, rec) in self.records.iter().enumerate() {
            store.set_string(&key(i, "addr"), &rec.addr.to_string());
            store.set_string(&key(i, "owner"), &rec.owner);
            store.set_string(&key(i, "device"), &rec.device);
            store.set_int(&key(i, "status"), rec.status.as_int());
            store.set_int(&key(i, "last_seen"), rec.last_seen.value() as i64);
            store.set_int(&key(i, "req_at"), rec.last_request_sent_at.value() as i64);
            store.set_int(&key(i, "pending"), rec.pending_ack as i64);
        }
        for i in self.records.len()..old {
            for field in ["addr", "owner", "device", "status", "last_seen", "req_at", "pending"] {
                store.erase(&key(i, field));
            }
        }
    }

    /// Send (or re-send) a friend request to `peer`. Idempotent: re-sending
    /// refreshes labels and timestamps; an accepted friendship is left
    /// untouched.
    pub fn send_request(
        &mut self,
        peer_addr: HwAddr,
        owner: &str,
        device: &str,
        now: Millis,
        store: &mut dyn KvStore,
    ) -> bool {
        if let Some(rec) = self.records.iter_mut().find(|r| r.addr == peer_addr) {
            if rec.status == RelationshipStatus::Accepted {
                return true;
            }
            rec.status = RelationshipStatus::RequestSent;
            rec.owner = owner.to_string();
            rec.device = device.to_string();
            rec.last_seen = now;
            rec.last_request_sent_at = now;
            self.save(store);
            return true;
        }
        info!(addr = %peer_addr, owner, "sending friend request");
        self.records.push(RelationshipRecord {
            addr: peer_addr,
            owner: owner.to_string(),
            device: device.to_string(),
            status: RelationshipStatus::RequestSent,
            last_seen: now,
            last_request_sent_at: now,
            pending_ack: false,
        });
        self.save(store);
        true
    }

    /// Accept a request. Valid from `RequestReceived` (normal), from
    /// `RequestSent` (mutual-request convergence: both sides requested and
    /// either side's accept converges the pair), or with no record at all
    /// (the peer's acknowledgment can arrive before the local record was
    /// created; synthesize an accepted record directly). Accepting refreshes
    /// the label snapshots and sets `pending_ack` so the next announces
    /// carry the acknowledging flag, except on the no-record path where the
    /// peer already acknowledged us.
    pub fn accept_request(
        &mut self,
        peer_addr: HwAddr,
        owner: &str,
        device: &str,
        now: Millis,
        store: &mut dyn KvStore,
    ) -> bool {
        if let Some(rec) = self.records.iter_mut().find(|r| r.addr == peer_addr) {
            match rec.status {
                RelationshipStatus::RequestReceived | RelationshipStatus::RequestSent => {
                    rec.status = RelationshipStatus::Accepted;
                    rec.pending_ack = true;
                    rec.owner = owner.to_string();
                    rec.device = device.to_string();
                    rec.last_seen = now;
                    info!(addr = %peer_addr, "friend request accepted");
                    self.save(store);
                    true
                }
                _ => false,
            }
        } else {
            info!(addr = %peer_addr, "accepting with no local record; synthesizing friendship");
            self.records.push(RelationshipRecord {
                addr: peer_addr,
                owner: owner.to_string(),
                device: device.to_string(),
                status: RelationshipStatus::Accepted,
                last_seen: now,
                last_request_sent_at: Millis::new(0),
                pending_ack: false,
            });
            self.save(store);
            true
        }
    }

    /// Decline / cancel / unfriend: deletes the record from any of
    /// `RequestReceived`, `RequestSent`, or `Accepted`. `false` if no
    /// record exists.
    pub fn decline_request(&mut self, peer_addr: HwAddr, store: &mut dyn KvStore) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.addr != peer_addr);
        if self.records.len() == before {
            return false;
        }
        info!(addr = %peer_addr, "relationship record removed");
        self.save(store);
        true
    }

    /// Inbound `Requesting` flag. Creates a `RequestReceived` record from
    /// nothing; a mutual simultaneous request (local status `RequestSent`)
    /// is deliberately left as-is for the operator to resolve, never
    /// auto-accepted.
    pub fn process_request_flag(
        &mut self,
        obs: &Announce,
        now: Millis,
        store: &mut dyn KvStore,
    ) {
        match self.status(obs.addr) {
            RelationshipStatus::None => {
                info!(addr = %obs.addr, owner = %obs.owner, "friend request received");
                self.records.push(RelationshipRecord {
                    addr: obs.addr,
                    owner: obs.owner.clone(),
                    device: obs.device.clone(),
                    status: RelationshipStatus::RequestReceived,
                    last_seen: now,
                    last_request_sent_at: Millis::new(0),
                    pending_ack: false,
                });
                self.save(store);
            }
            RelationshipStatus::RequestSent => {
                debug!(addr = %obs.addr, "mutual simultaneous request; awaiting manual accept");
            }
            RelationshipStatus::RequestReceived | RelationshipStatus::Accepted => {}
        }
    }

    /// Inbound `Acknowledging` flag: the peer accepted a request we sent.
    /// Only a `RequestSent` record transitions; anything else is a no-op.
    pub fn process_acknowledgment(
        &mut self,
        peer_addr: HwAddr,
        now: Millis,
        store: &mut dyn KvStore,
    ) -> bool {
        let Some(rec) = self
            .records
            .iter_mut()
            .find(|r| r.addr == peer_addr && r.status == RelationshipStatus::RequestSent)
        else {
            debug!(addr = %peer_addr, "acknowledgment without matching outbound request");
            return false;
        };
        rec.status = RelationshipStatus::Accepted;
        rec.pending_ack = false;
        rec.last_seen = now;
        info!(addr = %peer_addr, "friend request acknowledged by peer");
        self.save(store);
        true
    }

    /// Manual turn-off for the acknowledging announces: there is no receive
    /// confirmation, so the operator (or host policy) decides when enough
    /// cycles have elapsed.
    pub fn clear_pending_ack(&mut self, peer_addr: HwAddr, store: &mut dyn KvStore) -> bool {
        let Some(rec) = self
            .records
            .iter_mut()
            .find(|r| r.addr == peer_addr && r.pending_ack)
        else {
            return false;
        };
        rec.pending_ack = false;
        self.save(store);
        true
    }

    /// Status for an address; `None` when no record exists.
    pub fn status(&self, addr: HwAddr) -> RelationshipStatus {
        self.records
            .iter()
            .find(|r| r.addr == addr)
            .map(|r| r.status)
            .unwrap_or(RelationshipStatus::None)
    }

    pub fn pending_ack(&self, addr: HwAddr) -> bool {
        self.records
            .iter()
            .find(|r| r.addr == addr)
            .is_some_and(|r| r.pending_ack)
    }

    /// Refresh `last_seen` in memory. Persisted with the next save.
    pub fn update_last_seen(&mut self, addr: HwAddr, now: Millis) {
        if let Some(rec) = self.records.iter_mut().find(|r| r.addr == addr) {
            rec.last_seen = now;
        }
    }

    pub fn all(&self) -> &[RelationshipRecord] {
        &self.records
    }

    pub fn get(&self, addr: HwAddr) -> Option<&RelationshipRecord> {
        self.records.iter().find(|r| r.addr == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RelationshipFlag;
    use crate::storage::MemoryStore;

    const PEER: HwAddr = HwAddr::from_bytes([0xAA, 1, 2, 3, 4, 5]);

    fn now() -> Millis {
        Millis::new(1_000)
    }

    fn obs(addr: HwAddr) -> Announce {
        Announce {
            addr,
            owner: "bob".to_string(),
            device: "badge-02".to_string(),
            sent_at: Millis::new(0),
            flag: RelationshipFlag::Requesting,
        }
    }

    fn store_with_request_received() -> (RelationshipStore, MemoryStore) {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        friends.process_request_flag(&obs(PEER), now(), &mut kv);
        (friends, kv)
    }

    #[test]
    fn send_request_creates_record() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        assert!(friends.send_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::RequestSent);
        assert_eq!(friends.get(PEER).unwrap().last_request_sent_at, now());
    }

    #[test]
    fn send_request_idempotent_resend() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.send_request(PEER, "robert", "badge-02", Millis::new(2_000), &mut kv));
        assert_eq!(friends.all().len(), 1);
        let rec = friends.get(PEER).unwrap();
        assert_eq!(rec.owner, "robert");
        assert_eq!(rec.last_request_sent_at, Millis::new(2_000));
    }

    #[test]
    fn send_request_noop_when_accepted() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.send_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
    }

    #[test]
    fn send_request_overwrites_received_request() {
        // Requesting someone who already requested us re-stamps the record
        // as an outbound request; it does not accept and does not duplicate.
        let (mut friends, mut kv) = store_with_request_received();
        assert!(friends.send_request(PEER, "bob", "badge-02", Millis::new(2_000), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::RequestSent);
        assert_eq!(friends.all().len(), 1);
        assert_eq!(friends.get(PEER).unwrap().last_request_sent_at, Millis::new(2_000));
    }

    #[test]
    fn accept_from_request_received_sets_pending_ack() {
        let (mut friends, mut kv) = store_with_request_received();
        assert!(friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
        assert!(friends.pending_ack(PEER));
    }

    #[test]
    fn accept_from_request_sent_converges_mutual_race() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
        assert!(friends.pending_ack(PEER));
    }

    #[test]
    fn accept_with_no_record_synthesizes_friendship() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        assert!(friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
        // Peer already acknowledged us; nothing left to announce.
        assert!(!friends.pending_ack(PEER));
    }

    #[test]
    fn accept_refreshes_label_snapshots() {
        let (mut friends, mut kv) = store_with_request_received();
        assert!(friends.accept_request(PEER, "robert", "badge-09", now(), &mut kv));
        let rec = friends.get(PEER).unwrap();
        assert_eq!(rec.owner, "robert");
        assert_eq!(rec.device, "badge-09");
    }

    #[test]
    fn accept_fails_when_already_accepted() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(!friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
    }

    #[test]
    fn decline_removes_from_any_state() {
        // RequestReceived: reject.
        let (mut friends, mut kv) = store_with_request_received();
        assert!(friends.decline_request(PEER, &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::None);

        // RequestSent: cancel.
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.decline_request(PEER, &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::None);

        // Accepted: unfriend.
        friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.decline_request(PEER, &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::None);
    }

    #[test]
    fn decline_fails_without_record() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        assert!(!friends.decline_request(PEER, &mut kv));
    }

    #[test]
    fn decline_then_rerequest_starts_fresh() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.decline_request(PEER, &mut kv);
        assert!(friends.send_request(PEER, "bob", "badge-02", Millis::new(5_000), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::RequestSent);
        assert_eq!(friends.all().len(), 1);
    }

    #[test]
    fn incoming_request_flag_is_idempotent() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.process_request_flag(&obs(PEER), Millis::new(2_000), &mut kv);
        assert_eq!(friends.all().len(), 1);
        assert_eq!(friends.status(PEER), RelationshipStatus::RequestReceived);
    }

    #[test]
    fn incoming_request_does_not_auto_accept_mutual_race() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.process_request_flag(&obs(PEER), Millis::new(2_000), &mut kv);
        assert_eq!(friends.status(PEER), RelationshipStatus::RequestSent);
    }

    #[test]
    fn incoming_request_noop_when_accepted() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.process_request_flag(&obs(PEER), Millis::new(2_000), &mut kv);
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
    }

    #[test]
    fn acknowledgment_completes_sent_request() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.process_acknowledgment(PEER, Millis::new(2_000), &mut kv));
        assert_eq!(friends.status(PEER), RelationshipStatus::Accepted);
        assert!(!friends.pending_ack(PEER));
    }

    #[test]
    fn acknowledgment_noop_without_sent_request() {
        let mut friends = RelationshipStore::new();
        let mut kv = MemoryStore::new();
        assert!(!friends.process_acknowledgment(PEER, now(), &mut kv));
        // Reprocessing after acceptance is also a no-op.
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.process_acknowledgment(PEER, now(), &mut kv);
        assert!(!friends.process_acknowledgment(PEER, now(), &mut kv));
    }

    #[test]
    fn clear_pending_ack_manual() {
        let (mut friends, mut kv) = store_with_request_received();
        friends.accept_request(PEER, "bob", "badge-02", now(), &mut kv);
        assert!(friends.clear_pending_ack(PEER, &mut kv));
        assert!(!friends.pending_ack(PEER));
        assert!(!friends.clear_pending_ack(PEER, &mut kv));
    }

    #[test]
    fn persistence_roundtrip() {
        let mut kv = MemoryStore::new();
        let mut friends = RelationshipStore::new();
        let other = HwAddr::from_bytes([0xBB; 6]);
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.process_request_flag(&obs(other), now(), &mut kv);
        friends.accept_request(other, "carol", "badge-03", now(), &mut kv);

        let mut reloaded = RelationshipStore::new();
        reloaded.load(&kv);
        assert_eq!(reloaded.all().len(), 2);
        assert_eq!(reloaded.status(PEER), RelationshipStatus::RequestSent);
        assert_eq!(reloaded.status(other), RelationshipStatus::Accepted);
        assert!(reloaded.pending_ack(other));
        let rec = reloaded.get(other).unwrap();
        assert_eq!(rec.owner, "carol");
        assert_eq!(rec.device, "badge-03");
    }

    #[test]
    fn save_erases_stale_indices() {
        let mut kv = MemoryStore::new();
        let mut friends = RelationshipStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.send_request(HwAddr::from_bytes([0xBB; 6]), "carol", "b", now(), &mut kv);
        friends.decline_request(HwAddr::from_bytes([0xBB; 6]), &mut kv);

        let mut reloaded = RelationshipStore::new();
        reloaded.load(&kv);
        assert_eq!(reloaded.all().len(), 1);
        assert!(kv.get_string("friend_1_addr").is_none());
    }

    #[test]
    fn corrupt_record_dropped_on_load() {
        let mut kv = MemoryStore::new();
        let mut friends = RelationshipStore::new();
        friends.send_request(PEER, "bob", "badge-02", now(), &mut kv);
        friends.send_request(HwAddr::from_bytes([0xBB; 6]), "carol", "b", now(), &mut kv);
        kv.set_string("friend_0_addr", "garbage");

        let mut reloaded = RelationshipStore::new();
        reloaded.load(&kv);
        assert_eq!(reloaded.all().len(), 1);
        assert_eq!(
            reloaded.status(HwAddr::from_bytes([0xBB; 6])),
            RelationshipStatus::RequestSent
        );
    }
}
