//! Discovery protocol engine: the announce/receive cycle.
//!
//! Host-driven, no I/O: the host calls `announce`/`maintain`/`snapshot` on
//! its timers and `handle_frame` for every inbound frame, and performs the
//! sends the engine returns. All state (peer table, relationship store,
//! block list) is owned here and injected at construction; there are no
//! process-wide singletons.

use tracing::{debug, trace};

use crate::addr::HwAddr;
use crate::blocklist::{BlockList, BlockRecord};
use crate::clock::Millis;
use crate::frame::{self, Announce, RelationshipFlag, FRAME_LEN};
use crate::friends::{RelationshipRecord, RelationshipStatus, RelationshipStore};
use crate::peers::{PeerRecord, PeerTable};
use crate::storage::KvStore;

/// Announce cadence (broadcast plus per-peer unicasts).
pub const ANNOUNCE_INTERVAL_MS: u32 = 5_000;
/// Eviction sweep and relationship last-seen refresh cadence.
pub const MAINTENANCE_INTERVAL_MS: u32 = 10_000;
/// Peer-history snapshot-to-storage cadence.
pub const SNAPSHOT_INTERVAL_MS: u32 = 30_000;
/// Default age beyond which an unseen peer is evicted.
pub const DEFAULT_PEER_MAX_AGE_MS: u32 = 15_000;

/// The local device's announced identity.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub addr: HwAddr,
    pub owner: String,
    pub device: String,
}

/// A send for the host to perform. Fire-and-forget: an individual failure
/// is logged by the host and naturally retried next cycle.
#[derive(Debug)]
pub enum OutboundAction {
    Unicast(HwAddr, Vec<u8>),
    Broadcast(Vec<u8>),
}

/// Main coordinator tying the peer table, relationship store, and block
/// list together.
pub struct Engine<S: KvStore> {
    local: LocalIdentity,
    peers: PeerTable,
    friends: RelationshipStore,
    blocked: BlockList,
    storage: S,
    peer_max_age_ms: u32,
}

impl<S: KvStore> Engine<S> {
    /// Build the engine, loading persisted relationship and block state.
    pub fn new(local: LocalIdentity, mut storage: S) -> Self {
        let mut friends = RelationshipStore::new();
        friends.load(&storage);
        let secret = BlockList::load_or_create_secret(&mut storage);
        let mut blocked = BlockList::new(secret);
        blocked.load(&storage);
        Self {
            local,
            peers: PeerTable::new(),
            friends,
            blocked,
            storage,
            peer_max_age_ms: DEFAULT_PEER_MAX_AGE_MS,
        }
    }

    pub fn set_peer_max_age(&mut self, ms: u32) {
        self.peer_max_age_ms = ms;
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    /// One announce cycle: a unicast for every non-blocked peer that needs
    /// a relationship flag this round, then one broadcast with flag `None`.
    /// Blocked peers get no unicast but are never hidden from the
    /// broadcast; their own broadcasts are still received.
    pub fn announce(&self, now: Millis) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        for peer in self.peers.all() {
            if self.blocked.is_blocked(peer.addr) {
                continue;
            }
            let flag = match self.friends.status(peer.addr) {
                RelationshipStatus::RequestSent => RelationshipFlag::Requesting,
                RelationshipStatus::Accepted if self.friends.pending_ack(peer.addr) => {
                    RelationshipFlag::Acknowledging
                }
                _ => continue,
            };
            actions.push(OutboundAction::Unicast(peer.addr, self.make_frame(flag, now)));
        }
        actions.push(OutboundAction::Broadcast(
            self.make_frame(RelationshipFlag::None, now),
        ));
        actions
    }

    /// Inbound frame entry point. Anything that is not exactly `FRAME_LEN`
    /// bytes is dropped unparsed; a decoded frame routes its relationship
    /// flag and then unconditionally updates the peer table, blocked
    /// senders included.
    pub fn handle_frame(&mut self, src: HwAddr, bytes: &[u8], now: Millis) {
        if bytes.len() != FRAME_LEN {
            trace!(src = %src, len = bytes.len(), "dropping frame of unexpected size");
            return;
        }
        let obs = match frame::unpack(bytes) {
            Ok(obs) => obs,
            Err(err) => {
                debug!(src = %src, %err, "dropping undecodable frame");
                return;
            }
        };
        if obs.addr == self.local.addr {
            return; // our own broadcast echoed back
        }
        if obs.addr != src {
            trace!(src = %src, claimed = %obs.addr, "frame source differs from claimed address");
        }
        match obs.flag {
            RelationshipFlag::Requesting => {
                self.friends.process_request_flag(&obs, now, &mut self.storage);
            }
            RelationshipFlag::Acknowledging => {
                let _ = self.friends.process_acknowledgment(obs.addr, now, &mut self.storage);
            }
            RelationshipFlag::None => {}
        }
        self.peers.observe(&obs, now);
    }

    /// Low-frequency maintenance: evict stale peers, then refresh
    /// relationship last-seen for every peer still present.
    pub fn maintain(&mut self, now: Millis) {
        self.peers.evict_older_than(self.peer_max_age_ms, now);
        for peer in self.peers.all() {
            self.friends.update_last_seen(peer.addr, now);
        }
    }

    /// Snapshot the current peer table to storage and flush relationship
    /// last-seen timestamps.
    pub fn snapshot(&mut self) {
        let old = self.storage.get_int("dev_count").unwrap_or(0).max(0) as usize;
        self.storage.set_int("dev_count", self.peers.len() as i64);
        for (i, peer) in self.peers.all().iter().enumerate() {
            self.storage.set_string(&format!("dev_{i}_addr"), &peer.addr.to_string());
            self.storage.set_string(&format!("dev_{i}_owner"), &peer.owner);
            self.storage.set_string(&format!("dev_{i}_device"), &peer.device);
        }
        for i in self.peers.len()..old {
            for field in ["addr", "owner", "device"] {
                self.storage.erase(&format!("dev_{i}_{field}"));
            }
        }
        self.friends.save(&mut self.storage);
        debug!(peers = self.peers.len(), "snapshot written");
    }

    // ---- operator-facing operations (UI / console collaborators) ----

    /// Send a friend request to a currently visible peer. `false` when the
    /// address is not in the peer table.
    pub fn send_request(&mut self, addr: HwAddr, now: Millis) -> bool {
        let Some(peer) = self.peers.get(addr) else {
            debug!(addr = %addr, "send_request: peer not in table");
            return false;
        };
        let (owner, device) = (peer.owner.clone(), peer.device.clone());
        self.friends.send_request(addr, &owner, &device, now, &mut self.storage)
    }

    /// Accept a pending (or mutually raced) friend request.
    pub fn accept_request(&mut self, addr: HwAddr, now: Millis) -> bool {
        let (owner, device) = self.best_labels(addr);
        self.friends.accept_request(addr, &owner, &device, now, &mut self.storage)
    }

    /// Decline a received request, cancel a sent one, or unfriend.
    pub fn decline_request(&mut self, addr: HwAddr) -> bool {
        self.friends.decline_request(addr, &mut self.storage)
    }

    /// Block an address. Does not touch the relationship record; callers
    /// decide whether blocking should also unfriend.
    pub fn block(&mut self, addr: HwAddr, now: Millis) -> bool {
        let (owner, device) = self.best_labels(addr);
        self.blocked.block(addr, &owner, &device, now, &mut self.storage)
    }

    pub fn unblock(&mut self, addr: HwAddr) -> bool {
        self.blocked.unblock(addr, &mut self.storage)
    }

    /// Stop announcing the acknowledging flag to a peer (no receipt channel
    /// exists; the operator decides when enough cycles have elapsed).
    pub fn clear_pending_ack(&mut self, addr: HwAddr) -> bool {
        self.friends.clear_pending_ack(addr, &mut self.storage)
    }

    /// Drop all observed peers (protocol reset).
    pub fn clear_peers(&mut self) {
        self.peers.clear();
    }

    // ---- read-only views ----

    pub fn peers(&self) -> &[PeerRecord] {
        self.peers.all()
    }

    pub fn friends(&self) -> &[RelationshipRecord] {
        self.friends.all()
    }

    pub fn blocked(&self) -> &[BlockRecord] {
        self.blocked.all()
    }

    pub fn relationship_status(&self, addr: HwAddr) -> RelationshipStatus {
        self.friends.status(addr)
    }

    pub fn is_blocked(&self, addr: HwAddr) -> bool {
        self.blocked.is_blocked(addr)
    }

    /// Tear down, returning the storage handle to the host.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn make_frame(&self, flag: RelationshipFlag, now: Millis) -> Vec<u8> {
        frame::pack(&Announce {
            addr: self.local.addr,
            owner: self.local.owner.clone(),
            device: self.local.device.clone(),
            sent_at: now,
            flag,
        })
        .to_vec()
    }

    // Labels for an address: live peer table first, then the persisted
    // relationship snapshot, then empty (address never seen).
    fn best_labels(&self, addr: HwAddr) -> (String, String) {
        if let Some(peer) = self.peers.get(addr) {
            return (peer.owner.clone(), peer.device.clone());
        }
        if let Some(rec) = self.friends.get(addr) {
            return (rec.owner.clone(), rec.device.clone());
        }
        (String::new(), String::new())
    }
}
