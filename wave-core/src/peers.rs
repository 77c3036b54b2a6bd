//! Peer table: recently observed devices, upserted on every announce,
//! evicted when unseen for too long.

use tracing::{debug, trace};

use crate::addr::HwAddr;
use crate::clock::Millis;
use crate::frame::{Announce, RelationshipFlag};

/// One observed device. Created on first observation, updated in place on
/// every subsequent one so the change-tracking fields survive.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub addr: HwAddr,
    pub owner: String,
    pub device: String,
    /// Local clock at the most recent frame from this address.
    pub last_seen: Millis,
    /// Flag carried on the most recent frame (sender's offered action).
    pub flag: RelationshipFlag,
    /// Previous owner label, snapshotted when a re-observed address reports
    /// a different owner. UI warning only; no protocol effect.
    pub previous_owner: String,
    pub owner_changed: bool,
}

/// Insertion-ordered peer collection: stable iteration for the UI.
#[derive(Debug, Default)]
pub struct PeerTable {
    records: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an observation. Existing entries are updated in place; an
    /// owner-label change is flagged with the old label preserved.
    pub fn observe(&mut self, obs: &Announce, now: Millis) {
        if let Some(rec) = self.records.iter_mut().find(|r| r.addr == obs.addr) {
            if rec.owner != obs.owner {
                rec.previous_owner = std::mem::take(&mut rec.owner);
                rec.owner_changed = true;
                debug!(addr = %obs.addr, from = %rec.previous_owner, to = %obs.owner,
                    "peer owner label changed");
            }
            rec.owner = obs.owner.clone();
            rec.device = obs.device.clone();
            rec.flag = obs.flag;
            rec.last_seen = now;
            return;
        }
        debug!(addr = %obs.addr, owner = %obs.owner, device = %obs.device, "new peer discovered");
        self.records.push(PeerRecord {
            addr: obs.addr,
            owner: obs.owner.clone(),
            device: obs.device.clone(),
            last_seen: now,
            flag: obs.flag,
            previous_owner: String::new(),
            owner_changed: false,
        });
    }

    pub fn get(&self, addr: HwAddr) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.addr == addr)
    }

    /// All peers in insertion order.
    pub fn all(&self) -> &[PeerRecord] {
        &self.records
    }

    /// Remove every entry whose age exceeds `max_age_ms`. Wraparound-safe:
    /// ages are computed with wrapping subtraction on the clock.
    pub fn evict_older_than(&mut self, max_age_ms: u32, now: Millis) {
        self.records.retain(|r| {
            let age = now.elapsed_since(r.last_seen);
            if age > max_age_ms {
                trace!(addr = %r.addr, age_ms = age, "evicting stale peer");
                false
            } else {
                true
            }
        });
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
