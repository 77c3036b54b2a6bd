//! Block list: one-way suppression of outbound unicast traffic.
//!
//! Blocking and friendship are independent axes; blocking never touches the
//! relationship store, and a blocked peer's broadcasts are still received.
//! Persisted records carry a verification tag derived from a device-local
//! secret: tamper detection for locally stored state, not confidentiality.
//! Each record field gets its own key; the tag hashes the fields with
//! length framing so no label content can shift a field boundary.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::addr::HwAddr;
use crate::clock::Millis;
use crate::storage::KvStore;

const COUNT_KEY: &str = "blk_count";
const SECRET_KEY: &str = "blk_secret";

/// One blocked address with label snapshots taken at block time.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub addr: HwAddr,
    pub owner: String,
    pub device: String,
    pub blocked_at: Millis,
}

/// All blocked addresses, persisted as per-index fields plus per-record
/// verification tags.
#[derive(Debug)]
pub struct BlockList {
    records: Vec<BlockRecord>,
    secret: Vec<u8>,
}

fn key(index: usize, field: &str) -> String {
    format!("blk_{index}_{field}")
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

impl BlockList {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            records: Vec::new(),
            secret,
        }
    }

    /// Fetch the device-local tag secret, generating and persisting 16
    /// random bytes on first use.
    pub fn load_or_create_secret(store: &mut dyn KvStore) -> Vec<u8> {
        if let Some(secret) = store.get_string(SECRET_KEY).and_then(|s| from_hex(&s)) {
            if !secret.is_empty() {
                return secret;
            }
        }
        let mut secret = vec![0u8; 16];
        OsRng.fill_bytes(&mut secret);
        store.set_string(SECRET_KEY, &to_hex(&secret));
        secret
    }

    // Length framing per field: the tag stays bound to exact field
    // boundaries even when a label contains another field's text.
    fn tag(&self, rec: &BlockRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        let addr = rec.addr.to_string();
        let at = rec.blocked_at.value().to_string();
        for field in [addr.as_str(), at.as_str(), &rec.owner, &rec.device] {
            hasher.update((field.len() as u32).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        to_hex(&hasher.finalize())
    }

    /// Load persisted records, silently dropping (with a warning) any whose
    /// recomputed tag disagrees with the stored one. Never aborts the load.
    pub fn load(&mut self, store: &dyn KvStore) {
        self.records.clear();
        let count = store.get_int(COUNT_KEY).unwrap_or(0).max(0) as usize;
        for i in 0..count {
            let Some(rec) = Self::read_record(store, i) else {
                warn!(index = i, "malformed block record; dropping");
                continue;
            };
            let Some(stored_tag) = store.get_string(&key(i, "tag")) else {
                warn!(index = i, "block record has no verification tag; dropping");
                continue;
            };
            if stored_tag != self.tag(&rec) {
                warn!(index = i, "block record failed tag verification; dropping");
                continue;
            }
            self.records.push(rec);
        }
        debug!(count = self.records.len(), "loaded block list");
    }

    fn read_record(store: &dyn KvStore, index: usize) -> Option<BlockRecord> {
        let addr = store.get_string(&key(index, "addr"))?.parse::<HwAddr>().ok()?;
        let blocked_at = store.get_int(&key(index, "at"))?;
        Some(BlockRecord {
            addr,
            owner: store.get_string(&key(index, "owner"))?,
            device: store.get_string(&key(index, "device"))?,
            blocked_at: Millis::new(blocked_at as u32),
        })
    }

    fn save(&self, store: &mut dyn KvStore) {
        let old = store.get_int(COUNT_KEY).unwrap_or(0).max(0) as usize;
        store.set_int(COUNT_KEY, self.records.len() as i64);
        for (i, rec) in self.records.iter().enumerate() {
            store.set_string(&key(i, "addr"), &rec.addr.to_string());
            store.set_int(&key(i, "at"), rec.blocked_at.value() as i64);
            store.set_string(&key(i, "owner"), &rec.owner);
            store.set_string(&key(i, "device"), &rec.device);
            store.set_string(&key(i, "tag"), &self.tag(rec));
        }
        for i in self.records.len()..old {
            for field in ["addr", "at", "owner", "device", "tag"] {
                store.erase(&key(i, field));
            }
        }
    }

    /// Block an address, snapshotting its labels. `false` if already
    /// blocked. Relationship records are deliberately untouched: severing a
    /// friendship alongside a block is the caller's policy.
    pub fn block(
        &mut self,
        addr: HwAddr,
        owner: &str,
        device: &str,
        now: Millis,
        store: &mut dyn KvStore,
    ) -> bool {
        if self.is_blocked(addr) {
            return false;
        }
        info!(addr = %addr, owner, "blocking peer");
        self.records.push(BlockRecord {
            addr,
            owner: owner.to_string(),
            device: device.to_string(),
            blocked_at: now,
        });
        self.save(store);
        true
    }

    /// Remove a blocked address. Returns whether anything was removed.
    pub fn unblock(&mut self, addr: HwAddr, store: &mut dyn KvStore) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.addr != addr);
        if self.records.len() == before {
            return false;
        }
        info!(addr = %addr, "unblocked peer");
        self.save(store);
        true
    }

    pub fn is_blocked(&self, addr: HwAddr) -> bool {
        self.records.iter().any(|r| r.addr == addr)
    }

    pub fn all(&self) -> &[BlockRecord] {
        &self.records
    }

    pub fn by_index(&self, index: usize) -> Option<&BlockRecord> {
        self.records.get(index)
    }
}
