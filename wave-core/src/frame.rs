//! Announce frame codec: fixed 63-byte layout, explicit pack/unpack.
//!
//! Layout: 6-byte sender address, 20-byte NUL-padded owner label (<=19
//! bytes), 32-byte NUL-padded device label (<=31 bytes), 4-byte LE sender
//! timestamp, 1-byte relationship flag. Anything that is not exactly
//! `FRAME_LEN` bytes is rejected unparsed.

use crate::addr::HwAddr;
use crate::clock::Millis;

const ADDR_LEN: usize = 6;
const OWNER_FIELD_LEN: usize = 20;
const DEVICE_FIELD_LEN: usize = 32;
const SENT_AT_LEN: usize = 4;
const FLAG_LEN: usize = 1;

/// Maximum owner label length in bytes (one byte reserved for the NUL pad).
pub const OWNER_LABEL_MAX: usize = OWNER_FIELD_LEN - 1;
/// Maximum device label length in bytes.
pub const DEVICE_LABEL_MAX: usize = DEVICE_FIELD_LEN - 1;

/// Total frame size. Fixed; receivers discard any other length.
pub const FRAME_LEN: usize =
    ADDR_LEN + OWNER_FIELD_LEN + DEVICE_FIELD_LEN + SENT_AT_LEN + FLAG_LEN;

/// Per-cycle relationship action offered by the sender to the receiver.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum RelationshipFlag {
    #[default]
    None,
    Requesting,
    Acknowledging,
}

impl RelationshipFlag {
    pub fn to_wire(self) -> u8 {
        match self {
            RelationshipFlag::None => 0,
            RelationshipFlag::Requesting => 1,
            RelationshipFlag::Acknowledging => 2,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RelationshipFlag::None),
            1 => Some(RelationshipFlag::Requesting),
            2 => Some(RelationshipFlag::Acknowledging),
            _ => None,
        }
    }
}

/// One decoded announce: the transient observation value the engine feeds
/// into the peer table. The wire timestamp is informational only; receivers
/// overwrite it with their own clock.
#[derive(Debug, Clone)]
pub struct Announce {
    pub addr: HwAddr,
    pub owner: String,
    pub device: String,
    pub sent_at: Millis,
    pub flag: RelationshipFlag,
}

/// Error decoding a received buffer into an announce.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unexpected frame length {got}, expected {FRAME_LEN}")]
    Length { got: usize },
    #[error("unknown relationship flag byte {0}")]
    Flag(u8),
}

/// Pack an announce into its fixed wire layout. Labels longer than their
/// field allow are truncated on a character boundary.
pub fn pack(announce: &Announce) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    let mut at = 0;
    out[at..at + ADDR_LEN].copy_from_slice(announce.addr.as_bytes());
    at += ADDR_LEN;
    put_label(&mut out[at..at + OWNER_FIELD_LEN], &announce.owner, OWNER_LABEL_MAX);
    at += OWNER_FIELD_LEN;
    put_label(&mut out[at..at + DEVICE_FIELD_LEN], &announce.device, DEVICE_LABEL_MAX);
    at += DEVICE_FIELD_LEN;
    out[at..at + SENT_AT_LEN].copy_from_slice(&announce.sent_at.value().to_le_bytes());
    at += SENT_AT_LEN;
    out[at] = announce.flag.to_wire();
    out
}

/// Unpack a received buffer. The length assertion comes first: frames of
/// any other size never reach field decoding.
pub fn unpack(bytes: &[u8]) -> Result<Announce, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::Length { got: bytes.len() });
    }
    let mut at = 0;
    let mut addr = [0u8; ADDR_LEN];
    addr.copy_from_slice(&bytes[at..at + ADDR_LEN]);
    at += ADDR_LEN;
    let owner = get_label(&bytes[at..at + OWNER_FIELD_LEN]);
    at += OWNER_FIELD_LEN;
    let device = get_label(&bytes[at..at + DEVICE_FIELD_LEN]);
    at += DEVICE_FIELD_LEN;
    let mut sent = [0u8; SENT_AT_LEN];
    sent.copy_from_slice(&bytes[at..at + SENT_AT_LEN]);
    at += SENT_AT_LEN;
    let flag = RelationshipFlag::from_wire(bytes[at]).ok_or(FrameError::Flag(bytes[at]))?;
    Ok(Announce {
        addr: HwAddr::from_bytes(addr),
        owner,
        device,
        sent_at: Millis::new(u32::from_le_bytes(sent)),
        flag,
    })
}

fn put_label(field: &mut [u8], label: &str, max: usize) {
    let mut end = label.len().min(max);
    // Back off to a char boundary so truncation never splits a code point.
    while end > 0 && !label.is_char_boundary(end) {
        end -= 1;
    }
    field[..end].copy_from_slice(&label.as_bytes()[..end]);
}

fn get_label(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
