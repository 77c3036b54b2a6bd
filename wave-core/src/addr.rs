//! Hardware addresses: 6-byte link-layer identity, the key for every table.

use std::fmt;
use std::str::FromStr;

/// 6-byte hardware address. Stable identity key; trusted at face value
/// (the protocol does not defend against spoofed identities).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct HwAddr([u8; 6]);

impl HwAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: HwAddr = HwAddr([0xFF; 6]);

    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        HwAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Error parsing a hardware address from its `AA:BB:CC:DD:EE:FF` form.
#[derive(Debug, thiserror::Error)]
pub enum AddrParseError {
    #[error("expected 6 colon-separated octets")]
    Shape,
    #[error("invalid hex octet: {0}")]
    Octet(String),
}

impl FromStr for HwAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for b in bytes.iter_mut() {
            let part = parts.next().ok_or(AddrParseError::Shape)?;
            if part.len() != 2 {
                return Err(AddrParseError::Octet(part.to_string()));
            }
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| AddrParseError::Octet(part.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError::Shape);
        }
        Ok(HwAddr(bytes))
    }
}
