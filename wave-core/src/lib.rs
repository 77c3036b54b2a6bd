//! HandWave protocol reference implementation.
//! Host-driven: no I/O; host passes inbound frames and timer ticks,
//! and performs the sends the engine returns.

pub mod addr;
pub mod blocklist;
pub mod clock;
pub mod engine;
pub mod frame;
pub mod friends;
pub mod peers;
pub mod storage;

pub use addr::HwAddr;
pub use clock::Millis;
pub use engine::{Engine, LocalIdentity, OutboundAction};
pub use frame::{Announce, RelationshipFlag, FRAME_LEN};
pub use friends::RelationshipStatus;
pub use storage::{KvStore, MemoryStore};
