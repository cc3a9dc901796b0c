//! 12-byte monotonically increasing identifier.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed-per-process 5-byte machine/process randomness, generated once at first use.
static PROCESS_RANDOM: LazyLock<[u8; 5]> = LazyLock::new(|| {
    let mut bytes = [0u8; 5];
    rand::rng().fill_bytes(&mut bytes);
    bytes
});

/// Counter seeded randomly at startup, incremented for every `ObjectId::new()` call.
/// Only the low 24 bits are used; wraps within a process run (not expected in practice).
static COUNTER: LazyLock<AtomicU32> = LazyLock::new(|| AtomicU32::new(rand::rng().next_u32() & 0x00FF_FFFF));

/// 4-byte big-endian seconds-since-epoch, 5-byte machine/process randomness, 3-byte
/// big-endian monotonic counter. Equality/order is byte-lexicographic, which also makes
/// `ObjectId::new()` calls within one process strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    #[must_use]
    pub fn new() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let secs_be = u32::try_from(secs & 0xFFFF_FFFF).unwrap_or(u32::MAX).to_be_bytes();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0x00FF_FFFF;
        let counter_be = counter.to_be_bytes(); // [0, b1, b2, b3]

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs_be);
        bytes[4..9].copy_from_slice(&*PROCESS_RANDOM);
        bytes[9..12].copy_from_slice(&counter_be[1..4]);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_within_process() {
        let mut prev = ObjectId::new();
        for _ in 0..1000 {
            let next = ObjectId::new();
            assert!(next > prev, "ObjectId sequence must be strictly increasing");
            prev = next;
        }
    }

    #[test]
    fn process_random_is_stable() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_eq!(a.0[4..9], b.0[4..9]);
    }
}
