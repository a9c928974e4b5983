//! Door identifier generation.
//!
//! A [`DoorId`] packs the creating process's pid, the wall-clock second of
//! creation, and a monotonic counter into a single `u64` so that ids handed
//! out by distinct processes (or reused pids, across enough wall-clock time)
//! do not collide in practice, without any shared coordination.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const PID_BITS: u32 = 19;
const SECS_BITS: u32 = 31;
const COUNTER_BITS: u32 = 14;

const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;
const SECS_MASK: u64 = (1 << SECS_BITS) - 1;
const PID_MASK: u64 = (1 << PID_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoorId(u64);

impl DoorId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for DoorId {
    fn from(v: u64) -> Self {
        DoorId(v)
    }
}

pub struct IdGenerator {
    counter: Mutex<u64>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }

    /// Mint a new id. The counter wraps within its field; wraparound only
    /// risks a collision if more than 2^14 doors are created by the same
    /// process within the same wall-clock second.
    pub fn next(&self) -> DoorId {
        let pid = std::process::id() as u64 & PID_MASK;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            & SECS_MASK;
        let counter = {
            let mut guard = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            let c = *guard & COUNTER_MASK;
            *guard = guard.wrapping_add(1);
            c
        };
        let bits = (pid << 45) | (secs << 14) | counter;
        DoorId(bits)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_within_a_process() {
        let gen = IdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_carry_the_creating_pid() {
        let gen = IdGenerator::new();
        let id = gen.next();
        let pid = (id.as_u64() >> 45) & PID_MASK;
        assert_eq!(pid, std::process::id() as u64 & PID_MASK);
    }
}
