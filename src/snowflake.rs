//! Process-local Snowflake id generation for [`crate::types::MemoryId`].
//!
//! Layout (64 bits, Twitter-snowflake style): 41 bits of milliseconds since
//! a custom epoch, 10 bits of machine id, 12 bits of per-millisecond
//! sequence. Ids sort by creation time *within a single generator
//! instance*; they are not coordinated across processes, so two processes
//! sharing a store can produce ids that interleave out of strict wall-clock
//! order relative to each other. Monotonicity only holds per-process.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ConfigError, Result};
use crate::types::MemoryId;

const TIMESTAMP_BITS: u32 = 41;
const MACHINE_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const _: () = assert!(TIMESTAMP_BITS + MACHINE_ID_BITS + SEQUENCE_BITS == 63);

const MAX_MACHINE_ID: u16 = (1 << MACHINE_ID_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

/// Custom epoch (2024-01-01T00:00:00Z) so the 41-bit timestamp field
/// doesn't saturate for roughly 69 years from there.
const EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// A validated machine/shard identifier (0..=1023).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineId(u16);

use serde::{Deserialize, Serialize};

impl MachineId {
    /// Validates and wraps a machine id.
    pub fn new(id: u16) -> Result<Self> {
        if id > MAX_MACHINE_ID {
            return Err(ConfigError::invalid(format!(
                "machine id {id} exceeds maximum of {MAX_MACHINE_ID}"
            ))
            .into());
        }
        Ok(Self(id))
    }

    /// Returns the raw machine id value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl Default for MachineId {
    fn default() -> Self {
        Self(0)
    }
}

struct GeneratorState {
    last_millis: i64,
    sequence: u16,
}

/// Generates time-ordered [`MemoryId`]s, unique within this process.
pub struct SnowflakeGenerator {
    machine_id: MachineId,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    /// Creates a generator for the given machine id.
    pub fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// Generates the next id.
    ///
    /// If the system clock appears to have moved backwards (NTP step,
    /// suspend/resume), reuses the last observed millisecond rather than
    /// producing a smaller id, at the cost of sequence exhaustion being
    /// slightly more likely immediately after such an event.
    pub fn next_id(&self) -> MemoryId {
        let mut state = self.state.lock().expect("snowflake generator lock poisoned");
        let mut millis = current_millis();

        if millis < state.last_millis {
            millis = state.last_millis;
        }

        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; spin to the next one.
                while millis <= state.last_millis {
                    millis = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;

        let elapsed = (millis - EPOCH_MILLIS).max(0) as u64;
        let id = (elapsed << (MACHINE_ID_BITS + SEQUENCE_BITS))
            | ((self.machine_id.value() as u64) << SEQUENCE_BITS)
            | state.sequence as u64;

        MemoryId::from_raw(id)
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_strictly_increase_within_process() {
        let gen = SnowflakeGenerator::new(MachineId::default());
        let mut prev = gen.next_id();
        for _ in 0..1000 {
            let next = gen.next_id();
            assert!(next > prev, "ids must be strictly increasing per process");
            prev = next;
        }
    }

    #[test]
    fn machine_id_rejects_out_of_range() {
        assert!(MachineId::new(MAX_MACHINE_ID).is_ok());
        assert!(MachineId::new(MAX_MACHINE_ID + 1).is_err());
    }

    #[test]
    fn different_machine_ids_produce_different_ids_same_instant() {
        let a = SnowflakeGenerator::new(MachineId::new(1).unwrap());
        let b = SnowflakeGenerator::new(MachineId::new(2).unwrap());
        assert_ne!(a.next_id(), b.next_id());
    }
}
