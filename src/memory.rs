//! Memory arbiter and the DRAM-model trait boundary (§4.5, §6).
//!
//! The real DRAM timing model is an external collaborator (§1 Out of
//! scope): this module defines the trait the engine drives (`DramModel`)
//! and ships one reference implementation, `FixedLatencyDram`, good enough
//! to run the engine end to end and to exercise the seed tests — it is not
//! a JEDEC-accurate model.

use crate::core::{Direction, UnitIndex};
use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// One event a DRAM model emits on a given clock tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub address: u64,
    pub is_write: bool,
}

/// The external DRAM timing model's interface (§6).
///
/// The original couples two function-object callbacks into the DRAM model
/// at construction; §9 DESIGN NOTES warns against smuggling raw references
/// into callback slots for that. Instead `clock_tick` returns the
/// completions for this tick and the caller (the memory arbiter) resolves
/// them against its own address maps — no closures capturing arbiter state.
pub trait DramModel {
    fn will_accept(&self, address: u64, is_write: bool) -> bool;
    fn add_transaction(&mut self, address: u64, is_write: bool);
    fn clock_tick(&mut self) -> Vec<Completion>;
    /// Nanoseconds per DRAM clock tick (`tCK`), for the fractional
    /// DRAM-frequency accumulator in the scheduler (§4.6 step 4).
    fn tck_ns(&self) -> f64;
    /// Bytes per transaction (`bytes_per_transaction` / `request_size_bytes`).
    fn request_size_bytes(&self) -> u32;
}

/// A minimal reference DRAM model: every transaction completes after a
/// fixed latency, and at most `max_in_flight` transactions may be
/// outstanding at once (the throttling signal `will_accept` exposes).
pub struct FixedLatencyDram {
    tck_ns: f64,
    request_size_bytes: u32,
    latency_ticks: u32,
    max_in_flight: usize,
    in_flight: Vec<(u64, bool, u32)>, // (address, is_write, ticks_remaining)
}

impl FixedLatencyDram {
    pub fn new(
        tck_ns: f64,
        request_size_bytes: u32,
        latency_ticks: u32,
        max_in_flight: usize,
    ) -> Self {
        Self {
            tck_ns,
            request_size_bytes,
            latency_ticks,
            max_in_flight,
            in_flight: Vec::new(),
        }
    }
}

impl DramModel for FixedLatencyDram {
    fn will_accept(&self, _address: u64, _is_write: bool) -> bool {
        self.in_flight.len() < self.max_in_flight
    }

    fn add_transaction(&mut self, address: u64, is_write: bool) {
        self.in_flight.push((address, is_write, self.latency_ticks));
    }

    fn clock_tick(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        self.in_flight.retain_mut(|(addr, is_write, left)| {
            if *left == 0 {
                done.push(Completion {
                    address: *addr,
                    is_write: *is_write,
                });
                false
            } else {
                *left -= 1;
                true
            }
        });
        done
    }

    fn tck_ns(&self) -> f64 {
        self.tck_ns
    }

    fn request_size_bytes(&self) -> u32 {
        self.request_size_bytes
    }
}

/// Pending memory transaction, queued by an EUS, consumed by the arbiter.
#[derive(Clone, Copy, Debug)]
pub struct PendingTx {
    pub address: u64,
    pub is_write: bool,
    pub priority: i32,
    pub owner: UnitIndex,
}

/// Holds pending transactions and drains them into the DRAM model, routing
/// completions back to the owning execution unit (§4.5).
#[derive(Default)]
pub struct MemoryArbiter {
    pending: Vec<PendingTx>,
    reads_by_addr: HashMap<u64, UnitIndex>,
    writes_by_addr: HashMap<u64, UnitIndex>,
}

/// Bounded linear probe: each call scans at most this many entries.
const PROBE_LIMIT: usize = 64;

impl MemoryArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: PendingTx) {
        self.pending.push(tx);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Scans at most `PROBE_LIMIT` entries from the front and submits the
    /// first DRAM accepts, removing it by swap-with-last. Returns whether a
    /// transaction was submitted.
    pub fn try_enqueue_tx(&mut self, dram: &mut dyn DramModel) -> bool {
        let probe = self.pending.len().min(PROBE_LIMIT);
        for i in 0..probe {
            let tx = self.pending[i];
            if dram.will_accept(tx.address, tx.is_write) {
                dram.add_transaction(tx.address, tx.is_write);
                if tx.is_write {
                    self.writes_by_addr.insert(tx.address, tx.owner);
                } else {
                    self.reads_by_addr.insert(tx.address, tx.owner);
                }
                let last = self.pending.len() - 1;
                self.pending.swap(i, last);
                self.pending.pop();
                return true;
            }
        }
        false
    }

    /// Resolves one DRAM completion event against the address maps,
    /// returning the owning unit and direction so the caller can decrement
    /// its outstanding counters. Errors if the address has no live owner
    /// (§7: "completion callback for an unknown address").
    pub fn resolve(&mut self, completion: Completion) -> Result<(UnitIndex, Direction)> {
        let (map, direction, label) = if completion.is_write {
            (&mut self.writes_by_addr, Direction::Write, "write")
        } else {
            (&mut self.reads_by_addr, Direction::Read, "read")
        };
        match map.remove(&completion.address) {
            Some(owner) => Ok((owner, direction)),
            None => Err(EngineError::UnknownCompletionAddress {
                address: completion.address,
                direction: label,
            }),
        }
    }

    /// No stale entries: every live key has exactly one owner (§8 invariant 4).
    #[cfg(test)]
    fn live_entry_count(&self) -> usize {
        self.reads_by_addr.len() + self.writes_by_addr.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(addr: u64, is_write: bool, owner: usize) -> PendingTx {
        PendingTx {
            address: addr,
            is_write,
            priority: 0,
            owner: UnitIndex(owner),
        }
    }

    #[test]
    fn fixed_latency_dram_completes_after_latency() {
        let mut dram = FixedLatencyDram::new(1.0, 32, 3, 8);
        dram.add_transaction(0x100, false);
        assert!(dram.clock_tick().is_empty());
        assert!(dram.clock_tick().is_empty());
        assert!(dram.clock_tick().is_empty());
        let done = dram.clock_tick();
        assert_eq!(done, vec![Completion { address: 0x100, is_write: false }]);
    }

    #[test]
    fn will_accept_throttles_at_capacity() {
        let mut dram = FixedLatencyDram::new(1.0, 32, 10, 1);
        assert!(dram.will_accept(0, false));
        dram.add_transaction(0, false);
        assert!(!dram.will_accept(0x40, false));
    }

    #[test]
    fn try_enqueue_submits_first_accepted_and_swap_removes() {
        let mut arbiter = MemoryArbiter::new();
        arbiter.push(tx(0, false, 0));
        arbiter.push(tx(0x40, false, 1));
        let mut dram = FixedLatencyDram::new(1.0, 32, 5, 8);
        assert!(arbiter.try_enqueue_tx(&mut dram));
        assert_eq!(arbiter.pending_len(), 1);
        assert_eq!(arbiter.live_entry_count(), 1);
    }

    #[test]
    fn try_enqueue_returns_false_when_dram_saturated() {
        let mut arbiter = MemoryArbiter::new();
        arbiter.push(tx(0, false, 0));
        let mut dram = FixedLatencyDram::new(1.0, 32, 5, 0);
        assert!(!arbiter.try_enqueue_tx(&mut dram));
        assert_eq!(arbiter.pending_len(), 1);
    }

    #[test]
    fn resolve_unknown_address_is_an_error() {
        let mut arbiter = MemoryArbiter::new();
        let err = arbiter
            .resolve(Completion { address: 0xdead, is_write: false })
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownCompletionAddress { .. }));
    }

    #[test]
    fn resolve_erases_entry_after_lookup() {
        let mut arbiter = MemoryArbiter::new();
        arbiter.push(tx(0x200, true, 3));
        let mut dram = FixedLatencyDram::new(1.0, 32, 5, 8);
        arbiter.try_enqueue_tx(&mut dram);
        let (owner, dir) = arbiter
            .resolve(Completion { address: 0x200, is_write: true })
            .unwrap();
        assert_eq!(owner, UnitIndex(3));
        assert_eq!(dir, Direction::Write);
        assert_eq!(arbiter.live_entry_count(), 0);
        assert!(arbiter
            .resolve(Completion { address: 0x200, is_write: true })
            .is_err());
    }
}
