//! Systolic-array unit: weight-stationary (WS) and output-stationary (OS)
//! matmul tiling (§4.3). Grounded in `original_source/src/units/standard/SysArray.cc`.

use crate::config::{AcceleratorConfig, Dataflow};
use crate::core::Cycle;
use crate::error::{EngineError, Result};
use crate::eus::{ExecutionUnit, Phase, SystolicPhase, UnitKind};
use crate::job::{JobArena, JobPayload};

fn dims(arena: &JobArena, eus: &ExecutionUnit) -> Result<(u64, u64, u64)> {
    let job_idx = eus.current_job.expect("dims() called without a loaded job");
    match arena.get(job_idx).payload {
        JobPayload::Matmul { m, k, n } => Ok((m as u64, k as u64, n as u64)),
        _ => Err(EngineError::UnreachableState {
            unit: eus.index,
            phase: "systolic-unit holding a non-matmul job",
            cycle: 0,
        }),
    }
}

fn dataflow(eus: &ExecutionUnit) -> Dataflow {
    match eus.kind {
        UnitKind::Systolic { dataflow } => dataflow,
        UnitKind::Vector => unreachable!("systolic::dataflow called on a vector unit"),
    }
}

/// `init()` (§4.2 contract): first phase, cycle budget, initial memory counts.
pub fn init(eus: &mut ExecutionUnit, arena: &mut JobArena, cfg: &AcceleratorConfig, cycle: Cycle) -> Result<()> {
    let job_idx = eus.current_job.expect("init without a loaded job");
    if arena.get(job_idx).done {
        return Err(EngineError::ReinitDoneJob { job: job_idx });
    }
    let (m, k, n) = dims(arena, eus)?;
    let sz = eus.array_size as u64;
    let width = cfg.data_type_width as u64;
    let batch = cfg.batch_size as u64;
    let fpu = cfg.systolic_fpu_latency as u64;
    let btx = cfg.bytes_per_transaction;

    match dataflow(eus) {
        Dataflow::WeightStationary => {
            eus.col_tiles = div_ru(n, sz) as u32;
            eus.row_tiles = div_ru(k, sz) as u32;
            let sys_array_preload = sz.min(n) * sz.min(k) * width;
            let activation_preload = sz.min(k) * m * width;
            eus.state_transfer(
                Phase::Systolic(SystolicPhase::Prefetch),
                activation_preload + sys_array_preload,
                0,
                sz,
                btx,
            );
        }
        Dataflow::OutputStationary => {
            eus.col_tiles = (n / sz).max(1) as u32;
            eus.row_tiles = (m / sz).max(1) as u32;
            let batched = arena.get(job_idx).batched_weights;
            let weight_factor = if batched { batch } else { 1 };
            let n_read_bytes = sz.min(m) * k * (batch + weight_factor) * width;
            // No floor-to-1 here: the original's `init` divides straight
            // through (unlike `init_row_loop`, which does floor). See
            // DESIGN.md Open Question 3.
            let n_read_beats = (n_read_bytes / btx as u64) as u32;
            eus.phase = Phase::Systolic(SystolicPhase::Read);
            eus.stage_cycles_left = k * fpu.max(batch);
            eus.reads_outstanding = n_read_beats;
            eus.reads_unqueued = n_read_beats;
            eus.writes_outstanding = 0;
            eus.writes_unqueued = 0;
            eus.idle_from_memory = false;
        }
    }

    if eus.row_tiles == 0 || eus.col_tiles == 0 {
        return Err(EngineError::ZeroTileLoop { unit: eus.index, cycle });
    }
    Ok(())
}

/// OS-only: reloads weights (+ activations on a new row) or just the
/// missing activations within the same row, re-arming the read-stage timer.
fn init_row_loop(eus: &mut ExecutionUnit, arena: &JobArena, cfg: &AcceleratorConfig, new_row: bool) {
    let (m, k, _n) = dims(arena, eus).expect("init_row_loop on non-matmul job");
    let sz = eus.array_size as u64;
    let width = cfg.data_type_width as u64;
    let batch = cfg.batch_size as u64;
    let fpu = cfg.systolic_fpu_latency as u64;
    let batched = arena.get(eus.current_job.unwrap()).batched_weights;

    eus.stage_cycles_left = k * fpu;
    let n_read_bytes = if new_row {
        sz.min(m) * k * (batch + if batched { batch } else { 1 }) * width
    } else {
        sz.min(m) * k * if batched { batch } else { 1 } * width
    };
    let n_read_beats = ((n_read_bytes / cfg.bytes_per_transaction as u64).max(1)) as u32;
    eus.reads_outstanding = n_read_beats;
    eus.reads_unqueued = n_read_beats;
}

/// Drives the WS/OS phase transitions once a stage completes. Returns
/// `true` iff the job reached its terminal idle phase this call.
pub fn transition(eus: &mut ExecutionUnit, arena: &mut JobArena, cfg: &AcceleratorConfig, cycle: Cycle) -> Result<bool> {
    let phase = match eus.phase {
        Phase::Systolic(p) => p,
        _ => {
            return Err(EngineError::UnreachableState {
                unit: eus.index,
                phase: "transition() called outside systolic phase",
                cycle,
            })
        }
    };
    let (m, k, n) = dims(arena, eus)?;
    let sz = eus.array_size as u64;
    let width = cfg.data_type_width as u64;
    let batch = cfg.batch_size as u64;
    let fpu = cfg.systolic_fpu_latency as u64;
    let btx = cfg.bytes_per_transaction;
    let job_idx = eus.current_job.unwrap();

    match dataflow(eus) {
        Dataflow::WeightStationary => match phase {
            SystolicPhase::Prefetch => {
                eus.state_transfer(Phase::Systolic(SystolicPhase::Read), 0, 0, m * fpu.max(batch), btx);
                Ok(false)
            }
            SystolicPhase::Read => {
                eus.state_transfer(
                    Phase::Systolic(SystolicPhase::Shift),
                    sz.min(k) * sz.min(n) * width,
                    0,
                    sz * fpu.max(batch),
                    btx,
                );
                Ok(false)
            }
            SystolicPhase::Shift => {
                let (mut read_bytes, mut write_bytes) = (0u64, 0u64);
                if eus.col_i == eus.col_tiles {
                    if eus.row_i == eus.row_tiles {
                        write_bytes = m * n * width * batch;
                    } else {
                        read_bytes = sz.min(k) * m * batch * width;
                    }
                }
                eus.state_transfer(Phase::Systolic(SystolicPhase::Write), read_bytes, write_bytes, 0, btx);
                Ok(false)
            }
            SystolicPhase::Write => {
                let rd_cycles = m * fpu.max(batch);
                if eus.col_i == eus.col_tiles {
                    if eus.row_i == eus.row_tiles {
                        eus.state_transfer(Phase::Idle, 0, 0, 0, btx);
                        return Ok(true);
                    }
                    arena.get_mut(job_idx).address = arena.get(job_idx).base_address;
                    eus.state_transfer(Phase::Systolic(SystolicPhase::Read), 0, 0, rd_cycles, btx);
                    eus.col_i = 1;
                    eus.row_i += 1;
                } else {
                    eus.state_transfer(Phase::Systolic(SystolicPhase::Read), 0, 0, rd_cycles, btx);
                    eus.col_i += 1;
                }
                Ok(false)
            }
        },
        Dataflow::OutputStationary => match phase {
            SystolicPhase::Read => {
                eus.state_transfer(Phase::Systolic(SystolicPhase::Shift), 0, 0, sz * fpu.min(batch), btx);
                Ok(false)
            }
            SystolicPhase::Shift => {
                // The write beat count here is already a beat count, not a
                // byte count (`beats_per_writeback`); set outstanding
                // directly rather than running it back through the
                // bytes/bytes_per_tx conversion a second time. See
                // DESIGN.md Open Question 5.
                let beats_per_writeback = ((sz * sz * width * batch) / btx as u64).max(1) as u32;
                eus.phase = Phase::Systolic(SystolicPhase::Write);
                eus.stage_cycles_left = 0;
                eus.reads_outstanding = 0;
                eus.reads_unqueued = 0;
                eus.writes_outstanding = beats_per_writeback;
                eus.writes_unqueued = beats_per_writeback;
                eus.idle_from_memory = false;
                Ok(false)
            }
            SystolicPhase::Write => {
                if eus.col_i == eus.col_tiles {
                    if eus.row_i == eus.row_tiles {
                        eus.state_transfer(Phase::Idle, 0, 0, 0, btx);
                        return Ok(true);
                    }
                    init_row_loop(eus, arena, cfg, true);
                    arena.get_mut(job_idx).address = arena.get(job_idx).base_address;
                    eus.phase = Phase::Systolic(SystolicPhase::Read);
                    eus.idle_from_memory = false;
                    eus.col_i = 1;
                    eus.row_i += 1;
                } else {
                    init_row_loop(eus, arena, cfg, false);
                    eus.phase = Phase::Systolic(SystolicPhase::Read);
                    eus.idle_from_memory = false;
                    eus.col_i += 1;
                }
                Ok(false)
            }
            SystolicPhase::Prefetch => Err(EngineError::UnreachableState {
                unit: eus.index,
                phase: "output-stationary array reached prefetch",
                cycle,
            }),
        },
    }
}

fn div_ru(q: u64, r: u64) -> u64 {
    (q + r - 1) / r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UnitIndex;
    use crate::job::JobPayload;

    fn make_eus(dataflow: Dataflow, sz: u32) -> ExecutionUnit {
        ExecutionUnit::new(UnitIndex(0), UnitKind::Systolic { dataflow }, sz, 1)
    }

    fn make_job(arena: &mut JobArena, m: u32, k: u32, n: u32) -> crate::core::JobIndex {
        arena.insert(JobPayload::Matmul { m, k, n }, 0, 0, 0, None)
    }

    #[test]
    fn os_single_tile_matches_seed_s2() {
        // S2: sz=16, OS, (M,K,N)=(16,16,16), batch=1, fpu_latency=2.
        let mut cfg = AcceleratorConfig::default();
        cfg.systolic_array_size = 16;
        cfg.batch_size = 1;
        cfg.systolic_fpu_latency = 2;
        let mut eus = make_eus(Dataflow::OutputStationary, 16);
        let mut arena = JobArena::new();
        let job = make_job(&mut arena, 16, 16, 16);
        eus.current_job = Some(job);
        eus.row_i = 1;
        eus.col_i = 1;
        init(&mut eus, &mut arena, &cfg, 0).unwrap();
        assert_eq!(eus.phase, Phase::Systolic(SystolicPhase::Read));
        assert_eq!(eus.stage_cycles_left, 16 * 2);
        assert_eq!(eus.row_tiles, 1);
        assert_eq!(eus.col_tiles, 1);

        eus.stage_cycles_left = 0;
        eus.reads_outstanding = 0;
        transition(&mut eus, &mut arena, &cfg, 0).unwrap();
        assert_eq!(eus.phase, Phase::Systolic(SystolicPhase::Shift));
        assert_eq!(eus.stage_cycles_left, 16 * 1); // sz * min(fpu=2, batch=1)

        eus.stage_cycles_left = 0;
        let done = transition(&mut eus, &mut arena, &cfg, 0).unwrap();
        assert!(!done);
        assert_eq!(eus.phase, Phase::Systolic(SystolicPhase::Write));
        assert!(eus.writes_outstanding > 0);

        eus.stage_cycles_left = 0;
        eus.writes_outstanding = 0;
        let done = transition(&mut eus, &mut arena, &cfg, 0).unwrap();
        assert!(done);
        assert_eq!(eus.phase, Phase::Idle);
    }

    #[test]
    fn zero_tile_loop_is_rejected() {
        let cfg = AcceleratorConfig::default();
        let mut eus = make_eus(Dataflow::WeightStationary, 16);
        let mut arena = JobArena::new();
        let job = make_job(&mut arena, 0, 0, 0);
        eus.current_job = Some(job);
        let err = init(&mut eus, &mut arena, &cfg, 42).unwrap_err();
        assert!(matches!(err, EngineError::ZeroTileLoop { cycle: 42, .. }));
    }

    #[test]
    fn reinit_done_job_is_rejected() {
        let cfg = AcceleratorConfig::default();
        let mut eus = make_eus(Dataflow::OutputStationary, 16);
        let mut arena = JobArena::new();
        let job = make_job(&mut arena, 16, 16, 16);
        arena.get_mut(job).done = true;
        eus.current_job = Some(job);
        let err = init(&mut eus, &mut arena, &cfg, 0).unwrap_err();
        assert!(matches!(err, EngineError::ReinitDoneJob { .. }));
    }

    #[test]
    fn ws_row_advance_resets_job_address() {
        let mut cfg = AcceleratorConfig::default();
        cfg.systolic_array_size = 4;
        let mut eus = make_eus(Dataflow::WeightStationary, 4);
        let mut arena = JobArena::new();
        let job = make_job(&mut arena, 4, 8, 4); // row_tiles = ceil(8/4) = 2
        eus.current_job = Some(job);
        init(&mut eus, &mut arena, &cfg, 0).unwrap();
        assert_eq!(eus.row_tiles, 2);
        assert_eq!(eus.col_tiles, 1);
        arena.get_mut(job).address = 0xABCD;

        // Force through prefetch -> read -> shift -> write -> (row advance).
        eus.stage_cycles_left = 0;
        transition(&mut eus, &mut arena, &cfg, 0).unwrap(); // -> read
        eus.stage_cycles_left = 0;
        transition(&mut eus, &mut arena, &cfg, 0).unwrap(); // -> shift
        eus.stage_cycles_left = 0;
        transition(&mut eus, &mut arena, &cfg, 0).unwrap(); // -> write (col==col_tiles, row != row_tiles)
        eus.stage_cycles_left = 0;
        eus.reads_outstanding = 0;
        transition(&mut eus, &mut arena, &cfg, 0).unwrap(); // row advance -> read
        assert_eq!(eus.row_i, 2);
        assert_eq!(arena.get(job).address, arena.get(job).base_address);
    }
}
