//! Vector unit: reduce/broadcast phase pipeline (§4.4). Grounded in
//! `original_source/src/units/standard/VectorUnit.cc`.

use crate::config::AcceleratorConfig;
use crate::core::Cycle;
use crate::error::{EngineError, Result};
use crate::eus::{ExecutionUnit, Phase, VectorPhase};
use crate::job::{JobArena, JobPayload, VectorPhaseKind};

struct VecDims {
    linearized_dim: u64,
    parallel_dim: u64,
}

fn dims(arena: &JobArena, eus: &ExecutionUnit) -> Result<VecDims> {
    let job_idx = eus.current_job.expect("dims() called without a loaded job");
    match &arena.get(job_idx).payload {
        JobPayload::Vector {
            linearized_dim,
            parallel_dim,
            ..
        } => Ok(VecDims {
            linearized_dim: *linearized_dim as u64,
            parallel_dim: *parallel_dim as u64,
        }),
        _ => Err(EngineError::UnreachableState {
            unit: eus.index,
            phase: "vector unit holding a non-vector job",
            cycle: 0,
        }),
    }
}

fn pop_phase(arena: &mut JobArena, eus: &ExecutionUnit) -> Option<(VectorPhaseKind, u32)> {
    let job_idx = eus.current_job.unwrap();
    match &mut arena.get_mut(job_idx).payload {
        JobPayload::Vector { phases, .. } => phases.pop_front(),
        _ => unreachable!("pop_phase on a non-vector job"),
    }
}

fn front_phase(arena: &JobArena, eus: &ExecutionUnit) -> Option<(VectorPhaseKind, u32)> {
    let job_idx = eus.current_job.unwrap();
    match &arena.get(job_idx).payload {
        JobPayload::Vector { phases, .. } => phases.front().copied(),
        _ => unreachable!("front_phase on a non-vector job"),
    }
}

pub fn init(eus: &mut ExecutionUnit, arena: &mut JobArena, cfg: &AcceleratorConfig) -> Result<()> {
    let job_idx = eus.current_job.expect("init without a loaded job");
    if arena.get(job_idx).done {
        return Err(EngineError::ReinitDoneJob { job: job_idx });
    }
    let VecDims {
        linearized_dim: lin,
        parallel_dim: par,
    } = dims(arena, eus)?;
    let (is_prebuffered, front) = match &arena.get(job_idx).payload {
        JobPayload::Vector {
            is_prebuffered,
            phases,
            ..
        } => (*is_prebuffered, *phases.front().expect("vector job delivered with no phases")),
        _ => unreachable!(),
    };
    let sz = eus.array_size as u64;
    let width = cfg.data_type_width as u64;
    let batch = cfg.batch_size as u64;
    let btx = cfg.bytes_per_transaction;
    let (kind, latency) = front;
    let latency = latency as u64;

    let first_phase_read = if is_prebuffered {
        0
    } else {
        lin * par * batch * width
    };
    let first_state = match (is_prebuffered, kind) {
        (true, VectorPhaseKind::Broadcast) => VectorPhase::BufferedPar,
        (true, VectorPhaseKind::Reduce) => VectorPhase::BufferedLin,
        (false, VectorPhaseKind::Broadcast) => VectorPhase::UnbufferedPar,
        (false, VectorPhaseKind::Reduce) => VectorPhase::UnbufferedLin,
    };
    let first_phase_cycles = match kind {
        VectorPhaseKind::Broadcast => div_ru(lin * par * latency, sz),
        VectorPhaseKind::Reduce => lin * batch.max(latency) * div_ru(par, sz),
    };

    eus.state_transfer(Phase::Vector(first_state), first_phase_read, 0, first_phase_cycles, btx);
    pop_phase(arena, eus);
    eus.row_tiles = 1;
    eus.col_tiles = 1;
    eus.row_i = 1;
    eus.col_i = 1;
    Ok(())
}

/// Drives the vector phase-queue pipeline once a stage completes. Returns
/// `true` iff the job reached its terminal idle phase this call.
pub fn transition(eus: &mut ExecutionUnit, arena: &mut JobArena, cfg: &AcceleratorConfig, cycle: Cycle) -> Result<bool> {
    let phase = match eus.phase {
        Phase::Vector(p) => p,
        _ => {
            return Err(EngineError::UnreachableState {
                unit: eus.index,
                phase: "transition() called outside vector phase",
                cycle,
            })
        }
    };
    let VecDims {
        linearized_dim: lin,
        parallel_dim: par,
    } = dims(arena, eus)?;
    let sz = eus.array_size as u64;
    let width = cfg.data_type_width as u64;
    let batch = cfg.batch_size as u64;
    let btx = cfg.bytes_per_transaction;

    match phase {
        VectorPhase::UnbufferedLin | VectorPhase::UnbufferedPar | VectorPhase::BufferedLin | VectorPhase::BufferedPar => {
            match front_phase(arena, eus) {
                None => {
                    eus.state_transfer(Phase::Vector(VectorPhase::Write), 0, lin * par * width * batch, 0, btx);
                }
                Some((VectorPhaseKind::Reduce, latency)) => {
                    eus.state_transfer(
                        Phase::Vector(VectorPhase::BufferedLin),
                        0,
                        0,
                        latency as u64 * lin * div_ru(par, sz),
                        btx,
                    );
                    pop_phase(arena, eus);
                }
                Some((VectorPhaseKind::Broadcast, latency)) => {
                    eus.state_transfer(
                        Phase::Vector(VectorPhase::BufferedPar),
                        0,
                        0,
                        div_ru(lin * par * latency as u64, sz),
                        btx,
                    );
                    pop_phase(arena, eus);
                }
            }
            Ok(false)
        }
        VectorPhase::Write => {
            eus.state_transfer(Phase::Idle, 0, 0, 0, btx);
            Ok(true)
        }
    }
}

fn div_ru(q: u64, r: u64) -> u64 {
    (q + r - 1) / r
}
