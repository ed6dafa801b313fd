//! Execution-unit state: shared state-machine mechanics common to the
//! systolic-array and vector-unit kinds (§4.2).

use crate::config::{AcceleratorConfig, Dataflow};
use crate::core::{JobIndex, UnitIndex};
use crate::error::Result;
use crate::job::JobArena;
use crate::memory::{MemoryArbiter, PendingTx};
use crate::{systolic, vector};

/// Which functional-unit family this execution unit implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitKind {
    Systolic { dataflow: Dataflow },
    Vector,
}

/// Kind-specific phase. `Idle` is the terminal/initial phase for both kinds
/// (§3: "phase == idle ⇔ current_job is none").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Systolic(SystolicPhase),
    Vector(VectorPhase),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystolicPhase {
    Prefetch,
    Read,
    Shift,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorPhase {
    UnbufferedLin,
    UnbufferedPar,
    BufferedLin,
    BufferedPar,
    Write,
}

/// What happened during one `tick` call, for the scheduler's utilisation
/// and job-completion bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// True iff the unit was non-idle this cycle (after any transition).
    pub active: bool,
    /// True iff a job reached its terminal idle phase this cycle.
    pub job_completed: bool,
}

/// One hardware functional array and its current state-machine position.
pub struct ExecutionUnit {
    pub kind: UnitKind,
    pub array_size: u32,
    pub memory_priority: i32,
    pub index: UnitIndex,

    pub current_job: Option<JobIndex>,
    pub phase: Phase,
    pub stage_cycles_left: u64,
    pub reads_outstanding: u32,
    pub writes_outstanding: u32,
    pub reads_unqueued: u32,
    pub writes_unqueued: u32,
    pub idle_from_memory: bool,

    pub row_tiles: u32,
    pub col_tiles: u32,
    pub row_i: u32,
    pub col_i: u32,
}

impl ExecutionUnit {
    pub fn new(index: UnitIndex, kind: UnitKind, array_size: u32, memory_priority: i32) -> Self {
        Self {
            kind,
            array_size,
            memory_priority,
            index,
            current_job: None,
            phase: Phase::Idle,
            stage_cycles_left: 0,
            reads_outstanding: 0,
            writes_outstanding: 0,
            reads_unqueued: 0,
            writes_unqueued: 0,
            idle_from_memory: false,
            row_tiles: 0,
            col_tiles: 0,
            row_i: 0,
            col_i: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Numeric encoding of `phase` for the `STATE` waveform wire (§6). Each
    /// unit kind has its own small state space; the codes only need to be
    /// stable within one unit's trace, not comparable across kinds.
    pub fn state_code(&self) -> u64 {
        match self.phase {
            Phase::Idle => 0,
            Phase::Systolic(SystolicPhase::Prefetch) => 1,
            Phase::Systolic(SystolicPhase::Read) => 2,
            Phase::Systolic(SystolicPhase::Shift) => 3,
            Phase::Systolic(SystolicPhase::Write) => 4,
            Phase::Vector(VectorPhase::UnbufferedLin) => 1,
            Phase::Vector(VectorPhase::UnbufferedPar) => 2,
            Phase::Vector(VectorPhase::BufferedLin) => 3,
            Phase::Vector(VectorPhase::BufferedPar) => 4,
            Phase::Vector(VectorPhase::Write) => 5,
        }
    }

    /// `JOB_IDX` waveform wire value: the loaded job's arena index, or
    /// `u64::MAX` while idle.
    pub fn job_idx_code(&self) -> u64 {
        self.current_job.map(|j| j.0 as u64).unwrap_or(u64::MAX)
    }

    /// Called once when a job is assigned: sets up the first phase, its
    /// cycle budget, and initial outstanding memory counts (§4.2). `cycle`
    /// is the current global cycle, threaded through only for error context.
    pub fn init(
        &mut self,
        job_idx: JobIndex,
        arena: &mut JobArena,
        cfg: &AcceleratorConfig,
        cycle: crate::core::Cycle,
    ) -> Result<()> {
        self.current_job = Some(job_idx);
        self.row_i = 1;
        self.col_i = 1;
        match self.kind {
            UnitKind::Systolic { .. } => systolic::init(self, arena, cfg, cycle),
            UnitKind::Vector => vector::init(self, arena, cfg),
        }
    }

    /// Atomically sets the phase, arms the stage timer, and converts byte
    /// counts to beat counts (§4.2: `state_transfer`).
    pub fn state_transfer(
        &mut self,
        new_phase: Phase,
        read_amt_bytes: u64,
        write_amt_bytes: u64,
        min_cycles: u64,
        bytes_per_tx: u32,
    ) {
        self.phase = new_phase;
        self.stage_cycles_left = min_cycles;
        let reads = beats_for(read_amt_bytes, bytes_per_tx);
        let writes = beats_for(write_amt_bytes, bytes_per_tx);
        self.reads_outstanding = reads;
        self.reads_unqueued = reads;
        self.writes_outstanding = writes;
        self.writes_unqueued = writes;
        self.idle_from_memory = false;
    }

    /// Drain up to `dram_enq_per_cycle` outstanding reads into the pending
    /// list, advancing the owning job's address as beats are emitted.
    pub fn enqueue_reads(&mut self, arena: &mut JobArena, arbiter: &mut MemoryArbiter, cfg: &AcceleratorConfig) {
        if self.reads_unqueued == 0 {
            return;
        }
        let to_enq = cfg.dram_enq_per_cycle.min(self.reads_unqueued);
        self.reads_unqueued -= to_enq;
        let job = arena.get_mut(self.current_job.expect("enqueue_reads without a loaded job"));
        for _ in 0..to_enq {
            arbiter.push(PendingTx {
                address: job.address,
                is_write: false,
                priority: self.memory_priority,
                owner: self.index,
            });
            job.address += cfg.bytes_per_transaction as u64;
        }
    }

    pub fn enqueue_writes(&mut self, arena: &mut JobArena, arbiter: &mut MemoryArbiter, cfg: &AcceleratorConfig) {
        if self.writes_unqueued == 0 {
            return;
        }
        let to_enq = cfg.dram_enq_per_cycle.min(self.writes_unqueued);
        self.writes_unqueued -= to_enq;
        let job = arena.get_mut(self.current_job.expect("enqueue_writes without a loaded job"));
        for _ in 0..to_enq {
            arbiter.push(PendingTx {
                address: job.address,
                is_write: true,
                priority: self.memory_priority,
                owner: self.index,
            });
            job.address += cfg.bytes_per_transaction as u64;
        }
    }

    fn check_idle_from_memory(&mut self) {
        if self.stage_cycles_left == 0
            && !self.idle_from_memory
            && (self.reads_outstanding > 0 || self.writes_outstanding > 0)
        {
            self.idle_from_memory = true;
            tracing::trace!(
                unit = self.index.0,
                reads_outstanding = self.reads_outstanding,
                writes_outstanding = self.writes_outstanding,
                "stage timer expired with memory still outstanding"
            );
        }
    }

    /// Advances the stage timer and reports whether the stage is complete.
    /// Mirrors the original `process_stage`: the idle-from-memory check
    /// only runs on the "not yet complete" path.
    fn process_stage(&mut self) -> bool {
        if self.stage_cycles_left > 0 {
            self.stage_cycles_left -= 1;
        }
        if self.stage_cycles_left == 0 && self.reads_outstanding == 0 && self.writes_outstanding == 0 {
            return true;
        }
        self.check_idle_from_memory();
        false
    }

    /// Marks the current job done and releases any children whose
    /// dependencies are now satisfied (shared "job-done" transition from
    /// §4.3/§4.4).
    fn complete_job(&mut self, arena: &mut JobArena, enqueue_child: &mut dyn FnMut(JobIndex)) {
        let job_idx = self.current_job.take().expect("complete_job without a loaded job");
        let children = {
            let job = arena.get_mut(job_idx);
            job.done = true;
            job.children.clone()
        };
        for child in children {
            let c = arena.get_mut(child);
            c.remaining_deps -= 1;
            if c.remaining_deps == 0 {
                enqueue_child(child);
            }
        }
    }

    /// Called every simulated cycle while a job is loaded (§4.2 "Mechanics
    /// every tick"). Returns whether the unit was active and whether a job
    /// finished, for the scheduler's bookkeeping.
    pub fn tick(
        &mut self,
        arena: &mut JobArena,
        arbiter: &mut MemoryArbiter,
        cfg: &AcceleratorConfig,
        cycle: crate::core::Cycle,
        enqueue_child: &mut dyn FnMut(JobIndex),
    ) -> Result<TickOutcome> {
        if self.current_job.is_none() {
            return Ok(TickOutcome {
                active: false,
                job_completed: false,
            });
        }

        self.enqueue_reads(arena, arbiter, cfg);
        self.enqueue_writes(arena, arbiter, cfg);

        let mut job_completed = false;
        if self.process_stage() {
            let reached_idle = match self.kind {
                UnitKind::Systolic { .. } => systolic::transition(self, arena, cfg, cycle)?,
                UnitKind::Vector => vector::transition(self, arena, cfg, cycle)?,
            };
            if reached_idle {
                self.complete_job(arena, enqueue_child);
                job_completed = true;
            }
        }

        Ok(TickOutcome {
            active: !self.is_idle(),
            job_completed,
        })
    }
}

/// `beats = max(1 if bytes > 0 else 0, bytes / bytes_per_transaction)`.
fn beats_for(bytes: u64, bytes_per_tx: u32) -> u32 {
    if bytes == 0 {
        return 0;
    }
    let computed = bytes / bytes_per_tx as u64;
    computed.max(1) as u32
}
