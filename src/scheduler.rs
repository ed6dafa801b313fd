//! Scheduler / tick loop: owns the DAG frontier, the phase timeline, the
//! cycle counter; ticks DRAM, ticks every EUS, drains the memory arbiter
//! (§4.6, §5).

use crate::config::AcceleratorConfig;
use crate::core::{Cycle, Direction, JobIndex, UnitKindTag};
use crate::error::{EngineError, Result};
use crate::eus::{ExecutionUnit, UnitKind};
use crate::job::{JobArena, JobPayload};
use crate::memory::{DramModel, MemoryArbiter};
use crate::stats::{self, PhaseAccumulator, StatsSink, TraceFrame, VcdLog};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// `TimeBasedEnqueue` (§6): strictly-increasing cycle thresholds and the
/// root jobs released at each one. The first threshold must be `0`.
pub struct PhaseTimeline {
    thresholds: Vec<Cycle>,
    roots: Vec<Vec<JobIndex>>,
}

impl PhaseTimeline {
    pub fn new(entries: Vec<(Cycle, Vec<JobIndex>)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(EngineError::EmptyTimeline);
        }
        if entries[0].0 != 0 {
            return Err(EngineError::NonZeroFirstPhase { found: entries[0].0 });
        }
        for w in entries.windows(2) {
            debug_assert!(
                w[1].0 > w[0].0,
                "timeline thresholds must strictly increase"
            );
        }
        let (thresholds, roots) = entries.into_iter().unzip();
        Ok(Self { thresholds, roots })
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

fn job_kind(payload: &JobPayload) -> UnitKindTag {
    match payload {
        JobPayload::Matmul { .. } => UnitKindTag::Systolic,
        JobPayload::Vector { .. } => UnitKindTag::Vector,
    }
}

fn unit_kind_tag(unit: &ExecutionUnit) -> UnitKindTag {
    match unit.kind {
        UnitKind::Systolic { .. } => UnitKindTag::Systolic,
        UnitKind::Vector => UnitKindTag::Vector,
    }
}

/// Drives one simulation run to quiescence (§4.6: "terminates when
/// `total_idle == |EUS|` and the frontier is empty").
pub struct Scheduler {
    cfg: AcceleratorConfig,
    arena: JobArena,
    units: Vec<ExecutionUnit>,
    frontier: VecDeque<JobIndex>,
    arbiter: MemoryArbiter,
    dram: Box<dyn DramModel>,
    timeline: PhaseTimeline,
    phase_index: usize,
    global_cycles: Cycle,
    dram_accum: f64,
    stats: StatsSink,
    phase_acc: PhaseAccumulator,
    vcd: Option<VcdLog>,
    prev_wires: Vec<(u64, bool, u64)>,
    prev_phase_wire: u64,

    total_jobs: u64,
    jobs_finished: u64,
    total_frontier: u64,
    total_idle: u64,
    idle_by_type: HashMap<UnitKindTag, u64>,
}

impl Scheduler {
    pub fn new(
        cfg: AcceleratorConfig,
        arena: JobArena,
        units: Vec<ExecutionUnit>,
        dram: Box<dyn DramModel>,
        timeline: PhaseTimeline,
    ) -> Self {
        let kinds: Vec<UnitKindTag> = units.iter().map(unit_kind_tag).collect();
        let total_jobs = arena.len() as u64;
        let num_units = units.len();
        let mut sched = Self {
            cfg,
            arena,
            units,
            frontier: VecDeque::new(),
            arbiter: MemoryArbiter::new(),
            dram,
            timeline,
            phase_index: 0,
            global_cycles: 0,
            dram_accum: 0.0,
            stats: StatsSink::new(),
            phase_acc: PhaseAccumulator::new(kinds),
            vcd: None,
            prev_wires: vec![(0, false, u64::MAX); num_units],
            prev_phase_wire: 0,
            total_jobs,
            jobs_finished: 0,
            total_frontier: 0,
            total_idle: 0,
            idle_by_type: HashMap::new(),
        };
        sched.enqueue_phase_roots(0);
        sched
    }

    pub fn global_cycles(&self) -> Cycle {
        self.global_cycles
    }

    pub fn jobs_finished(&self) -> u64 {
        self.jobs_finished
    }

    pub fn total_frontier(&self) -> u64 {
        self.total_frontier
    }

    pub fn total_jobs(&self) -> u64 {
        self.total_jobs
    }

    pub fn stats(&self) -> &StatsSink {
        &self.stats
    }

    /// Turns on the §6 value-change-dump hook: every cycle where a `STATE`,
    /// `IDLE_FROM_MEMORY`, `JOB_IDX`, or `phase` wire changes gets recorded.
    pub fn enable_trace(&mut self) {
        self.vcd = Some(VcdLog::new());
    }

    pub fn vcd_log(&self) -> Option<&VcdLog> {
        self.vcd.as_ref()
    }

    fn enqueue_phase_roots(&mut self, idx: usize) {
        let roots = self.timeline.roots[idx].clone();
        for job_idx in roots {
            self.frontier.push_back(job_idx);
            self.total_frontier += 1;
        }
    }

    /// Step 1: while `global_cycles >= next_phase`, flush stats, advance
    /// `phase_index`, enqueue the next timeline entry's roots.
    fn phase_rollover(&mut self) {
        while self.phase_index + 1 < self.timeline.thresholds.len()
            && self.global_cycles >= self.timeline.thresholds[self.phase_index + 1]
        {
            let report = self.phase_acc.flush();
            debug!(
                phase = self.phase_index,
                cycles = report.cycles,
                "phase closed"
            );
            self.stats.record(report);
            self.phase_index += 1;
            self.enqueue_phase_roots(self.phase_index);
            debug!(phase = self.phase_index, "phase rolled over");
            if self.vcd.is_some() {
                let phase_val = self.phase_index as u64;
                if phase_val != self.prev_phase_wire {
                    self.prev_phase_wire = phase_val;
                    let mut frame = TraceFrame::new();
                    frame.push(stats::phase_wire(self.units.len()), phase_val);
                    let cycle = self.global_cycles;
                    self.vcd.as_mut().unwrap().record(cycle, frame);
                }
            }
        }
    }

    /// Step 2: repeatedly scan EUSs, assigning ready jobs of matching kind
    /// until a full pass makes no progress. Core-affinity jobs are only
    /// consumed by the matching EUS index; unaffiliated jobs go to the
    /// first idle EUS of matching kind (§4.6).
    fn dispatch(&mut self) -> Result<()> {
        loop {
            let mut progressed = false;
            for i in 0..self.units.len() {
                if self.units[i].is_idle() {
                    if let Some(job_idx) = self.pop_matching_job(i) {
                        let cycle = self.global_cycles;
                        trace!(unit = i, job = job_idx.0, cycle, "dispatching job to idle unit");
                        self.units[i].init(job_idx, &mut self.arena, &self.cfg, cycle)?;
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    /// Scans the frontier for a dispatch-eligible job (§3: `remaining_deps
    /// == 0 ∧ ¬done`, [`Job::is_eligible`]) of the EUS's kind, preferring an
    /// affinity match over an unaffiliated one.
    fn pop_matching_job(&mut self, unit_index: usize) -> Option<JobIndex> {
        let needed = unit_kind_tag(&self.units[unit_index]);
        let affinity_pos = self.frontier.iter().position(|&j| {
            let job = self.arena.get(j);
            job.is_eligible() && job.core_affinity == Some(unit_index) && job_kind(&job.payload) == needed
        });
        let pos = affinity_pos.or_else(|| {
            self.frontier.iter().position(|&j| {
                let job = self.arena.get(j);
                job.is_eligible() && job.core_affinity.is_none() && job_kind(&job.payload) == needed
            })
        })?;
        self.frontier.remove(pos)
    }

    /// Step 4: fractional DRAM-frequency accumulator (§4.6, §9 "Numeric
    /// precision"); `Δ += tCK / freq_systolic`, draining one `clock_tick`
    /// per whole unit of `Δ`.
    fn dram_clock(&mut self) -> Result<()> {
        self.dram_accum += self.dram.tck_ns() / self.cfg.frequency_ghz;
        while self.dram_accum >= 1.0 {
            let completions = self.dram.clock_tick();
            for completion in completions {
                let (owner, direction) = self.arbiter.resolve(completion)?;
                let unit = &mut self.units[owner.0];
                match direction {
                    Direction::Read => {
                        unit.reads_outstanding = unit.reads_outstanding.saturating_sub(1)
                    }
                    Direction::Write => {
                        unit.writes_outstanding = unit.writes_outstanding.saturating_sub(1)
                    }
                }
            }
            self.dram_accum -= 1.0;
        }
        Ok(())
    }

    /// Step 5: tick every EUS in ascending index order.
    fn tick_units(&mut self) -> Result<Vec<bool>> {
        let cycle = self.global_cycles;
        let Scheduler {
            units,
            arena,
            arbiter,
            cfg,
            frontier,
            total_frontier,
            jobs_finished,
            total_idle,
            idle_by_type,
            ..
        } = self;
        let mut active = vec![false; units.len()];
        for (i, unit) in units.iter_mut().enumerate() {
            let outcome = unit.tick(arena, arbiter, cfg, cycle, &mut |child| {
                frontier.push_back(child);
                *total_frontier += 1;
            })?;
            active[i] = outcome.active;
            if outcome.job_completed {
                *jobs_finished += 1;
            }
            if !outcome.active {
                *total_idle += 1;
                *idle_by_type.entry(unit_kind_tag(unit)).or_insert(0) += 1;
            }
        }

        if self.vcd.is_some() {
            let mut frame = TraceFrame::new();
            for (i, unit) in self.units.iter().enumerate() {
                let wires = (unit.state_code(), unit.idle_from_memory, unit.job_idx_code());
                if wires != self.prev_wires[i] {
                    if wires.0 != self.prev_wires[i].0 {
                        frame.push(stats::state_wire(i), wires.0);
                    }
                    if wires.1 != self.prev_wires[i].1 {
                        frame.push(stats::idle_from_memory_wire(i), wires.1 as u64);
                    }
                    if wires.2 != self.prev_wires[i].2 {
                        frame.push(stats::job_idx_wire(i), wires.2);
                    }
                    self.prev_wires[i] = wires;
                }
            }
            if !frame.is_empty() {
                let cycle = self.global_cycles;
                self.vcd.as_mut().unwrap().record(cycle, frame);
            }
        }

        Ok(active)
    }

    /// Step 6: drain the pending-transaction list into the DRAM model, at
    /// most `dram_enq_per_cycle` submissions, stopping on the first `false`.
    fn drain_memory(&mut self) {
        for _ in 0..self.cfg.dram_enq_per_cycle {
            if !self.arbiter.try_enqueue_tx(self.dram.as_mut()) {
                if self.arbiter.pending_len() > 0 {
                    tracing::warn!(
                        cycle = self.global_cycles,
                        pending = self.arbiter.pending_len(),
                        "DRAM back-pressure: arbiter could not drain this cycle"
                    );
                }
                break;
            }
        }
    }

    /// True iff every EUS is idle and the frontier is empty: the "nothing
    /// left to do in this phase" half of the loop-termination condition.
    fn is_quiescent(&self) -> bool {
        self.units.iter().all(|u| u.is_idle()) && self.frontier.is_empty()
    }

    fn is_last_phase(&self) -> bool {
        self.phase_index + 1 == self.timeline.thresholds.len()
    }

    /// Runs the main loop to quiescence and flushes the final phase's
    /// stats (§4.6). The loop condition is checked *before* each iteration
    /// (§4.6: "terminates when `total_idle == |EUS| ∧ frontier empty`") so
    /// a schedule that is already quiescent at cycle 0 — e.g. an empty
    /// timeline — runs zero cycles rather than one (seed scenario S1).
    /// Quiescence alone does not stop the loop while a later phase is still
    /// pending (seed scenario S5): time keeps advancing, empty, until the
    /// next threshold rolls a new phase's roots into the frontier.
    pub fn run(&mut self) -> Result<()> {
        #[cfg(debug_assertions)]
        let mut prev_cycles = self.global_cycles;
        #[cfg(debug_assertions)]
        let mut prev_finished = self.jobs_finished;
        while !(self.is_quiescent() && self.is_last_phase()) {
            self.phase_rollover();
            self.dispatch().inspect_err(|e| {
                tracing::error!(cycle = self.global_cycles, "dispatch failed: {e}")
            })?;
            self.global_cycles += 1;
            self.dram_clock().inspect_err(|e| {
                tracing::error!(cycle = self.global_cycles, "DRAM clock failed: {e}")
            })?;
            let active = self.tick_units().inspect_err(|e| {
                tracing::error!(cycle = self.global_cycles, "unit tick failed: {e}")
            })?;
            self.phase_acc.tick(&active);
            self.drain_memory();

            #[cfg(debug_assertions)]
            {
                self.check_invariants(&active, prev_cycles, prev_finished);
                prev_cycles = self.global_cycles;
                prev_finished = self.jobs_finished;
            }
        }
        let report = self.phase_acc.flush();
        self.stats.record(report);
        tracing::info!(
            total_cycles = self.global_cycles,
            jobs_finished = self.jobs_finished,
            total_jobs = self.total_jobs,
            "simulation reached quiescence"
        );
        Ok(())
    }

    /// Debug-mode invariant checks (§8 TESTABLE PROPERTIES 1, 3, 5). Panics
    /// with context on violation, matching §7's "engine invariant violation
    /// ... abort with context" for bugs rather than input errors.
    #[cfg(debug_assertions)]
    fn check_invariants(&self, active: &[bool], prev_cycles: Cycle, prev_finished: u64) {
        let non_idle = active.iter().filter(|&&a| a).count() as u64;
        let idle_now = active.len() as u64 - non_idle;
        debug_assert_eq!(
            idle_now + non_idle,
            self.units.len() as u64,
            "idle + non-idle EUSs must equal |EUS| at cycle {}",
            self.global_cycles
        );
        for unit in &self.units {
            debug_assert!(
                unit.reads_unqueued <= unit.reads_outstanding,
                "unit {:?} reads_unqueued > reads_outstanding at cycle {}",
                unit.index,
                self.global_cycles
            );
            debug_assert!(
                unit.writes_unqueued <= unit.writes_outstanding,
                "unit {:?} writes_unqueued > writes_outstanding at cycle {}",
                unit.index,
                self.global_cycles
            );
        }
        debug_assert!(
            self.global_cycles >= prev_cycles,
            "global_cycles went backwards"
        );
        debug_assert!(
            self.jobs_finished >= prev_finished,
            "jobs_finished went backwards"
        );
    }
}
