//! Stats & waveform sink: per-phase cycle totals, per-EUS utilisation, and
//! an optional value-change-dump trace accumulator (§2, §4.6, §6, §9).

use crate::core::UnitKindTag;
use std::fmt::Write as _;

/// One closed phase: total cycles and each EUS's percent-active figure, in
/// scheduler order.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseReport {
    pub cycles: u64,
    /// `(unit_kind, pct_active)` pairs, one per EUS, in scheduler order.
    pub per_unit: Vec<(UnitKindTag, f64)>,
}

/// Accumulates one phase's per-unit active-cycle counts, then closes into a
/// [`PhaseReport`] on rollover (§4.6 step 1: "flush current-phase stats").
#[derive(Default)]
pub struct PhaseAccumulator {
    phase_cycles: u64,
    per_unit_active: Vec<u64>,
    kinds: Vec<UnitKindTag>,
}

impl PhaseAccumulator {
    pub fn new(kinds: Vec<UnitKindTag>) -> Self {
        let n = kinds.len();
        Self {
            phase_cycles: 0,
            per_unit_active: vec![0; n],
            kinds,
        }
    }

    pub fn tick(&mut self, active: &[bool]) {
        self.phase_cycles += 1;
        for (count, &was_active) in self.per_unit_active.iter_mut().zip(active) {
            if was_active {
                *count += 1;
            }
        }
    }

    /// Closes the phase into a report and resets the accumulator in place.
    pub fn flush(&mut self) -> PhaseReport {
        let per_unit = self
            .kinds
            .iter()
            .zip(&self.per_unit_active)
            .map(|(&kind, &active)| {
                let pct = if self.phase_cycles == 0 {
                    0.0
                } else {
                    active as f64 * 100.0 / self.phase_cycles as f64
                };
                (kind, pct)
            })
            .collect();
        let report = PhaseReport {
            cycles: self.phase_cycles,
            per_unit,
        };
        self.phase_cycles = 0;
        self.per_unit_active.iter_mut().for_each(|c| *c = 0);
        report
    }
}

/// Collects every closed phase for a run and renders the §6 statistics-file
/// format: `Cycles <u64>` then one `<kind> <pct>` line per EUS, per phase.
#[derive(Default)]
pub struct StatsSink {
    phases: Vec<PhaseReport>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: PhaseReport) {
        self.phases.push(report);
    }

    pub fn phases(&self) -> &[PhaseReport] {
        &self.phases
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for phase in &self.phases {
            let _ = writeln!(out, "Cycles {}", phase.cycles);
            for (kind, pct) in &phase.per_unit {
                let _ = writeln!(out, "{} {}", kind, pct);
            }
        }
        out
    }

    /// `jobs_finished / total_frontier`, the `Drain Ratio` line on stdout
    /// (§6). Zero frontier entries yields a ratio of 1.0 (nothing to drain,
    /// nothing left undrained).
    pub fn drain_ratio(total_frontier: u64, jobs_finished: u64) -> f64 {
        if total_frontier == 0 {
            1.0
        } else {
            jobs_finished as f64 / total_frontier as f64
        }
    }
}

/// One entry in a value-change-dump frame: a stat id and its new value,
/// reset every tick rather than held in a process-wide map (§9 DESIGN NOTES).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatUpdate {
    pub stat_id: u32,
    pub value: u64,
}

/// Per-cycle write-only accumulator for the optional waveform trace.
#[derive(Default)]
pub struct TraceFrame {
    updates: Vec<StatUpdate>,
}

impl TraceFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stat_id: u32, value: u64) {
        self.updates.push(StatUpdate { stat_id, value });
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[StatUpdate] {
        &self.updates
    }

    pub fn clear(&mut self) {
        self.updates.clear();
    }
}

/// Wire-id assignment for the §6 value-change-dump: three wires per EUS
/// (`STATE`, `IDLE_FROM_MEMORY`, `JOB_IDX`, in that order) followed by one
/// top-level `phase` wire.
pub fn state_wire(unit: usize) -> u32 {
    unit as u32 * 3
}
pub fn idle_from_memory_wire(unit: usize) -> u32 {
    unit as u32 * 3 + 1
}
pub fn job_idx_wire(unit: usize) -> u32 {
    unit as u32 * 3 + 2
}
pub fn phase_wire(num_units: usize) -> u32 {
    num_units as u32 * 3
}

/// Collects one [`TraceFrame`] per cycle that had at least one stat change,
/// each tagged with the cycle it fired on (§6: "a timestamp line precedes
/// the change lines"). File formatting (the actual VCD text) is left to the
/// caller — this crate only specifies and fires the tracing hook.
#[derive(Default)]
pub struct VcdLog {
    frames: Vec<(u64, TraceFrame)>,
}

impl VcdLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cycle: u64, frame: TraceFrame) {
        if !frame.is_empty() {
            self.frames.push((cycle, frame));
        }
    }

    pub fn frames(&self) -> &[(u64, TraceFrame)] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_computes_percent_active_and_resets() {
        let mut acc = PhaseAccumulator::new(vec![UnitKindTag::Systolic, UnitKindTag::Vector]);
        acc.tick(&[true, false]);
        acc.tick(&[true, true]);
        acc.tick(&[false, true]);
        let report = acc.flush();
        assert_eq!(report.cycles, 3);
        assert!((report.per_unit[0].1 - 200.0 / 3.0).abs() < 1e-9);
        assert!((report.per_unit[1].1 - 200.0 / 3.0).abs() < 1e-9);

        let empty = acc.flush();
        assert_eq!(empty.cycles, 0);
        assert_eq!(empty.per_unit[0].1, 0.0);
    }

    #[test]
    fn render_matches_statistics_file_format() {
        let mut sink = StatsSink::new();
        sink.record(PhaseReport {
            cycles: 10,
            per_unit: vec![(UnitKindTag::Systolic, 50.0)],
        });
        assert_eq!(sink.render(), "Cycles 10\nSystolicArray 50\n");
    }

    #[test]
    fn drain_ratio_handles_empty_frontier() {
        assert_eq!(StatsSink::drain_ratio(0, 0), 1.0);
        assert_eq!(StatsSink::drain_ratio(4, 2), 0.5);
    }

    #[test]
    fn trace_frame_accumulates_and_clears() {
        let mut frame = TraceFrame::new();
        assert!(frame.is_empty());
        frame.push(1, 3);
        frame.push(2, 0);
        assert_eq!(frame.updates().len(), 2);
        frame.clear();
        assert!(frame.is_empty());
    }
}
