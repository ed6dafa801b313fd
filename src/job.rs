//! Job and DAG (§3 DATA MODEL, §4.1).
//!
//! Jobs live in a contiguous arena and reference each other by index, not
//! by pointer (§9 DESIGN NOTES: "model as an arena").

use crate::core::JobIndex;
use std::collections::VecDeque;
use std::collections::HashSet;

/// Type-specific tile description for a job. Kept small and `Clone` so a
/// job can be reset and re-dispatched across periods without reallocating.
#[derive(Clone, Debug)]
pub enum JobPayload {
    /// A systolic-array matmul tile: `(M, K, N)`.
    Matmul { m: u32, k: u32, n: u32 },
    /// A vector-unit job: linearized/parallel dims, buffering, phase queue.
    Vector {
        linearized_dim: u32,
        parallel_dim: u32,
        is_prebuffered: bool,
        phases: VecDeque<(VectorPhaseKind, u32)>,
    },
}

/// One entry in a vector job's phase queue (REDUCE or BROADCAST + latency).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorPhaseKind {
    Reduce,
    Broadcast,
}

/// One node in the dependency DAG.
#[derive(Clone, Debug)]
pub struct Job {
    // Stable attributes, fixed at construction.
    pub payload: JobPayload,
    pub base_address: u64,
    pub alloc_size: u64,
    pub task_index: i32,
    pub job_index: JobIndex,
    /// `None` == unaffiliated (dispatched to first idle unit of matching kind).
    pub core_affinity: Option<usize>,
    pub batched_weights: bool,

    // Mutable, touched only by completion processing and per-period reset.
    pub address: u64,
    pub remaining_deps: u32,
    pub children: Vec<JobIndex>,
    pub done: bool,
}

impl Job {
    pub fn is_eligible(&self) -> bool {
        self.remaining_deps == 0 && !self.done
    }
}

/// Owns every job for one simulation run. Jobs reference each other by
/// `JobIndex` so the DAG can have multiple parents per child without
/// fighting the borrow checker.
#[derive(Default)]
pub struct JobArena {
    jobs: Vec<Job>,
}

impl JobArena {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn insert(
        &mut self,
        payload: JobPayload,
        alloc_size: u64,
        base_address: u64,
        task_index: i32,
        core_affinity: Option<usize>,
    ) -> JobIndex {
        let idx = JobIndex(self.jobs.len());
        self.jobs.push(Job {
            payload,
            base_address,
            alloc_size,
            task_index,
            job_index: idx,
            core_affinity,
            batched_weights: false,
            address: base_address,
            remaining_deps: 0,
            children: Vec::new(),
            done: false,
        });
        idx
    }

    pub fn get(&self, idx: JobIndex) -> &Job {
        &self.jobs[idx.0]
    }

    pub fn get_mut(&mut self, idx: JobIndex) -> &mut Job {
        &mut self.jobs[idx.0]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Appends `child` to `parent.children` and increments `child.remaining_deps`.
    pub fn add_child(&mut self, parent: JobIndex, child: JobIndex) {
        self.jobs[parent.0].children.push(child);
        self.jobs[child.0].remaining_deps += 1;
    }

    /// Full bipartite connection: every job in `src` gets every job in `tgt`
    /// as a child. The primitive the frontend uses to chain layer boundaries.
    pub fn connect_lists(&mut self, src: &[JobIndex], tgt: &[JobIndex]) {
        for &s in src {
            for &t in tgt {
                self.add_child(s, t);
            }
        }
    }

    /// Resets `address` to `base_address` and `done` to `false` for `root`
    /// and every descendant reachable from it, each visited exactly once.
    ///
    /// The original C++ walks `children` recursively with no visited set,
    /// so a job reachable through more than one parent is reset once per
    /// incoming edge; §9 DESIGN NOTES flags this as an open question and
    /// adopts the visited-set fix here.
    pub fn reset(&mut self, root: JobIndex) {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let job = &mut self.jobs[idx.0];
            job.address = job.base_address;
            job.done = false;
            stack.extend(job.children.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matmul(arena: &mut JobArena, m: u32, k: u32, n: u32) -> JobIndex {
        arena.insert(JobPayload::Matmul { m, k, n }, 0, 0, 0, None)
    }

    #[test]
    fn add_child_increments_remaining_deps() {
        let mut arena = JobArena::new();
        let a = matmul(&mut arena, 4, 4, 4);
        let b = matmul(&mut arena, 4, 4, 4);
        arena.add_child(a, b);
        assert_eq!(arena.get(b).remaining_deps, 1);
        assert_eq!(arena.get(a).children, vec![b]);
    }

    #[test]
    fn connect_lists_is_full_bipartite() {
        let mut arena = JobArena::new();
        let a = matmul(&mut arena, 1, 1, 1);
        let b = matmul(&mut arena, 1, 1, 1);
        let c = matmul(&mut arena, 1, 1, 1);
        let d = matmul(&mut arena, 1, 1, 1);
        arena.connect_lists(&[a, b], &[c, d]);
        assert_eq!(arena.get(c).remaining_deps, 2);
        assert_eq!(arena.get(d).remaining_deps, 2);
        assert_eq!(arena.get(a).children, vec![c, d]);
    }

    #[test]
    fn reset_visits_diamond_child_once() {
        let mut arena = JobArena::new();
        let root = matmul(&mut arena, 2, 2, 2);
        let left = matmul(&mut arena, 2, 2, 2);
        let right = matmul(&mut arena, 2, 2, 2);
        let sink = matmul(&mut arena, 2, 2, 2);
        arena.add_child(root, left);
        arena.add_child(root, right);
        arena.add_child(left, sink);
        arena.add_child(right, sink);

        for idx in [root, left, right, sink] {
            arena.get_mut(idx).address = 0xdead;
            arena.get_mut(idx).done = true;
        }
        arena.reset(root);
        for idx in [root, left, right, sink] {
            let j = arena.get(idx);
            assert_eq!(j.address, j.base_address);
            assert!(!j.done);
        }
        // remaining_deps is untouched by reset (it tracks structural edges,
        // not per-period completion state) and sink still requires both parents.
        assert_eq!(arena.get(sink).remaining_deps, 2);
    }

    #[test]
    fn eligible_iff_no_deps_and_not_done() {
        let mut arena = JobArena::new();
        let a = matmul(&mut arena, 1, 1, 1);
        let b = matmul(&mut arena, 1, 1, 1);
        arena.add_child(a, b);
        assert!(arena.get(a).is_eligible());
        assert!(!arena.get(b).is_eligible());
    }
}
