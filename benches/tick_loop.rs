//! Steady-state tick-loop benchmark: measures the scheduler driving a
//! chain of systolic matmul jobs through a single core to completion.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use accelsim::config::{AcceleratorConfig, Dataflow};
use accelsim::core::UnitIndex;
use accelsim::eus::{ExecutionUnit, UnitKind};
use accelsim::job::{JobArena, JobPayload};
use accelsim::memory::{DramModel, FixedLatencyDram};
use accelsim::scheduler::{PhaseTimeline, Scheduler};

fn build_scheduler(num_layers: usize) -> Scheduler {
    let cfg = AcceleratorConfig {
        systolic_array_size: 16,
        dataflow: Dataflow::OutputStationary,
        dram_enq_per_cycle: 9,
        ..AcceleratorConfig::default()
    };

    let mut arena = JobArena::new();
    let mut previous = Vec::new();
    let mut roots = Vec::new();
    for i in 0..num_layers {
        let job = arena.insert(
            JobPayload::Matmul { m: 32, k: 32, n: 32 },
            0,
            0,
            i as i32,
            None,
        );
        if previous.is_empty() {
            roots.push(job);
        } else {
            arena.connect_lists(&previous, &[job]);
        }
        previous = vec![job];
    }

    let units = vec![ExecutionUnit::new(
        UnitIndex(0),
        UnitKind::Systolic {
            dataflow: cfg.dataflow,
        },
        cfg.systolic_array_size,
        1,
    )];
    let dram: Box<dyn DramModel> = Box::new(FixedLatencyDram::new(1.0, 32, 20, 256));
    let timeline = PhaseTimeline::new(vec![(0, roots)]).unwrap();
    Scheduler::new(cfg, arena, units, dram, timeline)
}

fn bench_tick_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_loop");
    for num_layers in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_layers),
            &num_layers,
            |b, &num_layers| {
                b.iter(|| {
                    let mut scheduler = build_scheduler(num_layers);
                    scheduler.run().unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_tick_loop);
criterion_main!(benches);
