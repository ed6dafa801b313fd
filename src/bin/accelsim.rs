//! Standalone demo binary: reads a layer file and an accelerator
//! configuration, runs the engine to quiescence, and writes the §6
//! statistics-file format plus the `Drain Ratio:` stdout line.
//!
//! Flag parsing is hand-rolled rather than `clap`-derived: §6's flag table
//! is single-dash and multi-character (`-sa_sz`, `-vu_sz`, `-ws`), which
//! clap's `short`/`long` split cannot express directly (`short` is one
//! char, `long` always renders `--`). Mirrors the original
//! `ArchParser::parse_args`/`StandardParser::make_arch` loop (`strcmp`
//! against each literal flag, consume the next token as its value).

use accelsim::config::{AcceleratorConfig, Dataflow};
use accelsim::core::UnitIndex;
use accelsim::error::{EngineError, Result};
use accelsim::eus::{ExecutionUnit, UnitKind};
use accelsim::frontend::{lower_to_jobs, parse_layer_file};
use accelsim::job::JobArena;
use accelsim::memory::{DramModel, FixedLatencyDram};
use accelsim::scheduler::{PhaseTimeline, Scheduler};
use accelsim::stats::StatsSink;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
Global Options:
-i <file>     layer input file
-o <file>     output statistic file
-f <float>    frequency (GHz)
-c <int>      number of cores
-sa_sz <int>  size of the systolic array
-vu_sz <int>  size of the vector unit
-ws <0|1>     output stationary (0) or weight stationary (1)
-h            print this message and exit";

/// Parsed command line (§6 flag table).
struct Args {
    input: PathBuf,
    output: PathBuf,
    frequency: f64,
    cores: usize,
    sa_sz: u32,
    vu_sz: u32,
    ws: u8,
}

impl Args {
    /// Walks `std::env::args()` via [`Self::parse_from`].
    fn parse() -> Result<Self> {
        Self::parse_from(std::env::args().collect())
    }

    /// Walks `argv[1..]` once, matching each token against the literal §6
    /// flags. Unknown flags are fatal (§7); `-h` prints and exits 0.
    fn parse_from(argv: Vec<String>) -> Result<Self> {
        let mut input = None;
        let mut output = None;
        let mut frequency = 1.0;
        let mut cores = 1usize;
        let mut sa_sz = 16u32;
        let mut vu_sz = 8u32;
        let mut ws = 0u8;

        let mut i = 1;
        while i < argv.len() {
            let flag = argv[i].as_str();
            match flag {
                "-i" => input = Some(PathBuf::from(next(&argv, &mut i, "-i")?)),
                "-o" => output = Some(PathBuf::from(next(&argv, &mut i, "-o")?)),
                "-f" => frequency = parse_value(&argv, &mut i, "-f")?,
                "-c" => cores = parse_value(&argv, &mut i, "-c")?,
                "-sa_sz" => sa_sz = parse_value(&argv, &mut i, "-sa_sz")?,
                "-vu_sz" => vu_sz = parse_value(&argv, &mut i, "-vu_sz")?,
                "-ws" => ws = parse_value(&argv, &mut i, "-ws")?,
                "-h" => {
                    println!("{HELP}");
                    std::process::exit(0);
                }
                other => {
                    return Err(EngineError::UnknownCliFlag {
                        flag: other.to_string(),
                    })
                }
            }
            i += 1;
        }

        Ok(Self {
            input: input.ok_or(EngineError::MissingFlagValue { flag: "-i" })?,
            output: output.ok_or(EngineError::MissingFlagValue { flag: "-o" })?,
            frequency,
            cores,
            sa_sz,
            vu_sz,
            ws,
        })
    }
}

/// Returns the token following `flag`, advancing `i` past it. Errors if
/// `flag` is the last token (§7: "malformed CLI flag").
fn next<'a>(argv: &'a [String], i: &mut usize, flag: &'static str) -> Result<&'a str> {
    *i += 1;
    argv.get(*i)
        .map(String::as_str)
        .ok_or(EngineError::MissingFlagValue { flag })
}

fn parse_value<T: std::str::FromStr>(argv: &[String], i: &mut usize, flag: &'static str) -> Result<T> {
    let raw = next(argv, i, flag)?;
    raw.parse().map_err(|_| EngineError::InvalidFlagValue {
        flag,
        value: raw.to_string(),
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    if let Err(e) = run() {
        tracing::error!("accelsim failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse()?;

    let cfg = AcceleratorConfig {
        num_cores: args.cores,
        systolic_array_size: args.sa_sz,
        vector_unit_size: args.vu_sz,
        dataflow: if args.ws == 1 {
            Dataflow::WeightStationary
        } else {
            Dataflow::OutputStationary
        },
        frequency_ghz: args.frequency,
        ..AcceleratorConfig::default()
    };

    let text = std::fs::read_to_string(&args.input)?;
    let layers = parse_layer_file(&text)?;
    info!(count = layers.len(), "parsed layer file");

    let mut arena = JobArena::new();
    let roots = lower_to_jobs(&layers, &mut arena)?;

    let units: Vec<ExecutionUnit> = (0..cfg.num_cores)
        .map(|i| {
            ExecutionUnit::new(
                UnitIndex(i),
                UnitKind::Systolic {
                    dataflow: cfg.dataflow,
                },
                cfg.systolic_array_size,
                1,
            )
        })
        .collect();

    let dram: Box<dyn DramModel> =
        Box::new(FixedLatencyDram::new(1.0, cfg.bytes_per_transaction, 20, 256));
    let timeline = PhaseTimeline::new(vec![(0, roots)])?;
    let mut scheduler = Scheduler::new(cfg, arena, units, dram, timeline);

    scheduler.run()?;

    std::fs::write(&args.output, scheduler.stats().render())?;

    let ratio = StatsSink::drain_ratio(scheduler.total_frontier(), scheduler.jobs_finished());
    println!("Drain Ratio: {ratio}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("accelsim".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect()
    }

    #[test]
    fn parses_single_dash_multichar_flags() {
        let args = Args::parse_from(argv(&[
            "-i", "in.txt", "-o", "out.txt", "-sa_sz", "32", "-vu_sz", "4", "-ws", "1",
        ]))
        .unwrap();
        assert_eq!(args.input, PathBuf::from("in.txt"));
        assert_eq!(args.output, PathBuf::from("out.txt"));
        assert_eq!(args.sa_sz, 32);
        assert_eq!(args.vu_sz, 4);
        assert_eq!(args.ws, 1);
    }

    #[test]
    fn double_dash_variant_is_rejected_as_unknown() {
        let err = Args::parse_from(argv(&["-i", "in.txt", "-o", "out.txt", "--sa_sz", "32"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownCliFlag { flag } if flag == "--sa_sz"));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = Args::parse_from(argv(&["-i", "in.txt", "-o", "out.txt", "-bogus"])).unwrap_err();
        assert!(matches!(err, EngineError::UnknownCliFlag { flag } if flag == "-bogus"));
    }

    #[test]
    fn missing_flag_value_is_an_error() {
        let err = Args::parse_from(argv(&["-i", "in.txt", "-o", "out.txt", "-sa_sz"])).unwrap_err();
        assert!(matches!(err, EngineError::MissingFlagValue { flag: "-sa_sz" }));
    }

    #[test]
    fn invalid_flag_value_is_an_error() {
        let err =
            Args::parse_from(argv(&["-i", "in.txt", "-o", "out.txt", "-sa_sz", "not_a_number"]))
                .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFlagValue { flag: "-sa_sz", .. }));
    }

    #[test]
    fn missing_required_input_or_output_is_an_error() {
        let err = Args::parse_from(argv(&["-o", "out.txt"])).unwrap_err();
        assert!(matches!(err, EngineError::MissingFlagValue { flag: "-i" }));
    }

    #[test]
    fn defaults_match_spec_reference_values() {
        let args = Args::parse_from(argv(&["-i", "in.txt", "-o", "out.txt"])).unwrap();
        assert_eq!(args.cores, 1);
        assert_eq!(args.sa_sz, 16);
        assert_eq!(args.vu_sz, 8);
        assert_eq!(args.ws, 0);
        assert_eq!(args.frequency, 1.0);
    }
}
