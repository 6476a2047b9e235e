//! cubesum CLI: add two vectors on the accelerator and report timings.
//!
//! Usage:
//!   cubesum --len 20 --topology fixed --reduction in-place
//!   cubesum --len 1000000 --fill random --seed 7 --verify --json

use clap::{Parser, ValueEnum};
use cubesum::{
    Accelerator, ComputeError, ComputeReport, DeviceDiscovery, GpuRuntime, LaunchConfig,
    RuntimeDiscovery, reference, select_device,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fill {
    /// lhs[i] = i, rhs[i] = 2i
    Sequence,
    /// Uniform values in [-1000, 1000)
    Random,
}

#[derive(Parser, Debug)]
#[command(name = "cubesum", about = "Vector addition with per-group shared-memory sums")]
struct Args {
    /// Number of elements
    #[arg(long, default_value = "20")]
    len: usize,

    #[arg(long, value_enum, default_value = "sequence")]
    fill: Fill,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Device to run on
    #[arg(long, default_value = "0")]
    device: usize,

    /// Number of back-to-back computations
    #[arg(long, default_value = "1")]
    repeats: usize,

    /// Check the output against the host model
    #[arg(long, default_value = "false")]
    verify: bool,

    #[arg(long, default_value = "false")]
    json: bool,

    /// List devices and exit
    #[arg(long, default_value = "false")]
    list_devices: bool,

    #[command(flatten)]
    launch: LaunchConfig,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a ComputeReport<i32>,
    head: &'a [i32],
    mean_elapsed_ms: f64,
    repeats: usize,
    verified: Option<bool>,
}

fn fill(args: &Args) -> (Vec<i32>, Vec<i32>) {
    match args.fill {
        Fill::Sequence => {
            let lhs = (0..args.len).map(|i| i as i32).collect();
            let rhs = (0..args.len).map(|i| (2 * i) as i32).collect();
            (lhs, rhs)
        }
        Fill::Random => {
            let mut rng = StdRng::seed_from_u64(args.seed);
            let lhs = (0..args.len).map(|_| rng.random_range(-1000..1000)).collect();
            let rhs = (0..args.len).map(|_| rng.random_range(-1000..1000)).collect();
            (lhs, rhs)
        }
    }
}

fn verify(
    args: &Args,
    lhs: &[i32],
    rhs: &[i32],
    output: &[i32],
    report: &ComputeReport<i32>,
) -> bool {
    let Some(expected) = reference::expected(
        lhs,
        rhs,
        &vec![0; args.len],
        args.len,
        report.topology,
        report.reduction,
    ) else {
        tracing::error!("group sum does not fit in i32");
        return false;
    };

    if let Some((i, actual, wanted)) = reference::first_mismatch(output, &expected.output) {
        tracing::error!("output[{i}]: expected {wanted}, got {actual}");
        return false;
    }
    if let Some((g, actual, wanted)) =
        reference::first_mismatch(&report.group_sums, &expected.group_sums)
    {
        tracing::error!("group_sums[{g}]: expected {wanted}, got {actual}");
        return false;
    }
    true
}

fn run(args: &Args) -> Result<bool, ComputeError> {
    let discovery = RuntimeDiscovery::<GpuRuntime>::default();
    if args.list_devices {
        let devices = discovery.devices();
        println!("Found {} device(s)", devices.len());
        for device in devices {
            println!("{device}");
        }
        return Ok(true);
    }

    let device = select_device(&discovery, args.device)?;
    tracing::info!("using {device}");
    let accelerator = Accelerator::<GpuRuntime>::open_index(device.index)?;

    let (lhs, rhs) = fill(args);
    let mut output = vec![0i32; args.len];

    let mut total_ms = 0.0;
    let mut last = None;
    for _ in 0..args.repeats.max(1) {
        output.fill(0);
        let report = accelerator.compute(&lhs, &rhs, &mut output, args.len, &args.launch)?;
        total_ms += report.elapsed_ms;
        last = Some(report);
    }
    let Some(report) = last else {
        return Ok(true);
    };
    let mean_elapsed_ms = total_ms / args.repeats.max(1) as f64;

    let verified = args
        .verify
        .then(|| verify(args, &lhs, &rhs, &output, &report));
    let head = &output[..output.len().min(32)];

    if args.json {
        let summary = RunSummary {
            report: &report,
            head,
            mean_elapsed_ms,
            repeats: args.repeats.max(1),
            verified,
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!("failed to serialize report: {err}"),
        }
    } else {
        println!(
            "{} elements on {} ({} reduction)",
            report.len, report.topology, report.reduction
        );
        println!("output[..{}] = {head:?}", head.len());
        if !report.group_sums.is_empty() {
            println!("group sums = {:?}", report.group_sums);
        }
        println!(
            "kernel {:.3} ms, total {:.3} ms (mean over {} run(s): {mean_elapsed_ms:.3} ms)",
            report.kernel_ms,
            report.elapsed_ms,
            args.repeats.max(1)
        );
        match verified {
            Some(true) => println!("verify: ok"),
            Some(false) => println!("verify: FAILED"),
            None => {}
        }
    }

    Ok(verified != Some(false))
}

fn main() {
    // Errors stay visible when RUST_LOG is unset.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            tracing::error!(stage = err.stage(), "{err}");
            std::process::exit(1);
        }
    }
}
