//! Decoupled front-end simulator CLI.
//!
//! Single entry point for running the simulator:
//! 1. **Kernel run:** simulate a built-in synthetic kernel with the
//!    default configuration, optionally overridden from JSON.
//! 2. **Stats output:** write per-group `.out`/`.csv` statistics files
//!    per core into an output directory.

use std::{fs, process};

use clap::Parser;

use fetchsim_core::Simulator;
use fetchsim_core::config::{Config, Kernel};

#[derive(Parser, Debug)]
#[command(
    name = "fetchsim",
    version,
    about = "Cycle-accurate decoupled front-end simulator",
    long_about = "Simulate the speculative fetch path of an out-of-order core \
over a synthetic kernel.\n\nConfiguration is JSON-first; CLI flags override \
the loaded file.\n\nExamples:\n  fetchsim --kernel loop --iterations 100000\n  \
fetchsim --config sweep.json --output-dir results/"
)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Synthetic kernel: loop, call_return, or indirect_dispatch.
    #[arg(short, long)]
    kernel: Option<String>,

    /// Kernel iteration count.
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Simulated cycle budget.
    #[arg(long)]
    cycles: Option<u64>,

    /// Statistics output directory.
    #[arg(short, long)]
    output_dir: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Error reading config {path}: {e}");
                process::exit(1);
            });
            Config::from_json(&text).unwrap_or_else(|e| {
                eprintln!("Error parsing config {path}: {e}");
                process::exit(1);
            })
        }
        None => Config::default(),
    };

    if let Some(kernel) = &cli.kernel {
        config.general.kernel = match kernel.as_str() {
            "loop" => Kernel::Loop,
            "call_return" => Kernel::CallReturn,
            "indirect_dispatch" => Kernel::IndirectDispatch,
            other => {
                eprintln!("Unknown kernel '{other}' (loop, call_return, indirect_dispatch)");
                process::exit(1);
            }
        };
    }
    if let Some(iterations) = cli.iterations {
        config.general.kernel_iterations = iterations;
    }
    if let Some(cycles) = cli.cycles {
        config.general.max_cycles = cycles;
    }
    if let Some(dir) = cli.output_dir {
        config.general.output_dir = dir;
    }

    println!(
        "Configuration: kernel={:?} iterations={} cores={} bps={} uop_cache={}",
        config.general.kernel,
        config.general.kernel_iterations,
        config.general.num_cores,
        config.general.num_bps,
        config.uop_cache.enable,
    );

    let mut sim = Simulator::new(config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        process::exit(1);
    });

    let cycles = sim.run();
    if !sim.is_done() {
        eprintln!("[!] Cycle budget expired before the simulation drained");
    }

    println!();
    println!("==========================================================");
    println!("DECOUPLED FRONT-END SIMULATION");
    println!("==========================================================");
    println!("sim_cycles               {cycles}");
    for proc_id in 0..sim.config().general.num_cores {
        let core = sim.core(proc_id);
        let stats = core.stats();
        let retired = core.retired();
        let ipc = retired as f64 / cycles.max(1) as f64;
        println!("----------------------------------------------------------");
        println!("Core {proc_id}");
        println!("  insts_retired          {retired}");
        println!("  ipc                    {ipc:.4}");
        println!(
            "  ftq_cycles on/off      {} / {}",
            stats.fetch.ftq_cycles_onpath, stats.fetch.ftq_cycles_offpath
        );
        println!(
            "  recoveries dec/exec    {} / {}",
            stats.fetch.ftq_recover_decode, stats.fetch.ftq_recover_exec
        );
        println!(
            "  uop_cache hit/miss     {} / {}",
            stats.uop_cache.ft_hits, stats.uop_cache.ft_misses
        );
    }
    println!("==========================================================");

    if let Err(e) = sim.write_stats() {
        eprintln!("Error writing stats: {e}");
        process::exit(1);
    }
}
