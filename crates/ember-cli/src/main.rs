use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ember_kernel::{KernelConfig, ReplacementPolicy};
use ember_runtime::{Runtime, RuntimeOptions};

#[derive(Parser)]
#[command(author, version, about = "The ember teaching OS, run inside its simulator")]
struct Cli {
    /// Disk image backing the simulated file system.
    #[arg(long, default_value = "DISK", global = true)]
    disk: PathBuf,

    /// Physical memory, in pages.
    #[arg(long, default_value_t = 32, global = true)]
    pages: usize,

    /// Translate through a software-managed TLB.
    #[arg(long, global = true)]
    tlb: bool,

    /// Load program pages on first use instead of up front.
    #[arg(long, global = true)]
    demand: bool,

    /// Evict to per-process swap files under memory pressure.
    #[arg(long, global = true)]
    swap: bool,

    /// Page replacement policy used with swapping.
    #[arg(long, value_enum, default_value_t = Policy::Fifo, global = true)]
    policy: Policy,

    /// Preemption quantum in ticks; omit for purely cooperative scheduling.
    #[arg(long, global = true)]
    quantum: Option<u64>,

    /// Seed for the random replacement policy.
    #[arg(long, default_value_t = 1, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Fifo,
    Clock,
    Random,
}

impl From<Policy> for ReplacementPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Fifo => ReplacementPolicy::Fifo,
            Policy::Clock => ReplacementPolicy::Clock,
            Policy::Random => ReplacementPolicy::Random,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Initialize an empty file system on the disk image.
    Format,
    /// Copy a host file into the simulated file system.
    Cp { host_path: PathBuf, path: String },
    /// Print a file to standard output.
    Cat { path: String },
    /// List a directory (the root by default).
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a directory.
    Mkdir { path: String },
    /// Remove a file.
    Rm { path: String },
    /// Remove an empty directory.
    Rmdir { path: String },
    /// Run the file-system consistency check.
    Check,
    /// Execute a user program stored in the simulated file system.
    Run {
        path: String,
        args: Vec<String>,
    },
}

fn build_options(cli: &Cli, format: bool) -> RuntimeOptions {
    let mut options = RuntimeOptions::new(&cli.disk);
    options.format = format;
    options.config = KernelConfig {
        demand_loading: cli.demand || cli.swap,
        swap: cli.swap,
        replacement: cli.policy.into(),
        timer_quantum: cli.quantum,
        disable_periodic_yield: cli.quantum.is_none(),
        rng_seed: cli.seed,
        ..KernelConfig::default()
    };
    options.config.machine.num_phys_pages = cli.pages;
    options.config.machine.use_tlb = cli.tlb;
    options
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let format = matches!(cli.command, Command::Format);
    let runtime = Runtime::new(build_options(&cli, format))?;

    match &cli.command {
        Command::Format => {
            println!("formatted {:?}", cli.disk);
        }
        Command::Cp { host_path, path } => {
            runtime.copy_in(host_path, path)?;
        }
        Command::Cat { path } => {
            let bytes = runtime.read_file(path)?;
            std::io::stdout().write_all(&bytes)?;
        }
        Command::Ls { path } => {
            let listing = runtime.kernel.file_system.list_directory_contents(path)?;
            if !listing.is_empty() {
                println!("{listing}");
            }
        }
        Command::Mkdir { path } => {
            runtime.kernel.file_system.create_directory(path)?;
        }
        Command::Rm { path } => {
            runtime.kernel.file_system.remove_file(path)?;
        }
        Command::Rmdir { path } => {
            runtime.kernel.file_system.remove_directory(path)?;
        }
        Command::Check => {
            if !runtime.kernel.file_system.check() {
                bail!("file system check failed");
            }
            println!("file system check passed");
        }
        Command::Run { path, args } => {
            let status = runtime.run_program(path, args)?;
            println!("{path} exited with status {status}");
            std::process::exit(status.clamp(0, 255));
        }
    }
    Ok(())
}
