//! DreamOn SH4 emulation core CLI.
//!
//! This binary provides a single entry point for driving a `System`:
//! 1. **Run:** load a raw binary or ELF image and execute it slice by slice.
//! 2. **Resume:** load a previously written save-state and continue execution.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dreamon_core::common::config::Config;
use dreamon_core::cpu::RunState;
use dreamon_core::sim::loader;
use dreamon_core::soc::system::System;

#[derive(Parser, Debug)]
#[command(
    name = "dreamon",
    author,
    version,
    about = "DreamOn SH4/ASIC/ARM7 emulation core harness"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load an image and run it for up to a bounded number of scheduler slices.
    Run {
        /// Path to the guest image (raw binary by default, ELF with `--elf`).
        path: String,

        /// Optional JSON configuration file; unset fields keep their defaults.
        #[arg(long)]
        config: Option<String>,

        /// Treat `path` as a 32-bit ELF rather than a raw binary.
        #[arg(long)]
        elf: bool,

        /// Stop after this many scheduler slices (default: run until the core
        /// parks in `Standby` with no pending event).
        #[arg(long)]
        max_slices: Option<u64>,

        /// Write a save-state to this path once the run stops.
        #[arg(long)]
        save_state: Option<String>,
    },

    /// Resume execution from a previously written save-state.
    Resume {
        /// Path to the save-state file.
        save_state: String,

        /// Optional JSON configuration file; must match the one the save-state
        /// was produced with (RAM/sound RAM sizes in particular).
        #[arg(long)]
        config: Option<String>,

        /// Stop after this many scheduler slices.
        #[arg(long)]
        max_slices: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            path,
            config,
            elf,
            max_slices,
            save_state,
        } => cmd_run(&path, config.as_deref(), elf, max_slices, save_state.as_deref()),
        Commands::Resume {
            save_state,
            config,
            max_slices,
        } => cmd_resume(&save_state, config.as_deref(), max_slices),
    };

    if let Err(message) = result {
        eprintln!("[!] {message}");
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path).map_err(|e| format!("loading config {path}: {e}")),
        None => Ok(Config::default()),
    }
}

fn cmd_run(
    path: &str,
    config_path: Option<&str>,
    elf: bool,
    max_slices: Option<u64>,
    save_state_path: Option<&str>,
) -> Result<(), String> {
    let config = load_config(config_path)?;
    let mut system = System::new(config.clone());

    if elf {
        let entry = loader::load_elf(&mut system, path).map_err(|e| format!("loading ELF: {e}"))?;
        let sh4 = system.sh4_mut();
        sh4.cpu.regs.pc = entry;
        sh4.cpu.regs.new_pc = entry.wrapping_add(2);
    } else {
        loader::load_raw_binary(&mut system, path, config.boot_pc)
            .map_err(|e| format!("loading binary {path}: {e}"))?;
    }

    run_slices(&mut system, &config, max_slices);

    if let Some(out_path) = save_state_path {
        write_save_state(&system, out_path)?;
        println!("[*] save-state written to {out_path}");
    }

    Ok(())
}

fn cmd_resume(save_state_path: &str, config_path: Option<&str>, max_slices: Option<u64>) -> Result<(), String> {
    let config = load_config(config_path)?;
    let mut system = System::new(config.clone());

    let file = File::open(save_state_path).map_err(|e| format!("opening save-state: {e}"))?;
    let mut reader = BufReader::new(file);
    system
        .load_state(&mut reader)
        .map_err(|e| format!("loading save-state: {e}"))?;

    run_slices(&mut system, &config, max_slices);
    Ok(())
}

fn run_slices(system: &mut System, config: &Config, max_slices: Option<u64>) {
    let slice_ns = config.cpu_period_ns.saturating_mul(1000);
    let mut slices: u64 = 0;
    loop {
        if let Some(limit) = max_slices {
            if slices >= limit {
                println!("[*] stopped after {slices} slices (--max-slices reached)");
                break;
            }
        }
        system.run_slice(slice_ns);
        slices += 1;

        let regs = &system.sh4_mut().cpu.regs;
        if matches!(regs.state, RunState::Standby | RunState::Halted) && regs.event_pending == 0 {
            println!("[*] stopped after {slices} slices (core parked in Standby with no pending event)");
            break;
        }
    }
}

fn write_save_state(system: &System, out_path: &str) -> Result<(), String> {
    let file = File::create(out_path).map_err(|e| format!("creating save-state file: {e}"))?;
    let mut writer = BufWriter::new(file);
    system
        .save_state(&mut writer)
        .map_err(|e| format!("writing save-state: {e}"))
}
