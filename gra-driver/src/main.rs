//! Global Register Allocator Driver
//!
//! Loads a method description, runs global register assignment or the
//! safepoint spiller over it and prints what happened. Debug tooling only.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gra_backend::{
    allocate, policy_for, spill_live_references_at_safepoints, CandidateRegistry, GraConfig, RegisterClassPolicy,
    SpillTempManager,
};
use gra_common::{BlockNumber, GlobalRegisterNumber};
use gra_ir::Method;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "gra")]
#[command(about = "Global register allocator harness")]
#[command(version = "0.1.0")]
struct Cli {
    /// Log allocator decisions (RUST_LOG overrides the level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign global registers to the candidates of a method
    Assign {
        /// Method description (JSON)
        method: PathBuf,

        /// Allocator configuration (JSON); absent fields take their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target: amd64, ia32, power or power32
        #[arg(short, long, default_value = "amd64")]
        target: String,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the assignment as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store commoned references live across safepoints to spill temps
    Safepoints {
        /// Method description (JSON)
        method: PathBuf,

        /// Allocator configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target: amd64, ia32, power or power32
        #[arg(short, long, default_value = "amd64")]
        target: String,

        /// Write the rewritten method here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default configuration
    DefaultConfig,
}

/// One candidate in the printed assignment
#[derive(Debug, Serialize)]
struct CandidateReport {
    symbol: String,
    data_type: String,
    weight: u32,
    registers: Vec<String>,
    live_on_entry: Vec<BlockNumber>,
    live_on_exit: Vec<BlockNumber>,
}

#[derive(Debug, Serialize)]
struct AssignmentReport {
    method: String,
    target: String,
    iterations: usize,
    global_fp_assignment_done: bool,
    lowest_register: Option<String>,
    highest_register: Option<String>,
    assigned: Vec<CandidateReport>,
    dropped: Vec<CandidateReport>,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    let result = match cli.command {
        Commands::Assign {
            method,
            config,
            target,
            timeout_ms,
            json,
        } => assign_command(&method, config.as_deref(), &target, timeout_ms, json),
        Commands::Safepoints {
            method,
            config,
            target,
            output,
        } => safepoints_command(&method, config.as_deref(), &target, output.as_deref()),
        Commands::DefaultConfig => default_config_command(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_method(path: &Path) -> Result<Method> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Method::from_json(&text).with_context(|| format!("loading method from {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<GraConfig> {
    let Some(path) = path else {
        return Ok(GraConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    GraConfig::from_json(&text).with_context(|| format!("loading configuration from {}", path.display()))
}

fn load_policy(target: &str) -> Result<Box<dyn RegisterClassPolicy>> {
    match policy_for(target) {
        Some(policy) => Ok(policy),
        None => bail!("unknown target '{}'", target),
    }
}

fn assign_command(
    method_path: &Path,
    config_path: Option<&Path>,
    target: &str,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let method = load_method(method_path)?;
    let config = load_config(config_path)?;
    let policy = load_policy(target)?;
    info!("assigning registers in {} for {}", method.name, policy.name());

    let started = Instant::now();
    let deadline = timeout_ms.map(Duration::from_millis);
    let mut interrupt = || deadline.map(|d| started.elapsed() > d).unwrap_or(false);
    let (registry, result) = allocate(&method, policy.as_ref(), &config, &mut interrupt)?;

    let names = |reg: Option<GlobalRegisterNumber>| reg.map(|r| policy.register_file().name(r).to_string());
    let report = AssignmentReport {
        method: method.name.clone(),
        target: policy.name().to_string(),
        iterations: result.iterations,
        global_fp_assignment_done: result.global_fp_assignment_done,
        lowest_register: names(result.lowest_register),
        highest_register: names(result.highest_register),
        assigned: result
            .assigned
            .iter()
            .map(|&id| candidate_report(&method, policy.as_ref(), &registry, id))
            .collect(),
        dropped: result
            .dropped
            .iter()
            .map(|&id| candidate_report(&method, policy.as_ref(), &registry, id))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn candidate_report(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    registry: &CandidateRegistry,
    id: gra_backend::CandidateId,
) -> CandidateReport {
    let rc = registry.get(id);
    CandidateReport {
        symbol: method.symbol(rc.symref).name.clone(),
        data_type: rc.data_type.to_string(),
        weight: rc.weight,
        registers: rc
            .registers()
            .map(|r| policy.register_file().name(r).to_string())
            .collect(),
        live_on_entry: rc.blocks_live_on_entry.iter().copied().collect(),
        live_on_exit: rc.blocks_live_on_exit.iter().copied().collect(),
    }
}

fn print_report(report: &AssignmentReport) {
    println!("Method {} on {} ({} iterations)", report.method, report.target, report.iterations);
    println!("\nAssigned:");
    for c in &report.assigned {
        println!(
            "  {:<16} {:<10} weight {:>8}  {:<12} entry {:?} exit {:?}",
            c.symbol,
            c.data_type,
            c.weight,
            c.registers.join(":"),
            c.live_on_entry,
            c.live_on_exit
        );
    }
    println!("\nLeft in memory:");
    for c in &report.dropped {
        println!("  {:<16} {:<10} weight {:>8}", c.symbol, c.data_type, c.weight);
    }
    if let (Some(low), Some(high)) = (&report.lowest_register, &report.highest_register) {
        println!("\nRegisters used: {} .. {}", low, high);
    }
}

fn safepoints_command(
    method_path: &Path,
    config_path: Option<&Path>,
    target: &str,
    output: Option<&Path>,
) -> Result<()> {
    let mut method = load_method(method_path)?;
    let config = load_config(config_path)?;
    let policy = load_policy(target)?;

    let mut spills = SpillTempManager::new(&config, policy.reference_size());
    let report = spill_live_references_at_safepoints(&mut method, &mut spills);
    println!(
        "{} safepoints, {} stores inserted, {} references rewritten, {} temps created, {} reused",
        report.safepoints, report.stores_inserted, report.references_rewritten, report.temps_created, report.temps_reused
    );
    for id in spills.collected_spills() {
        let slot = spills.slot(id);
        println!(
            "  {} ({} bytes, gc map index {:?})",
            method.symbol(slot.symref).name,
            slot.size,
            slot.gc_map_index
        );
    }

    if let Some(path) = output {
        fs::write(path, serde_json::to_string_pretty(&method)?)?;
        println!("Method written to: {}", path.display());
    }
    Ok(())
}

fn default_config_command() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&GraConfig::default())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gra_common::DataType;
    use gra_ir::{MethodBuilder, END, START};
    use pretty_assertions::assert_eq;

    fn sample_method() -> Method {
        let mut b = MethodBuilder::new("sample");
        let x = b.auto("x", DataType::Int32);
        let b2 = b.block();
        let b3 = b.block();
        b.edge(START, b2).edge(b2, b3).edge(b3, END);
        let one = b.constant(DataType::Int32, 1);
        b.store(b2, x, one);
        let lx = b.load(x);
        b.ret(b3, Some(lx));
        b.build().expect("valid")
    }

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gra-driver-{}-{}", std::process::id(), name));
        fs::write(&path, contents).expect("temp file");
        path
    }

    #[test]
    fn test_method_round_trips_through_files() {
        let method = sample_method();
        let path = write_temp("method.json", &serde_json::to_string(&method).expect("serializable"));
        assert_eq!(load_method(&path).expect("loads"), method);
        assert!(assign_command(&path, None, "ia32", None, true).is_ok());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_unknown_target_rejected() {
        assert!(load_policy("vax").is_err());
        assert!(load_policy("power32").is_ok());
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let path = write_temp("config.json", r#"{ "pressure_simulation": false }"#);
        let config = load_config(Some(&path)).expect("loads");
        assert!(!config.pressure_simulation);
        assert_eq!(config.interrupt_check_interval, GraConfig::default().interrupt_check_interval);
        let _ = fs::remove_file(path);
    }
}
