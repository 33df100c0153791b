use anyhow::{Context, Result};
use clap::Parser;
use gridlock::{BANNER, Scenario, SimConfig, SimEvent, Simulator, Strategy};
use serde_json::json;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Gridlock - Deadlock Simulator With Pluggable Resolution Strategies"
)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of simulated processes
    #[arg(long)]
    processes: Option<usize>,

    /// Number of exclusive resources
    #[arg(long)]
    resources: Option<usize>,

    /// Resolution strategy
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Speed multiplier applied to every actor delay
    #[arg(long)]
    speed: Option<f64>,

    /// Scenario preset, applied before the other flags
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,

    /// Disable periodic detection and automatic resolution
    #[arg(long)]
    no_auto_detect: bool,

    /// Seed for reproducible timing and acquisition orders
    #[arg(long)]
    seed: Option<u64>,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Path to the JSON Lines event log ("{timestamp}" is expanded)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Only print the final summary
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_json_file(path)?,
            None => SimConfig::default(),
        };
        // Presets derive the resource count from the process count
        if let Some(processes) = self.processes {
            config.processes = processes;
        }
        if let Some(scenario) = self.scenario {
            config.apply_scenario(scenario);
        }
        if let Some(resources) = self.resources {
            config.resources = resources;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(speed) = self.speed {
            config.speed = speed;
        }
        if self.no_auto_detect {
            config.auto_detect = false;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.to_config()?;

    let mut simulator = Simulator::from_config(config.clone());
    if let Some(log) = &cli.log {
        simulator = simulator.with_log(log);
    }
    if !cli.quiet {
        println!("{BANNER}");
        simulator = simulator.on_event(print_event);
    }

    let simulation = simulator.start().context("Failed to start simulation")?;
    thread::sleep(Duration::from_secs(cli.duration));
    let stats = simulation.stop().context("Failed to stop simulation")?;

    let summary = json!({
        "config": config,
        "stats": stats,
        "mean_resolution_ms": stats.mean_resolution_ms(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_event(event: SimEvent) {
    match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("Failed to serialize event: {e}"),
    }
}
