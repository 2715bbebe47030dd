//! netsim - IPv4 routing protocol simulator
//!
//! Runs TOML-described simulations and built-in scenarios against the
//! static, discovery and list routing protocols.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use netsim_logging::{LogConfig, NetsimSubscriberBuilder, WorkerGuard};
use netsim_routing::ProtocolRegistry;
use netsim_simulation::{
    ProtocolEntry, SCENARIOS, SimulationConfig, SimulationReport, TopologyBuilder, run_scenario,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "netsim",
    about = "Discrete-event simulator for pluggable IPv4 routing protocols",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation described by a TOML file
    Run {
        /// Path to the simulation file
        config: PathBuf,
    },

    /// Run a built-in scenario: fallback, discovery, link-failure
    Scenario {
        name: String,
    },

    /// Generate a topology as a simulation file
    Topology {
        /// Shape of the topology
        #[arg(short, long, value_enum, default_value = "line")]
        kind: TopologyKind,

        /// Number of nodes
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Link probability for the random topology
        #[arg(short, long, default_value = "0.4")]
        link_probability: f64,

        /// Seed for the random topology
        #[arg(short, long, default_value = "7")]
        seed: u64,

        /// Routing protocol for every node
        #[arg(short, long, default_value = "discovery")]
        protocol: String,

        /// Print the generated network instead of the TOML
        #[arg(long)]
        show: bool,
    },

    /// List the routing protocols that simulation files can name
    Protocols,
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    Line,
    Ring,
    Star,
    Full,
    Random,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let sim_config = SimulationConfig::from_file(&config)?;
            let _guard = init_logging(cli.verbose, cli.json, sim_config.logging.clone())?;
            let network = sim_config.build()?;
            info!(nodes = network.node_count(), duration = %sim_config.duration(), "Running simulation");
            network.run_until(sim_config.duration());

            let name = config.display().to_string();
            print_report(&SimulationReport::collect(name, &network), cli.json)?;
        }
        Commands::Scenario { name } => {
            let _guard = init_logging(cli.verbose, cli.json, None)?;
            let Some(result) = run_scenario(&name) else {
                bail!("unknown scenario '{name}', expected one of: {}", SCENARIOS.join(", "));
            };
            let network = result.with_context(|| format!("scenario '{name}' failed"))?;
            print_report(&SimulationReport::collect(name, &network), cli.json)?;
        }
        Commands::Topology {
            kind,
            nodes,
            link_probability,
            seed,
            protocol,
            show,
        } => {
            if !ProtocolRegistry::with_builtins().contains(&protocol) {
                bail!("unknown routing protocol '{protocol}'");
            }
            let builder = TopologyBuilder::new(nodes).with_routing(vec![ProtocolEntry::new(protocol, 0)]);
            let sim_config = match kind {
                TopologyKind::Line => builder.line(),
                TopologyKind::Ring => builder.ring(),
                TopologyKind::Star => builder.star(),
                TopologyKind::Full => builder.full_mesh(),
                TopologyKind::Random => builder.random(link_probability, seed),
            };
            if show {
                println!("{}", sim_config.build()?.visualize());
            } else {
                print!("{}", sim_config.to_toml_string()?);
            }
        }
        Commands::Protocols => {
            for name in ProtocolRegistry::with_builtins().names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

/// Install the subscriber, starting from the simulation file's settings if any
fn init_logging(
    verbose: bool,
    json: bool,
    config: Option<LogConfig>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let mut builder = NetsimSubscriberBuilder::new();
    if let Some(config) = config {
        builder = builder.with_config(config);
    }
    if verbose {
        builder = builder.with_level("debug");
    }
    if json {
        // JSON reports go to stdout, keep logs out of them
        builder = builder.with_console(false);
    }
    Ok(builder.try_init()?)
}

fn print_report(report: &SimulationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}
