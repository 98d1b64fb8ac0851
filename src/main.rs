//! factory-sim - Synthetic factory-telemetry simulator
//!
//! Usage:
//!   factory-sim run --config config.json
//!   factory-sim run --config config.json --seed 42 --duration 5m
//!   factory-sim check --config config.json
//!   factory-sim generate --config config.json --ticks 100 --seed 42

use clap::{Parser, Subcommand};
use factory_sim::transport::{MqttTransport, StaticTokenProvider};
use factory_sim::{generate_offline, SimConfig, SimulationEngine};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factory-sim")]
#[command(about = "Synthetic factory telemetry with best-effort MQTT delivery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulator against the configured broker
    Run {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: String,

        /// Override the configured RNG seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Stop after this long (e.g. 30s, 5m, 1h); runs forever if unset
        #[arg(short, long)]
        duration: Option<String>,
    },

    /// Validate a configuration file and print a summary
    Check {
        #[arg(short, long)]
        config: String,
    },

    /// Generate K ticks offline and print one JSON line per event
    Generate {
        #[arg(short, long)]
        config: String,

        /// Number of ticks to generate
        #[arg(short, long, default_value = "100")]
        ticks: u64,

        /// Override the configured RNG seed
        #[arg(short, long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            seed,
            duration,
        } => run(&config, seed, duration).await,
        Commands::Check { config } => check(&config),
        Commands::Generate {
            config,
            ticks,
            seed,
        } => generate(&config, ticks, seed),
    }
}

fn load(path: &str, seed: Option<u64>) -> Option<SimConfig> {
    match SimConfig::load(path) {
        Ok(mut config) => {
            if seed.is_some() {
                config.global.seed = seed;
            }
            Some(config)
        }
        Err(e) => {
            error!(path, error = %e, "configuration rejected");
            None
        }
    }
}

async fn run(path: &str, seed: Option<u64>, duration: Option<String>) -> ExitCode {
    let Some(config) = load(path, seed) else {
        return ExitCode::FAILURE;
    };

    let transport = Arc::new(MqttTransport::new(
        config.transport.host.clone(),
        config.transport.port,
        config.transport.client_id.clone(),
    ));
    let tokens = Arc::new(StaticTokenProvider::from_env());
    let broker = format!("{}:{}", config.transport.host, config.transport.port);
    let engine = SimulationEngine::new(config, transport, tokens);
    info!(broker, seed = engine.seed(), "starting");

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        let deadline = duration.as_deref().map(parse_duration);
        match deadline {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(limit) => info!("duration elapsed"),
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        info!("shutting down");
        stopper.cancel();
    });

    engine.run(cancel).await;
    ExitCode::SUCCESS
}

fn check(path: &str) -> ExitCode {
    let Some(config) = load(path, None) else {
        return ExitCode::FAILURE;
    };
    println!(
        "ok: {} equipment type(s), {} machine(s), queue capacity {}, broker {}:{}",
        config.equipment.len(),
        config.machines.len(),
        config.global.queue_capacity,
        config.transport.host,
        config.transport.port,
    );
    ExitCode::SUCCESS
}

fn generate(path: &str, ticks: u64, seed: Option<u64>) -> ExitCode {
    let Some(config) = load(path, seed) else {
        return ExitCode::FAILURE;
    };
    let seed = config.global.seed.unwrap_or(0);
    match generate_offline(&config, seed, ticks) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "generation failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_duration(s: &str) -> std::time::Duration {
    let s = s.trim();
    let secs = if let Some(v) = s.strip_suffix('h') {
        v.parse::<u64>().unwrap_or(1) * 3600
    } else if let Some(v) = s.strip_suffix('m') {
        v.parse::<u64>().unwrap_or(1) * 60
    } else if let Some(v) = s.strip_suffix('s') {
        v.parse::<u64>().unwrap_or(60)
    } else {
        s.parse::<u64>().unwrap_or(60)
    };
    std::time::Duration::from_secs(secs)
}
