use clap::{Parser, Subcommand};
use puerta_redis::config::{Config, ConfigError};
use puerta_redis::probe::LivenessProbe;
use puerta_redis::Cluster;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "puerta-redis")]
#[command(about = "Cluster topology discovery and slot routing core for a Redis Cluster proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "puerta-team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the liveness probe against the configured seed nodes until interrupted
    Run {
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
    },
    /// Fetch the cluster topology once and print the resulting node/slot layout
    Inspect {
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
    },
    /// Generate an example configuration file
    Config {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Inspect { config } => inspect(config)?,
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run the background liveness probe against every seed node until the
/// process is interrupted. There is no event loop or request routing here —
/// both are out of scope for this core (spec.md §1) — so "running" means
/// keeping the probe's reachability table warm for an operator or a future
/// host process to query.
async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| format!("failed to load config from {:?}: {}", config_path, e))?;
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        seeds = ?config.cluster.seed_nodes,
        "starting liveness probe"
    );

    let probe = LivenessProbe::new();
    let interval = Duration::from_secs(config.cluster.probe_interval_sec.max(1));
    let timeout = config.cluster.connection_timeout();
    let addresses = config.cluster.seed_nodes.clone();

    tokio::select! {
        _ = probe.run(addresses, interval, timeout) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down probe");
        }
    }

    Ok(())
}

/// One-shot topology fetch against the first reachable seed node, printing
/// the resulting node list and slot ownership.
fn inspect(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| format!("failed to load config from {:?}: {}", config_path, e))?;
    init_logging(&config);

    let mut cluster = Cluster::new(0);
    let timeout = config.cluster.connection_timeout();
    let keepalive = config.cluster.keepalive_interval();

    let mut last_error = None;
    for seed in &config.cluster.seed_nodes {
        let Some((ip, port)) = seed.rsplit_once(':').and_then(|(ip, port)| {
            port.parse::<u16>().ok().map(|p| (ip.to_string(), p))
        }) else {
            last_error = Some(format!("invalid seed node address: {}", seed));
            continue;
        };

        match cluster.fetch_configuration(&ip, port, timeout, keepalive) {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                error!(seed, error = %e, "topology fetch against seed failed");
                last_error = Some(e.to_string());
            }
        }
    }

    if let Some(message) = last_error {
        return Err(format!("topology fetch failed against every seed node: {}", message).into());
    }

    println!("Cluster topology ({} node(s)):", cluster.nodes().count());
    for (_, node) in cluster.nodes() {
        let role = if node.is_replica { "replica" } else { "primary" };
        println!(
            "  {} [{}] name={} slots={}",
            node.address(),
            role,
            node.name.as_deref().unwrap_or("<unknown>"),
            node.slots.len()
        );
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Generating configuration file: {:?}", output);
    Config::create_example_config(&output)
        .map_err(|e| format!("failed to generate config: {}", e))?;
    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  puerta-redis inspect --config {:?}", output);
    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Seed nodes: {} configured", config.cluster.seed_nodes.len());
            for (i, node) in config.cluster.seed_nodes.iter().enumerate() {
                println!("    {}: {}", i + 1, node);
            }
            println!("  Max redirects: {}", config.cluster.max_redirects);
            println!("  Probe interval: {}s", config.cluster.probe_interval_sec);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            Err(Box::new(e))
        }
    }
}

fn show_version() {
    println!("puerta-redis v{}", env!("CARGO_PKG_VERSION"));
    println!("Cluster topology discovery and slot routing core for a Redis Cluster proxy");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Components:");
    println!("  • Slot hashing (CRC16, {{tag}} hash-tag convention)");
    println!("  • Topology parser (CLUSTER NODES, myself/replica/migration records)");
    println!("  • Slot index (sparse range map, O(log n) point lookup)");
    println!("  • Quiescence-based reconfiguration (drain, reset, refetch, replay)");
    println!("  • Per-worker cluster duplication");
}
