use rumormesh::{
    init_logging, production_config, GossipConfig, GossipNet, Message, RandomTopology,
    TopologyProvider, BASE_PORT,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tokio::time::{timeout, Duration, Instant};

#[derive(Debug, Clone)]
struct ExperimentConfig {
    nodes: usize,
    min_degree: usize,
    max_degree: usize,
    experiments: usize,
    round_ms: u64,
    log_dir: PathBuf,
    data_file: PathBuf,
}

impl ExperimentConfig {
    fn from_args(args: &[String]) -> Self {
        Self {
            nodes: args.get(1).and_then(|s| s.parse().ok()).unwrap_or(50),
            min_degree: args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5),
            max_degree: args.get(3).and_then(|s| s.parse().ok()).unwrap_or(7),
            experiments: args.get(4).and_then(|s| s.parse().ok()).unwrap_or(10),
            round_ms: args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100),
            log_dir: args.get(6).map(PathBuf::from).unwrap_or_else(|| "logs".into()),
            data_file: args
                .get(7)
                .map(PathBuf::from)
                .unwrap_or_else(|| "convergence.data".into()),
        }
    }

    /// Upper bound on one experiment; a partitioned run never converges
    fn experiment_timeout(&self) -> Duration {
        Duration::from_millis(self.round_ms * 2_000).max(Duration::from_secs(30))
    }
}

async fn run_experiment(
    config: &ExperimentConfig,
    topology: &impl TopologyProvider,
) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    let gossip = GossipConfig::default().with_round_interval(Duration::from_millis(config.round_ms));
    let mut net = GossipNet::build(topology, gossip)?;
    let mut feedback = net.set_test_mode()?;

    net.start(&config.log_dir).await?;
    net.make_rumour(0, Message::rumor(1, 0, "initial message")).await?;

    let rounds = match timeout(config.experiment_timeout(), feedback.recv()).await {
        Ok(Some(convergence)) => Some(convergence.rounds),
        Ok(None) | Err(_) => None,
    };

    net.stop().await;
    Ok(rounds)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&production_config())?;

    let args: Vec<String> = std::env::args().collect();
    let config = ExperimentConfig::from_args(&args);

    println!("rumormesh convergence experiments");
    println!("Usage: cargo run --bin convergence [nodes] [min_degree] [max_degree] [experiments] [round_ms] [log_dir] [data_file]");
    println!();
    println!("Configuration:");
    println!("   Nodes: {}", config.nodes);
    println!("   Degree: {}..={}", config.min_degree, config.max_degree);
    println!("   Experiments: {}", config.experiments);
    println!("   Round: {} ms", config.round_ms);
    println!("   Logs: {}", config.log_dir.display());
    println!("   Data: {}", config.data_file.display());
    println!();

    // One overlay for every experiment, so runs differ only in gossip randomness.
    let topology = RandomTopology::new(config.nodes, config.min_degree, config.max_degree)
        .with_base_port(BASE_PORT)
        .topology()?;

    let mut data = BufWriter::new(File::create(&config.data_file)?);
    writeln!(data, "{}", config.nodes)?;

    let start_time = Instant::now();
    let mut converged = Vec::with_capacity(config.experiments);
    for experiment in 0..config.experiments {
        match run_experiment(&config, &topology).await? {
            Some(rounds) => {
                println!("   Experiment {}: {} rounds", experiment + 1, rounds);
                write!(data, "{} ", rounds)?;
                converged.push(rounds);
            }
            None => println!("   Experiment {}: did not converge", experiment + 1),
        }
    }
    writeln!(data)?;
    data.flush()?;

    println!();
    println!(
        "Completed {} experiments in {:.2} seconds",
        config.experiments,
        start_time.elapsed().as_secs_f64()
    );
    if !converged.is_empty() {
        let total: u64 = converged.iter().sum();
        println!(
            "   Converged: {}/{}, mean {:.1} rounds, max {} rounds",
            converged.len(),
            config.experiments,
            total as f64 / converged.len() as f64,
            converged.iter().max().copied().unwrap_or_default()
        );
    }

    Ok(())
}
