mod load;
mod report;

use diffcluster_core::bicluster::bicluster_pairs;
use diffcluster_core::config::DiffclusterConfig;
use diffcluster_core::coverage::cluster_coverage;
use diffcluster_core::matrix::analyze_pairs;

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Worker threads for per-pair analysis
    #[clap(short, long)]
    threads: Option<usize>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cluster coverage counters of a fuzzer run
    Coverage {
        input: PathBuf,
        /// Analyze only the first N counters (0 for all)
        #[clap(long)]
        max_counters: Option<usize>,
    },
    /// Deduplicate differences by fingerprint, per resolver pair
    Fingerprints {
        input: PathBuf,
        /// Clusters shown per resolver pair
        #[clap(long)]
        top: Option<usize>,
    },
    /// Bicluster fuzz cases by their differing keys, per resolver pair
    Bicluster {
        input: PathBuf,
        #[clap(long)]
        cap: Option<usize>,
        #[clap(long)]
        seed: Option<u64>,
    },
}

fn load_config(config_file: Option<PathBuf>) -> Result<DiffclusterConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            DiffclusterConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("diffcluster.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                DiffclusterConfig::load_from_file(&default_config_path)
            } else {
                info!(
                    "No config file specified and default 'diffcluster.toml' not found, using built-in defaults."
                );
                Ok(DiffclusterConfig::default())
            }
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file)?;
    if let Some(threads) = cli.threads {
        config.analysis.threads = threads;
    }
    match &cli.command {
        Command::Coverage { max_counters, .. } => {
            if let Some(max) = max_counters {
                config.coverage.max_counters = *max;
            }
        }
        Command::Fingerprints { top, .. } => {
            if let Some(top) = top {
                config.fingerprint.top_clusters = *top;
            }
        }
        Command::Bicluster { cap, seed, .. } => {
            if let Some(cap) = cap {
                config.bicluster.cap = *cap;
            }
            if let Some(seed) = seed {
                config.bicluster.seed = *seed;
            }
        }
    }
    log::debug!("Effective configuration: {config:#?}");
    config.analysis.configure_thread_pool()?;

    let start_time = Instant::now();
    match cli.command {
        Command::Coverage { input, .. } => {
            let corpus = load::load_counter_corpus(&input, config.coverage.counter_limit())?;
            info!("Loaded {} distinct counters from {:?}", corpus.len(), input);
            for clustering in cluster_coverage(&corpus, &config.coverage.methods)? {
                println!("{}", report::coverage_section(&clustering)?);
            }
        }
        Command::Fingerprints { input, .. } => {
            let pairs = load::load_fingerprints(&input, &config.fingerprint.keep_hyphen)?;
            info!("Loaded {} resolver configurations from {:?}", pairs.len(), input);
            let fingerprint_report = analyze_pairs(pairs);
            println!(
                "{}",
                report::matrix_table("Number of clusters", &fingerprint_report.cluster_counts)?
            );
            println!(
                "{}",
                report::matrix_table("Largest clusters", &fingerprint_report.largest_clusters)?
            );
            print!(
                "{}",
                report::fingerprint_sections(&fingerprint_report, config.fingerprint.top_clusters)?
            );
        }
        Command::Bicluster { input, .. } => {
            let pairs = load::load_key_differences(&input, &config.fingerprint.keep_hyphen)?;
            info!("Loaded {} resolver configurations from {:?}", pairs.len(), input);
            let fitter = config.bicluster.fitter();
            let bounds = config.bicluster.bounds();
            for (pair, result) in bicluster_pairs(pairs, &fitter, &bounds) {
                match result {
                    Ok(result) => println!("{}", report::bicluster_section(&pair, &result)?),
                    Err(e) => println!("# {pair} (Failed: {e})\n"),
                }
            }
        }
    }
    info!("Finished in {:.2?}.", start_time.elapsed());

    Ok(())
}
