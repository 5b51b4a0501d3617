use anyhow::Result;
use clap::{Parser, Subcommand};

mod scenarios;

use scenarios::ScenarioConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Kernel threads to start
    #[arg(long, global = true, default_value_t = 4)]
    threads: usize,

    /// Rounds each thread runs
    #[arg(long, global = true, default_value_t = 1000)]
    iterations: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Threads increment a shared counter under a mutex
    Mutex,

    /// Threads share a limited number of semaphore permits
    Semaphore {
        /// Initial semaphore count
        #[arg(long, default_value_t = 2)]
        permits: u64,
    },

    /// Readers and writers contend for a read/write lock
    Rwlock {
        /// How many of the threads are writers
        #[arg(long, default_value_t = 1)]
        writers: usize,
    },

    /// Drive threads through suspend, resume, block and kill
    Lifecycle,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ScenarioConfig {
        threads: cli.threads,
        iterations: cli.iterations,
        ..ScenarioConfig::default()
    };

    match cli.command {
        Commands::Mutex => {
            println!(
                "Running {} threads x {} mutex rounds...",
                config.threads, config.iterations
            );
            let report = scenarios::mutex(&config)?;
            println!("Counter: {} (expected {})", report.counter, report.expected);
        }
        Commands::Semaphore { permits } => {
            println!("Running {} threads over {} permits...", config.threads, permits);
            let report = scenarios::semaphore(&config, permits)?;
            println!(
                "Most threads inside at once: {} (limit {})",
                report.max_inside, permits
            );
        }
        Commands::Rwlock { writers } => {
            println!(
                "Running {} threads, {} of them writers...",
                config.threads, writers
            );
            let report = scenarios::rwlock(&config, writers)?;
            println!(
                "Reads: {}, writes: {}, most concurrent readers: {}",
                report.reads, report.writes, report.max_readers
            );
        }
        Commands::Lifecycle => {
            println!("Cycling {} threads...", config.threads);
            let report = scenarios::lifecycle(&config)?;
            println!(
                "Suspensions: {}, blocks: {}, killed: {}",
                report.suspensions, report.blocks, report.killed
            );
        }
    }

    println!("Scenario completed.");
    Ok(())
}
