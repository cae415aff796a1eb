use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;
mod utils;

/// µDCN Command Line Interface
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is alive
    Ping,

    /// Ask the daemon to open an outbound face (currently always rejected;
    /// the daemon has no transport-level dialer wired in)
    NewFace {
        /// Address to dial
        addr: String,

        /// Use UDP instead of TCP
        #[clap(long)]
        udp: bool,
    },

    /// Register a forwarding entry for a name prefix
    PrefixReg {
        /// Name prefix (NDN URI format)
        prefix: String,

        /// Next-hop face id, packed as `(generation << 20) | slot`
        face: u64,

        /// Forwarding flags bitmask
        #[clap(long, default_value = "1")]
        flags: u8,

        /// Entry lifetime in seconds
        #[clap(long, default_value = "300")]
        lifetime: u32,
    },

    /// Manage the forwarding table (FIB)
    Fib {
        #[clap(subcommand)]
        cmd: FibCommands,
    },

    /// Send an Interest and print the ContentObject response
    Interest {
        /// Name to request (NDN URI format)
        name: String,

        /// Timeout in milliseconds
        #[clap(short, long, default_value = "4000")]
        timeout: u64,
    },

    /// Publish content under a name
    Publish {
        /// Name to publish under (NDN URI format)
        name: String,

        /// Content to publish (string)
        content: String,

        /// Freshness period in seconds
        #[clap(short, long, default_value = "60")]
        ttl: u32,
    },

    /// Benchmark the forwarder by sending many Interests
    Benchmark {
        /// Number of Interests to send
        #[clap(short, long, default_value = "1000")]
        count: usize,

        /// Name prefix to use for the benchmark
        #[clap(short, long, default_value = "/benchmark")]
        prefix: String,

        /// Number of concurrent connections
        #[clap(short, long, default_value = "1")]
        concurrent: usize,
    },
}

#[derive(Subcommand)]
enum FibCommands {
    /// Show all routes in the FIB
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    match cli.command {
        Commands::Ping => commands::ping::run().await?,
        Commands::NewFace { addr, udp } => commands::newface::run(addr, udp).await?,
        Commands::PrefixReg { prefix, face, flags, lifetime } => {
            commands::prefixreg::run(prefix, face, flags, lifetime).await?
        }
        Commands::Fib { cmd } => match cmd {
            FibCommands::Show => commands::fib::show().await?,
        },
        Commands::Interest { name, timeout } => commands::interest::send_interest(name, timeout).await?,
        Commands::Publish { name, content, ttl } => commands::publish::publish_data(name, content, ttl).await?,
        Commands::Benchmark { count, prefix, concurrent } => {
            commands::benchmark::run_benchmark(count, prefix, concurrent).await?
        }
    }

    Ok(())
}
