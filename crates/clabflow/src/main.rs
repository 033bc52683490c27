mod commands;
mod report;
mod settings;

use clap::{Args, Parser, Subcommand};
use report::Exit;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clabflow")]
#[command(about = "Bring containerlab topologies under Nokia EDA management", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// EDA base URL
    #[arg(long, env = "EDA_URL", global = true)]
    pub eda_url: Option<String>,
    /// EDA user (also the Keycloak admin when no client secret is given)
    #[arg(long, env = "EDA_USER", global = true)]
    pub eda_user: Option<String>,
    #[arg(long, env = "EDA_PASSWORD", global = true, hide_env_values = true)]
    pub eda_password: Option<String>,
    /// Keycloak secret of the `eda` client
    #[arg(long, env = "EDA_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub client_secret: Option<String>,
    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,
    /// Config file (default: discovered)
    #[arg(long, env = "CLABFLOW_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the topology in EDA, then bootstrap its nodes
    Install {
        /// Containerlab topology file
        topology: PathBuf,
        /// Prefix of the topology namespace
        #[arg(long)]
        namespace_prefix: Option<String>,
        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Show the plan without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Only synchronise resources
        #[arg(long)]
        skip_bootstrap: bool,
        /// Nodes bootstrapped in parallel
        #[arg(long)]
        workers: Option<usize>,
        /// Afterwards wait up to this many seconds for EDA to synchronise the nodes
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },
    /// Delete every resource of a topology from EDA
    Remove {
        /// Topology name
        topology: String,
        #[arg(long)]
        namespace_prefix: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show whether EDA has synchronised the topology's nodes
    Status {
        topology: PathBuf,
        #[arg(long)]
        namespace_prefix: Option<String>,
        /// Keep polling until every node is ready or this many seconds pass
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
        /// Seconds between polls
        #[arg(long, default_value_t = commands::status::DEFAULT_INTERVAL)]
        interval: u64,
    },
    /// Load and validate a topology file
    Validate {
        topology: PathBuf,
    },
    /// Print the resources a topology maps to as YAML manifests
    Generate {
        topology: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        namespace_prefix: Option<String>,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info,clabflow=debug",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<Exit> {
    let global = &cli.global;
    let settings = match &cli.command {
        Commands::Version => {
            println!("clabflow {}", env!("CARGO_PKG_VERSION"));
            return Ok(Exit::Success);
        }
        Commands::Validate { topology } => return commands::validate::handle(topology),
        _ => match settings::Settings::load(global) {
            Ok(settings) => settings,
            Err(e) => {
                report::print_error(&e);
                return Ok(Exit::Invalid);
            }
        },
    };

    match cli.command {
        Commands::Generate {
            topology,
            output,
            namespace_prefix,
        } => {
            let prefix = settings.namespace_prefix(namespace_prefix.as_deref());
            commands::generate::handle(&topology, output.as_deref(), &prefix)
        }
        Commands::Install {
            topology,
            namespace_prefix,
            timeout,
            dry_run,
            skip_bootstrap,
            workers,
            wait,
        } => {
            let options = commands::install::InstallOptions {
                topology,
                namespace_prefix: settings.namespace_prefix(namespace_prefix.as_deref()),
                timeout,
                dry_run,
                skip_bootstrap,
                workers,
                wait,
            };
            commands::install::handle(global, &settings, options).await
        }
        Commands::Remove {
            topology,
            namespace_prefix,
            timeout,
        } => {
            let prefix = settings.namespace_prefix(namespace_prefix.as_deref());
            commands::remove::handle(global, &settings, &topology, &prefix, timeout).await
        }
        Commands::Status {
            topology,
            namespace_prefix,
            wait,
            interval,
        } => {
            let options = commands::status::StatusOptions {
                topology,
                namespace_prefix: settings.namespace_prefix(namespace_prefix.as_deref()),
                wait,
                interval,
            };
            commands::status::handle(global, &settings, options).await
        }
        Commands::Version | Commands::Validate { .. } => Ok(Exit::Success),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let exit = match run(cli).await {
        Ok(exit) => exit,
        Err(e) => {
            report::print_error(&e);
            Exit::Aborted
        }
    };
    std::process::exit(exit.code());
}
