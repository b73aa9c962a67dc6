mod commands;
mod logging;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "archivist",
    version,
    about = "Copy legacy customer records from a relational store into object storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one migration pass
    Migrate {
        /// Path to migration YAML file
        migration: PathBuf,
        /// Ignore the saved resume point and scan from the first id
        #[arg(long)]
        from_start: bool,
        /// Print the run summary as JSON only
        #[arg(long)]
        json: bool,
    },
    /// Validate migration configuration and connectivity
    Check {
        /// Path to migration YAML file
        migration: PathBuf,
    },
    /// Look up one record through the read router
    Get {
        /// Path to migration YAML file
        migration: PathBuf,
        /// Record id
        id: i64,
    },
    /// List records whose last migration attempt failed
    Failures {
        /// Path to migration YAML file
        migration: PathBuf,
    },
    /// Serve the read and migrate HTTP endpoints
    Serve {
        /// Path to migration YAML file
        migration: PathBuf,
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Migrate {
            migration,
            from_start,
            json,
        } => commands::migrate::execute(&migration, from_start, json).await,
        Commands::Check { migration } => commands::check::execute(&migration).await,
        Commands::Get { migration, id } => commands::get::execute(&migration, id).await,
        Commands::Failures { migration } => commands::failures::execute(&migration).await,
        Commands::Serve { migration, listen } => {
            commands::serve::execute(&migration, listen).await
        }
    }
}
