use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "posture-session")]
#[command(about = "Live posture monitoring session client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and stream its status until Ctrl-C
    Watch {
        /// Settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List sessions recorded by the backend
    History {
        /// Settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Keep polling and print sessions as they are recorded
        #[arg(long)]
        follow: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    posture_session_lib::init_logging();

    match cli.command {
        Commands::Watch { config } => posture_session_lib::watch(config).await?,
        Commands::History { config, follow } => {
            posture_session_lib::history(config, follow).await?
        }
    }

    Ok(())
}
