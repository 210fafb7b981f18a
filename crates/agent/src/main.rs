#![forbid(unsafe_code)]

mod cli;
mod shutdown;
mod startup;

use std::path::Path;

use anyhow::Result;
use infrastructure::config::AgentConfig;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("ctsweeper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Some(Command::CheckConfig) => {
            let config = AgentConfig::load(Path::new(&cli.config))?;
            println!(
                "{}: ok (map {}, sweep every {}s, {} stale-NAT services)",
                cli.config,
                config.conntrack.map_path,
                config.conntrack.sweep.interval_secs,
                config.stale_nat_services()?.len(),
            );
            Ok(())
        }

        // No subcommand = run the sweeper daemon
        None => startup::run(&cli).await,
    }
}
