use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storyfork::api::AuthService;
use storyfork::config::{default_config_path, AppConfig};

#[derive(Parser)]
#[command(name = "storyfork")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reader forks, branch points and pull requests for interactive fiction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Config file (defaults to the platform config dir)
        #[arg(long, env = "STORYFORK_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a default config file
    InitConfig {
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Print a PBKDF2 hash for the credentials file
    HashPassword { password: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = AppConfig::load(config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            storyfork::init_tracing(&config.logging.level);
            tracing::info!("storyfork v{} starting", env!("CARGO_PKG_VERSION"));
            storyfork::serve(config).await
        }
        Command::InitConfig { path, force } => {
            storyfork::init_tracing("warn");
            let path = path.unwrap_or_else(default_config_path);
            storyfork::init_config(&path, force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Command::HashPassword { password } => {
            println!("{}", AuthService::hash_password(&password)?);
            Ok(())
        }
    }
}
