// src/main.rs
use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use sslfleet::app::App;
use sslfleet::config::{CliOverrides, RunConfig};

#[derive(Parser)]
#[command(name = "sslfleet")]
#[command(about = "Fleet-wide HTTPS migration and contact discovery for multi-tenant installs")]
struct Args {
    #[command(subcommand)]
    command: Cli,

    #[arg(long, global = true, help = "Log every resolution and probe step")]
    verbose: bool,

    #[arg(long, short, global = true, help = "Path to the configuration file")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cli {
    /// Migrate one or more tenants to be served via HTTPS
    Migrate {
        #[arg(
            long,
            help = "A single tenant id, a single domain, or a comma-separated list of either"
        )]
        site: String,

        #[arg(long, help = "Report the replacements without making them")]
        dry_run: bool,

        #[arg(long, help = "Override the root URL used in the rewrite pair")]
        url: Option<String>,

        #[arg(long, help = "Override the table-namespace prefix")]
        prefix: Option<String>,

        #[arg(long, help = "Write the run report to this file")]
        output: Option<PathBuf>,
    },

    /// Report tenants hosting protected content on mapped domains
    ContactReport {
        #[arg(long, help = "Compute the report without writing cache or export files")]
        dry_run: bool,

        #[arg(long, help = "Override the table-namespace prefix")]
        prefix: Option<String>,

        #[arg(long, help = "Write the report to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "sslfleet=debug"
    } else {
        "sslfleet=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Cli::Migrate {
            site,
            dry_run,
            url,
            prefix,
            output,
        } => {
            let config = RunConfig::load(
                args.config.as_deref(),
                CliOverrides {
                    dry_run,
                    url,
                    prefix,
                    output,
                },
            )?;
            let app = App::connect(config).await?;
            app.migrate(&site).await
        }
        Cli::ContactReport {
            dry_run,
            prefix,
            output,
        } => {
            let config = RunConfig::load(
                args.config.as_deref(),
                CliOverrides {
                    dry_run,
                    url: None,
                    prefix,
                    output,
                },
            )?;
            let app = App::connect(config).await?;
            app.contact_report().await
        }
    }
}
