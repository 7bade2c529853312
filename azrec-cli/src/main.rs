use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use azrec_core::sku::SkuCacheRegistry;

mod catalog;
mod commands;

#[derive(Parser)]
#[command(name = "azrec")]
#[command(about = "Operator tooling for the azrec Azure reconciler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the SKUs of a catalog offered in a location
    Skus {
        /// SKU catalog (JSON array or ARM list response)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Azure location
        #[arg(short, long, env = "AZURE_LOCATION")]
        location: String,

        /// Only show SKUs of this resource type (e.g. virtualMachines)
        #[arg(short = 't', long)]
        resource_type: Option<String>,
    },

    /// Show the availability zones of a location or VM size
    Zones {
        #[arg(short, long)]
        catalog: PathBuf,

        #[arg(short, long, env = "AZURE_LOCATION")]
        location: String,

        /// VM size, e.g. Standard_D2s_v3
        #[arg(short, long)]
        size: Option<String>,
    },

    /// Validate a scale set spec against a SKU catalog
    Validate {
        #[arg(short, long)]
        catalog: PathBuf,

        /// Used when the scale set does not name a location
        #[arg(short, long, env = "AZURE_LOCATION")]
        location: String,

        /// Scale set spec (JSON)
        spec: PathBuf,
    },

    /// Decode persisted long-running operation handles
    Future {
        /// A Future or a list of Futures (JSON)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("azrec=info,azrec_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = SkuCacheRegistry::global();

    let output = match cli.command {
        Commands::Skus {
            catalog,
            location,
            resource_type,
        } => {
            let resource_type = resource_type
                .as_deref()
                .map(commands::parse_resource_type)
                .transpose()?;
            let cache = catalog::load(registry, &catalog, &location).await?;
            commands::skus(&cache, resource_type)
        }

        Commands::Zones {
            catalog,
            location,
            size,
        } => {
            let cache = catalog::load(registry, &catalog, &location).await?;
            commands::zones(&cache, size.as_deref())
        }

        Commands::Validate {
            catalog,
            location,
            spec,
        } => {
            let cache = catalog::load(registry, &catalog, &location).await?;
            commands::validate_spec(&cache, &spec).await?
        }

        Commands::Future { file } => commands::describe_futures(&file).await?,
    };

    println!("{}", output);
    Ok(())
}
