//! Schema Registry CLI
//!
//! Commands for registering local schemas and inspecting a registry.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use registry_serde::{
    wire, CompatibilityType, RecordNameSchemaManager, RegistryClient, RegistrySettings,
    VersionSelector,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-serde")]
#[command(about = "Schema Registry client and Avro wire-format tools")]
struct Cli {
    /// Config file (defaults to registry.toml and REGISTRY__* variables)
    #[arg(short, long)]
    config: Option<String>,

    /// Registry URL, overriding configuration
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register every local schema under its record name
    Register {
        /// Directory of *.json schemas
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Suffix appended to every schema name (e.g. "_dev1")
        #[arg(short, long)]
        suffix: Option<String>,
        /// Compatibility applied to every subject
        #[arg(long)]
        compatibility: Option<CompatibilityType>,
    },

    /// Print the schema registered with an ID
    Schema {
        id: u32,
    },

    /// List the versions of a subject
    Versions {
        subject: String,
    },

    /// Show the latest version of a subject
    Latest {
        subject: String,
    },

    /// Show or change a subject's compatibility
    Compatibility {
        subject: String,
        /// New compatibility level
        #[arg(long)]
        set: Option<CompatibilityType>,
    },

    /// Print the schema ID in a hex-encoded wire-format message
    DecodeHeader {
        hex: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = RegistrySettings::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        settings.registry.url = url;
    }
    let connect = || RegistryClient::from_settings(&settings);

    match cli.command {
        Commands::Register {
            root,
            suffix,
            compatibility,
        } => {
            let root = root.unwrap_or_else(|| settings.schema_root());
            let suffix = suffix.unwrap_or_else(|| settings.schemas.suffix.clone());
            let compatibility = compatibility.or(settings.schemas.compatibility);

            let manager = RecordNameSchemaManager::from_dir(connect()?, &root, &suffix)?;
            println!("Registering {} schemas from {}", manager.schema_names().len(), root.display());
            manager.register_schemas(compatibility).await?;

            for name in manager.schema_names() {
                if let Some(id) = manager.id_of(&name) {
                    println!("  {} -> id {}", name, id);
                }
            }
        }

        Commands::Schema { id } => {
            let body = connect()?.get_schema_by_id(id).await?;
            println!("{}", serde_json::to_string_pretty(body.definition())?);
        }

        Commands::Versions { subject } => {
            let versions = connect()?.get_versions(&subject).await?;
            if versions.is_empty() {
                println!("No versions registered for {}", subject);
            }
            for version in versions {
                println!("  {}", version);
            }
        }

        Commands::Latest { subject } => {
            let (version, body) = connect()?
                .get_schema_by_subject(&subject, VersionSelector::Latest)
                .await?;
            println!("{}", version);
            println!("{}", serde_json::to_string_pretty(body.definition())?);
        }

        Commands::Compatibility { subject, set } => match set {
            Some(level) => {
                let level = connect()?.set_compatibility(&subject, level).await?;
                println!("{}: {}", subject, level);
            }
            None => {
                let level = connect()?.get_compatibility(&subject).await?;
                println!("{}: {}", subject, level);
            }
        },

        Commands::DecodeHeader { hex } => {
            let message = decode_hex(&hex)?;
            let (id, payload) = wire::decode(&message)?;
            println!("schema id: {}", id);
            println!("payload:   {} bytes", payload.len());
        }
    }

    Ok(())
}

fn decode_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let text = text.trim().trim_start_matches("0x");
    if !text.is_ascii() || text.len() % 2 != 0 {
        bail!("hex input must be an even number of ASCII hex digits");
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .with_context(|| format!("invalid hex at offset {}", i))
        })
        .collect()
}
