use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use docsync_core::client::ConfluenceClient;
use docsync_core::config::{ConfluenceConfig, ENV_ADDRESS, ENV_PASSWORD, ENV_USER};
use docsync_core::mappings::collect_mappings;
use docsync_core::reconcile::publish_site;

#[derive(Debug, Parser)]
#[command(
    name = "docsync",
    version,
    about = "Publish content from generated DocFX web sites to Confluence"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Publish a generated DocFX web site into a Confluence space")]
    Publish(PublishArgs),
    #[command(about = "Extract DocFX topic mappings from Confluence as YAML")]
    Mappings(MappingsArgs),
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    #[arg(long, value_name = "URL", help = "The base address of the Confluence server")]
    confluence_address: Option<String>,
    #[arg(
        long,
        value_name = "NAME",
        help = "The user name for authentication to Confluence"
    )]
    confluence_user: Option<String>,
    #[arg(
        long,
        value_name = "PASSWORD",
        help = "The password for authentication to Confluence"
    )]
    confluence_password: Option<String>,
}

impl ConnectionArgs {
    fn resolve(&self) -> Result<ConfluenceConfig> {
        let Some(base_address) = setting(self.confluence_address.as_deref(), ENV_ADDRESS) else {
            bail!(
                "Must specify address of Confluence server using --confluence-address argument or {ENV_ADDRESS} environment variable."
            );
        };
        let Some(username) = setting(self.confluence_user.as_deref(), ENV_USER) else {
            bail!(
                "Must specify user name for authentication to Confluence server using --confluence-user argument or {ENV_USER} environment variable."
            );
        };
        let Some(password) = setting(self.confluence_password.as_deref(), ENV_PASSWORD) else {
            bail!(
                "Must specify password for authentication to Confluence server using --confluence-password argument or {ENV_PASSWORD} environment variable."
            );
        };

        Ok(ConfluenceConfig {
            base_address,
            username,
            password,
        })
    }
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(
        long,
        value_name = "PATH",
        help = "The local file-system path of manifest.json in the generated DocFX web site"
    )]
    docfx_manifest: PathBuf,
    #[arg(
        long,
        value_name = "KEY",
        help = "The key (short name) of the target space in Confluence"
    )]
    confluence_space: String,
}

#[derive(Debug, Args)]
struct MappingsArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(
        long,
        value_name = "KEY",
        help = "Restrict the listing to one Confluence space"
    )]
    confluence_space: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match cli.command {
        Commands::Publish(args) => run_publish(args),
        Commands::Mappings(args) => run_mappings(args),
    }
}

fn run_publish(args: PublishArgs) -> Result<()> {
    let config = args.connection.resolve()?;
    let mut client = ConfluenceClient::new(&config)?;

    let report = publish_site(&mut client, &args.confluence_space, &args.docfx_manifest)?;

    println!(
        "Published {} pages to space '{}' ({} created, {} updated).",
        report.pages.len(),
        args.confluence_space,
        report.created,
        report.updated - report.created,
    );
    if !report.xref_warnings.is_empty() {
        println!("{} xref links could not be resolved.", report.xref_warnings.len());
    }
    Ok(())
}

fn run_mappings(args: MappingsArgs) -> Result<()> {
    let config = args.connection.resolve()?;
    let mut client = ConfluenceClient::new(&config)?;

    let mappings = collect_mappings(&mut client, args.confluence_space.as_deref())?;

    println!("# Page mappings from {}", config.base_address);
    print!("{}", serde_yaml::to_string(&mappings)?);
    Ok(())
}

/// Command-line value first, then the environment; blank values count as
/// absent.
fn setting(argument: Option<&str>, env_key: &str) -> Option<String> {
    if let Some(value) = argument {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}
