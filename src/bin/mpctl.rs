//! Operator utility CLI.
//!
//! `mpctl get token` acquires an access token with the configured operator
//! credentials; `mpctl create jwk` mints a fresh signing key set. Both exist
//! so operators can debug credentials without deploying anything.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use maskinporten_operator::authority::AuthorityClient;
use maskinporten_operator::clock;
use maskinporten_operator::config::Config;
use maskinporten_operator::context::OperatorContext;
use maskinporten_operator::crypto::CryptoService;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mpctl", about = "Maskinporten operator utility commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get commands
    Get {
        #[command(subcommand)]
        what: GetCommands,
    },
    /// Create commands
    Create {
        #[command(subcommand)]
        what: CreateCommands,
    },
}

#[derive(Subcommand)]
enum GetCommands {
    /// Get a Maskinporten access token using the configured credentials
    Token(TokenArgs),
}

#[derive(Args)]
struct TokenArgs {
    /// Environment file to load configuration from
    #[arg(long, default_value = "local.env")]
    env_file: PathBuf,
    /// Print configuration information to stderr
    #[arg(long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum CreateCommands {
    /// Create a JSON Web Key Set with a fresh signing key
    Jwk(JwkArgs),
}

#[derive(Args)]
struct JwkArgs {
    /// Common name for the certificate
    #[arg(long, default_value = "default-cert")]
    cert_common_name: String,
    /// Format JSON output with indentation
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Get {
            what: GetCommands::Token(args),
        } => get_token(args).await,
        Commands::Create {
            what: CreateCommands::Jwk(args),
        } => create_jwk(args),
    }
}

async fn get_token(args: TokenArgs) -> Result<()> {
    let context = OperatorContext::discover();
    let config = Config::load(&context, Some(&args.env_file))
        .with_context(|| format!("failed to load config from '{}'", args.env_file.display()))?;

    if args.verbose {
        eprintln!("Configuration loaded from: {}", args.env_file.display());
        eprintln!("Authority URL: {}", config.api.authority_url);
        eprintln!("Self Service URL: {}", config.api.self_service_url);
        eprintln!("Client ID: {}", config.api.client_id);
        eprintln!("Scope: {}", config.api.scope);
        eprintln!("---");
    }

    let client = AuthorityClient::new(config.api, &context, clock::system())
        .context("failed to create authority client")?;
    let token = client.access_token().await.context("failed to get access token")?;

    println!("{}", token.access_token);
    Ok(())
}

fn create_jwk(args: JwkArgs) -> Result<()> {
    let context = Arc::new(OperatorContext::discover());
    let crypto = CryptoService::new(context, clock::system(), Box::new(StdRng::from_entropy()));

    let jwks = crypto.create_jwks(&args.cert_common_name)?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&jwks)?
    } else {
        serde_json::to_string(&jwks)?
    };

    println!("{json}");
    Ok(())
}
