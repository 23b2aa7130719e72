//! dnsproof - Main entry point
//!
//! Domain ownership verification and ACME DNS-01 certificate issuance for
//! user-claimed domains. Results are printed to stdout as JSON; logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{info, warn};

use dnsproof_common::UserId;
use dnsproof_config::{Config, EXAMPLE_CONFIG_TOML};
use dnsproof_issuer::{CertError, DelegationKind, Issuer};

/// Exit status when a DNS record is not visible yet and the command should
/// be retried later (EX_TEMPFAIL)
const EXIT_RETRY_LATER: u8 = 75;

/// dnsproof - Domain ownership proofs and DNS-01 certificates
#[derive(Parser, Debug)]
#[command(name = "dnsproof")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "DNSPROOF_CONFIG", global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a domain for a user
    Register(DomainArgs),

    /// Delete a domain record
    Delete(DomainArgs),

    /// List domain records
    List {
        /// Only records of this user
        #[arg(long = "user")]
        user: Option<String>,
    },

    /// Generate an ownership key to publish as a TXT record on the domain
    GenerateKey(DomainArgs),

    /// Check the published ownership key
    Verify(DomainArgs),

    /// Check A or CNAME delegation to the operator's hosts
    VerifyDelegation {
        #[command(flatten)]
        target: DomainArgs,

        /// Record type to check
        #[arg(long = "type", value_enum, default_value_t = DelegationType::A)]
        kind: DelegationType,
    },

    /// Start certificate issuance and print the DNS-01 record to publish
    RequestCert(DomainArgs),

    /// Finish certificate issuance once the DNS-01 record is published
    CompleteCert(DomainArgs),

    /// Show expiry of the stored certificate of a domain
    CertStatus {
        /// Domain name
        domain: String,
    },

    /// Validate the configuration file and exit
    CheckConfig {
        /// Print an example configuration instead
        #[arg(long = "example")]
        example: bool,
    },
}

#[derive(clap::Args, Debug)]
struct DomainArgs {
    /// User id owning the domain
    user: String,

    /// Domain name
    domain: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DelegationType {
    A,
    Cname,
}

impl From<DelegationType> for DelegationKind {
    fn from(kind: DelegationType) -> Self {
        match kind {
            DelegationType::A => DelegationKind::A,
            DelegationType::Cname => DelegationKind::Cname,
        }
    }
}

#[derive(Serialize)]
struct OwnershipKeyOutput<'a> {
    domain: &'a str,
    zone: Option<&'a str>,
    value: &'a str,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<CertError>() {
            Some(cert_error) if cert_error.is_retryable() => {
                warn!(error = %cert_error, "Not ready yet, retry later");
                eprintln!("{}", cert_error);
                Ok(ExitCode::from(EXIT_RETRY_LATER))
            }
            _ => Err(e),
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::CheckConfig { example } = &cli.command {
        return check_config(cli.config.as_deref(), *example);
    }

    let config = load_config(cli.config.as_deref())?;
    let issuer = Issuer::from_config(&config)
        .await
        .context("Failed to open storage")?;

    match cli.command {
        Commands::Register(args) => {
            let record = issuer
                .registry()
                .register(&args.user_id(), &args.domain)
                .await?;
            print_json(&record)
        }
        Commands::Delete(args) => {
            let removed = issuer
                .registry()
                .delete(&args.user_id(), &args.domain)
                .await?;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
        Commands::List { user } => {
            let user = user.map(UserId::from);
            let records = issuer.registry().list(user.as_ref()).await?;
            print_json(&records)
        }
        Commands::GenerateKey(args) => {
            let record = issuer
                .verifier()
                .generate_key_for(&args.user_id(), &args.domain)
                .await?;
            let ownership = &record.ownership_verification;
            print_json(&OwnershipKeyOutput {
                domain: record.domain_name(),
                zone: ownership.zone.as_deref(),
                value: ownership.key.as_deref().unwrap_or_default(),
                expires_at: ownership.expires_at,
            })
        }
        Commands::Verify(args) => {
            let record = issuer
                .verifier()
                .verify_record_ownership(&args.user_id(), &args.domain)
                .await?;
            print_json(&record.ownership_verification)
        }
        Commands::VerifyDelegation { target, kind } => {
            let record = issuer
                .verifier()
                .verify_record_delegation(&target.user_id(), &target.domain, kind.into())
                .await?;
            print_json(&record.delegation)
        }
        Commands::RequestCert(args) => {
            let outcome = issuer
                .orchestrator()
                .request_certificate(&args.user_id(), &args.domain, issuer.admin_email())
                .await?;
            print_json(&outcome)
        }
        Commands::CompleteCert(args) => {
            let issued = issuer
                .orchestrator()
                .complete_certificate_request(&args.user_id(), &args.domain, issuer.admin_email())
                .await?;
            print_json(&issued)
        }
        Commands::CertStatus { domain } => {
            let status = issuer
                .orchestrator()
                .certificate_status(&domain, chrono::Utc::now())
                .await?;
            print_json(&status)
        }
        Commands::CheckConfig { .. } => Ok(()),
    }
}

impl DomainArgs {
    fn user_id(&self) -> UserId {
        UserId::from(self.user.as_str())
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration file: {}", path);
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            warn!("No configuration file given, using the example configuration");
            Config::example().context("Failed to load example configuration")?
        }
    };

    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

fn check_config(path: Option<&str>, example: bool) -> Result<()> {
    if example {
        print!("{}", EXAMPLE_CONFIG_TOML);
        return Ok(());
    }

    let config = load_config(path)?;
    info!("Configuration test successful:");
    info!("  - CA directory: {}", config.acme.directory_url());
    info!("  - records: {}", config.storage.records_path.display());
    info!("  - blob root: {}", config.storage.blob_root.display());
    info!("  - {} owned host(s)", config.verification.owned_hosts.len());
    info!("  - {} owned CNAME(s)", config.verification.owned_cnames.len());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
