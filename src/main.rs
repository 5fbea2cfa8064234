use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use netgather::device::{Credential, read_inventory};
use netgather::password::prompt_secret;
use netgather::session::{
    CommandBatch, Orchestrator, SecurityLevel, SessionSettings, SshConnector, aggregate_lines,
    json_report,
};

/// Environment variable holding the password for unattended runs.
const PASSWORD_ENV: &str = "NETGATHER_PASSWORD";

/// Collect diagnostic command output from every device in a hosts file.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    after_help = "The password is read from NETGATHER_PASSWORD when set, otherwise prompted for."
)]
struct Args {
    /// Hosts file: one `<address> <prompt identity>` per line
    hosts_file: PathBuf,

    /// SSH username shared by every device
    username: String,

    /// SSH port
    #[arg(long, default_value_t = netgather::config::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the prompt to come back; 0 waits forever
    #[arg(long, default_value_t = netgather::config::DEFAULT_RESPONSE_TIMEOUT.as_secs())]
    timeout: u64,

    /// Seconds allowed for connect and authentication
    #[arg(long, default_value_t = netgather::config::DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,

    /// Maximum sessions open at once; unlimited when omitted
    #[arg(long)]
    max_parallel: Option<usize>,

    /// SSH algorithm profile
    #[arg(long, value_enum, default_value_t = Security::Legacy)]
    security: Security,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Security {
    Secure,
    Balanced,
    Legacy,
}

impl From<Security> for SecurityLevel {
    fn from(value: Security) -> Self {
        match value {
            Security::Secure => SecurityLevel::Secure,
            Security::Balanced => SecurityLevel::Balanced,
            Security::Legacy => SecurityLevel::LegacyCompatible,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl Args {
    fn settings(&self) -> SessionSettings {
        SessionSettings {
            port: self.port,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            response_timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            max_parallel: self.max_parallel,
            security: self.security.into(),
            ..SessionSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let devices = read_inventory(&args.hosts_file)
        .with_context(|| format!("loading hosts from {}", args.hosts_file.display()))?;
    let secret = match std::env::var(PASSWORD_ENV) {
        Ok(password) => Zeroizing::new(password),
        Err(_) => prompt_secret()?,
    };
    let credential = Credential::from_secret(args.username.clone(), secret)?;
    info!(
        "loaded {} devices from {}",
        devices.len(),
        args.hosts_file.display()
    );

    let settings = args.settings();
    let orchestrator = Orchestrator::new(SshConnector::new(settings.clone()), settings);
    let outcomes = orchestrator
        .run(devices, credential, CommandBatch::default())
        .await;

    match args.format {
        Format::Text => {
            for line in aggregate_lines(&outcomes) {
                println!("{line}");
            }
        }
        Format::Json => println!("{}", json_report(&outcomes)?),
    }
    Ok(())
}
