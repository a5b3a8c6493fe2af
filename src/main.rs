use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use frost_sender::config::{self, Config};
use frost_sender::dispatch::{self, Outcome};
use frost_sender::net::SmtpConnector;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Send one HTML message to every address of a list over a single SMTP session
#[derive(Parser, Debug)]
#[command(name = "frost-sender", version)]
struct Opt {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of concurrent workers (overrides `workers` in the config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Accept invalid TLS certificates from the relay
    #[arg(long)]
    insecure_tls: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();
    match run(opt).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every recipient was delivered to.
async fn run(opt: Opt) -> Result<bool> {
    let config = Config::load(&opt.config).await?;
    let credentials = config.credentials()?;
    let body = config::load_body(&config.email.body_file).await?;
    let recipients = config::load_recipients(&config.email.emails_file).await?;
    let workers = opt.workers.or(config.email.workers).unwrap_or(1);

    println!("Host:     {}", credentials.host());
    println!("Port:     {}", credentials.port());
    println!("User:     {}", credentials.username());
    println!("Password: ********");
    println!("Loaded body ({}B)", body.len());
    println!("Loaded emails ({})", recipients.len());
    println!("Workers:  {}", workers);

    let connector = SmtpConnector::new().accept_invalid_certs(opt.insecure_tls);
    let template = config.template(body);

    let report =
        dispatch::dispatch(connector, &credentials, &template, &recipients, workers).await?;

    for result in &report {
        match result.outcome() {
            Outcome::Success => println!("[ OK ] {}", result.recipient()),
            Outcome::Failure { reason } => println!("[FAIL] {}: {}", result.recipient(), reason),
        }
    }
    println!(
        "{} sent, {} failed, {} total",
        report.succeeded_count(),
        report.failed_count(),
        report.len()
    );

    Ok(report.failed_count() == 0)
}
