use crate::infra::build_tracker;
use crate::server;
use case_tracker::config::AppConfig;
use case_tracker::error::AppError;
use case_tracker::telemetry;
use case_tracker::tracker::RefreshMode;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "case-tracker",
    about = "Watch citizenship case status pages and mail applicants when their case moves",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler and HTTP service (default command)
    Serve(ServeArgs),
    /// Refresh configured applicants once and print the outcome as JSON
    Refresh(RefreshArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RefreshArgs {
    /// Mail every applicant even when their case has not changed
    #[arg(long)]
    pub(crate) force: bool,
    /// Only refresh the applicant with this `type:identifier` key; a failed
    /// cycle then exits with an error
    #[arg(long, value_name = "KEY")]
    pub(crate) applicant: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Refresh(args) => refresh_once(args).await,
    }
}

async fn refresh_once(args: RefreshArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let tracker = build_tracker(&config.tracker)?;
    let mode = if args.force {
        RefreshMode::Forced
    } else {
        RefreshMode::OnDemand
    };
    let rendered = match args.applicant {
        Some(key) => {
            let report = tracker.refresh_applicant(&key, mode).await?;
            serde_json::to_string_pretty(&report)
        }
        None => serde_json::to_string_pretty(&tracker.refresh(mode).await),
    }
    .map_err(std::io::Error::other)?;
    println!("{rendered}");
    Ok(())
}
