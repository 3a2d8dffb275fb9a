use crate::infra::assemble;
use crate::server;
use bank_intake::config::AppConfig;
use bank_intake::error::AppError;
use bank_intake::statements::DecoderRegistry;
use bank_intake::telemetry;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

#[derive(Parser, Debug)]
#[command(
    name = "Bank Intake",
    about = "Decode bank statements and run the statement intake service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and the background ingestion loop (default command)
    Serve(ServeArgs),
    /// Decode a local statement file and print its summary
    Decode(DecodeArgs),
    /// Poll the configured drop and process what it holds
    Ingest(IngestArgs),
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

#[derive(Args, Debug)]
pub(crate) struct DecodeArgs {
    /// Statement file to decode; the file name picks the first decoder tried
    path: PathBuf,
}

#[derive(Args, Debug, Default)]
pub(crate) struct IngestArgs {
    /// Run a single cycle, print its report, and exit
    #[arg(long)]
    once: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Decode(args) => run_decode(args),
        Command::Ingest(args) => run_ingest(args),
    }
}

fn run_decode(args: DecodeArgs) -> Result<(), AppError> {
    let bytes = std::fs::read(&args.path)?;
    let filename = args
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.path.display().to_string());

    let registry = DecoderRegistry::standard();
    let parsed = registry.decode(&filename, &bytes)?;
    let valid = registry
        .decoder_for(parsed.file_type())
        .is_some_and(|decoder| decoder.validate(&parsed));

    let accounts: Vec<_> = parsed
        .statements()
        .iter()
        .map(|statement| {
            json!({
                "account_id": statement.account_id,
                "transactions": statement.transactions.len(),
                "net_amount": statement.net_amount(),
            })
        })
        .collect();
    let output = json!({
        "file": filename,
        "summary": parsed.summary(),
        "valid": valid,
        "statements": accounts,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
    );
    Ok(())
}

fn run_ingest(args: IngestArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let (_, ingestion) = assemble(&config.ingest)?;

    if !args.once {
        ingestion.run(&AtomicBool::new(false));
        return Ok(());
    }

    let report = ingestion.run_cycle()?;
    let output = json!({
        "report": report,
        "stats": ingestion.monitor().snapshot(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
    );
    Ok(())
}
