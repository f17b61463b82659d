mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use semver::Version;

#[derive(Parser, Debug)]
#[command(name = "shipr")]
#[command(version)]
#[command(about = "Ships the Nimbus platform onto a host")]
#[command(long_about = "Ships the Nimbus platform onto a host.\n\n\
    <SEMVER> must be a valid semantic version; the published values differ \
    per script, check the release notes for the exact ones.")]
struct Args {
    /// Get the Nimbus release key (if needed), run pre-flight checks, then
    /// download, verify, and offer to run the installation script
    #[arg(
        short = 'i',
        long,
        value_name = "SEMVER",
        conflicts_with_all = ["debug", "backup"],
        value_parser = parse_version
    )]
    install: Option<Version>,

    /// Get the Nimbus release key (if needed), then download, verify, and
    /// offer to run the debug script
    #[arg(
        short = 'd',
        long,
        value_name = "SEMVER",
        conflicts_with_all = ["install", "backup"],
        value_parser = parse_version
    )]
    debug: Option<Version>,

    /// Get the Nimbus release key (if needed), then download and verify the
    /// backup & restore script
    #[arg(
        short = 'b',
        long,
        value_name = "SEMVER",
        conflicts_with_all = ["install", "debug"],
        value_parser = parse_version
    )]
    backup: Option<Version>,

    /// Customer service account file; discovered in the working directory
    /// when omitted
    #[arg(short = 's', long, value_name = "FILE")]
    service_account: Option<PathBuf>,

    /// Logging level
    #[arg(
        short = 'l',
        long,
        default_value = "info",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"]
    )]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long)]
    verbose: bool,

    /// Answer yes to confirmation prompts (non-interactive runs)
    #[arg(short = 'y', long)]
    yes: bool,
}

fn parse_version(value: &str) -> Result<Version, String> {
    Version::parse(value.trim_start_matches('v')).map_err(|e| format!("{}: {}", value, e))
}

fn init_logging(args: &Args) {
    let filter = if args.verbose { "debug" } else { &args.log_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_secs()
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(commands::dispatch(args))
}
