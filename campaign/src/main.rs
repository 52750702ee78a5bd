//! Headless driver for the campaign engine.
//!
//! Reads a line protocol on stdin and maps each command onto an engine
//! operation. There is no UI rendering.
//!
//! ```bash
//! cargo run -p campaign -- --config campaign.toml
//! cargo run -p campaign -- --load saved.json
//! ```

mod headless;

use campaign_core::EngineConfig;
use std::path::PathBuf;

/// Command line options.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    load: Option<PathBuf>,
    verbose: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> Args {
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    parsed.config = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--load" => {
                if let Some(path) = args.get(i + 1) {
                    parsed.load = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => parsed.help = true,
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args);
    if args.help {
        print_help();
        return Ok(());
    }

    // Logs go to stderr so stdout stays a clean transcript.
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;

    headless::run_headless(config, args.load).await
}

fn print_help() {
    println!("campaign - headless procedural campaign driver");
    println!();
    println!("USAGE:");
    println!("    campaign [--config <path>] [--load <snapshot>] [--verbose]");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>    TOML engine configuration");
    println!("    --load <path>      Start from a saved JSON snapshot");
    println!("    -v, --verbose      Debug logging (RUST_LOG overrides)");
    println!("    -h, --help         Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("    ANTHROPIC_API_KEY     Required");
    println!("    CAMPAIGN_MODEL        Override the model");
    println!("    CAMPAIGN_ACT_COUNT    Override the number of acts");
    println!();
    headless::print_commands();
}
