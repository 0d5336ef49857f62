//! jackc CLI: compile a `.jack` file, or every `.jack` file at the top
//! level of a directory, to sibling `.vm` files.

use clap::Parser as ClapParser;
use jackc::driver;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "jackc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile Jack source to VM-language instructions", long_about = None)]
struct Cli {
    /// A .jack file, or a directory containing .jack files at its top
    /// level (not recursive)
    path: PathBuf,

    /// Raise log verbosity (-v for info, -vv for debug); overridden by
    /// RUST_LOG when set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = driver::validate_path(&cli.path) {
        eprintln!("jackc: {}", err);
        process::exit(1);
    }

    match driver::run(&cli.path) {
        Ok(count) => {
            tracing::info!(count, "compilation finished");
        }
        Err(err) => {
            eprintln!("jackc: {}", err);
            process::exit(1);
        }
    }
}
