use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{bail, Result};
use tracing_subscriber::{fmt, EnvFilter};

use palisade::runner;
use palisade::settings::Settings;
use palisade::store::PolicyStore;
use palisade::suite::parse_suite_document;
use palisade::web;

#[derive(Parser, Debug)]
#[command(
    name = "palisade",
    version,
    about = "Attribute-based access control decision engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load policies and serve the check API over HTTP
    Serve,
    /// Load and validate policies, then exit
    Compile,
    /// Run declarative test suites against the loaded policies
    Test {
        /// Directory containing `.kdl` suite files
        #[arg(short, long, default_value = "suites")]
        suites: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // Nothing serves with a broken policy set: every subcommand loads the
    // full store up front and aborts on the first load error.
    let store = PolicyStore::load(&settings.policies.dir)?;
    if store.is_empty() {
        tracing::warn!(
            dir = %settings.policies.dir.display(),
            "no policies loaded; every check will deny"
        );
    }

    match cli.command {
        Command::Serve => {
            web::serve(&settings, store).await?;
        }
        Command::Compile => {
            tracing::info!(
                kinds = store.kinds().count(),
                rules = store.rule_count(),
                "policies compiled cleanly"
            );
        }
        Command::Test { suites } => {
            run_suites(&store, &suites)?;
        }
    }

    Ok(())
}

fn run_suites(store: &PolicyStore, dir: &PathBuf) -> Result<()> {
    if !dir.is_dir() {
        bail!("suites directory `{}` does not exist", dir.display());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(palisade::errors::PalisadeError::Io)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "kdl").unwrap_or(false))
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("no `.kdl` suite files found in `{}`", dir.display());
    }

    let mut failed = 0usize;
    for path in &paths {
        let contents =
            std::fs::read_to_string(path).map_err(palisade::errors::PalisadeError::Io)?;
        let suite = parse_suite_document(&contents)?;
        let report = runner::run(store, &suite)?;
        println!("{report}\n");
        if !report.passed() {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} suites failed", paths.len());
    }
    Ok(())
}
