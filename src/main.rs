//! Kalypso command-line entry point
//!
//! `prepare` builds the anonymous store, `verify` audits it, and `chat`
//! starts the interactive question loop against the prepared store.

use clap::{Parser, Subcommand};
use kalypso::agent::{AgentClient, AgentConfig, Conversation, TurnOutcome};
use kalypso::error::{KalypsoError, Result};
use kalypso::store::registry::KeyRegistry;
use kalypso::store::{AnonStore, PrivateStore};
use kalypso::{Bridge, Settings};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kalypso")]
#[command(about = "Pseudonymizing query bridge for student assessment data", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to kalypso.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },

    /// Build the anonymous store from the private source store
    Prepare,

    /// Audit the anonymous store for surviving identity data
    Verify,

    /// Ask questions interactively through the agent
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kalypso={}", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => init(cli.config.as_deref(), force),
        Commands::Prepare => prepare(cli.config.as_deref()),
        Commands::Verify => verify(cli.config.as_deref()),
        Commands::Chat => chat(cli.config.as_deref()).await,
    }
}

fn init(config: Option<&std::path::Path>, force: bool) -> Result<()> {
    let path = config.unwrap_or_else(|| std::path::Path::new("kalypso.toml"));
    if path.exists() && !force {
        return Err(KalypsoError::Other(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    Settings::write_default(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn prepare(config: Option<&std::path::Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let report = kalypso::pipeline::prepare(&settings)?;

    println!(
        "Anonymous store ready at {}",
        settings.anon_db_path.display()
    );
    println!(
        "  {} students, {} teachers mapped",
        report.students, report.teachers
    );
    println!(
        "  {} rows substituted across {} columns (epoch {})",
        report.substitution.rows_updated(),
        report.substitution.targets.len(),
        report.substitution.epoch
    );
    if !report.substitution.unmapped.is_empty() {
        println!(
            "  WARNING: {} values had no roster entry and were left unchanged",
            report.substitution.unmapped.len()
        );
    }
    Ok(())
}

fn verify(config: Option<&std::path::Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let report = kalypso::pipeline::verify(&settings)?;

    match &report.epoch {
        Some(epoch) => println!("Substitution epoch: {}", epoch),
        None => println!("No substitution epoch recorded"),
    }
    println!("Unredacted display rows: {}", report.unredacted_rows);
    for leak in &report.leaked_keys {
        println!(
            "Surviving {} keys in {}.{}",
            leak.class, leak.table, leak.column
        );
    }

    if report.is_clean() {
        println!("Store is clean");
        Ok(())
    } else {
        Err(KalypsoError::Other(
            "anonymous store failed verification".to_string(),
        ))
    }
}

async fn chat(config: Option<&std::path::Path>) -> Result<()> {
    let settings = Settings::load(config)?;

    let anon = AnonStore::new(&settings.anon_db_path);
    let registry = KeyRegistry::new(PrivateStore::new(&settings.private_db_path));
    let bridge = Bridge::new(anon, registry);

    let client = AgentClient::new(AgentConfig::from_settings(&settings.agent)?);
    let mut conversation = Conversation::new(client, bridge);
    info!("Chat session started against {}", settings.anon_db_path.display());

    println!("Ask about the assessment data (type 'exit' to quit).");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        match conversation.ask(question).await {
            Ok(TurnOutcome::Resolved(answer)) | Ok(TurnOutcome::Narrative(answer)) => {
                println!("{}", answer);
            }
            Err(e) => {
                eprintln!("error: {}", e);
            }
        }
    }

    Ok(())
}
