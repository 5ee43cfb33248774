use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vstate_persist::{FileStorage, InitOutcome, PersistedState, StateManifest};

#[derive(Parser)]
#[command(name = "vstate-cli", about = "CLI tool for versioned persisted state")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print tool version
    Info,
    /// Print the canonical shape and fingerprint of a manifest's schema
    Fingerprint {
        /// Manifest file (YAML or JSON)
        manifest: PathBuf,
        /// Fail if the recorded hash for the current version differs
        #[arg(long)]
        check: bool,
    },
    /// Load the stored state (migrating and validating it) and print it
    Show {
        manifest: PathBuf,
        /// Storage directory
        #[arg(short, long, default_value = "state")]
        dir: PathBuf,
    },
    /// Set one field and persist the result
    Set {
        manifest: PathBuf,
        /// Field name
        field: String,
        /// New value as JSON; bare words are taken as strings
        value: String,
        #[arg(short, long, default_value = "state")]
        dir: PathBuf,
    },
    /// Remove the stored blob
    Clear {
        manifest: PathBuf,
        #[arg(short, long, default_value = "state")]
        dir: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info => {
            println!("vstate-cli v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Fingerprint { manifest, check } => {
            let manifest = load_manifest(&manifest)?;
            let shape = vstate_schema::extract_shape(&manifest.schema)?;
            let digest = vstate_schema::hash(&shape);
            let recorded = manifest.schema_hashes.get(&manifest.current_version);

            println!("key:      {}", manifest.storage_key);
            println!("version:  {}", manifest.current_version);
            println!("shape:    {shape}");
            println!("hash:     {digest}");
            match recorded {
                Some(expected) if *expected == digest => println!("recorded: {expected} (match)"),
                Some(expected) => {
                    println!("recorded: {expected} (DRIFT)");
                    if check {
                        anyhow::bail!(
                            "schema for v{} drifted: recorded {expected}, live {digest}",
                            manifest.current_version
                        );
                    }
                }
                None => println!("recorded: none"),
            }
        }
        Commands::Show { manifest, dir } => {
            let mut state = open_state(&manifest, &dir)?;
            let outcome = state.init().await;
            println!("{}", describe(&outcome));
            println!("{}", serde_json::to_string_pretty(&state.get_all()?)?);
        }
        Commands::Set {
            manifest,
            field,
            value,
            dir,
        } => {
            let mut state = open_state(&manifest, &dir)?;
            state.init().await;
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            state
                .set(&field, value)
                .await
                .with_context(|| format!("setting {field:?}"))?;
            tracing::info!(field = %field, key = state.storage_key(), "field persisted");
            println!("{}", serde_json::to_string_pretty(&state.get_all()?)?);
        }
        Commands::Clear { manifest, dir } => {
            let mut state = open_state(&manifest, &dir)?;
            state.clear().await?;
            tracing::debug!(dir = %dir.display(), "stored blob removed");
            println!("cleared {:?}", state.storage_key());
        }
    }

    Ok(())
}

fn load_manifest(path: &Path) -> anyhow::Result<StateManifest> {
    StateManifest::load(path).with_context(|| format!("loading manifest {}", path.display()))
}

/// Build a manager over a file store. Migrations are code, so the CLI runs
/// without any: data older than the manifest's version resets on `show`
/// without being written back.
fn open_state(manifest: &Path, dir: &Path) -> anyhow::Result<PersistedState> {
    let manifest = load_manifest(manifest)?;
    let storage = FileStorage::open(dir).with_context(|| format!("opening {}", dir.display()))?;
    let state = PersistedState::new(manifest.schema.clone(), manifest.config(), Arc::new(storage), Vec::new())?;
    Ok(state)
}

fn describe(outcome: &InitOutcome) -> String {
    match outcome {
        InitOutcome::AlreadyInitialized => "already initialized".into(),
        InitOutcome::Fresh => "nothing stored: using defaults".into(),
        InitOutcome::Loaded => "loaded stored state".into(),
        InitOutcome::Migrated { from } => format!("migrated from v{from}"),
        InitOutcome::Reset(reason) => format!("stored state discarded: {reason:?}"),
    }
}
