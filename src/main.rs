//! mptdb CLI - Command line interface for the trie store
//!
//! Keys and values are given and printed as hex. Every mutating command
//! commits and advances `HEAD`, since each invocation is a separate process.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mptdb::{Config, Database, Error, Hash, HEAD};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mptdb")]
#[command(about = "A persistent, versioned Merkle-Patricia trie store")]
#[command(version)]
struct Cli {
    /// Path to the database directory
    #[arg(short, long, default_value = "trie.db")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Config file (defaults to the user config directory when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Version to read or build on: a root hash or a ref name (default HEAD)
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    /// Insert or overwrite a key
    Put {
        /// Key as hex
        key: String,
        /// Value as hex
        value: String,
    },

    /// Get the value of a key
    Get {
        /// Key as hex
        key: String,
    },

    /// Delete a key
    Delete {
        /// Key as hex
        key: String,
    },

    /// Show the root hash of a version
    Root,

    /// List key/value pairs in key order
    Dump {
        /// Only keys starting with this hex prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Show database status
    Status,

    /// Delete nodes not reachable from any ref
    Prune,

    /// Reclaim space in the data log
    Compact,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;
    let db = Database::open(&cli.database, config)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;

    let (value, found) = run(&cli, &db)?;
    db.close()?;

    output(&cli.format, &value)?;
    if !found {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute a command, returning its output and whether it found what it
/// looked for
fn run(cli: &Cli, db: &Database) -> anyhow::Result<(serde_json::Value, bool)> {
    let value = match &cli.command {
        Commands::Init => serde_json::json!({
            "status": "ok",
            "message": format!("Created database at {}", cli.database.display())
        }),

        Commands::Put { key, value } => {
            let key = decode_hex("key", key)?;
            let value = decode_hex("value", value)?;
            let mut trie = db.open_trie(resolve_root(db, cli.root.as_deref())?)?;
            trie.update(&key, &value)?;
            let root = db.commit(&mut trie, HEAD)?;
            serde_json::json!({
                "status": "ok",
                "root": root.to_hex()
            })
        }

        Commands::Get { key } => {
            let key_bytes = decode_hex("key", key)?;
            let trie = db.open_trie(resolve_root(db, cli.root.as_deref())?)?;
            match trie.get(&key_bytes)? {
                Some(value) => serde_json::json!({
                    "key": key,
                    "value": hex::encode(value)
                }),
                None => {
                    return Ok((
                        serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                        false,
                    ))
                }
            }
        }

        Commands::Delete { key } => {
            let key_bytes = decode_hex("key", key)?;
            let mut trie = db.open_trie(resolve_root(db, cli.root.as_deref())?)?;
            let removed = trie.delete(&key_bytes)?;
            let root = db.commit(&mut trie, HEAD)?;
            serde_json::json!({
                "status": "ok",
                "removed": removed,
                "root": root.to_hex()
            })
        }

        Commands::Root => {
            let root = resolve_root(db, cli.root.as_deref())?;
            serde_json::json!({
                "root": root.to_hex(),
                "empty": root.is_zero()
            })
        }

        Commands::Dump { prefix } => {
            let prefix = match prefix {
                Some(prefix) => decode_hex("prefix", prefix)?,
                None => Vec::new(),
            };
            let trie = db.open_trie(resolve_root(db, cli.root.as_deref())?)?;
            let items: Vec<_> = trie
                .entries_with_prefix(&prefix)?
                .into_iter()
                .map(|(key, value)| {
                    serde_json::json!({
                        "key": hex::encode(key),
                        "value": hex::encode(value)
                    })
                })
                .collect();
            serde_json::json!({
                "count": items.len(),
                "entries": items
            })
        }

        Commands::Status => serde_json::to_value(db.status()?)?,

        Commands::Prune => {
            let removed = db.prune_unreferenced()?;
            serde_json::json!({
                "status": "ok",
                "removed": removed
            })
        }

        Commands::Compact => {
            db.compact()?;
            serde_json::json!({
                "status": "ok",
                "message": "Compaction complete"
            })
        }
    };

    Ok((value, true))
}

fn decode_hex(what: &str, input: &str) -> anyhow::Result<Vec<u8>> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).with_context(|| format!("Invalid hex {}: {}", what, input))
}

/// A root hash, a ref name, or `HEAD` when nothing is given. An unset ref
/// names the empty trie.
fn resolve_root(db: &Database, reference: Option<&str>) -> anyhow::Result<Hash> {
    let reference = reference.unwrap_or(HEAD);

    if let Some(root) = db.get_ref(reference)? {
        return Ok(root);
    }
    if reference == HEAD {
        return Ok(Hash::ZERO);
    }

    Ok(Hash::from_hex(reference).map_err(|_| Error::InvalidHash(reference.to_string()))?)
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
