//! Command-line access to a medstore database.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and show what is in it
//! medstore --data-dir ./data init
//! medstore --data-dir ./data info
//!
//! # Records of one patient
//! medstore by-index medicalRecords patientId p1
//!
//! # Every queued offline action, one JSON object per line
//! medstore dump offlineActions
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use medstore::{Key, LocalStore};
use medstore_core::{init_logging, LogConfig, LogFormat, StoreConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medstore")]
#[command(about = "Inspect and maintain a medstore database")]
struct Cli {
    /// Directory holding the database file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the database path, version and record counts
    Info,

    /// Create the database or upgrade it to the configured version
    Init,

    /// List collections
    Collections,

    /// Count records in a collection
    Count { collection: String },

    /// Print every record of a collection as JSON lines
    Dump { collection: String },

    /// Print one record
    Get {
        collection: String,
        /// Primary key; integer for auto-increment collections, text otherwise
        key: String,
    },

    /// Print records whose indexed field equals a value
    ByIndex {
        collection: String,
        index: String,
        value: String,
        /// Match the value as an integer instead of text
        #[arg(long)]
        int: bool,
    },

    /// Remove every record of a collection
    Clear { collection: String },

    /// Delete the database file
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into()))?;

    let config = load_config(&cli)?;
    let store = LocalStore::new(config.clone())?;
    if !store.is_available() {
        bail!("Storage unavailable at {}", config.data_dir.display());
    }

    match cli.command {
        Commands::Info => {
            let conn = store.open().await?;
            if let Some(path) = conn.path() {
                println!("Path:     {}", path.display());
            }
            println!("Database: {}", conn.name());
            println!("Version:  {}", conn.version());
            for upgrade in conn.upgrade_history() {
                println!("  upgraded to {} at {}", upgrade.version, upgrade.applied_at);
            }
            conn.close();

            for name in store.schema().collection_names() {
                let count = store.count_raw(name).await?;
                println!("{:<18} {}", name, count);
            }
        }

        Commands::Init => {
            let conn = store.open().await?;
            println!("{} at version {}", conn.name(), conn.version());
            conn.close();
        }

        Commands::Collections => {
            for collection in store.schema().collections {
                let indexes = collection.index_names();
                if indexes.is_empty() {
                    println!("{} (key: {})", collection.name, collection.key_path);
                } else {
                    println!(
                        "{} (key: {}; indexes: {})",
                        collection.name,
                        collection.key_path,
                        indexes.join(", ")
                    );
                }
            }
        }

        Commands::Count { collection } => {
            println!("{}", store.count_raw(&collection).await?);
        }

        Commands::Dump { collection } => {
            for record in store.get_all_raw(&collection).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::Get { collection, key } => {
            let key = primary_key(&store, &collection, &key)?;
            match store.get_raw(&collection, key.clone()).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("No record {} in {}", key, collection),
            }
        }

        Commands::ByIndex {
            collection,
            index,
            value,
            int,
        } => {
            let records = store
                .get_by_index_raw(&collection, &index, Key::parse(&value, int)?)
                .await?;
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::Clear { collection } => {
            let removed = store.clear_raw(&collection).await?;
            println!("Removed {} records from {}", removed, collection);
        }

        Commands::Drop => {
            store.delete_database().await?;
            println!("Deleted {}", config.database_path().display());
        }
    }

    Ok(())
}

/// Auto-increment collections have integer keys, every other one text.
fn primary_key(store: &LocalStore, collection: &str, raw: &str) -> anyhow::Result<Key> {
    let schema = store.schema().collection(collection)?;
    Ok(Key::parse(raw, schema.auto_increment)?)
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Loading config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    tracing::debug!(path = %config.database_path().display(), "Using database");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_numeric_text_key_is_found() {
        let store = LocalStore::in_memory();
        store
            .add_raw("patients", serde_json::json!({"id": "1001"}))
            .await
            .unwrap();
        store
            .add_raw("offlineActions", serde_json::json!({"status": "pending"}))
            .await
            .unwrap();

        let key = primary_key(&store, "patients", "1001").unwrap();
        assert_eq!(key, Key::from("1001"));
        assert!(store.get_raw("patients", key).await.unwrap().is_some());

        let key = primary_key(&store, "offlineActions", "1").unwrap();
        assert_eq!(key, Key::Int(1));
        assert!(store.get_raw("offlineActions", key).await.unwrap().is_some());

        assert!(primary_key(&store, "offlineActions", "one").is_err());
        assert!(primary_key(&store, "appointments", "1").is_err());
    }

    #[test]
    fn test_by_index_flags() {
        let cli = Cli::parse_from([
            "medstore",
            "--log-format",
            "json",
            "by-index",
            "offlineActions",
            "timestamp",
            "1700000000000",
            "--int",
        ]);
        assert_eq!(cli.log_format, LogFormatArg::Json);
        assert!(matches!(LogFormat::from(cli.log_format), LogFormat::Json));
        match cli.command {
            Commands::ByIndex { value, int, .. } => {
                assert!(int);
                assert_eq!(Key::parse(&value, int).unwrap(), Key::Int(1_700_000_000_000));
            }
            _ => panic!("expected by-index"),
        }

        let cli = Cli::parse_from(["medstore", "by-index", "medicalRecords", "patientId", "42"]);
        assert_eq!(cli.log_format, LogFormatArg::Compact);
        match cli.command {
            Commands::ByIndex { value, int, .. } => {
                assert_eq!(Key::parse(&value, int).unwrap(), Key::from("42"));
            }
            _ => panic!("expected by-index"),
        }
    }

    #[test]
    fn test_data_dir_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("medstore.json");
        std::fs::write(&file, r#"{"database_name": "clinic", "data_dir": "/nowhere"}"#).unwrap();

        let cli = Cli::parse_from([
            "medstore",
            "--config",
            file.to_str().unwrap(),
            "--data-dir",
            dir.path().to_str().unwrap(),
            "count",
            "patients",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database_name, "clinic");
        assert_eq!(config.data_dir, dir.path());
    }
}
