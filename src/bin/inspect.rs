//! TStore Inspection Binary
//!
//! Prints the metadata table of a store work folder and, optionally, the key
//! records of every checkpoint file it references. Read-only: the folder is
//! never modified, not even to finish an interrupted metadata replace.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use tstore::checkpoint::{KeyFileReader, ValueFileReader};
use tstore::metadata::{MetadataManager, MetadataTable};
use tstore::Result;

/// TStore work folder inspector
#[derive(Parser, Debug)]
#[command(name = "tstore-inspect")]
#[command(about = "Inspect the checkpoint state of a TStore work folder")]
#[command(version)]
struct Args {
    /// Store work folder
    work_dir: PathBuf,

    /// Also list the key records of each checkpoint file
    #[arg(short, long)]
    keys: bool,

    /// Validate value files as well as key files
    #[arg(long)]
    verify_values: bool,
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tstore=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("Failed to inspect {}: {}", args.work_dir.display(), e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let table = match open_table(args)? {
        Some(table) => table,
        None => {
            println!("{}: no metadata table (empty store)", args.work_dir.display());
            return Ok(());
        }
    };

    let files = table.files();
    println!("checkpoint lsn : {}", table.checkpoint_lsn());
    println!("metadata size  : {} bytes", table.metadata_file_size());
    println!("files          : {}", files.len());
    println!();
    println!(
        "{:>8}  {:<22} {:>10} {:>10} {:>10} {:>12} {:>12}",
        "id", "name", "total", "valid", "deleted", "key bytes", "value bytes"
    );

    for file in &files {
        println!(
            "{:>8}  {:<22} {:>10} {:>10} {:>10} {:>12} {:>12}",
            file.file_id(),
            file.file_name(),
            file.total_number_of_entries(),
            file.number_of_valid_entries(),
            file.number_of_deleted_entries(),
            file.key_file_size(),
            file.value_file_size()
        );
    }

    for file in &files {
        let keys = KeyFileReader::open(&file.key_file_path(), Some(file.key_file_size()))?;
        if args.verify_values {
            let values =
                ValueFileReader::open(&file.value_file_path(), Some(file.value_file_size()))?;
            tracing::info!(
                file_id = file.file_id(),
                values = values.value_count(),
                "Value file verified"
            );
        }
        if !args.keys {
            continue;
        }

        println!();
        println!("{} ({} records)", file.file_name(), keys.entry_count());
        for (key, record) in keys.records() {
            let end = if record.end_sequence_number == tstore::item::OPEN_SEQUENCE_NUMBER {
                "open".to_string()
            } else {
                record.end_sequence_number.to_string()
            };
            println!(
                "  key {:>6} B  {:?} [{}, {})  value @{} ({} B){}",
                key.len(),
                record.kind,
                record.version_sequence_number,
                end,
                record.value_offset,
                record.value_size,
                record.ttl.map(|ttl| format!("  ttl {}ms", ttl)).unwrap_or_default()
            );
        }
    }

    // Nothing else holds the table; release the owner reference
    table.begin_close();
    Ok(())
}

fn open_table(args: &Args) -> Result<Option<std::sync::Arc<MetadataTable>>> {
    let current = MetadataManager::current_path(&args.work_dir);
    let backup = MetadataManager::backup_path(&args.work_dir);
    let path = if current.exists() {
        current
    } else if backup.exists() {
        tracing::warn!("Reading backup metadata file (interrupted replace)");
        backup
    } else {
        return Ok(None);
    };
    MetadataManager::open(&path, &args.work_dir).map(Some)
}
