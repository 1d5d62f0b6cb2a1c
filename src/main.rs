//! pagebtree - load and inspect b-tree index files

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use pagebtree::access::btree::descriptor::{IndexColumn, IndexDefinition, IndexId};
use pagebtree::access::{DataType, MemoryTable, PageBtreeIndex, Row, TableId, Value};
use pagebtree::storage::meta::IndexMeta;
use pagebtree::storage::{PageStore, StoreConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;

/// pagebtree - a disk-backed b-tree secondary index
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a store and fill an index with random rows
    Load {
        /// Database file
        #[arg(short, long)]
        file: PathBuf,

        /// Number of rows to insert
        #[arg(short, long, default_value = "10000")]
        rows: u64,

        /// Page size in bytes
        #[arg(short, long, default_value = "4096")]
        page_size: usize,

        /// Seed for the random values
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Open a store and print every index in it
    Scan {
        /// Database file
        #[arg(short, long)]
        file: PathBuf,

        /// Page size in bytes
        #[arg(short, long, default_value = "4096")]
        page_size: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Load {
            file,
            rows,
            page_size,
            seed,
        } => load(file, rows, page_size, seed),
        Command::Scan { file, page_size } => scan(file, page_size),
    }
}

fn load(file: PathBuf, rows: u64, page_size: usize, seed: u64) -> Result<()> {
    let config = StoreConfig::default().with_page_size(page_size);
    let store = PageStore::create(&file, config).context("Failed to create store")?;
    let table = Arc::new(MemoryTable::new(
        TableId(1),
        "data",
        vec![DataType::Int64, DataType::Varchar],
    ));
    let definition = IndexDefinition::new(
        IndexId(1),
        "idx_data_value",
        vec![IndexColumn::new(0, "value", DataType::Int64)],
    );
    let mut index = PageBtreeIndex::create(store.clone(), table.clone(), definition)
        .context("Failed to create index")?;

    let mut rng = StdRng::seed_from_u64(seed);
    let max = (rows as i64).saturating_mul(10).max(1);
    for key in 1..=rows as i64 {
        let row = Row::new(
            key,
            vec![Value::Int64(rng.gen_range(0..max)), Value::String(format!("row{}", key))],
        );
        table.insert(row.clone())?;
        index
            .add(&row)
            .with_context(|| format!("Failed to add row {}", key))?;
    }
    index.close()?;
    let pages = store.page_count()?;
    store.close().context("Failed to close store")?;

    println!("Loaded {} rows into {}", index.row_count(), file.display());
    println!("  pages: {}", pages);
    println!("  memory per page: {}", index.memory_per_page());
    Ok(())
}

/// A table shaped well enough to decode the rows of `meta`.
fn table_for(meta: &IndexMeta) -> Arc<MemoryTable> {
    let column_count = meta.columns.iter().map(|c| c.column_id + 1).max().unwrap_or(0);
    let mut column_types = vec![DataType::Varchar; column_count];
    for column in &meta.columns {
        column_types[column.column_id] = column.data_type;
    }
    Arc::new(MemoryTable::new(meta.table_id, "scan", column_types))
}

fn scan(file: PathBuf, page_size: usize) -> Result<()> {
    let config = StoreConfig::default().with_page_size(page_size);
    let store = PageStore::open(&file, config).context("Failed to open store")?;
    if store.is_recovery_running() {
        println!("Store was rolled back to its last checkpoint");
    }
    println!(
        "{}: {} pages, {} free",
        file.display(),
        store.page_count()?,
        store.free_page_count()?
    );

    for meta in store.index_metas()? {
        let index = PageBtreeIndex::open(store.clone(), table_for(&meta), IndexDefinition::from(&meta))
            .with_context(|| format!("Failed to open index {}", meta.name))?;
        println!("index {} (root page {})", index.name(), index.root_page_id());
        println!("  rows: {}", index.row_count());
        if index.need_rebuild() {
            println!("  needs rebuild");
        }
        let first = index.find_first_or_last(true)?;
        if let Some(row) = first.search_row() {
            println!("  first: {}", row);
        }
        let last = index.find_first_or_last(false)?;
        if let Some(row) = last.search_row() {
            println!("  last: {}", row);
        }
    }
    if store.is_recovery_running() {
        store.finish_recovery()?;
    }
    store.close().context("Failed to close store")?;
    Ok(())
}
