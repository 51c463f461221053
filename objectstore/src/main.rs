//! `objectstore <file>...`: print the structure of object and index files.
//!
//! Paths that do not exist are looked up under `OBJECTSTORE_DIRECTORY`.

use std::path::{Path, PathBuf};

use objectstore::codec;
use objectstore::config::StoreConfig;
use objectstore::error::StoreError;
use objectstore::index::IndexDefinition;
use objectstore::objects::ObjectBTreeFile;
use objectstore::storage::btree::{BTree, RawCursor};
use objectstore::storage::header::FileKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Number of leading keys printed per file.
const SAMPLE_KEYS: usize = 5;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "objectstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        eprintln!("usage: objectstore <file>...");
        std::process::exit(1);
    }

    let mut failed = false;
    for file in &files {
        let path = resolve(&config, file);
        if let Err(e) = inspect(&path, config.cache_blocks) {
            tracing::error!("Failed to inspect {}: {e}", path.display());
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}

fn resolve(config: &StoreConfig, file: &str) -> PathBuf {
    let path = PathBuf::from(file);
    if path.exists() {
        path
    } else {
        config.directory.join(file)
    }
}

fn inspect(path: &Path, cache_blocks: usize) -> Result<(), StoreError> {
    let tree = BTree::open(path, cache_blocks)?;
    let header = tree.header();

    println!("{}", path.display());
    println!("  kind:       {}", header.kind);
    println!("  blocks:     {}", tree.file().total_pages());
    println!("  depth:      {}", tree.depth()?);
    println!("  entries:    {}", tree.len()?);
    println!("  generation: {}", tree.generation());

    let definition = match header.kind {
        FileKind::Index => {
            let definition = IndexDefinition::from_bytes(&header.descriptor)?;
            println!("  index:      {definition}");
            Some(definition)
        }
        FileKind::Objects => None,
    };

    let mut cursor = RawCursor::new();
    let mut shown = 0;
    while shown < SAMPLE_KEYS && cursor.move_next(&tree)? {
        let Some(key) = cursor.key() else { break };
        match &definition {
            Some(definition) => {
                let decoded = codec::decode_key(key, definition)?;
                println!("  {:>4}  {} {:?}", shown, decoded.object_id, decoded.fields);
            }
            None => {
                let id = ObjectBTreeFile::object_id_of(key)?;
                let size = cursor.value(&tree)?.map_or(0, |payload| payload.len());
                println!("  {shown:>4}  {id} ({size} bytes)");
            }
        }
        shown += 1;
    }

    Ok(())
}
