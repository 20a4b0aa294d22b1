mod import;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use canopy_core::{
    chunk_stats, commit_payload, diff_chunks, gc_stats, live_roots, sweep, ChunkConfig,
    Dataset, FileSystemChunkStore, Hash, Kind, Type, Value, ValueStore,
};

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Content-addressed versioned value store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a CSV file into a dataset
    Import {
        /// Path to the CSV file (first row is the header)
        csv_path: PathBuf,

        /// Path to the chunk store directory
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,

        /// Dataset name to commit into
        #[arg(short, long)]
        dataset: String,

        /// Worker threads (0 = number of CPUs)
        #[arg(short, long, default_value = "0")]
        parallelism: usize,
    },

    /// Print a dataset's head value as JSON
    Show {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,

        dataset: String,
    },

    /// Show commit history of a dataset
    Log {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,

        dataset: String,

        /// Maximum number of commits to show
        #[arg(short, long)]
        max_count: Option<usize>,
    },

    /// List datasets and their heads
    Datasets {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,
    },

    /// Compare the chunks reachable from two dataset heads
    Diff {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,

        old: String,
        new: String,
    },

    /// Report or collect unreachable chunks
    Gc {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,

        /// Report statistics without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Chunk size and shape statistics for all live data
    Stats {
        #[arg(short, long, default_value = ".canopy")]
        store: PathBuf,
    },
}

fn open_value_store(path: &PathBuf) -> anyhow::Result<ValueStore> {
    let store = FileSystemChunkStore::new(path)
        .with_context(|| format!("opening chunk store at {}", path.display()))?;
    Ok(ValueStore::new(Arc::new(store), ChunkConfig::production()))
}

fn dataset_head(vs: &ValueStore, name: &str) -> anyhow::Result<Hash> {
    match vs.chunks().get_root(name)? {
        Some(h) => Ok(h),
        None => bail!("dataset '{}' has no head", name),
    }
}

/// Render a value as JSON for inspection. Maps with string keys become
/// objects; refs stay opaque hashes.
fn value_to_json(vs: &ValueStore, v: &Value) -> anyhow::Result<serde_json::Value> {
    Ok(match v {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(_) => serde_json::Value::String(vs.string_text(v)?),
        Value::Blob(_) => serde_json::json!({
            "blob": { "bytes": v.sequence_len().unwrap_or(0), "hash": v.hash().to_string() }
        }),
        Value::List(_) => {
            let mut out = Vec::new();
            for item in vs.list_items(v)? {
                out.push(value_to_json(vs, &item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Set(_) => {
            let mut out = Vec::new();
            for item in vs.set_items(v)? {
                out.push(value_to_json(vs, &item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Map(_) => {
            let entries = vs.map_entries(v)?;
            let all_string_keys = entries.iter().all(|(k, _)| k.kind() == Kind::String);
            if all_string_keys {
                let mut out = serde_json::Map::new();
                for (k, val) in entries {
                    out.insert(vs.string_text(&k)?, value_to_json(vs, &val)?);
                }
                serde_json::Value::Object(out)
            } else {
                let mut out = Vec::new();
                for (k, val) in entries {
                    out.push(serde_json::Value::Array(vec![
                        value_to_json(vs, &k)?,
                        value_to_json(vs, &val)?,
                    ]));
                }
                serde_json::Value::Array(out)
            }
        }
        Value::Ref(r) => serde_json::json!({ "ref": r.target().to_string() }),
        Value::Struct(s) => {
            let mut fields = Vec::new();
            for f in s.fields() {
                fields.push(value_to_json(vs, f)?);
            }
            let mut obj = serde_json::Map::new();
            obj.insert(
                "struct".to_string(),
                serde_json::Value::String(s.schema().to_string()),
            );
            obj.insert("fields".to_string(), serde_json::Value::Array(fields));
            if let Some((idx, val)) = s.branch() {
                obj.insert("branch".to_string(), serde_json::json!(idx));
                obj.insert("branch_value".to_string(), value_to_json(vs, val)?);
            }
            serde_json::Value::Object(obj)
        }
        Value::Type(t) => serde_json::Value::String(type_to_string(t)),
    })
}

fn type_to_string(t: &Type) -> String {
    match t {
        Type::Struct(def) => format!("struct {}", def.name),
        Type::Schema(h) => format!("schema {}", h),
        other => format!("{:?}", other),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            csv_path,
            store,
            dataset,
            parallelism,
        } => {
            let vs = open_value_store(&store)?;
            let ds = Dataset::new(vs.clone(), &dataset)?;
            let (rows, head) = import::import_csv(&vs, &ds, &csv_path, parallelism)?;
            println!("Imported {} rows into '{}'", rows, dataset);
            println!("Head: {}", head);
        }

        Commands::Show { store, dataset } => {
            let vs = open_value_store(&store)?;
            let ds = Dataset::new(vs.clone(), &dataset)?;
            match ds.head_value()? {
                Some(value) => {
                    let json = value_to_json(&vs, &value)?;
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                None => println!("dataset '{}' has no head", dataset),
            }
        }

        Commands::Log {
            store,
            dataset,
            max_count,
        } => {
            let vs = open_value_store(&store)?;
            let ds = Dataset::new(vs.clone(), &dataset)?;
            let mut current = ds.head()?;
            let mut shown = 0usize;
            while let Some(hash) = current {
                if let Some(max) = max_count {
                    if shown >= max {
                        break;
                    }
                }
                let commit = vs.read_value(&hash)?;
                let payload = commit_payload(&commit)?;
                println!("commit {}", hash);
                println!("    value {} ({})", payload.hash(), payload.kind().name());
                println!();
                shown += 1;
                current = ds.parents_of(&commit)?.into_iter().next();
            }
            if shown == 0 {
                println!("dataset '{}' has no commits", dataset);
            }
        }

        Commands::Datasets { store } => {
            let vs = open_value_store(&store)?;
            let mut roots = vs.chunks().list_roots()?;
            roots.sort_by(|a, b| a.0.cmp(&b.0));
            if roots.is_empty() {
                println!("no datasets");
            }
            for (name, head) in roots {
                println!("{}\t{}", name, head);
            }
        }

        Commands::Diff { store, old, new } => {
            let vs = open_value_store(&store)?;
            let old_head = dataset_head(&vs, &old)?;
            let new_head = dataset_head(&vs, &new)?;
            let diff = diff_chunks(vs.chunks().as_ref(), &old_head, &new_head)?;
            println!("shared chunks:  {}", diff.shared);
            println!("added chunks:   {}", diff.added.len());
            println!("removed chunks: {}", diff.removed.len());
        }

        Commands::Gc { store, dry_run } => {
            let vs = open_value_store(&store)?;
            let roots = live_roots(vs.chunks().as_ref())?;
            let stats = if dry_run {
                gc_stats(vs.chunks().as_ref(), &roots)?
            } else {
                sweep(vs.chunks().as_ref(), &roots)?
            };
            let action = if dry_run { "found" } else { "removed" };
            println!(
                "{} chunks total, {} reachable, {} garbage {} ({:.1}%)",
                stats.total_chunks,
                stats.reachable_chunks,
                stats.garbage_chunks,
                action,
                stats.garbage_percent()
            );
        }

        Commands::Stats { store } => {
            let vs = open_value_store(&store)?;
            let roots = live_roots(vs.chunks().as_ref())?;
            let stats = chunk_stats(vs.chunks().as_ref(), &roots)?;
            println!("chunks:      {}", stats.chunks);
            println!("  leaves:    {}", stats.leaf_chunks);
            println!("  metas:     {}", stats.meta_chunks);
            println!("  other:     {}", stats.other_chunks);
            println!("total bytes: {}", stats.total_bytes);
            println!(
                "chunk size:  min {} / avg {:.0} / max {}",
                stats.min_bytes,
                stats.avg_bytes(),
                stats.max_bytes
            );
        }
    }

    Ok(())
}
