//! Parallel CSV import.
//!
//! The reader tags each row with its source index and feeds a worker pool;
//! workers build one `Map {field -> String}` value per row and hand back
//! `(index, ref)` pairs; the collector sorts by index so the final List
//! matches source order regardless of worker completion order, then commits
//! it in a single head update.

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context};
use canopy_core::{CoreResult, Dataset, Hash, Ref, Value, ValueStore};
use tracing::info;

struct RowWithIndex {
    fields: Vec<String>,
    index: usize,
}

/// Import a CSV file into a dataset as a List of Refs to row Maps.
///
/// Returns the number of rows imported and the new head commit hash.
pub fn import_csv(
    vs: &ValueStore,
    dataset: &Dataset,
    path: &Path,
    parallelism: usize,
) -> anyhow::Result<(usize, Hash)> {
    let workers = if parallelism == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else {
        parallelism
    };

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV header row")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() {
        bail!("CSV header row is empty");
    }
    info!(fields = headers.len(), workers, "starting import");

    let start = Instant::now();
    let (row_tx, row_rx) = mpsc::sync_channel::<RowWithIndex>(4096);
    let row_rx = Arc::new(Mutex::new(row_rx));
    let (ref_tx, ref_rx) = mpsc::channel::<(usize, CoreResult<Hash>)>();

    let refs = thread::scope(|scope| -> anyhow::Result<Vec<Ref>> {
        for _ in 0..workers {
            let row_rx = Arc::clone(&row_rx);
            let ref_tx = ref_tx.clone();
            let headers = &headers;
            scope.spawn(move || {
                loop {
                    let row = {
                        let rx = match row_rx.lock() {
                            Ok(rx) => rx,
                            Err(_) => return,
                        };
                        match rx.recv() {
                            Ok(row) => row,
                            Err(_) => return,
                        }
                    };
                    let result = row_to_ref(vs, headers, &row.fields);
                    if ref_tx.send((row.index, result)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(ref_tx);

        // Reader: tag rows with their source index.
        let mut expected = 0usize;
        for (index, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("decoding CSV row {}", index + 1))?;
            let fields: Vec<String> = record.iter().map(|f| f.to_string()).collect();
            if fields.len() != headers.len() {
                bail!(
                    "row {} has {} fields, header has {}",
                    index + 1,
                    fields.len(),
                    headers.len()
                );
            }
            row_tx
                .send(RowWithIndex { fields, index })
                .context("worker pool shut down early")?;
            expected += 1;
        }
        drop(row_tx);

        // Collector: sort by index so the List matches source order.
        let mut tagged: Vec<(usize, Hash)> = Vec::with_capacity(expected);
        for (index, result) in ref_rx {
            tagged.push((index, result?));
        }
        tagged.sort_by_key(|(index, _)| *index);
        Ok(tagged.into_iter().map(|(_, h)| Ref::new(h)).collect())
    })?;

    let count = refs.len();
    let list = vs.new_list(refs.into_iter().map(Value::Ref).collect())?;
    let head = dataset.commit(list)?;

    info!(
        rows = count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        head = %head,
        "import committed"
    );
    Ok((count, head))
}

fn row_to_ref(vs: &ValueStore, headers: &[String], fields: &[String]) -> CoreResult<Hash> {
    let mut entries = Vec::with_capacity(fields.len());
    for (name, value) in headers.iter().zip(fields) {
        entries.push((vs.new_string(name)?, vs.new_string(value)?));
    }
    let map = vs.new_map(entries)?;
    vs.write_value(&map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{ChunkConfig, MemoryChunkStore};
    use std::io::Write;

    fn setup() -> (ValueStore, Dataset) {
        let store = Arc::new(MemoryChunkStore::new());
        let vs = ValueStore::new(store, ChunkConfig::small_test());
        let ds = Dataset::new(vs.clone(), "csv").unwrap();
        (vs, ds)
    }

    fn write_csv(rows: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "city,population").unwrap();
        for i in 0..rows {
            writeln!(file, "city{},{}", i, i * 1000).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_import_preserves_source_order() {
        let (vs, ds) = setup();
        let file = write_csv(200);

        let (count, _head) = import_csv(&vs, &ds, file.path(), 4).unwrap();
        assert_eq!(count, 200);

        let list = ds.head_value().unwrap().unwrap();
        assert_eq!(vs.list_len(&list).unwrap(), 200);

        // rows come back in source order regardless of worker scheduling
        for i in [0usize, 57, 199] {
            let r = vs.list_get(&list, i as u64).unwrap().unwrap();
            let row = vs.deref(r.as_ref_value().unwrap()).unwrap();
            let city = vs
                .map_get(&row, &vs.new_string("city").unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(vs.string_text(&city).unwrap(), format!("city{}", i));
        }
    }

    #[test]
    fn test_import_is_deterministic_across_parallelism() {
        let file = write_csv(100);

        let (vs1, ds1) = setup();
        import_csv(&vs1, &ds1, file.path(), 1).unwrap();
        let (vs2, ds2) = setup();
        import_csv(&vs2, &ds2, file.path(), 8).unwrap();

        let v1 = ds1.head_value().unwrap().unwrap();
        let v2 = ds2.head_value().unwrap().unwrap();
        assert_eq!(v1.hash(), v2.hash());
    }

    #[test]
    fn test_import_rejects_ragged_rows() {
        let (vs, ds) = setup();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2,3").unwrap();
        file.flush().unwrap();

        assert!(import_csv(&vs, &ds, file.path(), 2).is_err());
    }
}
