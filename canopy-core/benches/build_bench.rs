use canopy_core::{diff_chunks, ChunkConfig, MemoryChunkStore, Value, ValueStore};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    println!("Canopy build benchmark\n");
    println!("======================\n");

    let store = Arc::new(MemoryChunkStore::new());
    let vs = ValueStore::new(store.clone(), ChunkConfig::production());

    // Benchmark 1: build a 10,000-item list
    let list_10k = {
        let items: Vec<Value> = (0..10_000).map(|i| Value::number(i as f64)).collect();
        let start = Instant::now();
        let list = vs.new_list(items).unwrap();
        let elapsed = start.elapsed();

        println!("Build 10,000-item list:");
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Rate: {:.0} items/sec", 10_000.0 / elapsed.as_secs_f64());
        println!("  Root: {}", list.hash());
        println!();
        list
    };

    // Benchmark 2: build a 100,000-item list
    {
        let items: Vec<Value> = (0..100_000).map(|i| Value::number(i as f64)).collect();
        let start = Instant::now();
        let list = vs.new_list(items).unwrap();
        let elapsed = start.elapsed();

        println!("Build 100,000-item list:");
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Rate: {:.0} items/sec", 100_000.0 / elapsed.as_secs_f64());
        println!("  Root: {}", list.hash());
        println!();
    }

    // Benchmark 3: single edit in the middle
    {
        let start = Instant::now();
        let edited = vs.list_set(&list_10k, 5_000, Value::number(-1.0)).unwrap();
        let elapsed = start.elapsed();

        let before = vs.write_value(&list_10k).unwrap();
        let after = vs.write_value(&edited).unwrap();
        let diff = diff_chunks(store.as_ref(), &before, &after).unwrap();

        println!("Edit one item of 10,000:");
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  New chunks: {}", diff.added.len());
        println!("  Shared chunks: {}", diff.shared);
        println!();
    }

    println!("Benchmark complete!");
}
