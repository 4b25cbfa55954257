use anyhow::Result;
use std::path::PathBuf;

use FlintKV::{KvStore, StoreConfig};

fn snapshot(store: &KvStore<String, String>) -> (Vec<(String, u32)>, Vec<(u32, i16)>) {
    let pairs: Vec<(String, u32)> = store.iter().collect();
    let mut free = store.free_blocks();
    free.sort_unstable();
    (pairs, free)
}

#[test]
fn reopen_rebuilds_identical_structures() -> Result<()> {
    let path = unique_path("rebuild");
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;

    // a mixed history: inserts, a relocation, deletes
    for i in 0..20 {
        store.insert(&format!("key-{:02}", i), &format!("value-{}", i))?;
    }
    store.update(&"key-03".to_string(), &"x".repeat(100), None)?; // relocates
    store.delete(&"key-07".to_string())?;
    store.delete(&"key-11".to_string())?;
    store.insert(&"key-99".to_string(), &"tail".to_string())?;

    let before = snapshot(&store);
    let file_size = store.file_size();
    store.check()?;
    drop(store);

    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    assert_eq!(store.file_size(), file_size);
    assert_eq!(snapshot(&store), before);
    store.check()?;
    Ok(())
}

#[test]
fn reopen_preserves_values() -> Result<()> {
    let path = unique_path("values");
    {
        let store: KvStore<u32, f64> = KvStore::with_config(StoreConfig::default());
        store.open(&path)?;
        for i in 0u32..8 {
            store.insert(&i, &(i as f64 * 0.5))?;
        }
    }
    let store: KvStore<u32, f64> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    for i in 0u32..8 {
        assert_eq!(store.find_value(&i, None)?, i as f64 * 0.5);
    }
    Ok(())
}

#[test]
fn empty_file_opens_empty() -> Result<()> {
    let path = unique_path("empty");
    {
        let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
        store.open(&path)?;
    }
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    assert_eq!(store.size(), 0);
    assert_eq!(store.file_size(), 0);
    Ok(())
}

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("flintkv-{}-{}-{}.db", prefix, pid, t))
}
