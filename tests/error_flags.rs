use anyhow::Result;
use std::path::PathBuf;

use FlintKV::errors::{FLAG_ALLOC, FLAG_IO, FLAG_NOT_FOUND, FLAG_NOT_UNIQUE, FLAG_WRONG_STATE};
use FlintKV::{KvStore, StoreConfig, StoreError};

#[test]
fn unopened_store_reports_wrong_state() {
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());

    assert!(matches!(
        store.insert(&"k".to_string(), &"v".to_string()),
        Err(StoreError::WrongState(_))
    ));
    assert!(matches!(
        store.find_value(&"k".to_string(), None),
        Err(StoreError::WrongState(_))
    ));
    assert!(matches!(store.truncate(), Err(StoreError::WrongState(_))));
    // the index is memory-only, so the lookup itself just misses
    assert!(matches!(
        store.find_block_offset(&"k".to_string()),
        Err(StoreError::NotFound)
    ));

    assert_ne!(store.error_flags() & FLAG_WRONG_STATE, 0);
}

#[test]
fn flags_accumulate_until_cleared() -> Result<()> {
    let path = unique_path("sticky");
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    assert_eq!(store.error_flags(), 0);

    let _ = store.find_value(&"absent".to_string(), None);
    store.insert(&"k".to_string(), &"v".to_string())?;
    let _ = store.insert(&"k".to_string(), &"again".to_string());
    let _ = store.insert(&"big".to_string(), &"x".repeat(40_000));

    let flags = store.error_flags();
    assert_ne!(flags & FLAG_NOT_FOUND, 0);
    assert_ne!(flags & FLAG_NOT_UNIQUE, 0);
    assert_ne!(flags & FLAG_ALLOC, 0);

    store.clear_error_flags();
    assert_eq!(store.error_flags(), 0);

    // successful operations leave the cleared set untouched
    store.insert(&"k2".to_string(), &"v2".to_string())?;
    assert_eq!(store.error_flags(), 0);
    Ok(())
}

#[test]
fn double_open_of_one_instance_is_rejected() -> Result<()> {
    let path = unique_path("twice");
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    assert!(matches!(store.open(&path), Err(StoreError::WrongState(_))));
    Ok(())
}

#[test]
fn second_instance_on_the_same_file_is_rejected() -> Result<()> {
    let path = unique_path("shared-file");
    let a: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    a.open(&path)?;

    let b: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    assert!(matches!(b.open(&path), Err(StoreError::WrongState(_))));

    // once the first owner is gone the file is free again
    drop(a);
    let c: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    c.open(&path)?;
    Ok(())
}

#[test]
fn corrupt_file_fails_to_open_but_stays_bound() -> Result<()> {
    let path = unique_path("corrupt");
    std::fs::write(&path, [0u8, 0u8, 7u8])?; // zero tag is illegal

    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    assert!(matches!(store.open(&path), Err(StoreError::Io(_))));
    assert_eq!(store.size(), 0);

    // the file stayed bound for diagnostics; a second open is a state error
    assert!(matches!(store.open(&path), Err(StoreError::WrongState(_))));
    // and truncate wipes it back into a usable state
    store.truncate()?;
    store.insert(&"k".to_string(), &"v".to_string())?;
    assert_eq!(store.find_value(&"k".to_string(), None)?, "v");
    Ok(())
}

#[test]
fn panicking_callback_takes_the_fatal_path() -> Result<()> {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let path = unique_path("fatal");
    let store: KvStore<String, String> = KvStore::with_config(StoreConfig::default());
    store.open(&path)?;
    store.insert(&"k".to_string(), &"v".to_string())?;

    let unwound = catch_unwind(AssertUnwindSafe(|| {
        let _ = store.update_with(&"k".to_string(), |_| panic!("callback raised"), None);
    }));
    assert!(unwound.is_err());
    assert_ne!(store.error_flags() & FLAG_IO, 0);

    // the file was closed; everything except open now fails with Io
    assert!(matches!(
        store.find_value(&"k".to_string(), None),
        Err(StoreError::Io(_))
    ));
    assert!(matches!(
        store.insert(&"k2".to_string(), &"v2".to_string()),
        Err(StoreError::Io(_))
    ));
    assert!(matches!(store.truncate(), Err(StoreError::Io(_))));

    // re-opening the same file is the defined recovery
    store.open(&path)?;
    assert_eq!(store.find_value(&"k".to_string(), None)?, "v");
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
