//! Ledger persistence tests

use autoshipd::filesys::file::File;
use autoshipd::storage::ledger::{LedgerStore, ProcessedLedger, DEFAULT_LEDGER_CAP};
use tokio_test::assert_ok;

fn store_in(dir: &std::path::Path) -> LedgerStore {
    LedgerStore::new(File::new(dir.join("processed.json")), DEFAULT_LEDGER_CAP)
}

#[test]
fn test_ledger_capped_at_1000_newest_retained() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let mut ledger = assert_ok!(store.load());
    for i in 0..1500 {
        ledger.push(format!("req-{}", i));
        assert!(ledger.len() <= DEFAULT_LEDGER_CAP);
    }
    assert_ok!(store.save(&ledger));

    let reloaded = assert_ok!(store.load());
    assert_eq!(reloaded.len(), 1000);
    assert!(!reloaded.contains("req-0"));
    assert!(!reloaded.contains("req-499"));
    assert!(reloaded.contains("req-500"));
    assert!(reloaded.contains("req-1499"));
    assert_eq!(reloaded.ids().next(), Some("req-500"));
}

#[test]
fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = store_in(dir.path());
        let mut ledger = store.load().unwrap();
        ledger.push("req-1");
        store.save(&ledger).unwrap();
        ledger.push("req-2");
        store.save(&ledger).unwrap();
        // Process "dies" here: nothing else is flushed or closed
    }

    let store = store_in(dir.path());
    let ledger = store.load().unwrap();
    assert!(ledger.contains("req-1"));
    assert!(ledger.contains("req-2"));
    assert_eq!(ledger.len(), 2);
}

#[test]
fn test_crash_between_stage_and_rename_keeps_old_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let mut ledger = ProcessedLedger::new(DEFAULT_LEDGER_CAP);
    ledger.push("req-1");
    store.save(&ledger).unwrap();

    // Temp file written and synced, rename never happens
    let staged = store.file().stage(br#"["req-1", "req-2""#).unwrap();
    assert!(staged.temp_path().exists());
    drop(staged);

    let contents = std::fs::read_to_string(store.file().path()).unwrap();
    let ids: Vec<String> = serde_json::from_str(&contents).unwrap();
    assert_eq!(ids, vec!["req-1".to_string()]);

    let reloaded = store.load().unwrap();
    assert!(reloaded.contains("req-1"));
    assert!(!reloaded.contains("req-2"));
}

#[test]
fn test_corrupt_ledger_recovers_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let mut ledger = ProcessedLedger::new(DEFAULT_LEDGER_CAP);
    ledger.push("req-1");
    store.save(&ledger).unwrap();
    ledger.push("req-2");
    store.save(&ledger).unwrap();

    std::fs::write(store.file().path(), "{ not json").unwrap();

    let recovered = store.load().unwrap();
    assert!(recovered.contains("req-1"));
}

#[test]
fn test_missing_ledger_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = store_in(dir.path()).load().unwrap();
    assert!(ledger.is_empty());
}

#[test]
fn test_failed_save_keeps_ledger_and_backup_loadable() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let mut ledger = ProcessedLedger::new(DEFAULT_LEDGER_CAP);
    ledger.push("a".repeat(4000));
    store.save(&ledger).unwrap();
    ledger.push("b");
    store.save(&ledger).unwrap();

    // Make the backup step fail partway through the next save
    std::fs::create_dir(dir.path().join("processed.json.bak.tmp")).unwrap();
    ledger.push("c");
    let err = store.save(&ledger).unwrap_err();
    assert!(err.to_string().contains("failed to write ledger"));

    let reloaded = store.load().unwrap();
    assert!(reloaded.contains("b"));
    assert!(!reloaded.contains("c"));
    assert!(!store.file().temp_path().exists());

    let backup = store.file().read_backup().unwrap().unwrap();
    let ids: Vec<String> = serde_json::from_str(&backup).unwrap();
    assert_eq!(ids, vec!["a".repeat(4000)]);
}
