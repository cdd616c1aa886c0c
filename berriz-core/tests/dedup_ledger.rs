use berriz_core::DedupLedger;
use tempfile::TempDir;

#[test]
fn add_flush_reopen_exists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("download_info.bin");

    {
        let ledger = DedupLedger::open(&path).unwrap();
        ledger.add("0191f2f8-aaaa-bbbb-cccc-000000000001");
        ledger.add("0191f2f8-aaaa-bbbb-cccc-000000000002");
        ledger.flush_and_stop();
    }

    let reopened = DedupLedger::open(&path).unwrap();
    assert!(reopened.exists("0191f2f8-aaaa-bbbb-cccc-000000000001"));
    assert!(reopened.exists("0191f2f8-aaaa-bbbb-cccc-000000000002"));
    assert!(!reopened.exists("0191f2f8-aaaa-bbbb-cccc-ffffffffffff"));
}

#[test]
fn drop_flushes_pending_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("download_info.bin");
    {
        let ledger = DedupLedger::open(&path).unwrap();
        ledger.add("dropped-without-explicit-flush");
        // Drop runs flush_and_stop.
    }
    let reopened = DedupLedger::open(&path).unwrap();
    assert!(reopened.exists("dropped-without-explicit-flush"));
}

#[test]
fn concurrent_adds_are_all_recorded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("download_info.bin");
    let ledger = std::sync::Arc::new(DedupLedger::open(&path).unwrap());

    let mut handles = Vec::new();
    for thread in 0..4 {
        let ledger = std::sync::Arc::clone(&ledger);
        handles.push(std::thread::spawn(move || {
            for item in 0..50 {
                ledger.add(&format!("media-{thread}-{item}"));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    ledger.flush_and_stop();

    let reopened = DedupLedger::open(&path).unwrap();
    assert_eq!(reopened.len(), 200);
    assert!(reopened.exists("media-3-49"));
}
