use super::{lock_path, locking::LedgerLock, CheckpointError, CheckpointStore};
use crate::ledger::{Ledger, Status};
use std::{collections::BTreeSet, fs, path::PathBuf, sync::Arc, thread};
use tempfile::TempDir;

fn store_with(dir: &TempDir, items: usize) -> (CheckpointStore, Vec<PathBuf>) {
    let ledger = dir.path().join(".sims");
    let store = CheckpointStore::new(&ledger, LedgerLock::new(lock_path(&ledger)));
    let paths = (0..items)
        .map(|index| dir.path().join(format!("sims/sim_{index:03}")))
        .collect::<Vec<_>>();

    store
        .initialize(&dir.path().join("vspace.in"), &paths)
        .unwrap();

    (store, paths)
}

#[test]
pub fn initialize_writes_pending_ledger() {
    let dir = TempDir::new().unwrap();
    let (store, paths) = store_with(&dir, 3);

    let text = fs::read_to_string(store.path()).unwrap();
    let ledger = Ledger::decode(&text).unwrap();

    assert_eq!(
        ledger.header[0],
        format!("Vspace File: {}", dir.path().join("vspace.in").display())
    );
    assert_eq!(ledger.header[1], "Total Number of Simulations: 3");
    assert!(ledger.terminated);
    assert_eq!(
        ledger.items.iter().map(|item| &item.path).collect::<Vec<_>>(),
        paths.iter().collect::<Vec<_>>()
    );
    assert!(ledger
        .items
        .iter()
        .all(|item| item.status == Status::Pending));
}

#[test]
pub fn initialize_fails_on_unwritable_path() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join("missing/dir/.sims");
    let store = CheckpointStore::new(&ledger, LedgerLock::new(dir.path().join("lock")));

    assert!(matches!(
        store.initialize(&dir.path().join("vspace.in"), &[dir.path().join("a")]),
        Err(CheckpointError::Io { .. })
    ));
}

#[test]
pub fn claims_follow_ledger_order() {
    let dir = TempDir::new().unwrap();
    let (store, paths) = store_with(&dir, 3);

    assert_eq!(store.claim_next().unwrap(), Some(paths[0].clone()));
    assert_eq!(store.claim_next().unwrap(), Some(paths[1].clone()));
    assert_eq!(store.claim_next().unwrap(), Some(paths[2].clone()));
    assert_eq!(store.claim_next().unwrap(), None);

    let ledger = store.load().unwrap();
    assert_eq!(ledger.summary().in_progress, 3);
}

#[test]
pub fn report_complete_and_failed() {
    let dir = TempDir::new().unwrap();
    let (store, paths) = store_with(&dir, 2);

    let first = store.claim_next().unwrap().unwrap();
    let second = store.claim_next().unwrap().unwrap();
    store.report_complete(&first).unwrap();
    store.report_failed(&second).unwrap();

    let ledger = store.load().unwrap();
    assert_eq!(ledger.items[0].status, Status::Complete);
    assert_eq!(ledger.items[1].status, Status::Pending);

    // a failed item is claimable again
    assert_eq!(store.claim_next().unwrap(), Some(paths[1].clone()));
}

#[test]
pub fn unknown_report_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let (store, _) = store_with(&dir, 1);
    let before = fs::read_to_string(store.path()).unwrap();

    store
        .report_complete(&dir.path().join("sims/not_a_sim"))
        .unwrap();
    store.report_failed(&dir.path().join("sims/other")).unwrap();

    assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
}

#[test]
pub fn relative_entries_are_claimed_as_absolute() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join(".sims");
    fs::write(&ledger, "header\ncount\nsims/relative_sim -1\nTHE END\n").unwrap();
    let store = CheckpointStore::new(&ledger, LedgerLock::new(lock_path(&ledger)));

    let claimed = store.claim_next().unwrap().unwrap();
    assert!(claimed.is_absolute());
    assert!(claimed.ends_with("sims/relative_sim"));

    store.report_complete(&claimed).unwrap();
    assert!(store.load().unwrap().is_complete());
}

#[test]
pub fn corrupt_ledger_is_reported() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join(".sims");
    fs::write(&ledger, "header\ncount\nsim_001\nTHE END\n").unwrap();
    let store = CheckpointStore::new(&ledger, LedgerLock::new(lock_path(&ledger)));

    assert!(matches!(
        store.claim_next(),
        Err(CheckpointError::Corrupt { .. })
    ));
}

#[test]
pub fn concurrent_claims_are_distinct() {
    let dir = TempDir::new().unwrap();
    let (store, paths) = store_with(&dir, 40);
    let store = Arc::new(store);

    let handles = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);

            thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(path) = store.claim_next().unwrap() {
                    claimed.push(path);
                }

                claimed
            })
        })
        .collect::<Vec<_>>();

    let claimed = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();
    let distinct = claimed.iter().cloned().collect::<BTreeSet<_>>();

    assert_eq!(claimed.len(), paths.len());
    assert_eq!(distinct, paths.into_iter().collect::<BTreeSet<_>>());
    assert_eq!(store.claim_next().unwrap(), None);
}

#[test]
pub fn concurrent_claim_and_report() {
    let dir = TempDir::new().unwrap();
    let (store, paths) = store_with(&dir, 30);

    let handles = (0..6)
        .map(|_| {
            // every worker gets its own store handle, as separate processes would
            let store = CheckpointStore::new(store.path(), LedgerLock::new(store.lock().path()));

            thread::spawn(move || {
                while let Some(path) = store.claim_next().unwrap() {
                    store.report_complete(&path).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .for_each(|handle| handle.join().unwrap());

    let ledger = store.load().unwrap();
    assert_eq!(ledger.items.len(), paths.len());
    assert!(ledger.is_complete());
}
