use std::path::PathBuf;

use recordstore::RecordStore;

/// Build a fresh store inside a throwaway directory, kept alive for the
/// lifetime of the returned tuple so the underlying files aren't deleted
/// out from under the test.
pub fn setup() -> (tempfile::TempDir, PathBuf, RecordStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("store.db");
    let store = RecordStore::open(&path).expect("open store");
    (dir, path, store)
}
