//! Save/load tests against real JSON files in a temp directory


use soul_core::types::{EntryType, PropType, Value};
use soul_db::{Database, DbSignal};
use tempfile::TempDir;
use test_helpers::*;

fn open_at(library: &std::sync::Arc<FakeLibrary>, dir: &TempDir) -> Database {
    let config = test_config().with_database_path(dir.path().join("library.json"));
    Database::new(config, services(library)).expect("open database")
}

#[test]
fn saved_entries_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let library = FakeLibrary::new();

    {
        let mut db = open_at(&library, &dir);
        let id = song(&mut db, "file:///a.mp3", "Alpha", "Rock", "Air");
        db.set(id, PropType::PlayCount, 3u64).unwrap();
        db.set(id, PropType::Rating, 4.5).unwrap();
        let station = db.allocate(EntryType::RadioStation, "http://radio.example/stream").unwrap();
        db.set(station, PropType::Title, "Radio").unwrap();
        db.insert(station).unwrap();
        db.commit();

        let signals = db.subscribe();
        db.save().unwrap();
        wait_idle(&mut db);
        assert!(drain(&signals).contains(&DbSignal::SaveComplete));
        assert!(!db.store().is_dirty());
    }

    let mut db = open_at(&library, &dir);
    let signals = db.subscribe();
    db.load().unwrap();
    wait_idle(&mut db);
    assert!(drain(&signals).contains(&DbSignal::LoadComplete { entries: 2 }));

    let store = db.store();
    let id = store.lookup_by_location("file:///a.mp3").unwrap();
    let entry = store.entry(id).unwrap();
    assert_eq!(entry.str_value(PropType::Title), "Alpha");
    assert_eq!(entry.str_value(PropType::Artist), "Air");
    assert_eq!(entry.u64_value(PropType::PlayCount), 3);
    assert_eq!(entry.get(PropType::Rating), Value::Double(4.5));
    // Mirrors are recomputed, not stored
    assert_eq!(entry.str_value(PropType::TitleFolded), "alpha");

    let station = store
        .lookup_by_location("http://radio.example/stream")
        .unwrap();
    assert_eq!(store.entry(station).unwrap().entry_type(), &EntryType::RadioStation);
    assert!(!store.is_dirty());
}

#[test]
fn values_a_new_entry_lacks_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let library = FakeLibrary::new();
    let feed = "http://feed.example/1.mp3";

    {
        let mut db = open_at(&library, &dir);
        let id = song(&mut db, "file:///a.mp3", "Alpha", "Rock", "Air");
        db.set(id, PropType::TrackGain, -0.0).unwrap();
        let post = db.allocate(EntryType::PodcastPost, feed).unwrap();
        db.set(post, PropType::Status, 0u64).unwrap();
        db.insert(post).unwrap();
        db.commit();
        db.save().unwrap();
        wait_idle(&mut db);
    }

    let mut db = open_at(&library, &dir);
    db.load().unwrap();
    wait_idle(&mut db);

    let id = db.store().lookup_by_location("file:///a.mp3").unwrap();
    assert_eq!(db.get(id, PropType::TrackGain).unwrap(), Value::Double(-0.0));
    let post = db.store().lookup_by_location(feed).unwrap();
    assert_eq!(db.get(post, PropType::Status).unwrap(), Value::ULong(0));
}

#[test]
fn shutdown_saves_dirty_store() {
    let dir = tempfile::tempdir().unwrap();
    let library = FakeLibrary::new();

    {
        let mut db = open_at(&library, &dir);
        song(&mut db, "file:///b.mp3", "Beta", "Jazz", "Beck");
        db.commit();
        assert!(db.store().is_dirty());
    }

    let mut db = open_at(&library, &dir);
    db.load().unwrap();
    wait_idle(&mut db);
    assert_eq!(db.store().len(), 1);
    assert!(db.store().lookup_by_location("file:///b.mp3").is_some());
}

#[test]
fn loading_skips_locations_already_present() {
    let dir = tempfile::tempdir().unwrap();
    let library = FakeLibrary::new();

    {
        let mut db = open_at(&library, &dir);
        song(&mut db, "file:///a.mp3", "Stored", "Rock", "Air");
        db.commit();
    }

    let mut db = open_at(&library, &dir);
    song(&mut db, "file:///a.mp3", "Live", "Rock", "Air");
    db.commit();
    db.load().unwrap();
    wait_idle(&mut db);

    let id = db.store().lookup_by_location("file:///a.mp3").unwrap();
    assert_eq!(db.get(id, PropType::Title).unwrap(), Value::from("Live"));
    assert_eq!(db.store().len(), 1);
}

#[test]
fn corrupt_database_reports_load_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("library.json"), "{ broken").unwrap();
    let library = FakeLibrary::new();

    let mut db = open_at(&library, &dir);
    let signals = db.subscribe();
    db.load().unwrap();
    wait_idle(&mut db);

    assert!(drain(&signals)
        .iter()
        .any(|s| matches!(s, DbSignal::LoadError { .. })));
    assert!(db.store().is_empty());
}
