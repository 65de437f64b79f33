use std::fs;
use std::sync::{Arc, Barrier};

use mahzen_prefs::{ConsentLifecycle, ErrorKind, PreferenceRecord, PreferenceStore};
use tempfile::tempdir;

#[test]
fn records_survive_reopen_in_the_documented_layout() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    {
        let consent = ConsentLifecycle::new(Arc::new(PreferenceStore::open(&path)));
        consent.grant_consent(-100, 42, 42, "ayse").expect("grant");
        consent
            .write_preference(-100, 42, 42, "ayse", "dil", "Modern Türkçe")
            .expect("write");
    }

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read file")).expect("json");
    let entry = &raw["-100_42"];
    assert_eq!(entry["consentGiven"], true);
    assert_eq!(entry["createdBy"], 42);
    assert_eq!(entry["preferences"]["dil"], "Modern Türkçe");
    assert!(entry["lastUpdated"].as_i64().expect("epoch seconds") > 0);

    let reopened = PreferenceStore::open(&path);
    assert!(!reopened.recovered_from_corruption());
    let record = reopened.get(-100, 42).expect("record");
    assert_eq!(record.display_name, "ayse");
    assert_eq!(
        record.preferences.get("dil").map(String::as_str),
        Some("Modern Türkçe")
    );
}

#[test]
fn corrupt_file_degrades_to_an_empty_store() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    fs::write(&path, "{\"-100_42\": {\"scope\": -100, ").expect("write garbage");

    let store = PreferenceStore::open(&path);
    assert!(store.recovered_from_corruption());
    assert!(store.get(-100, 42).is_none());
    assert_eq!(store.stats().total_records, 0);

    let consent = ConsentLifecycle::new(Arc::new(store));
    assert!(consent.request_consent_grant(-100, 42, 42, "ayse").success);
    let reopened = PreferenceStore::open(&path);
    assert!(!reopened.recovered_from_corruption());
    assert!(reopened.get(-100, 42).is_some());
}

#[test]
fn empty_file_is_an_empty_store() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    fs::write(&path, "\n").expect("write");
    let store = PreferenceStore::open(&path);
    assert!(!store.recovered_from_corruption());
    assert_eq!(store.stats().total_records, 0);
}

#[test]
fn failed_persist_keeps_previous_state_in_memory() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    let consent = ConsentLifecycle::new(Arc::new(PreferenceStore::open(&path)));
    consent.grant_consent(-100, 42, 42, "ayse").expect("grant");
    let before = consent.read_preferences(-100, 42);

    fs::remove_file(&path).expect("remove file");
    fs::create_dir(&path).expect("block path with a directory");

    let outcome = consent.request_preference_write(-100, 42, 42, "ayse", "ton", "nazik");
    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(ErrorKind::StorageWriteFailure));
    assert_eq!(consent.read_preferences(-100, 42), before);

    let outcome = consent.request_consent_grant(-100, 7, 7, "veli");
    assert_eq!(outcome.error, Some(ErrorKind::StorageWriteFailure));
    assert!(consent.read_preferences(-100, 7).is_none());
}

#[test]
fn stats_and_bulk_removal() {
    let dir = tempdir().expect("tempdir");
    let store = PreferenceStore::open(dir.path().join("preferences.json"));

    let mut ayse = PreferenceRecord::granted(-100, 42, "ayse", 1);
    ayse.preferences.insert("ton".into(), "nazik".into());
    ayse.preferences.insert("hitap".into(), "siz".into());
    store.upsert(ayse).expect("upsert");
    let mut veli = PreferenceRecord::granted(-100, 7, "veli", 1);
    veli.consent_given = false;
    store.upsert(veli).expect("upsert");
    store
        .upsert(PreferenceRecord::granted(-200, 42, "ayse", 1))
        .expect("upsert");

    let stats = store.stats();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.total_preferences, 2);
    assert_eq!(stats.consented_records, 2);

    assert_eq!(store.remove_all_for_scope(-100).expect("bulk"), 2);
    assert_eq!(store.remove_all_for_scope(-100).expect("bulk again"), 0);
    assert!(!store.remove_record(-100, 42).expect("remove absent"));
    assert_eq!(store.stats().total_records, 1);
}

#[test]
fn concurrent_writers_do_not_lose_updates() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    let consent = ConsentLifecycle::new(Arc::new(PreferenceStore::open(&path)));
    consent.grant_consent(-100, 42, 42, "ayse").expect("grant");

    let writes = [
        ("hitap", "siz"),
        ("dil", "farsça"),
        ("ton", "romantik"),
        ("kişilik", "gururlu"),
        ("ilgi", "kitap"),
        ("şair", "cemal süreya"),
    ];
    std::thread::scope(|scope| {
        for (pref_type, value) in writes {
            let consent = &consent;
            scope.spawn(move || {
                consent
                    .write_preference(-100, 42, 42, "ayse", pref_type, value)
                    .expect("write");
            });
        }
        for principal in 1..=8 {
            let consent = &consent;
            scope.spawn(move || {
                consent
                    .grant_consent(-100, principal, principal, "member")
                    .expect("grant");
            });
        }
    });

    let record = consent.read_preferences(-100, 42).expect("record");
    assert_eq!(record.preferences.len(), writes.len());

    let reopened = PreferenceStore::open(&path);
    assert_eq!(reopened.stats().total_records, 9);
    assert_eq!(
        reopened.get(-100, 42).expect("record").preferences.len(),
        writes.len()
    );
}

#[test]
fn scope_clear_racing_a_writer_never_leaves_a_record_behind() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    let consent = ConsentLifecycle::new(Arc::new(PreferenceStore::open(&path)));

    for _ in 0..200 {
        consent.grant_consent(-100, 42, 42, "ayse").expect("grant");
        let start = Barrier::new(2);
        let (write, cleared) = std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                start.wait();
                consent.write_preference(-100, 42, 42, "ayse", "ton", "ciddi")
            });
            start.wait();
            let cleared = consent.clear_scope(-100);
            (writer.join().expect("writer thread"), cleared)
        });

        assert!(cleared.success, "{}", cleared.message);
        assert!(cleared.message.contains("1 tercih"), "{}", cleared.message);
        if let Err(err) = write {
            assert_eq!(err.kind(), ErrorKind::ConsentRequired);
        }
        assert!(consent.read_preferences(-100, 42).is_none());
    }

    let reopened = PreferenceStore::open(&path);
    assert!(reopened.records_in_scope(-100).is_empty());
}

#[test]
fn concurrent_grants_report_first_activation_once() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");
    let consent = ConsentLifecycle::new(Arc::new(PreferenceStore::open(&path)));

    for chat in 1..=50 {
        let scope_id = -chat;
        let start = Barrier::new(2);
        let messages: Vec<String> = std::thread::scope(|scope| {
            let grants: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        start.wait();
                        consent.request_consent_grant(scope_id, 42, 42, "ayse")
                    })
                })
                .collect();
            grants
                .into_iter()
                .map(|grant| {
                    let outcome = grant.join().expect("grant thread");
                    assert!(outcome.success, "{}", outcome.message);
                    outcome.message
                })
                .collect()
        });

        let first_activations = messages
            .iter()
            .filter(|message| !message.contains("zaten"))
            .count();
        assert_eq!(first_activations, 1, "{messages:?}");
    }
}
