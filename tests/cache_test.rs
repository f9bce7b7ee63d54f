//! Cache store tests against on-disk SQLite databases

mod common;

use common::{lesson, subject, subjects_data};
use reis_sync::cache::{CacheStore, EntryStatus, Partition, StoreEvent, StoredValue, SubjectCaches, CURRENT_KEY};
use reis_sync::models::{Assessment, BlockLesson, Language};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn assessment(name: &str) -> Vec<Assessment> {
    vec![Assessment {
        name: name.to_string(),
        score: 4.0,
        max_score: 5.0,
        success_rate: 80.0,
        ..Default::default()
    }]
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("reis.db");

    {
        let store = CacheStore::open(&path).unwrap();
        store.set(Partition::Schedule, CURRENT_KEY, &vec![lesson("EBC-ALG")]).unwrap();
        store
            .set_tagged(
                Partition::Assessments,
                "EBC-ALG",
                &StoredValue::tagged(Language::En, assessment("Midterm")),
                Language::En,
            )
            .unwrap();
        store
            .set(Partition::Subjects, CURRENT_KEY, &subjects_data(vec![subject("EBC-ALG", None, None)]))
            .unwrap();
    }

    let reopened = CacheStore::open(&path).unwrap();
    let schedule: Option<Vec<BlockLesson>> = reopened.get(Partition::Schedule, CURRENT_KEY).unwrap();
    assert_eq!(schedule.unwrap()[0].course_code, "EBC-ALG");
    assert_eq!(
        reopened.language_of(Partition::Assessments, "EBC-ALG").unwrap(),
        Some(Language::En)
    );
    assert_eq!(reopened.keys(Partition::Assessments).unwrap(), vec!["EBC-ALG"]);
    assert!(reopened.keys(Partition::Files).unwrap().is_empty());
}

#[test]
fn test_partitions_are_independent() {
    let store = CacheStore::open_in_memory().unwrap();
    store.set(Partition::Files, "EBC-ALG", &"files").unwrap();
    store.set(Partition::Syllabuses, "EBC-ALG", &"syllabus").unwrap();

    assert!(store.delete(Partition::Files, "EBC-ALG").unwrap());
    assert!(!store.delete(Partition::Files, "EBC-ALG").unwrap());
    let syllabus: Option<String> = store.get(Partition::Syllabuses, "EBC-ALG").unwrap();
    assert_eq!(syllabus.as_deref(), Some("syllabus"));
}

#[tokio::test]
async fn test_listener_applies_store_events() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let caches = Arc::new(SubjectCaches::new(store.clone(), Duration::from_secs(600)));
    let listener = caches.clone().spawn_listener(&store);
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |lang: Language| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(assessment(match lang {
                Language::Cz => "Zápočtový test",
                Language::En => "Credit test",
            }))
        }
    };

    let first = caches.assessments.fetch("EBC-ALG", load).await;
    assert_eq!(first.ready().unwrap()[0].name, "Zápočtový test");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Switching language evicts the Czech entry; the dual stored value answers
    store.set_language(Language::En);
    tokio::time::timeout(Duration::from_secs(1), async {
        while caches.assessments.get("EBC-ALG").is_some() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("language change was not applied");

    let english = caches.assessments.fetch("EBC-ALG", load).await;
    assert_eq!(english.ready().unwrap()[0].name, "Credit test");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // A completed sync clears memory but keeps what is persisted
    store.notify(StoreEvent::SyncCompleted {
        last_sync: chrono::Utc::now(),
    });
    tokio::time::timeout(Duration::from_secs(1), async {
        while caches.assessments.get("EBC-ALG").is_some() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("sync completion was not applied");
    assert_eq!(
        caches.assessments.stale("EBC-ALG").unwrap()[0].name,
        "Credit test"
    );

    listener.abort();
}

#[tokio::test]
async fn test_failed_load_leaves_stale_value_visible() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    store
        .set_tagged(
            Partition::Assessments,
            "EBC-ALG",
            &StoredValue::tagged(Language::Cz, assessment("Old")),
            Language::Cz,
        )
        .unwrap();
    // Zero max age: everything persisted is already stale
    let caches = SubjectCaches::new(store, Duration::ZERO);

    let status = caches
        .assessments
        .fetch("EBC-ALG", |_| async { Err::<Vec<Assessment>, _>("portal down") })
        .await;

    assert_eq!(status, EntryStatus::Error("portal down".to_string()));
    assert_eq!(caches.assessments.stale("EBC-ALG").unwrap()[0].name, "Old");
}
