//! End-to-end bridge tests: isolated client, transport and host handler

mod common;

use common::{folder_page, folder_url, listing_row, subject, subjects_data, FakePortal, MapFetcher, RecordingRegistrar, BASE};
use reis_sync::bridge::{
    actions, in_process_pair, spawn_json_lines_reader, BridgeClient, FetchOptions, HostHandler, HostMessage,
    IsolatedMessage, JsonLinesSink, ResponseBody, Transport,
};
use reis_sync::cache::CacheStore;
use reis_sync::crawler::{CrawlSettings, FolderCrawler};
use reis_sync::models::{Language, SyncSnapshot};
use reis_sync::portal::ExamRegistrar;
use reis_sync::sync::SyncOrchestrator;
use reis_sync::utils::error::BridgeError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const NOTES_URL: &str = "https://is.mendelu.cz/auth/dok_server/notes.txt";

struct Harness {
    client: BridgeClient,
    registrar: Arc<RecordingRegistrar>,
    orchestrator: Arc<SyncOrchestrator>,
}

fn host_fetcher() -> Arc<MapFetcher> {
    Arc::new(
        MapFetcher::new().page(NOTES_URL, "lecture notes").page(
            format!("{};lang=en", folder_url(3)),
            folder_page(&[listing_row("Slides", "slozka.pl?id=3;dok=9;download=9", "pdf")], &[]),
        ),
    )
}

fn orchestrator(fetcher: Arc<MapFetcher>) -> Arc<SyncOrchestrator> {
    let portal = FakePortal::new(subjects_data(vec![subject("EBC-ALG", Some("1"), None)]));
    let crawler = FolderCrawler::new(
        fetcher,
        CrawlSettings {
            base_url: BASE.to_string(),
            subfolder_delay: Duration::ZERO,
            ..CrawlSettings::default()
        },
    );
    Arc::new(SyncOrchestrator::new(
        Arc::new(portal),
        crawler,
        Arc::new(CacheStore::open_in_memory().unwrap()),
        2,
    ))
}

fn harness() -> Harness {
    let (isolated, host) = in_process_pair();
    let fetcher = host_fetcher();
    let registrar = Arc::new(RecordingRegistrar {
        refuse: vec!["77".to_string()],
        ..Default::default()
    });
    let orchestrator = orchestrator(fetcher.clone());

    let handler = Arc::new(HostHandler::new(
        fetcher,
        registrar.clone(),
        orchestrator.clone(),
        Arc::new(host.outbound),
    ));
    handler.serve(host.inbound);

    let client = BridgeClient::new(Arc::new(Transport::from_isolated_end(isolated)))
        .with_timeout(Duration::from_secs(5));
    Harness {
        client,
        registrar,
        orchestrator,
    }
}

async fn next_matching(
    rx: &mut broadcast::Receiver<HostMessage>,
    accept: impl Fn(&HostMessage) -> bool,
) -> HostMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(message) if accept(&message) => return message,
                Ok(_) => continue,
                Err(e) => panic!("host stream ended: {e}"),
            }
        }
    })
    .await
    .expect("expected host message did not arrive")
}

#[tokio::test]
async fn test_fetch_relayed_through_host() {
    let h = harness();

    let body = h.client.fetch(NOTES_URL, FetchOptions::default()).await.unwrap();
    assert_eq!(body, "lecture notes");
    assert_eq!(h.client.transport().pending_count(), 0);
}

#[tokio::test]
async fn test_fetch_failure_becomes_remote_error() {
    let h = harness();

    let err = h
        .client
        .fetch("https://is.mendelu.cz/missing", FetchOptions::default())
        .await
        .unwrap_err();
    match err {
        BridgeError::Remote(message) => assert!(message.contains("404"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_crawl_runs_on_isolated_side_through_bridge() {
    let h = harness();
    let crawler = FolderCrawler::new(
        Arc::new(h.client.clone()),
        CrawlSettings {
            base_url: BASE.to_string(),
            subfolder_delay: Duration::ZERO,
            ..CrawlSettings::default()
        },
    );

    let files = crawler.crawl(&folder_url(3), Language::En).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "Slides");
    assert_eq!(files[0].language, Some(Language::En));
}

#[tokio::test]
async fn test_exam_actions_through_bridge() {
    let h = harness();

    let ok = h.client.register_exam("42").await.unwrap();
    assert!(ok.success);

    let refused = h.client.register_exam("77").await.unwrap();
    assert!(!refused.success);
    assert_eq!(refused.error.as_deref(), Some("Termín je již plný"));

    let unregistered = h.client.unregister_exam("42").await.unwrap();
    assert!(unregistered.success);

    assert_eq!(
        h.registrar.calls(),
        vec!["register:42", "register:77", "unregister:42"]
    );
}

#[tokio::test]
async fn test_action_errors() {
    let h = harness();

    let unknown = h.client.action("dance", Value::Null).await.unwrap_err();
    assert!(matches!(unknown, BridgeError::Remote(ref m) if m == "Unknown action: dance"));

    let missing = h.client.action(actions::REGISTER_EXAM, json!({})).await.unwrap_err();
    assert!(matches!(missing, BridgeError::Remote(ref m) if m == "Missing termId"));
    assert!(h.registrar.calls().is_empty());
}

#[tokio::test]
async fn test_success_rate_action() {
    let h = harness();
    h.orchestrator.sync_all().await;

    let rate = h
        .client
        .action(actions::FETCH_SUCCESS_RATE, json!({ "courseCode": "EBC-ALG" }))
        .await
        .unwrap();
    assert_eq!(rate["courseCode"], "EBC-ALG");
    assert_eq!(rate["stats"][0]["totalPass"], 30);

    let unknown = h
        .client
        .action(actions::FETCH_CLASSMATES, json!({ "courseCode": "EBC-XYZ" }))
        .await
        .unwrap_err();
    assert!(matches!(unknown, BridgeError::Remote(ref m) if m == "Unknown subject: EBC-XYZ"));

    let missing = h.client.action(actions::FETCH_SUCCESS_RATE, json!({})).await.unwrap_err();
    assert!(matches!(missing, BridgeError::Remote(ref m) if m == "Missing courseCode"));
}

#[tokio::test]
async fn test_request_all_runs_first_sync() {
    let h = harness();
    let mut rx = h.client.subscribe();

    h.client.request_data("all").await.unwrap();

    let message = next_matching(&mut rx, |m| matches!(m, HostMessage::Data { .. })).await;
    let HostMessage::Data { data_type, data, error } = message else {
        unreachable!()
    };
    assert_eq!(data_type, "all");
    assert!(error.is_none());
    let snapshot: SyncSnapshot = serde_json::from_value(data).unwrap();
    assert!(snapshot.has_synced());
    assert!(snapshot.assessments.contains_key("EBC-ALG"));
    assert!(h.orchestrator.snapshot().await.has_synced());
}

#[tokio::test]
async fn test_request_named_and_unknown_parts() {
    let h = harness();
    h.orchestrator.sync_all().await;
    let mut rx = h.client.subscribe();

    h.client.request_data("schedule").await.unwrap();
    let schedule = next_matching(&mut rx, |m| matches!(m, HostMessage::Data { .. })).await;
    let HostMessage::Data { data, error, .. } = schedule else {
        unreachable!()
    };
    assert!(error.is_none());
    assert_eq!(data[0]["courseCode"], "EBC-ALG");

    h.client.request_data("grades").await.unwrap();
    let unknown = next_matching(&mut rx, |m| matches!(m, HostMessage::Data { .. })).await;
    let HostMessage::Data { data, error, .. } = unknown else {
        unreachable!()
    };
    assert_eq!(data, Value::Null);
    assert_eq!(error.as_deref(), Some("Unknown data type: grades"));
}

#[tokio::test]
async fn test_ready_replays_last_snapshot() {
    let h = harness();
    h.orchestrator.sync_all().await;
    let mut rx = h.client.subscribe();

    h.client.signal_ready().await.unwrap();

    let update = next_matching(&mut rx, |m| {
        matches!(m, HostMessage::SyncUpdate { snapshot } if snapshot.has_synced())
    })
    .await;
    assert!(matches!(update, HostMessage::SyncUpdate { snapshot } if !snapshot.is_syncing));
}

#[tokio::test]
async fn test_trigger_sync_streams_updates() {
    let h = harness();
    let mut rx = h.client.subscribe();

    let result = h.client.action(actions::TRIGGER_SYNC, Value::Null).await.unwrap();
    assert_eq!(result, json!({ "status": "completed" }));

    let started = next_matching(&mut rx, |m| {
        matches!(m, HostMessage::SyncUpdate { snapshot } if snapshot.is_syncing)
    })
    .await;
    assert!(matches!(started, HostMessage::SyncUpdate { snapshot } if !snapshot.has_synced()));

    next_matching(&mut rx, |m| {
        matches!(m, HostMessage::SyncUpdate { snapshot } if !snapshot.is_syncing && snapshot.has_synced())
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out() {
    let (isolated, _host) = in_process_pair();
    let transport = Arc::new(Transport::from_isolated_end(isolated));
    let client = BridgeClient::new(transport.clone()).with_timeout(Duration::from_secs(2));

    let err = client.fetch(NOTES_URL, FetchOptions::default()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { kind: "FETCH", timeout_ms: 2000, .. }));
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_is_ignored() {
    let (isolated, mut host) = in_process_pair();
    let transport = Arc::new(Transport::from_isolated_end(isolated));
    let client = BridgeClient::new(transport.clone()).with_timeout(Duration::from_secs(1));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.fetch(NOTES_URL, FetchOptions::default()).await }
    });
    let Some(IsolatedMessage::Fetch { id: late_id, .. }) = host.inbound.recv().await else {
        panic!("expected a fetch request");
    };

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_timeout());

    // Answer after the deadline; nothing is waiting for it any more
    host.outbound
        .send(HostMessage::FetchResult(ResponseBody::ok(late_id, json!("too late"))))
        .await
        .unwrap();

    let second = tokio::spawn(async move { client.fetch(NOTES_URL, FetchOptions::default()).await });
    let Some(IsolatedMessage::Fetch { id, .. }) = host.inbound.recv().await else {
        panic!("expected a second fetch request");
    };
    host.outbound
        .send(HostMessage::FetchResult(ResponseBody::ok(id, json!("fresh"))))
        .await
        .unwrap();

    assert_eq!(second.await.unwrap().unwrap(), "fresh");
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_bridge_over_json_lines() {
    let (client_io, host_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (host_read, host_write) = tokio::io::split(host_io);

    let fetcher = host_fetcher();
    let handler = Arc::new(HostHandler::new(
        fetcher.clone(),
        Arc::new(RecordingRegistrar::default()),
        orchestrator(fetcher),
        Arc::new(JsonLinesSink::new(host_write)),
    ));
    handler.serve(spawn_json_lines_reader::<IsolatedMessage, _>(host_read));

    let transport = Transport::new(
        Arc::new(JsonLinesSink::new(client_write)),
        spawn_json_lines_reader::<HostMessage, _>(client_read),
    );
    let client = BridgeClient::new(Arc::new(transport));

    let body = client.fetch(NOTES_URL, FetchOptions::default()).await;
    assert_eq!(tokio_test::assert_ok!(body), "lecture notes");

    let result = client.register_exam("5").await;
    assert!(tokio_test::assert_ok!(result).success);
}
