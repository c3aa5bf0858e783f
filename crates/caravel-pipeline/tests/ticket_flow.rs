// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end ticket pipeline tests against mock instances.
//!
//! Each test builds an isolated source/target pair and drives the real
//! pipeline through it, asserting on the requests the target received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use caravel_core::{CaravelError, StatusFilter};
use caravel_pipeline::{MigrationSettings, Session, TicketOutcome};
use caravel_resolver::{OriginalIdMarker, Resolver, ResolverCache};
use caravel_test_utils::MockInstance;

/// Marker field id used by every test.
const MARKER_FIELD: u64 = 200;

fn host_of(uri: &str) -> String {
    uri.trim_start_matches("http://")
        .trim_start_matches("https://")
        .to_string()
}

fn test_session(source: &MockInstance, target: &MockInstance, error_log: PathBuf) -> Session {
    let source_client = Arc::new(source.client("source"));
    let target_client = Arc::new(target.client("target"));
    let resolver = Resolver::new(
        Arc::clone(&source_client),
        Arc::clone(&target_client),
        ResolverCache::new(),
    );
    let settings = MigrationSettings {
        source_host: host_of(&source.uri()),
        alt_source_host: None,
        helpcenter_host: None,
        error_log,
        progress_interval: 100,
        retry_backoff: Duration::ZERO,
        problem_link_pause: Duration::ZERO,
        incremental_start_time: 0,
    };
    Session::from_parts(
        source_client,
        target_client,
        resolver,
        OriginalIdMarker::with_field_id(MARKER_FIELD),
        settings,
    )
}

fn scratch_log() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ticket_errors.log");
    (dir, path)
}

/// Bodies of every import request the target received.
async fn import_bodies(target: &MockInstance) -> Vec<Value> {
    target
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/api/v2/imports/tickets.json")
        .map(|request| request.body_json::<Value>().unwrap())
        .collect()
}

async fn mount_bare_ticket(source: &MockInstance, ticket: Value) {
    let id = ticket["id"].as_u64().unwrap();
    source
        .mount_record(&format!("/api/v2/tickets/{id}.json"), "ticket", ticket)
        .await;
    source
        .mount_collection(&format!("/api/v2/tickets/{id}/comments.json"), "comments", vec![])
        .await;
}

#[tokio::test]
async fn connect_discovers_marker_and_seeds_overrides() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    target.mount_marker_field(MARKER_FIELD, vec![]).await;

    let config = caravel_config::load_config_from_str(&format!(
        r#"
        [source]
        base_url = "{}"
        email = "agent@example.com"
        password = "hunter2"

        [target]
        base_url = "{}"
        email = "agent@example.com"
        password = "hunter2"

        [overrides.brands]
        "2379186" = 360000762552
        "#,
        source.uri(),
        target.uri()
    ))
    .unwrap();

    let session = Session::connect(&config).await.unwrap();
    assert_eq!(session.marker.field_id(), MARKER_FIELD);
    assert_eq!(
        session
            .resolver
            .cache()
            .get(caravel_core::EntityKind::Brand, "2379186"),
        Some(360000762552)
    );
}

#[tokio::test]
async fn connect_fails_without_the_marker_field() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    target
        .mount_collection("/api/v2/ticket_fields.json", "ticket_fields", vec![])
        .await;

    let config = caravel_config::load_config_from_str(&format!(
        r#"
        [source]
        base_url = "{}"
        email = "agent@example.com"
        password = "hunter2"

        [target]
        base_url = "{}"
        email = "agent@example.com"
        password = "hunter2"
        "#,
        source.uri(),
        target.uri()
    ))
    .unwrap();

    match Session::connect(&config).await {
        Err(CaravelError::Config(message)) => {
            assert!(message.contains("Original Id"), "got: {message}");
        }
        other => panic!("expected fatal config error, got {other:?}"),
    }
}

#[tokio::test]
async fn migrating_twice_is_idempotent() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 4711, "status": "open", "subject": "Hello"})).await;

    // First run: nothing stamped yet.
    target
        .mount_search("type:ticket fieldvalue:4711", vec![])
        .await;

    // Exactly one import may ever happen.
    Mock::given(method("POST"))
        .and(path("/api/v2/imports/tickets.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ticket": {"id": 9001, "status": "open"}
        })))
        .expect(1)
        .mount(&target.server)
        .await;

    let session = test_session(&source, &target, log);
    let first = session.migrate_ticket_by_id(4711).await.unwrap();
    assert_eq!(first, TicketOutcome::Migrated(9001));

    // Second run: the guard finds the stamped ticket and short-circuits.
    target.server.reset().await;
    mount_bare_ticket(&source, json!({"id": 4711, "status": "open", "subject": "Hello"})).await;
    target
        .mount_search(
            "type:ticket fieldvalue:4711",
            vec![json!({
                "id": 9001,
                "status": "open",
                "custom_fields": [{"id": MARKER_FIELD, "value": "4711"}]
            })],
        )
        .await;

    let second = session.migrate_ticket_by_id(4711).await.unwrap();
    assert_eq!(second, TicketOutcome::SkippedDuplicate(9001));
    assert!(import_bodies(&target).await.is_empty(), "no second import");
}

#[tokio::test]
async fn import_payload_carries_stamp_and_copied_fields() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(
        &source,
        json!({
            "id": 4711,
            "status": "solved",
            "subject": "Printer on fire",
            "priority": "high",
            "type": "incident",
            "tags": ["printer", "urgent"],
            "created_at": "2015-07-20T22:55:29Z",
            "updated_at": "2016-05-05T10:38:52Z"
        }),
    )
    .await;
    target.mount_search("type:ticket fieldvalue:4711", vec![]).await;
    target.mount_import(9001).await;

    let session = test_session(&source, &target, log);
    session.migrate_ticket_by_id(4711).await.unwrap();

    let bodies = import_bodies(&target).await;
    assert_eq!(bodies.len(), 1);
    let ticket = &bodies[0]["ticket"];
    assert_eq!(ticket["subject"], json!("Printer on fire"));
    assert_eq!(ticket["status"], json!("solved"));
    assert_eq!(ticket["created_at"], json!("2015-07-20T22:55:29Z"));
    assert_eq!(ticket["tags"], json!(["printer", "urgent"]));
    assert_eq!(
        ticket["custom_fields"],
        json!([{"id": MARKER_FIELD, "value": 4711}]),
        "the original-id stamp must ride along"
    );
}

#[tokio::test]
async fn status_filter_drops_closed_under_not_closed() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    source
        .mount_record(
            "/api/v2/tickets/5.json",
            "ticket",
            json!({"id": 5, "status": "closed"}),
        )
        .await;

    let session = test_session(&source, &target, log);

    // Reach inside via the batch surface: fetch, then run the machine with
    // the filter the driver would use.
    let ticket: caravel_core::records::Ticket = serde_json::from_value(
        json!({"id": 5, "status": "closed"}),
    )
    .unwrap();

    // Under `all` (and matching exact status) the ticket proceeds to the
    // dedup step, so mount the guard search and import for that case.
    target.mount_search("type:ticket fieldvalue:5", vec![]).await;
    source
        .mount_collection("/api/v2/tickets/5/comments.json", "comments", vec![])
        .await;
    target.mount_import(77).await;

    // not_closed: dropped before any remote call.
    let outcome = run_with_filter(&session, &ticket, StatusFilter::NotClosed).await;
    assert_eq!(outcome, TicketOutcome::SkippedStatus);

    let outcome = run_with_filter(&session, &ticket, StatusFilter::All).await;
    assert_eq!(outcome, TicketOutcome::Migrated(77));
}

/// Drive one prefetched ticket through a single-record batch file, which
/// exercises the same state machine the enumerating drivers use.
async fn run_with_filter(
    session: &Session,
    ticket: &caravel_core::records::Ticket,
    filter: StatusFilter,
) -> TicketOutcome {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ids.txt");
    std::fs::write(&file, format!("{}\n", ticket.id.unwrap())).unwrap();
    let summary = session.migrate_from_file(&file, filter).await.unwrap();
    assert_eq!(summary.processed, 1);
    if summary.migrated == 1 {
        TicketOutcome::Migrated(77)
    } else if summary.skipped_status == 1 {
        TicketOutcome::SkippedStatus
    } else {
        TicketOutcome::SkippedDuplicate(0)
    }
}

#[tokio::test]
async fn deleted_tickets_never_migrate() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 6, "status": "deleted"})).await;

    let session = test_session(&source, &target, log);
    let outcome = session.migrate_ticket_by_id(6).await.unwrap();
    assert_eq!(outcome, TicketOutcome::SkippedStatus);
    assert!(import_bodies(&target).await.is_empty());
}

#[tokio::test]
async fn suspended_requester_becomes_internal_note() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(
        &source,
        json!({"id": 4711, "status": "open", "requester_id": 77}),
    )
    .await;
    source
        .mount_record(
            "/api/v2/users/77.json",
            "user",
            json!({"id": 77, "name": "Sam Doe", "email": "sam@acme.test"}),
        )
        .await;
    target
        .mount_search(
            "type:user email:sam@acme.test",
            vec![json!({
                "id": 501,
                "email": "sam@acme.test",
                "name": "Sam Doe",
                "suspended": true
            })],
        )
        .await;
    target.mount_search("type:ticket fieldvalue:4711", vec![]).await;
    target.mount_import(9001).await;

    let session = test_session(&source, &target, log);
    session.migrate_ticket_by_id(4711).await.unwrap();

    let bodies = import_bodies(&target).await;
    let ticket = &bodies[0]["ticket"];
    assert!(ticket.get("requester_id").is_none(), "no requester set");

    let comments = ticket["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(
        comments[0]["body"],
        json!("Requester was Sam Doe (suspended)")
    );
    assert_eq!(comments[0]["public"], json!(false));
}

#[tokio::test]
async fn problem_chain_migrates_bottom_up_exactly_once() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    // A(1) -> B(2) -> C(3); none exist on the target yet.
    mount_bare_ticket(
        &source,
        json!({"id": 1, "status": "open", "type": "incident", "problem_id": 2}),
    )
    .await;
    mount_bare_ticket(
        &source,
        json!({"id": 2, "status": "open", "type": "problem", "problem_id": 3}),
    )
    .await;
    mount_bare_ticket(&source, json!({"id": 3, "status": "open", "type": "problem"})).await;

    for id in [1, 2, 3] {
        target
            .mount_search(&format!("type:ticket fieldvalue:{id}"), vec![])
            .await;
    }

    // Import answers 100, then 101, then 102.
    for created_id in [100u64, 101] {
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/tickets.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ticket": {"id": created_id, "status": "open"}
            })))
            .up_to_n_times(1)
            .mount(&target.server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/api/v2/imports/tickets.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ticket": {"id": 102, "status": "open"}
        })))
        .mount(&target.server)
        .await;

    let session = test_session(&source, &target, log);
    let outcome = session.migrate_ticket_by_id(1).await.unwrap();
    assert_eq!(outcome, TicketOutcome::Migrated(102));

    let bodies = import_bodies(&target).await;
    assert_eq!(bodies.len(), 3, "each chain member imports exactly once");

    let stamp = |body: &Value| body["ticket"]["custom_fields"][0]["value"].as_u64().unwrap();
    assert_eq!(stamp(&bodies[0]), 3, "deepest parent lands first");
    assert_eq!(stamp(&bodies[1]), 2);
    assert_eq!(stamp(&bodies[2]), 1);

    // Each child links to the freshly created parent.
    assert_eq!(bodies[1]["ticket"]["problem_id"], json!(100));
    assert_eq!(bodies[2]["ticket"]["problem_id"], json!(101));
}

#[tokio::test]
async fn problem_cycle_fails_instead_of_recursing() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 1, "status": "open", "problem_id": 2})).await;
    mount_bare_ticket(&source, json!({"id": 2, "status": "open", "problem_id": 1})).await;
    target.mount_any_search(vec![]).await;

    let session = test_session(&source, &target, log);
    let result = session.migrate_ticket_by_id(1).await;
    match result {
        Err(CaravelError::Cycle(id)) => assert_eq!(id, 1),
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert!(import_bodies(&target).await.is_empty(), "nothing commits");
}

#[tokio::test]
async fn existing_non_problem_parent_becomes_note_instead_of_link() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 1, "status": "open", "problem_id": 2})).await;
    target.mount_search("type:ticket fieldvalue:1", vec![]).await;
    target
        .mount_search(
            "type:ticket fieldvalue:2",
            vec![json!({
                "id": 555,
                "status": "open",
                "type": "incident",
                "custom_fields": [{"id": MARKER_FIELD, "value": "2"}]
            })],
        )
        .await;
    target.mount_import(9001).await;

    let session = test_session(&source, &target, log);
    session.migrate_ticket_by_id(1).await.unwrap();

    let bodies = import_bodies(&target).await;
    let ticket = &bodies[0]["ticket"];
    assert!(ticket.get("problem_id").is_none());
    let comments = ticket["comments"].as_array().unwrap();
    assert_eq!(
        comments[0]["body"],
        json!("Linked ticket 555 is not a problem, could not link")
    );
}

#[tokio::test]
async fn inline_attachment_rehosts_and_failures_leave_reference() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    let good_url = format!("{}/attachments/token/good/img.png", source.uri());
    let bad_url = format!("{}/attachments/token/gone/img.png", source.uri());
    let body = format!(
        r#"<p>Look:</p><img src="{good_url}"><img src="{bad_url}"><img src="https://elsewhere.example/pic.png">"#
    );

    source
        .mount_record("/api/v2/tickets/4711.json", "ticket", json!({"id": 4711, "status": "open"}))
        .await;
    source
        .mount_collection(
            "/api/v2/tickets/4711/comments.json",
            "comments",
            vec![json!({"id": 1, "html_body": body, "public": true})],
        )
        .await;
    source
        .mount_attachment("/attachments/token/good/img.png", "img.png", vec![1, 2, 3])
        .await;
    Mock::given(method("GET"))
        .and(path("/attachments/token/gone/img.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&source.server)
        .await;

    target.mount_search("type:ticket fieldvalue:4711", vec![]).await;
    target.mount_import(9001).await;

    // Exactly one upload: the good attachment.
    Mock::given(method("POST"))
        .and(path("/api/v2/uploads.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "upload": {"token": "tok_good"}
        })))
        .expect(1)
        .mount(&target.server)
        .await;

    let session = test_session(&source, &target, log);
    session.migrate_ticket_by_id(4711).await.unwrap();

    let bodies = import_bodies(&target).await;
    let comment = &bodies[0]["ticket"]["comments"][0];
    let html = comment["html_body"].as_str().unwrap();

    assert!(html.contains("[See Attachment]"), "good ref replaced");
    assert!(html.contains(&bad_url), "failed ref left untouched");
    assert!(
        html.contains("https://elsewhere.example/pic.png"),
        "foreign-host ref left untouched"
    );
    assert_eq!(comment["uploads"], json!(["tok_good"]));
}

#[tokio::test]
async fn transient_import_failure_retries_exactly_once() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 4711, "status": "open"})).await;
    target.mount_search("type:ticket fieldvalue:4711", vec![]).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/imports/tickets.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&target.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/imports/tickets.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ticket": {"id": 9001, "status": "open"}
        })))
        .expect(1)
        .mount(&target.server)
        .await;

    let session = test_session(&source, &target, log);
    let outcome = session.migrate_ticket_by_id(4711).await.unwrap();
    assert_eq!(outcome, TicketOutcome::Migrated(9001));
}

#[tokio::test]
async fn permanent_import_failure_lands_in_the_error_log() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    mount_bare_ticket(&source, json!({"id": 4711, "status": "open"})).await;
    target.mount_search("type:ticket fieldvalue:4711", vec![]).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/imports/tickets.json"))
        .respond_with(ResponseTemplate::new(422).set_body_string("RecordInvalid"))
        .expect(1)
        .mount(&target.server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ids = dir.path().join("ids.txt");
    std::fs::write(&ids, "4711\n").unwrap();

    let session = test_session(&source, &target, log.clone());
    let summary = session
        .migrate_from_file(&ids, StatusFilter::All)
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.migrated, 0);

    let content = std::fs::read_to_string(&log).unwrap();
    assert!(content.contains("ticket 4711"), "got: {content}");
    assert!(content.contains("422"), "got: {content}");
}

#[tokio::test]
async fn migrate_all_walks_the_incremental_feed() {
    let source = MockInstance::start().await;
    let target = MockInstance::start().await;
    let (_dir, log) = scratch_log();

    let page_two = format!("{}/api/v2/incremental/tickets.json?start_time=1400000000", source.uri());
    Mock::given(method("GET"))
        .and(path("/api/v2/incremental/tickets.json"))
        .and(wiremock::matchers::query_param("start_time", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tickets": [
                {"id": 1, "status": "open", "generated_timestamp": 1},
                {"id": 2, "status": "deleted", "generated_timestamp": 2}
            ],
            "count": 1000,
            "end_time": 1_400_000_000,
            "next_page": page_two
        })))
        .mount(&source.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/incremental/tickets.json"))
        .and(wiremock::matchers::query_param("start_time", "1400000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tickets": [{"id": 3, "status": "open", "generated_timestamp": 3}],
            "count": 1,
            "end_time": 1_500_000_000,
            "next_page": null
        })))
        .mount(&source.server)
        .await;

    for id in [1u64, 3] {
        source
            .mount_collection(&format!("/api/v2/tickets/{id}/comments.json"), "comments", vec![])
            .await;
    }
    target.mount_any_search(vec![]).await;
    target.mount_import(9000).await;

    let session = test_session(&source, &target, log);
    let summary = session.migrate_all(StatusFilter::All).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.migrated, 2);
    assert_eq!(summary.skipped_status, 1, "deleted ticket is dropped");
    assert_eq!(summary.failed, 0);
}
