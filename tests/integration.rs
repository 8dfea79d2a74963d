use std::{ops::Deref, sync::Arc, time::Duration};

use actix_web::{http::StatusCode, test, web, App};
use chrono::{DateTime, Utc};
use relayq::{
    config::Config,
    error::Error,
    item::{ChannelClass, Payload, QueueItem, QueueStats},
    service::Service,
    store,
    transport::memory::MemoryTransport,
};
use tempfile::TempDir;

struct TmpService {
    svc: Service,
    transport: Arc<MemoryTransport>,
    #[allow(unused)]
    tmpdir: TempDir,
}

impl Deref for TmpService {
    type Target = Service;

    fn deref(&self) -> &Self::Target {
        &self.svc
    }
}

async fn setup() -> TmpService {
    setup_with(Config::default()).await
}

async fn setup_with(mut config: Config) -> TmpService {
    let tmpdir = tempfile::tempdir().unwrap();

    config.db_path = Some(
        tmpdir
            .path()
            .join("relayq.db")
            .to_string_lossy()
            .to_string(),
    );

    let transport = Arc::new(MemoryTransport::new());

    TmpService {
        svc: Service::connect_with(config, transport.clone())
            .await
            .unwrap(),
        transport,
        tmpdir,
    }
}

fn payload() -> Payload {
    Payload::new("Payment received", "<p>Thanks for your order.</p>")
}

async fn fetch(svc: &Service, id: i64) -> QueueItem {
    let mut conn = svc.db().acquire().await.unwrap();

    store::fetch_item(&mut conn, id).await.unwrap().unwrap()
}

async fn make_due(svc: &Service, id: i64) {
    sqlx::query("UPDATE queue_items SET next_retry_at = NULL, claimed_at = NULL WHERE id = $1")
        .bind(id)
        .execute(svc.db())
        .await
        .unwrap();
}

async fn all_items(svc: &Service) -> Vec<QueueItem> {
    sqlx::query_as("SELECT * FROM queue_items ORDER BY id")
        .fetch_all(svc.db())
        .await
        .unwrap()
}

async fn retry_delay_secs(svc: &Service, id: i64, from: DateTime<Utc>) -> i64 {
    let item = fetch(svc, id).await;

    (item.next_retry_at.unwrap() - from).num_seconds()
}

#[tokio::test]
async fn enqueue_validates_recipient_and_sets_defaults() {
    let service = setup().await;

    let err = service.try_enqueue(ChannelClass::Normal, "", payload()).await;
    assert!(matches!(err, Err(Error::InvalidParameter { .. })));

    assert_eq!(
        service.enqueue(ChannelClass::Normal, "  ", payload()).await,
        None
    );

    let id = service
        .enqueue(ChannelClass::Normal, "user@example.com", payload())
        .await
        .unwrap();

    let item = fetch(&service, id).await;
    assert_eq!(item.channel, ChannelClass::Normal);
    assert_eq!(item.recipient, "user@example.com");
    assert_eq!(item.attempts, 0);
    assert_eq!(item.max_attempts, 3);
    assert_eq!(item.next_retry_at, None);
    assert_eq!(item.sent_at, None);
    assert_eq!(item.failed_at, None);
    assert_eq!(item.last_error, None);
}

#[tokio::test]
async fn critical_item_sent_on_first_attempt() {
    let service = setup().await;

    let id = service
        .try_enqueue(ChannelClass::Critical, "ops@example.com", payload())
        .await
        .unwrap();

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent, report.failed), (1, 1, 0));

    let item = fetch(&service, id).await;
    assert!(item.is_terminal());
    assert!(item.sent_at.is_some());
    assert_eq!(item.attempts, 1);
    assert_eq!(item.failed_at, None);

    assert!(service.dead_letters(10).await.unwrap().is_empty());

    // A sent item never satisfies the claim predicate again.
    let report = service.process_queue().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(service.transport.attempts(), 1);
}

#[tokio::test]
async fn normal_item_dead_letters_after_exhausting_attempts() {
    let service = setup().await;
    service.transport.fail_times(3, "451 4.7.1 try again later");

    let id = service
        .try_enqueue(ChannelClass::Normal, "user@example.com", payload())
        .await
        .unwrap();

    for expected_attempts in 1..=2i64 {
        let report = service.process_queue().await.unwrap();
        assert_eq!((report.processed, report.sent, report.failed), (1, 0, 1));

        let item = fetch(&service, id).await;
        assert_eq!(item.attempts, expected_attempts);
        assert!(item.next_retry_at.is_some());
        assert!(item.failed_at.is_none());

        make_due(&service, id).await;
    }

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent, report.failed), (1, 0, 1));

    let item = fetch(&service, id).await;
    assert!(item.is_terminal());
    assert_eq!(item.attempts, 3);
    assert!(item.failed_at.is_some());
    assert_eq!(item.sent_at, None);
    assert!(item.last_error.as_deref().unwrap().contains("451"));

    let letters = service.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].item_id, id);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].recipient, "user@example.com");
    assert_eq!(letters[0].last_error, item.last_error);

    // Terminal rows stay frozen even when they look due again.
    make_due(&service, id).await;
    let before = fetch(&service, id).await;

    let report = service.process_queue().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(fetch(&service, id).await, before);
}

#[tokio::test]
async fn backoff_follows_class_schedule_and_grows() {
    let service = setup().await;
    service.transport.fail_times(4, "connection reset by peer");

    let critical = service
        .try_enqueue(ChannelClass::Critical, "a@example.com", payload())
        .await
        .unwrap();
    let normal = service
        .try_enqueue(ChannelClass::Normal, "b@example.com", payload())
        .await
        .unwrap();

    let before = Utc::now();
    service.process_queue().await.unwrap();

    let first_critical = retry_delay_secs(&service, critical, before).await;
    let first_normal = retry_delay_secs(&service, normal, before).await;
    assert!(
        (55..=75).contains(&first_critical),
        "critical first retry should be about a minute out, got {first_critical}s"
    );
    assert!(
        (295..=315).contains(&first_normal),
        "normal first retry should be about five minutes out, got {first_normal}s"
    );

    make_due(&service, critical).await;
    make_due(&service, normal).await;

    let before = Utc::now();
    service.process_queue().await.unwrap();

    let second_critical = retry_delay_secs(&service, critical, before).await;
    let second_normal = retry_delay_secs(&service, normal, before).await;
    assert!(second_critical > first_critical);
    assert!(second_normal > first_normal);
    assert!(
        (295..=315).contains(&second_critical),
        "critical second retry should be about five minutes out, got {second_critical}s"
    );
    assert!(
        (1795..=1815).contains(&second_normal),
        "normal second retry should be about thirty minutes out, got {second_normal}s"
    );
}

#[tokio::test]
async fn claim_batch_is_fifo_and_capped() {
    let service = setup_with(Config {
        batch_size: Some(2),
        ..Config::default()
    })
    .await;

    for recipient in [
        "first@example.com",
        "second@example.com",
        "third@example.com",
    ] {
        service
            .try_enqueue(ChannelClass::Normal, recipient, payload())
            .await
            .unwrap();
    }

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent), (2, 2));

    let delivered: Vec<_> = service
        .transport
        .delivered()
        .into_iter()
        .map(|d| d.recipient)
        .collect();
    assert_eq!(delivered, ["first@example.com", "second@example.com"]);

    assert_eq!(service.stats().await.unwrap().pending, 1);

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent), (1, 1));

    let delivered: Vec<_> = service
        .transport
        .delivered()
        .into_iter()
        .map(|d| d.recipient)
        .collect();
    assert_eq!(
        delivered,
        [
            "first@example.com",
            "second@example.com",
            "third@example.com"
        ]
    );
}

#[tokio::test]
async fn stats_reflect_terminal_outcomes() {
    let service = setup().await;
    service.transport.fail_times(3, "mailbox unavailable");

    let failing = service
        .try_enqueue(ChannelClass::Normal, "bounce@example.com", payload())
        .await
        .unwrap();

    for _ in 0..3 {
        service.process_queue().await.unwrap();
        make_due(&service, failing).await;
    }

    service
        .try_enqueue(ChannelClass::Critical, "ok@example.com", payload())
        .await
        .unwrap();
    service.process_queue().await.unwrap();

    assert_eq!(
        service.stats().await.unwrap(),
        QueueStats {
            pending: 0,
            processing: 0,
            sent_today: 1,
            failed_today: 1,
        }
    );
}

#[tokio::test]
async fn stats_partition_live_items_by_due_time() {
    let service = setup().await;
    service.transport.fail_times(1, "greylisted");

    service
        .try_enqueue(ChannelClass::Normal, "retry@example.com", payload())
        .await
        .unwrap();
    service
        .try_enqueue(ChannelClass::Normal, "ok@example.com", payload())
        .await
        .unwrap();

    service.process_queue().await.unwrap();

    service
        .try_enqueue(ChannelClass::Normal, "later@example.com", payload())
        .await
        .unwrap();

    assert_eq!(
        service.stats().await.unwrap(),
        QueueStats {
            pending: 1,
            processing: 1,
            sent_today: 1,
            failed_today: 0,
        }
    );
}

#[tokio::test]
async fn send_critical_falls_back_to_queue_when_all_attempts_fail() {
    let service = setup().await;
    service.transport.fail_times(3, "connection refused");

    let delivered = service.send_critical("vip@example.com", payload()).await;

    assert!(!delivered);
    assert_eq!(service.transport.attempts(), 3);
    assert!(service.transport.delivered().is_empty());

    let items = all_items(&service).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].channel, ChannelClass::Critical);
    assert_eq!(items[0].recipient, "vip@example.com");
    assert_eq!(items[0].attempts, 0);
    assert!(items[0].sent_at.is_none() && items[0].failed_at.is_none());
}

#[tokio::test]
async fn send_critical_succeeds_after_in_process_retry() {
    let service = setup().await;
    service.transport.fail_times(1, "too many connections");

    assert!(service.send_critical("vip@example.com", payload()).await);
    assert_eq!(service.transport.attempts(), 2);
    assert!(all_items(&service).await.is_empty());
}

#[tokio::test]
async fn hung_transport_call_counts_as_failed_attempt() {
    let service = setup_with(Config {
        delivery_timeout_secs: Some(1),
        ..Config::default()
    })
    .await;
    service.transport.set_delay(Duration::from_secs(600));

    let id = service
        .try_enqueue(ChannelClass::Normal, "slow@example.com", payload())
        .await
        .unwrap();

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent, report.failed), (1, 0, 1));

    let item = fetch(&service, id).await;
    assert_eq!(item.attempts, 1);
    assert!(item.next_retry_at.is_some());
    assert!(item.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn expired_claims_become_visible_again() {
    let service = setup().await;

    let id = service
        .try_enqueue(ChannelClass::Normal, "user@example.com", payload())
        .await
        .unwrap();

    // Freshly claimed by another worker: stays invisible.
    sqlx::query("UPDATE queue_items SET claimed_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(id)
        .execute(service.db())
        .await
        .unwrap();

    assert_eq!(service.process_queue().await.unwrap().processed, 0);

    // A claim older than the visibility window is fair game.
    sqlx::query("UPDATE queue_items SET claimed_at = $1 WHERE id = $2")
        .bind(Utc::now() - chrono::Duration::seconds(600))
        .bind(id)
        .execute(service.db())
        .await
        .unwrap();

    let report = service.process_queue().await.unwrap();
    assert_eq!((report.processed, report.sent), (1, 1));
}

#[tokio::test]
async fn overlapping_passes_do_not_double_deliver() {
    let service = setup_with(Config {
        batch_size: Some(2),
        ..Config::default()
    })
    .await;
    service.transport.set_delay(Duration::from_millis(25));

    for recipient in ["a@example.com", "b@example.com", "c@example.com"] {
        service
            .try_enqueue(ChannelClass::Normal, recipient, payload())
            .await
            .unwrap();
    }

    let (first, second) = tokio::join!(service.process_queue(), service.process_queue());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.processed + second.processed, 3);
    assert_eq!(first.sent + second.sent, 3);

    let mut delivered: Vec<_> = service
        .transport
        .delivered()
        .into_iter()
        .map(|d| d.recipient)
        .collect();
    delivered.sort();
    assert_eq!(
        delivered,
        ["a@example.com", "b@example.com", "c@example.com"]
    );
}

#[tokio::test]
async fn single_attempt_budget_dead_letters_immediately() {
    let service = setup_with(Config {
        max_attempts: Some(1),
        ..Config::default()
    })
    .await;
    service.transport.fail_times(2, "550 5.1.1 user unknown");

    let first = service
        .try_enqueue(ChannelClass::Normal, "gone@example.com", payload())
        .await
        .unwrap();
    service.process_queue().await.unwrap();

    let second = service
        .try_enqueue(ChannelClass::Normal, "also-gone@example.com", payload())
        .await
        .unwrap();
    service.process_queue().await.unwrap();

    let letters = service.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0].item_id, second);
    assert_eq!(letters[1].item_id, first);
    assert_eq!(letters[0].attempts, 1);
}

#[actix_web::test]
async fn enqueue_endpoint_round_trip() {
    let service = setup().await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(service.svc.clone()))
            .service(relayq::api::queue::service()),
    )
    .await;

    let request = test::TestRequest::post()
        .uri("/queue")
        .set_json(serde_json::json!({
            "channel": "critical",
            "recipient": "user@example.com",
            "subject": "Welcome",
            "body": "<p>Hello</p>"
        }))
        .to_request();

    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: serde_json::Value = test::read_body_json(response).await;
    let id = body["id"].as_i64().unwrap();
    assert_eq!(fetch(&service, id).await.channel, ChannelClass::Critical);

    let request = test::TestRequest::post()
        .uri("/queue")
        .set_json(serde_json::json!({
            "channel": "normal",
            "recipient": "",
            "subject": "s",
            "body": "b"
        }))
        .to_request();

    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = test::TestRequest::get().uri("/queue/stats").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["pending"].as_i64(), Some(1));

    let request = test::TestRequest::get()
        .uri(&format!("/queue/{id}"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["id"].as_i64(), Some(id));
    assert_eq!(body["recipient"].as_str(), Some("user@example.com"));

    let request = test::TestRequest::get().uri("/queue/999").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
