//! Integration tests for single and bulk sends.

use std::sync::Arc;
use std::time::Duration;

use linkhub_core::{Error, SessionEvent, SessionId, SessionStatus};
use linkhub_engine::testing::ScriptedEngineFactory;
use linkhub_engine::{AuthRoot, MessageContent};
use linkhub_session::{BulkStatus, MetadataStore, SessionManager, SessionManagerConfig};

const BULK_DELAY: Duration = Duration::from_millis(500);

fn id(raw: &str) -> SessionId {
    SessionId::parse(raw).unwrap()
}

struct Fixture {
    _tmp: tempfile::TempDir,
    factory: ScriptedEngineFactory,
    manager: SessionManager,
}

async fn connected(factory: ScriptedEngineFactory) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(
        Arc::new(factory.clone()),
        AuthRoot::new(tmp.path().join("sessions")),
        MetadataStore::new(tmp.path().join("sessions.json")),
        SessionManagerConfig::default(),
    );

    let (observer, mut rx) = manager.broadcaster().observer();
    manager.broadcaster().subscribe(&observer, &id("s1"));
    manager.create_session(&id("s1"), None).await.unwrap();
    factory.latest("s1").unwrap().open("620000@s.whatsapp.net");
    loop {
        let event = rx.recv().await.unwrap().event;
        if event == SessionEvent::status(SessionStatus::Connected) {
            break;
        }
    }

    Fixture {
        _tmp: tmp,
        factory,
        manager,
    }
}

#[tokio::test(start_paused = true)]
async fn test_send_message_normalizes_recipient() {
    let fixture = connected(ScriptedEngineFactory::new().with_contact("6281234@s.whatsapp.net")).await;

    let receipt = fixture
        .manager
        .send_message(&id("s1"), "0812-34", "hello")
        .await
        .unwrap();
    assert_eq!(receipt["key"]["remoteJid"], "6281234@s.whatsapp.net");

    let engine = fixture.factory.latest("s1").unwrap();
    assert_eq!(engine.lookups(), vec!["6281234@s.whatsapp.net".to_string()]);
    assert_eq!(
        engine.sent(),
        vec![(
            "6281234@s.whatsapp.net".to_string(),
            MessageContent::text("hello")
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_to_unregistered_number() {
    let fixture = connected(ScriptedEngineFactory::new()).await;

    let err = fixture
        .manager
        .send_message(&id("s1"), "08111", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecipientNotFound(ref n) if n == "08111"));
    assert!(fixture.factory.latest("s1").unwrap().sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_to_number_without_digits() {
    let fixture = connected(ScriptedEngineFactory::new()).await;

    let err = fixture
        .manager
        .send_message(&id("s1"), "n/a", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRecipient(_)));
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connected_session() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = ScriptedEngineFactory::new();
    let manager = SessionManager::new(
        Arc::new(factory.clone()),
        AuthRoot::new(tmp.path().join("sessions")),
        MetadataStore::new(tmp.path().join("sessions.json")),
        SessionManagerConfig::default(),
    );

    let err = manager
        .send_message(&id("s1"), "0811", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    manager.create_session(&id("s1"), None).await.unwrap();
    let err = manager
        .send_message(&id("s1"), "0811", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotConnected(_)));

    let err = manager
        .send_bulk(&id("s1"), &["0811".to_string()], "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_keeps_connection_status() {
    let fixture = connected(
        ScriptedEngineFactory::new()
            .with_contact("62811@s.whatsapp.net")
            .with_send_failure("62811@s.whatsapp.net"),
    )
    .await;

    let err = fixture
        .manager
        .send_message(&id("s1"), "0811", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(
        fixture.manager.get_session(&id("s1")).unwrap().status,
        SessionStatus::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn test_bulk_send_reports_each_recipient() {
    let fixture = connected(ScriptedEngineFactory::new().with_contact("628111@s.whatsapp.net")).await;
    let numbers = vec!["08111".to_string(), "08222".to_string()];

    let start = tokio::time::Instant::now();
    let results = fixture
        .manager
        .send_bulk(&id("s1"), &numbers, "promo")
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].number, "08111");
    assert_eq!(results[0].status, BulkStatus::Sent);
    assert_eq!(results[1].number, "08222");
    assert_eq!(results[1].status, BulkStatus::NotFound);
    assert!(start.elapsed() >= BULK_DELAY * (numbers.len() as u32 - 1));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_send_continues_after_errors() {
    let fixture = connected(
        ScriptedEngineFactory::new()
            .with_contact("62811@s.whatsapp.net")
            .with_contact("62822@s.whatsapp.net")
            .with_send_failure("62811@s.whatsapp.net"),
    )
    .await;
    let numbers = vec!["0811".to_string(), "bogus".to_string(), "0822".to_string()];

    let start = tokio::time::Instant::now();
    let results = fixture
        .manager
        .send_bulk(&id("s1"), &numbers, "hi")
        .await
        .unwrap();

    let statuses: Vec<BulkStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![BulkStatus::Error, BulkStatus::NotFound, BulkStatus::Sent]
    );
    assert!(results[0].error.as_deref().unwrap().contains("failed"));
    assert!(start.elapsed() >= BULK_DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_send_single_recipient_has_no_delay() {
    let fixture = connected(ScriptedEngineFactory::new().with_contact("62811@s.whatsapp.net")).await;

    let start = tokio::time::Instant::now();
    let results = fixture
        .manager
        .send_bulk(&id("s1"), &["0811".to_string()], "hi")
        .await
        .unwrap();

    assert_eq!(results[0].status, BulkStatus::Sent);
    assert!(start.elapsed() < BULK_DELAY);
}
