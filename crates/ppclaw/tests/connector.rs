mod common;

use common::*;
use ppclaw::binder::Credentials;
use ppclaw::config::ConfigPatch;
use ppclaw::error::{BindingError, ConnectorError};
use ppclaw::notes::{FileNotesStore, GroupId, NotesStore};
use ppclaw::session::SessionMetadata;
use ppclaw::supervisor::ConnectionState;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const GROUP: &str = "6f1c2d3e-4b5a-4c6d-8e7f-9a0b1c2d3e4f";

fn notes_store(name: &str) -> Arc<FileNotesStore> {
    let dir: PathBuf = std::env::temp_dir().join("ppclaw_connector_test");
    let instance = format!("{name}-{}", std::process::id());
    let _ = std::fs::remove_dir_all(dir.join("notes").join(&instance));
    Arc::new(FileNotesStore::new(&dir, &instance).unwrap())
}

#[tokio::test]
async fn connects_with_bearer_key_and_answers_ping() {
    let mut relay = FakeRelay::start().await;
    let h = harness(
        &relay.discovery_url(),
        Credentials::ApiKey("sk-live".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("ping"),
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert_eq!(relay.auth_headers(), vec!["Bearer sk-live".to_string()]);

    relay.push(json!({ "type": "ping" }));
    assert_eq!(relay.recv().await, json!({ "type": "pong" }));

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Terminated);
}

#[tokio::test]
async fn direct_message_is_acked_then_answered() {
    let mut relay = FakeRelay::start().await;
    let agent = Arc::new(EchoAgent::default());
    let h = harness(
        &relay.discovery_url(),
        Credentials::ApiKey("sk-live".to_string()),
        agent.clone(),
        notes_store("direct"),
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());
    wait_for_state(&mut states, ConnectionState::Connected).await;

    relay.push(json!({
        "type": "message",
        "id": "m1",
        "content": "hello",
        "senderId": "u1",
        "senderName": "Mei",
    }));

    assert_eq!(relay.recv().await, json!({ "type": "ack", "id": "m1" }));
    assert_eq!(
        relay.recv().await,
        json!({ "type": "reply", "replyTo": "m1", "content": "echo: hello", "attachments": [] })
    );
    assert_eq!(agent.requests.lock().unwrap()[0].session_key.as_str(), "ppclaw:dm:u1");

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn group_message_sees_stored_notes() {
    let mut relay = FakeRelay::start().await;
    let agent = Arc::new(EchoAgent::default());
    let notes = notes_store("group");
    notes
        .write(&GroupId::parse(GROUP).unwrap(), "TODO: ship v2")
        .unwrap();
    let h = harness(
        &relay.discovery_url(),
        Credentials::ApiKey("sk-live".to_string()),
        agent.clone(),
        notes,
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());
    wait_for_state(&mut states, ConnectionState::Connected).await;

    relay.push(json!({
        "type": "group_message",
        "id": "g1",
        "groupId": GROUP,
        "groupName": "release crew",
        "content": "what's left?",
        "senderId": "u1",
        "senderType": "user",
        "isMentioned": true,
    }));

    assert_eq!(relay.recv().await, json!({ "type": "ack", "id": "g1" }));
    assert_eq!(
        relay.recv().await,
        json!({
            "type": "group_reply",
            "replyTo": "g1",
            "groupId": GROUP,
            "content": "echo: what's left?",
            "attachments": [],
        })
    );

    let requests = agent.requests.lock().unwrap().clone();
    match &requests[0].metadata {
        SessionMetadata::Group { group_notes, .. } => assert_eq!(group_notes, "TODO: ship v2"),
        other => panic!("expected group metadata, got {other:?}"),
    }

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_token_is_exchanged_and_saved() {
    let relay = FakeRelay::start().await;
    let store = Arc::new(RecordingStore::default());
    let h = harness(
        &relay.discovery_url(),
        Credentials::BindToken("bt-1".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("bind"),
        store.clone(),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());

    wait_for_state(&mut states, ConnectionState::Connected).await;

    assert_eq!(relay.bind_tokens(), vec!["bt-1".to_string()]);
    assert_eq!(
        *store.patches.lock().unwrap(),
        vec![ConfigPatch::bound("sk-bound")]
    );
    assert_eq!(relay.auth_headers(), vec!["Bearer sk-bound".to_string()]);

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_bind_is_fatal() {
    let relay = FakeRelay::start_with(json!({ "error": "invalid token" }), &[]).await;
    let store = Arc::new(RecordingStore::default());
    let h = harness(
        &relay.discovery_url(),
        Credentials::BindToken("bt-bad".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("reject"),
        store.clone(),
    );
    let states = h.states.clone();

    let result = tokio::time::timeout(TIMEOUT, h.supervisor.run())
        .await
        .expect("supervisor should stop on its own");

    match result {
        Err(ConnectorError::Binding(BindingError::Rejected { body })) => {
            assert!(body.contains("invalid token"));
        }
        other => panic!("expected rejected bind, got {other:?}"),
    }
    assert!(store.patches.lock().unwrap().is_empty());
    assert!(relay.auth_headers().is_empty());
    assert_eq!(*states.borrow(), ConnectionState::Terminated);
}

#[tokio::test]
async fn fails_over_from_dead_relay() {
    let relay = FakeRelay::start_with(json!({ "api_key": "sk-bound" }), &[dead_relay(50.0)]).await;
    let h = harness(
        &relay.discovery_url(),
        Credentials::ApiKey("sk-live".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("failover"),
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert_eq!(relay.auth_headers(), vec!["Bearer sk-live".to_string()]);

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn keeps_retrying_while_discovery_is_down() {
    let h = harness(
        "http://127.0.0.1:1/relay.json",
        Credentials::ApiKey("sk-live".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("down"),
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());

    wait_for_state(&mut states, ConnectionState::Backoff).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Terminated);
}

#[tokio::test]
async fn unsaved_api_key_is_still_used() {
    let relay = FakeRelay::start().await;
    let h = harness(
        &relay.discovery_url(),
        Credentials::BindToken("bt-1".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("unsaved"),
        Arc::new(FailingStore),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert_eq!(relay.bind_tokens(), vec!["bt-1".to_string()]);
    assert_eq!(relay.auth_headers(), vec!["Bearer sk-bound".to_string()]);

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_to_cached_relay_after_drop() {
    let mut relay = FakeRelay::start().await;
    let h = harness(
        &relay.discovery_url(),
        Credentials::ApiKey("sk-live".to_string()),
        Arc::new(EchoAgent::default()),
        notes_store("reconnect"),
        Arc::new(RecordingStore::default()),
    );
    let mut states = h.states.clone();
    let task = tokio::spawn(h.supervisor.run());
    wait_for_state(&mut states, ConnectionState::Connected).await;

    relay.fail_discovery();
    relay.close_connection();

    tokio::time::timeout(TIMEOUT, async {
        while relay.auth_headers().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no second connection");
    wait_for_state(&mut states, ConnectionState::Connected).await;

    relay.push(json!({ "type": "ping" }));
    assert_eq!(relay.recv().await, json!({ "type": "pong" }));

    h.shutdown.send_replace(true);
    task.await.unwrap().unwrap();
}
