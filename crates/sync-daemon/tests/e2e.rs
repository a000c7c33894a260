//! End-to-end tests for sync-daemon.
//!
//! Tests the daemon's collaborators against real endpoints: the native
//! filesystem in a temp dir, the HTTP store against a wiremock server, and
//! the push channel against an in-test WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use sync_core::fs::{FileSystem, FsError};
use sync_core::push::{InMemoryHub, PushChannel, PushEvent};
use sync_core::record::{ContentHash, NewFile};
use sync_core::remote::{InMemoryRemote, RemoteError, RemoteStore};
use sync_core::{LocalEvent, RemoteNotification, SyncConfig, SyncEngine};
use sync_daemon::backoff::{ReconnectConfig, RetryConfig};
use sync_daemon::http::HttpRemoteStore;
use sync_daemon::native_fs::NativeFs;
use sync_daemon::ws::WsPushChannel;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn config() -> SyncConfig {
    SyncConfig {
        workspace_name: "notes".into(),
        workspace_pass: "secret".into(),
        ..Default::default()
    }
}

fn basic_auth() -> String {
    format!("Basic {}", STANDARD.encode("notes:secret"))
}

fn record_json(id: i64, workspace_path: &str, content: &[u8]) -> serde_json::Value {
    json!({
        "id": id,
        "workspace_path": workspace_path,
        "disk_path": format!("objects/{}", id),
        "hash": ContentHash::from_bytes(content).as_str(),
        "created_at": "2026-01-15T10:00:00Z",
        "updated_at": "2026-01-15T10:00:00Z",
        "mime_type": "text/markdown",
        "workspace_id": 1
    })
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
            max_attempts: None,
        },
    }
}

/// Create a mock server and a store pointing at it.
async fn setup_http() -> (MockServer, HttpRemoteStore) {
    let server = MockServer::start().await;
    let store = HttpRemoteStore::with_base_url(&config(), server.uri())
        .expect("Failed to build client")
        .with_retry(fast_retry());
    (server, store)
}

/// Accept one WebSocket connection, requiring our basic auth header.
async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("Failed to accept");
    let expected = basic_auth();
    accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str());
        if authorized {
            Ok(resp)
        } else {
            let mut rejected = ErrorResponse::new(None);
            *rejected.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejected)
        }
    })
    .await
    .expect("Handshake failed")
}

async fn ws_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    (listener, format!("ws://{}/api/v1/workspaces/1/ws", addr))
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        backoff_factor: 2.0,
        max_attempts: Some(20),
    }
}

fn deleted(id: i64, origin: &str) -> RemoteNotification {
    RemoteNotification::Deleted {
        origin: Some(origin.into()),
        id,
        workspace_path: format!("{}.md", id),
    }
}

async fn recv_event(channel: &WsPushChannel) -> PushEvent {
    timeout(Duration::from_secs(5), channel.recv())
        .await
        .expect("Timeout waiting for push event")
        .expect("Push channel closed")
}

// ============================================================================
// NativeFs
// ============================================================================

#[tokio::test]
async fn test_native_fs_basic_operations() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fs = NativeFs::new(temp_dir.path().to_path_buf());

    fs.write("test.md", b"# Hello").await.expect("Write failed");
    assert!(fs.exists("test.md").await.expect("Exists check failed"));
    assert!(!fs.exists("nonexistent.md").await.expect("Exists check failed"));

    let content = fs.read("test.md").await.expect("Read failed");
    assert_eq!(content, b"# Hello");

    fs.delete("test.md").await.expect("Delete failed");
    assert!(!fs.exists("test.md").await.expect("Exists check failed"));
}

#[tokio::test]
async fn test_native_fs_missing_file_is_not_found() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fs = NativeFs::new(temp_dir.path().to_path_buf());

    assert!(matches!(fs.read("nope.md").await, Err(FsError::NotFound(_))));
    assert!(matches!(fs.delete("nope.md").await, Err(FsError::NotFound(_))));
}

#[tokio::test]
async fn test_native_fs_list_is_recursive_and_skips_hidden() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fs = NativeFs::new(temp_dir.path().to_path_buf());

    fs.write("root.md", b"r").await.unwrap();
    fs.write("knowledge/topic.md", b"t").await.unwrap();
    fs.write("knowledge/deep/leaf.md", b"l").await.unwrap();
    fs.write(".obsidian/app.json", b"{}").await.unwrap();
    std::fs::create_dir_all(temp_dir.path().join("empty")).unwrap();

    let files = fs.list().await.expect("List failed");
    assert_eq!(
        files,
        vec!["knowledge/deep/leaf.md", "knowledge/topic.md", "root.md"]
    );
}

#[tokio::test]
async fn test_native_fs_rename_creates_parents() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fs = NativeFs::new(temp_dir.path().to_path_buf());

    fs.write("a.md", b"body").await.unwrap();
    fs.rename("a.md", "archive/2026/a.md").await.expect("Rename failed");

    assert!(!fs.exists("a.md").await.unwrap());
    assert_eq!(fs.read("archive/2026/a.md").await.unwrap(), b"body");
}

#[tokio::test]
async fn test_native_fs_refuses_paths_outside_vault() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault = temp_dir.path().join("vault");
    std::fs::create_dir_all(&vault).unwrap();
    let fs = NativeFs::new(vault);

    for path in ["../escaped.md", "notes/../../escaped.md", "C:/escaped.md"] {
        assert!(matches!(
            fs.write(path, b"x").await,
            Err(FsError::InvalidPath { .. })
        ));
    }
    assert!(matches!(
        fs.read("../escaped.md").await,
        Err(FsError::InvalidPath { .. })
    ));
    fs.write("inside.md", b"x").await.unwrap();
    assert!(matches!(
        fs.rename("inside.md", "../escaped.md").await,
        Err(FsError::InvalidPath { .. })
    ));

    assert!(!temp_dir.path().join("escaped.md").exists());
    assert!(temp_dir.path().join("vault/inside.md").exists());
}

#[tokio::test]
async fn test_engine_keeps_remote_paths_inside_vault() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault = temp_dir.path().join("vault");
    std::fs::create_dir_all(&vault).unwrap();

    let remote = Arc::new(InMemoryRemote::new(1));
    remote.seed("../escaped.md", b"outside");
    remote.seed("notes/ok.md", b"inside");
    let hub = InMemoryHub::new();
    let mut engine = SyncEngine::new(
        NativeFs::new(vault.clone()),
        Arc::clone(&remote),
        hub.join("daemon"),
        1,
    );

    let report = engine.start().await.expect("Startup failed");

    assert_eq!(report.downloaded, vec!["notes/ok.md".to_string()]);
    assert!(!temp_dir.path().join("escaped.md").exists());
    assert_eq!(std::fs::read(vault.join("notes/ok.md")).unwrap(), b"inside");
}

// ============================================================================
// HttpRemoteStore
// ============================================================================

#[tokio::test]
async fn test_resolve_workspace() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/notes"))
        .and(header("authorization", basic_auth().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "notes"})))
        .mount(&server)
        .await;

    let workspace = store.resolve_workspace("notes").await.expect("Lookup failed");
    assert_eq!(workspace.id, 1);
    assert_eq!(workspace.name, "notes");
}

#[tokio::test]
async fn test_resolve_workspace_encodes_name() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/team%2Fnotes%3Fx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 4, "name": "team/notes?x"})))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = store
        .resolve_workspace("team/notes?x")
        .await
        .expect("Lookup failed");
    assert_eq!(workspace.id, 4);
    assert_eq!(workspace.name, "team/notes?x");
}

#[tokio::test]
async fn test_create_file_sends_base64_content() {
    let (server, store) = setup_http().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/files"))
        .and(header("authorization", basic_auth().as_str()))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "workspace_id": 1,
            "workspace_path": "files/newFile.md",
            "mime_type": "text/markdown",
            "content": STANDARD.encode(b"# New"),
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(record_json(5, "files/newFile.md", b"# New")))
        .expect(1)
        .mount(&server)
        .await;

    let record = store
        .create_file(&NewFile::new(1, "files/newFile.md"), b"# New")
        .await
        .expect("Create failed");

    assert_eq!(record.id, 5);
    assert_eq!(record.workspace_path, "files/newFile.md");
    assert!(ContentHash::from_bytes(b"# New").matches(&record.hash));
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let (server, store) = setup_http().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/files"))
        .respond_with(ResponseTemplate::new(409).set_body_string("path exists"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/files/9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/files/3"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let conflict = store.create_file(&NewFile::new(1, "a.md"), b"a").await;
    assert!(matches!(conflict, Err(RemoteError::Conflict(ref msg)) if msg.contains("path exists")));

    let missing = store.update_file(9, b"x").await;
    assert!(matches!(missing, Err(RemoteError::NotFound(_))));

    // Not retried
    assert_eq!(store.delete_file(3).await, Err(RemoteError::Unauthorized));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/1/files"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            record_json(1, "a.md", b"a"),
            record_json(2, "b/c.md", b"c"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let files = store.list_files(1).await.expect("List failed after retry");
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].workspace_path, "b/c.md");
}

#[tokio::test]
async fn test_persistent_outage_is_unreachable() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/files/4/content"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    assert!(matches!(store.fetch_file(4).await, Err(RemoteError::Unreachable(_))));
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    let store = HttpRemoteStore::with_base_url(&config(), "http://127.0.0.1:1")
        .expect("Failed to build client")
        .with_retry(RetryConfig::none());

    assert!(matches!(store.list_files(1).await, Err(RemoteError::Unreachable(_))));
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    assert!(matches!(
        store.list_files(1).await,
        Err(RemoteError::Deserialization(_))
    ));
}

#[tokio::test]
async fn test_fetch_rename_and_delete() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/files/2/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw bytes".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/files/2/move"))
        .and(body_partial_json(json!({"workspace_path": "moved.md"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json(2, "moved.md", b"raw bytes")))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/files/2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(store.fetch_file(2).await.unwrap(), b"raw bytes");
    assert_eq!(store.rename_file(2, "moved.md").await.unwrap().workspace_path, "moved.md");
    store.delete_file(2).await.expect("Delete failed");
}

#[tokio::test]
async fn test_engine_uploads_over_http() {
    let (server, store) = setup_http().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workspaces/1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/files"))
        .respond_with(ResponseTemplate::new(201).set_body_json(record_json(1, "files/newFile.md", b"hi")))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let fs = NativeFs::new(temp_dir.path().to_path_buf());
    let hub = InMemoryHub::new();
    let mut engine = SyncEngine::new(fs, store, hub.join("daemon"), 1);
    engine.start().await.expect("Startup failed");

    engine.fs().write("files/newFile.md", b"hi").await.unwrap();
    engine
        .handle(LocalEvent::create("files/newFile.md").into())
        .await
        .unwrap();
    // Editors fire create twice
    engine
        .handle(LocalEvent::create("files/newFile.md").into())
        .await
        .unwrap();

    assert_eq!(engine.identity().get("files/newFile.md"), Some(1));
    assert_eq!(hub.broadcasts().len(), 1);
}

// ============================================================================
// WsPushChannel
// ============================================================================

#[tokio::test]
async fn test_push_channel_delivers_notifications() {
    let (listener, url) = ws_listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text("not json")).await.unwrap();
        ws.send(Message::text(deleted(7, "other").to_json().unwrap()))
            .await
            .unwrap();
        ws
    });

    let channel = WsPushChannel::connect_url(url, "notes", "secret", "me", fast_reconnect())
        .await
        .expect("Failed to connect");

    // The unparseable frame is skipped
    assert_eq!(
        recv_event(&channel).await,
        PushEvent::Notification(deleted(7, "other"))
    );
    assert_eq!(channel.participant_id(), "me");

    let _ws = server.await.unwrap();
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_push_channel_broadcasts_json_text() {
    let (listener, url) = ws_listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("Expected text frame, got {:?}", other),
            }
        }
    });

    let channel = WsPushChannel::connect_url(url, "notes", "secret", "me", fast_reconnect())
        .await
        .expect("Failed to connect");
    channel.broadcast(&deleted(3, "me")).await.expect("Broadcast failed");

    let text = timeout(Duration::from_secs(5), server)
        .await
        .expect("Timeout waiting for broadcast")
        .unwrap();
    let received = RemoteNotification::from_json(text.as_bytes()).unwrap();
    assert_eq!(received, deleted(3, "me"));
    assert_eq!(received.origin(), Some("me"));
}

#[tokio::test]
async fn test_push_channel_rejects_bad_credentials() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            let mut rejected = ErrorResponse::new(None);
            *rejected.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejected)
        };
        let _ = accept_hdr_async(stream, reject).await;
    });

    let result = WsPushChannel::connect_url(url, "notes", "wrong", "me", fast_reconnect()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_push_channel_reconnects_after_drop() {
    let (listener, url) = ws_listener().await;
    let listener = Arc::new(listener);
    let server_listener = Arc::clone(&listener);
    let server = tokio::spawn(async move {
        // First connection: drop it straight away
        let mut first = accept_ws(&server_listener).await;
        first.close(None).await.unwrap();
        drop(first);

        // Second connection: deliver a notification
        let mut second = accept_ws(&server_listener).await;
        second
            .send(Message::text(deleted(1, "other").to_json().unwrap()))
            .await
            .unwrap();
        second
    });

    let channel = WsPushChannel::connect_url(url, "notes", "secret", "me", fast_reconnect())
        .await
        .expect("Failed to connect");

    assert_eq!(recv_event(&channel).await, PushEvent::Reconnected);
    assert_eq!(
        recv_event(&channel).await,
        PushEvent::Notification(deleted(1, "other"))
    );
    assert!(channel.is_connected().await);

    let _ws = server.await.unwrap();
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_while_disconnected_fails() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.close(None).await.unwrap();
        // Keep the listener alive but never accept again
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(listener);
    });

    let channel = WsPushChannel::connect_url(
        url,
        "notes",
        "secret",
        "me",
        ReconnectConfig {
            initial_delay: Duration::from_secs(30),
            ..fast_reconnect()
        },
    )
    .await
    .expect("Failed to connect");

    // Wait for the read task to notice the close
    for _ in 0..50 {
        if !channel.is_connected().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!channel.is_connected().await);
    assert!(channel.broadcast(&deleted(1, "me")).await.is_err());
}

#[tokio::test]
async fn test_max_message_size_constant() {
    use sync_daemon::MAX_MESSAGE_SIZE;

    // 50 MB limit
    assert_eq!(MAX_MESSAGE_SIZE, 50 * 1024 * 1024);
}

// ============================================================================
// FileWatcher
// ============================================================================

#[tokio::test]
async fn test_watcher_reports_new_file() {
    use sync_daemon::watcher::FileWatcher;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut watcher = FileWatcher::new(temp_dir.path().to_path_buf()).expect("Failed to watch");

    // Give the platform watcher a moment to register
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(temp_dir.path().join("fresh.md"), "# Fresh").unwrap();

    let event = timeout(Duration::from_secs(5), watcher.event_rx().recv())
        .await
        .expect("Timeout waiting for file event")
        .expect("Watcher channel closed");
    assert_eq!(event.path(), "fresh.md");
    assert!(matches!(event, LocalEvent::Create(_) | LocalEvent::Modify(_)));
}
