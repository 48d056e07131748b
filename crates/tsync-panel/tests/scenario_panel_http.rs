//! Panel HTTP contract against a mock x-ui panel (no network).

use httpmock::prelude::*;
use tsync_config::ServerConfig;
use tsync_db::fixtures::{create_panel_db, insert_client};
use tsync_panel::{PanelClient, PanelSnapshotSource, SnapshotSource, UnavailableKind};
use tsync_reconcile::RemoteTraffic;

async fn panel_db_bytes() -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remote.db");
    let pool = create_panel_db(&path).await.unwrap();
    insert_client(&pool, 1, "a@x", 700, 300, 1000).await.unwrap();
    insert_client(&pool, 2, "b@x", 5, 5, 0).await.unwrap();
    pool.close().await;
    std::fs::read(&path).unwrap()
}

fn server_for(base_url: String) -> ServerConfig {
    ServerConfig::new(1, "mock-panel", base_url, "admin", "hunter2")
}

#[tokio::test]
async fn login_download_and_read_snapshot() {
    let panel = MockServer::start_async().await;
    let db = panel_db_bytes().await;

    let login = panel
        .mock_async(|when, then| {
            when.method(POST)
                .path("/secret/login")
                .body_contains("username=admin")
                .body_contains("password=hunter2");
            then.status(200)
                .header("content-type", "application/json")
                .header("set-cookie", "3x-ui=abc123; Path=/")
                .body(r#"{"success":true,"msg":"Login Successfully","obj":null}"#);
        })
        .await;
    let get_db = panel
        .mock_async(|when, then| {
            when.method(GET)
                .path("/secret/server/getDb")
                .header_exists("cookie");
            then.status(200)
                .header("content-type", "application/octet-stream")
                .body(db.clone());
        })
        .await;

    let work = tempfile::tempdir().unwrap();
    let source = PanelSnapshotSource::new(work.path());
    // Trailing slash on the base URL must not produce `//login`.
    let server = server_for(format!("{}/secret/", panel.base_url()));

    let rows = source.fetch_snapshot(&server).await.unwrap();
    assert_eq!(
        rows,
        vec![
            RemoteTraffic::new("a@x", 700, 300, 1000),
            RemoteTraffic::new("b@x", 5, 5, 0),
        ]
    );
    assert!(work.path().join("downloaded1.db").exists());

    login.assert_async().await;
    get_db.assert_async().await;
}

#[tokio::test]
async fn json_verdict_false_is_auth_failure() {
    let panel = MockServer::start_async().await;
    panel
        .mock_async(|when, then| {
            when.method(POST).path("/login");
            then.status(200)
                .body(r#"{"success":false,"msg":"Wrong username or password"}"#);
        })
        .await;

    let client = PanelClient::new(&server_for(panel.base_url())).unwrap();
    let err = client.login().await.unwrap_err();
    assert_eq!(err.kind, UnavailableKind::Auth);
    assert_eq!(err.server, "mock-panel");
    assert!(err.detail.contains("Wrong username"));
    assert!(!err.to_string().contains("hunter2"));
}

#[tokio::test]
async fn non_2xx_login_is_status_failure() {
    let panel = MockServer::start_async().await;
    panel
        .mock_async(|when, then| {
            when.method(POST).path("/login");
            then.status(404);
        })
        .await;

    let client = PanelClient::new(&server_for(panel.base_url())).unwrap();
    let err = client.login().await.unwrap_err();
    assert_eq!(err.kind, UnavailableKind::Status(404));
}

#[tokio::test]
async fn html_instead_of_database_is_decode_failure() {
    let panel = MockServer::start_async().await;
    panel
        .mock_async(|when, then| {
            when.method(POST).path("/login");
            then.status(200).body(r#"{"success":true}"#);
        })
        .await;
    panel
        .mock_async(|when, then| {
            when.method(GET).path("/server/getDb");
            then.status(200).body("<html><body>please log in</body></html>");
        })
        .await;

    let work = tempfile::tempdir().unwrap();
    let source = PanelSnapshotSource::new(work.path());
    let err = source
        .fetch_snapshot(&server_for(panel.base_url()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, UnavailableKind::Decode);
    assert!(!work.path().join("downloaded1.db").exists());
}

#[tokio::test]
async fn download_error_status_is_reported() {
    let panel = MockServer::start_async().await;
    panel
        .mock_async(|when, then| {
            when.method(POST).path("/login");
            then.status(200).body(r#"{"success":true}"#);
        })
        .await;
    panel
        .mock_async(|when, then| {
            when.method(GET).path("/server/getDb");
            then.status(500);
        })
        .await;

    let work = tempfile::tempdir().unwrap();
    let err = PanelSnapshotSource::new(work.path())
        .fetch_snapshot(&server_for(panel.base_url()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, UnavailableKind::Status(500));
}

#[tokio::test]
async fn unreachable_panel_is_transport_failure() {
    // Bind then release a port so nothing is listening on it.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let client = PanelClient::new(&server_for(format!("http://127.0.0.1:{port}"))).unwrap();
    let err = client.login().await.unwrap_err();
    assert_eq!(err.kind, UnavailableKind::Transport);
}
