//! The four reference scenarios, applied through the real store.

use tsync_reconcile::RemoteTraffic;
use tsync_testkit::PanelDbFixture;

#[tokio::test]
async fn scenario_a_download_raised_rest_unchanged() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("a@x", 1000, true)]).await.unwrap();
    fx.client(1, "a@x", 100, 50, 1000).await.unwrap();
    let before = fx.raw_settings(1).await.unwrap();

    let db = fx.open().await.unwrap();
    let out = db
        .reconcile_snapshot(&[RemoteTraffic::new("a@x", 150, 50, 1000)])
        .await
        .unwrap();
    assert_eq!(out.report.updated, 1);

    let a = db.get_traffic_record("a@x").await.unwrap().unwrap();
    assert_eq!((a.down, a.up, a.total), (150, 50, 1000));
    assert_eq!(fx.raw_settings(1).await.unwrap(), before, "settings untouched");
}

#[tokio::test]
async fn scenario_b_unlimited_total_is_preserved() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("u@x", 0, true)]).await.unwrap();
    fx.client(1, "u@x", 10, 10, 0).await.unwrap();

    let db = fx.open().await.unwrap();
    let out = db
        .reconcile_snapshot(&[RemoteTraffic::new("u@x", 10, 10, 5000)])
        .await
        .unwrap();
    assert!(out.batch.is_empty());

    assert_eq!(db.get_traffic_record("u@x").await.unwrap().unwrap().total, 0);
    let entry = fx.quota_entry(1, "u@x").await.unwrap().unwrap();
    assert_eq!(entry.quota, 0);
    assert!(entry.enabled);
}

#[tokio::test]
async fn scenario_c_over_quota_client_is_disabled() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("c@x", 1000, true), ("other@x", 1000, true)])
        .await
        .unwrap();
    fx.client(1, "c@x", 400, 400, 1000).await.unwrap();
    fx.client(1, "other@x", 1, 1, 1000).await.unwrap();

    let db = fx.open().await.unwrap();
    let out = db
        .reconcile_snapshot(&[RemoteTraffic::new("c@x", 600, 500, 1000)])
        .await
        .unwrap();
    assert_eq!(out.report.disabled, 1);

    let c = db.get_traffic_record("c@x").await.unwrap().unwrap();
    assert_eq!((c.down, c.up), (600, 500));
    assert!(!fx.quota_entry(1, "c@x").await.unwrap().unwrap().enabled);
    assert!(fx.quota_entry(1, "other@x").await.unwrap().unwrap().enabled);
}

#[tokio::test]
async fn scenario_d_unknown_identity_writes_nothing() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("a@x", 1000, true)]).await.unwrap();
    fx.client(1, "a@x", 100, 50, 1000).await.unwrap();

    let db = fx.open().await.unwrap();
    let out = db
        .reconcile_snapshot(&[RemoteTraffic::new("ghost@x", 9_999, 9_999, 1)])
        .await
        .unwrap();
    assert!(out.batch.is_empty());
    assert_eq!(out.report.skipped_unknown, 1);
    assert!(db.get_traffic_record("ghost@x").await.unwrap().is_none());

    let st = db.status().await.unwrap();
    assert_eq!(st.client_count, 1);
}

#[tokio::test]
async fn second_pass_with_same_snapshot_changes_nothing() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("a@x", 1000, true), ("b@x", 500, true)])
        .await
        .unwrap();
    fx.client(1, "a@x", 400, 400, 1000).await.unwrap();
    fx.client(1, "b@x", 0, 0, 500).await.unwrap();

    let snapshot = [
        RemoteTraffic::new("a@x", 600, 500, 1000),
        RemoteTraffic::new("b@x", 10, 10, 2000),
        RemoteTraffic::new("nobody@x", 1, 1, 1),
    ];
    let db = fx.open().await.unwrap();
    let first = db.reconcile_snapshot(&snapshot).await.unwrap();
    assert_eq!(first.report.updated, 2);
    assert_eq!(first.report.quota_raised, 1);

    let second = db.reconcile_snapshot(&snapshot).await.unwrap();
    assert!(second.batch.is_empty());
    assert_eq!(second.report.updated, 0);
    assert_eq!(fx.quota_entry(1, "b@x").await.unwrap().unwrap().quota, 2000);
}
