use std::sync::Arc;

use tsync_reconcile::RemoteTraffic;
use tsync_runtime::SyncRunner;
use tsync_testkit::{servers, FakeSnapshotSource, PanelDbFixture};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_servers_converge_on_the_maximum() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("a@x", 1000, true)]).await.unwrap();
    fx.client(1, "a@x", 0, 0, 1000).await.unwrap();

    let names: Vec<String> = (1..=8).map(|i| format!("s{i}")).collect();
    let mut source = FakeSnapshotSource::new();
    for (i, name) in names.iter().enumerate() {
        let i = i as i64 + 1;
        // Different servers saw different maxima for each counter.
        source = source.with_rows(name, vec![RemoteTraffic::new("a@x", i * 10, 90 - i * 10, 1000)]);
    }

    let db = Arc::new(fx.open().await.unwrap());
    let runner = SyncRunner::new(Arc::new(source), db.clone()).with_concurrency(4);
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let summary = runner.run_once(&servers(&name_refs)).await;

    assert_eq!(summary.failed_count(), 0);
    let a = db.get_traffic_record("a@x").await.unwrap().unwrap();
    assert_eq!((a.down, a.up), (80, 80));
    assert!(fx.quota_entry(1, "a@x").await.unwrap().unwrap().enabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_direct_passes_never_regress() {
    let fx = PanelDbFixture::new().await.unwrap();
    fx.inbound(1, &[("a@x", 0, true)]).await.unwrap();
    fx.client(1, "a@x", 0, 0, 0).await.unwrap();
    let db = Arc::new(fx.open().await.unwrap());

    let mut tasks = Vec::new();
    for v in [300_i64, 100, 500, 200, 400] {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            db.reconcile_snapshot(&[RemoteTraffic::new("a@x", v, v, 0)])
                .await
                .map(|_| ())
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let a = db.get_traffic_record("a@x").await.unwrap().unwrap();
    assert_eq!((a.down, a.up, a.total), (500, 500, 0));
}
