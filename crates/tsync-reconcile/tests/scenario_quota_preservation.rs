use tsync_reconcile::*;

#[test]
fn scenario_unlimited_quota_survives_finite_remote_total_even_when_over_usage() {
    let mut local = LocalSnapshot::empty();
    local.insert_traffic(ClientTraffic::new("u@x", 3, 10, 10, UNLIMITED));
    local.insert_inbound(
        3,
        r#"{"clients":[{"email":"u@x","totalGB":0,"enable":true}]}"#,
    );

    // Remote has the client capped at 100 bytes and well past it.
    let out = reconcile(&[RemoteTraffic::new("u@x", 5_000, 5_000, 100)], &local);

    assert!(out.batch.inbounds.is_empty(), "unlimited client must not be disabled");
    assert_eq!(out.batch.traffic.len(), 1);
    assert_eq!(out.batch.traffic[0].total, None);

    local.apply(&out.batch);
    assert_eq!(local.traffic("u@x").unwrap().total, UNLIMITED);
}
