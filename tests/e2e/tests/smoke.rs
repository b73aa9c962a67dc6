#[tokio::test]
#[ignore = "requires Docker"]
async fn harness_bootstrap_exposes_postgres_port() {
    let context = archivist_e2e::harness::bootstrap()
        .await
        .expect("bootstrap must initialize test harness");

    assert!(context.postgres_port > 0);
}
