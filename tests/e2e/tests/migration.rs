use archivist_e2e::harness::{self, LedgerChoice};
use archivist_engine::RecordSource;
use archivist_state::LedgerBackend;
use archivist_types::ledger::{LedgerStatus, MigrationId};
use archivist_types::record::RecordId;
use archivist_types::run::RunStatus;
use chrono::{Duration, TimeZone, Utc};

fn threshold() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn legacy_rows_are_archived_from_postgres() {
    let context = harness::bootstrap().await.expect("bootstrap");
    let fixture = context
        .allocate_fixture("legacy_rows", LedgerChoice::Sqlite)
        .await
        .expect("fixture");

    let old = Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap();
    context.insert_customer(&fixture, 1, Utc::now(), Some(true), "Active One").await.unwrap();
    context.insert_customer(&fixture, 2, old, Some(false), "Legacy Two").await.unwrap();
    context.insert_customer(&fixture, 3, old, None, "Legacy Three").await.unwrap();
    context
        .insert_customer(&fixture, 4, Utc::now() - Duration::days(1), Some(false), "Closed Four")
        .await
        .unwrap();

    let config = context.migration_config(&fixture, threshold(), None).unwrap();
    let summary = context.run_migration(&config).await.expect("migration run");

    assert_eq!(summary.outcome, Some(RunStatus::Completed));
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert!(!fixture.object_path(1).exists());

    let doc = harness::read_object(&fixture.object_path(2)).unwrap();
    assert_eq!(doc["id"], 2);
    assert_eq!(doc["is_active"], false);
    assert_eq!(doc["name"], "Legacy Two");
    assert!(doc.get("customer_id").is_none(), "mapped columns are not duplicated");
    assert!(fixture.object_path(3).exists());
    assert!(fixture.object_path(4).exists());

    let second = context.run_migration(&config).await.expect("second run");
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped_already_migrated, 3);

    context.drop_fixture(&fixture).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn postgres_ledger_tracks_outcomes_and_routing() {
    let context = harness::bootstrap().await.expect("bootstrap");
    let fixture = context
        .allocate_fixture("pg_ledger", LedgerChoice::Postgres)
        .await
        .expect("fixture");

    let old = Utc.with_ymd_and_hms(2018, 2, 2, 0, 0, 0).unwrap();
    for id in 1..=7 {
        context
            .insert_customer(&fixture, id, old, Some(false), &format!("Customer {id}"))
            .await
            .unwrap();
    }
    context.insert_customer(&fixture, 8, Utc::now(), Some(true), "Fresh Eight").await.unwrap();

    let config = context.migration_config(&fixture, threshold(), None).unwrap();
    let summary = context.run_migration(&config).await.expect("migration run");
    assert_eq!(summary.succeeded, 7);

    let components = context.components(&config).await.unwrap();
    let migration = MigrationId::new(fixture.migration.as_str());
    let ledger = components.ledger.clone();
    let entry = tokio::task::spawn_blocking(move || ledger.get_entry(&migration, RecordId::new(7)))
        .await
        .unwrap()
        .unwrap()
        .expect("ledger entry for id 7");
    assert_eq!(entry.status, LedgerStatus::Succeeded);
    assert_eq!(entry.object_key.as_deref(), Some("customer-7.json"));

    let router = archivist_engine::build_router(&config, &components).unwrap();
    assert_eq!(router.route(RecordId::new(7)).await.unwrap().source, RecordSource::Archive);
    assert_eq!(router.route(RecordId::new(8)).await.unwrap().source, RecordSource::Live);

    context.insert_customer(&fixture, 7, Utc::now(), Some(true), "Customer 7 again").await.unwrap();
    let routed = router.route(RecordId::new(7)).await.unwrap();
    assert_eq!(routed.source, RecordSource::Live);
    assert!(fixture.object_path(7).exists(), "archived copy is never deleted");

    context.drop_fixture(&fixture).await.unwrap();
}
