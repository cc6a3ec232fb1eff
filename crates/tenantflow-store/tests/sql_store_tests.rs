use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tenantflow_core::{
    CredentialDraft, CredentialRepository, IdempotencyKey, IdempotencyState, IdempotencyStore,
    ReserveOutcome, RunStatus, RunStore, SealedSecret, WorkflowDefinition, WorkflowRun,
    WorkflowStep,
};
use tenantflow_store::{
    CredentialError, CredentialStore, IdempotencyLedger, LedgerConfig, Reservation, SecretCipher,
    SqlStore,
};

async fn create_test_store() -> (SqlStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}", db_path.display());
    let store = SqlStore::new(&db_url).await.unwrap();
    (store, temp_dir)
}

fn draft(tenant: &str, provider: &str, data: &str) -> CredentialDraft {
    let now = Utc::now();
    CredentialDraft {
        tenant_id: tenant.to_string(),
        provider: provider.to_string(),
        sealed_payload: SealedSecret {
            data: data.to_string(),
            nonce: "AAAAAAAAAAAAAAAA".to_string(),
            key_version: 1,
        },
        created_at: now,
        expires_at: now + Duration::hours(1),
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (store, _temp) = create_test_store().await;
    assert_eq!(store.migrate().await.unwrap(), 0);
}

#[tokio::test]
async fn test_credential_upsert_rotates() {
    let (store, _temp) = create_test_store().await;

    let first = store.put_rotating(draft("acme", "google_ads", "v1")).await.unwrap();
    let second = store.put_rotating(draft("acme", "google_ads", "v2")).await.unwrap();
    assert_eq!(first.rotation_version, 1);
    assert_eq!(second.rotation_version, 2);

    let stored = CredentialRepository::get(&store, "acme", "google_ads").await.unwrap().unwrap();
    assert_eq!(stored.sealed_payload.data, "v2");
    assert_eq!(stored.rotation_version, 2);
    assert_eq!(stored.expires_at.timestamp_micros(), second.expires_at.timestamp_micros());
}

#[tokio::test]
async fn test_credential_listing_and_deletion() {
    let (store, _temp) = create_test_store().await;
    store.put_rotating(draft("acme", "meta_ads", "m")).await.unwrap();
    store.put_rotating(draft("acme", "google_ads", "g")).await.unwrap();
    store.put_rotating(draft("globex", "google_ads", "x")).await.unwrap();

    let providers: Vec<String> = CredentialRepository::list_for_tenant(&store, "acme")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.provider)
        .collect();
    assert_eq!(providers, vec!["google_ads", "meta_ads"]);

    assert!(store.delete("acme", "meta_ads").await.unwrap());
    assert!(!store.delete("acme", "meta_ads").await.unwrap());
    assert_eq!(store.delete_tenant("acme").await.unwrap(), 1);
    assert_eq!(CredentialRepository::list_for_tenant(&store, "globex").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_purge_expired_credentials() {
    let (store, _temp) = create_test_store().await;
    let mut expired = draft("acme", "google_ads", "old");
    expired.expires_at = expired.created_at;
    store.put_rotating(expired).await.unwrap();
    store.put_rotating(draft("acme", "meta_ads", "live")).await.unwrap();

    assert_eq!(CredentialRepository::purge_expired(&store, Utc::now()).await.unwrap(), 1);
    assert!(CredentialRepository::get(&store, "acme", "google_ads").await.unwrap().is_none());
}

#[tokio::test]
async fn test_credential_store_over_sqlite() {
    let (store, _temp) = create_test_store().await;
    let cipher = SecretCipher::new(&SecretCipher::generate_master_key(), 1).unwrap();
    let credentials = CredentialStore::new(Arc::new(store.clone()), cipher);

    credentials
        .put("acme", "google_ads", "1//refresh", std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(credentials.get("acme", "google_ads").await.unwrap().expose(), "1//refresh");

    let raw = CredentialRepository::get(&store, "acme", "google_ads").await.unwrap().unwrap();
    assert!(!raw.sealed_payload.data.contains("refresh"));

    credentials.put("acme", "meta_ads", "tok", std::time::Duration::ZERO).await.unwrap();
    assert!(matches!(
        credentials.get("acme", "meta_ads").await.unwrap_err(),
        CredentialError::Expired { .. }
    ));
}

#[tokio::test]
async fn test_reserve_complete_and_replay() {
    let (store, _temp) = create_test_store().await;
    let now = Utc::now();

    assert_eq!(
        store.try_reserve("k1", "a", now, Duration::seconds(30)).await.unwrap(),
        ReserveOutcome::Reserved
    );
    assert!(matches!(
        store.try_reserve("k1", "b", now, Duration::seconds(30)).await.unwrap(),
        ReserveOutcome::InFlight { .. }
    ));

    assert!(!store.complete("k1", "b", &json!({}), now, Duration::hours(1)).await.unwrap());
    assert!(store.complete("k1", "a", &json!({"campaign_id": 42}), now, Duration::hours(1)).await.unwrap());
    assert!(!store.complete("k1", "a", &json!({}), now, Duration::hours(1)).await.unwrap());
    assert_eq!(
        store.try_reserve("k1", "c", now, Duration::seconds(30)).await.unwrap(),
        ReserveOutcome::Completed(json!({"campaign_id": 42}))
    );

    let entry = IdempotencyStore::get(&store, "k1").await.unwrap().unwrap();
    assert_eq!(entry.state, IdempotencyState::Completed);
    assert_eq!(entry.ttl_seconds, Some(3600));
}

#[tokio::test]
async fn test_release_and_stale_lease_reclaim() {
    let (store, _temp) = create_test_store().await;
    let now = Utc::now();

    store.try_reserve("k", "a", now, Duration::seconds(10)).await.unwrap();
    assert!(!store.release("k", "b").await.unwrap());
    assert!(store.release("k", "a").await.unwrap());
    assert_eq!(store.try_reserve("k", "a", now, Duration::seconds(10)).await.unwrap(), ReserveOutcome::Reserved);

    // lease still held
    assert!(matches!(
        store.try_reserve("k", "b", now + Duration::seconds(5), Duration::seconds(10)).await.unwrap(),
        ReserveOutcome::InFlight { .. }
    ));
    // lease passed
    assert_eq!(
        store.try_reserve("k", "b", now + Duration::seconds(11), Duration::seconds(10)).await.unwrap(),
        ReserveOutcome::Reserved
    );
}

#[tokio::test]
async fn test_reclaimed_reservation_is_fenced_from_old_holder() {
    let (store, _temp) = create_test_store().await;
    let now = Utc::now();

    store.try_reserve("k", "a", now, Duration::seconds(5)).await.unwrap();
    assert_eq!(
        store.try_reserve("k", "b", now + Duration::seconds(6), Duration::seconds(5)).await.unwrap(),
        ReserveOutcome::Reserved
    );

    // a's lease was taken over; its late calls must not touch b's entry
    assert!(!store.release("k", "a").await.unwrap());
    assert!(!store.complete("k", "a", &json!("stale"), now, Duration::hours(1)).await.unwrap());
    assert!(matches!(
        store.try_reserve("k", "c", now + Duration::seconds(7), Duration::seconds(5)).await.unwrap(),
        ReserveOutcome::InFlight { .. }
    ));

    assert!(store.complete("k", "b", &json!("fresh"), now, Duration::hours(1)).await.unwrap());
    let entry = IdempotencyStore::get(&store, "k").await.unwrap().unwrap();
    assert_eq!(entry.holder.as_deref(), Some("b"));
    assert_eq!(entry.result_snapshot, Some(json!("fresh")));
}

#[tokio::test]
async fn test_expired_completion_is_reclaimed_and_purged() {
    let (store, _temp) = create_test_store().await;
    let now = Utc::now();

    store.try_reserve("a", "h", now, Duration::seconds(10)).await.unwrap();
    store.complete("a", "h", &json!("done"), now, Duration::seconds(60)).await.unwrap();
    store.try_reserve("b", "h", now, Duration::seconds(10)).await.unwrap();
    store.complete("b", "h", &json!("done"), now, Duration::seconds(60)).await.unwrap();

    let later = now + Duration::seconds(61);
    assert_eq!(store.try_reserve("a", "h2", later, Duration::seconds(10)).await.unwrap(), ReserveOutcome::Reserved);
    assert_eq!(IdempotencyStore::purge_expired(&store, later).await.unwrap(), 1);
    assert!(IdempotencyStore::get(&store, "b").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ledger_reservations() {
    let (store, _temp) = create_test_store().await;
    let ledger = IdempotencyLedger::new(Arc::new(store), LedgerConfig::default());
    let key = IdempotencyKey::derive("acme", "send_campaign", &json!({"campaign": "spring"}));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { ledger.check_and_reserve(&key).await.unwrap() }));
    }

    let mut fresh = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Reservation::Fresh(_) => fresh += 1,
            Reservation::InFlight { .. } => {}
            Reservation::Duplicate(_) => panic!("nothing was completed"),
        }
    }
    assert_eq!(fresh, 1);
}

#[tokio::test]
async fn test_run_snapshots() {
    let (store, _temp) = create_test_store().await;
    let definition = WorkflowDefinition {
        name: "launch".to_string(),
        description: None,
        steps: vec![WorkflowStep {
            name: "create".to_string(),
            operation: "create_campaign".to_string(),
            version: 1,
            input: json!({}),
            optional: false,
            timeout_ms: None,
        }],
    };

    let started = Utc::now();
    let mut older = WorkflowRun::new("run-1".to_string(), "acme", &definition, json!({"a": 1}), started);
    RunStore::put(&store, &older).await.unwrap();
    let newer = WorkflowRun::new("run-2".to_string(), "acme", &definition, json!({}), started + Duration::seconds(1));
    RunStore::put(&store, &newer).await.unwrap();

    older.status = RunStatus::Succeeded;
    RunStore::put(&store, &older).await.unwrap();

    let loaded = RunStore::get(&store, "run-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Succeeded);
    assert_eq!(loaded.context, json!({"a": 1}));

    let ids: Vec<String> =
        RunStore::list_for_tenant(&store, "acme").await.unwrap().into_iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec!["run-2", "run-1"]);
    assert!(RunStore::list_for_tenant(&store, "globex").await.unwrap().is_empty());
}
