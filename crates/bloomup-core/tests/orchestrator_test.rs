//! End-to-end tests for the redesign orchestrator and supplier locator
//! against fake remote clients and a SQLite-backed entitlement store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use bloomup_core::entitlement::{
    EntitlementStore, KeyValueStore, LAST_DATE_KEY, ManualClock, MemoryKeyValueStore,
    SqliteKeyValueStore, TIER_KEY, Tier, USED_KEY,
};
use bloomup_core::locator::{DeniedLocation, FixedLocation, LocateError, LocatorState, SupplierLocator};
use bloomup_core::orchestrator::{
    Affordance, Orchestrator, OrchestratorError, RedesignError, RedesignRequest, WorkflowState,
    WorkflowStatus,
};
use bloomup_core::presets::{default_preset, find_preset};
use bloomup_core::synthesis::{
    Coordinates, EncodedImage, MaintenancePlan, Phase, RemoteError, SupplierResult, SupplierSearch,
    SupplyItem, SynthesisClient, parse_plan,
};
use bloomup_core::presets::StylePreset;
use bloomup_db::queries::settings;
use bloomup_test_utils::{create_test_db, drop_test_db};

// ===========================================================================
// Fakes
// ===========================================================================

#[derive(Clone, Copy, PartialEq)]
enum Reply {
    Ok,
    Fail,
}

/// Counts calls and answers each according to its script.
///
/// When `gate` is set, every call waits for a permit before answering.
struct FakeClient {
    image: Reply,
    plan: Reply,
    plan_text: Option<&'static str>,
    image_calls: AtomicUsize,
    plan_calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeClient {
    fn new(image: Reply, plan: Reply) -> Arc<Self> {
        Arc::new(Self {
            image,
            plan,
            plan_text: None,
            image_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn with_plan_text(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            image: Reply::Ok,
            plan: Reply::Ok,
            plan_text: Some(text),
            image_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            image: Reply::Ok,
            plan: Reply::Ok,
            plan_text: None,
            image_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    fn remote_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst) + self.plan_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

#[async_trait]
impl SynthesisClient for FakeClient {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transform_image(
        &self,
        _image: &EncodedImage,
        style: &StylePreset,
    ) -> Result<EncodedImage, RemoteError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate().await;
        match self.image {
            Reply::Ok => Ok(EncodedImage::from_bytes(style.id.as_bytes(), "image/png")),
            Reply::Fail => Err(RemoteError::NoImage),
        }
    }

    async fn generate_plan(&self, _style: &StylePreset) -> Result<MaintenancePlan, RemoteError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate().await;
        if let Some(text) = self.plan_text {
            return Ok(parse_plan(text));
        }
        match self.plan {
            Reply::Ok => Ok(MaintenancePlan {
                inventory: vec![
                    SupplyItem {
                        item: "Mulch".to_string(),
                        description: "Shredded cedar".to_string(),
                        price_range: "$".to_string(),
                    },
                    SupplyItem {
                        item: "Shears".to_string(),
                        description: "Bypass pruning shears".to_string(),
                        price_range: "$$".to_string(),
                    },
                ],
                guide: vec![Phase {
                    phase: Some("Clearing".to_string()),
                    title: "Clear the beds".to_string(),
                    actions: vec!["Pull weeds".to_string()],
                }],
                maintenance_checklist: vec!["Water weekly".to_string()],
            }),
            Reply::Fail => Err(RemoteError::Api {
                status: 500,
                message: "internal".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl SupplierSearch for FakeSearch {
    async fn search(
        &self,
        items: &[String],
        _location: Coordinates,
    ) -> Result<Vec<SupplierResult>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(items
            .iter()
            .map(|i| SupplierResult {
                title: format!("{i} Supply Co"),
                uri: format!("https://maps.example/{}", i.to_lowercase()),
            })
            .collect())
    }
}

/// Holds every write of the usage count until a permit is released.
struct BlockingUsageWrites {
    inner: MemoryKeyValueStore,
    entered: Notify,
    release: Semaphore,
}

impl BlockingUsageWrites {
    fn new(used_today: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: seeded_memory(used_today),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl KeyValueStore for BlockingUsageWrites {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if key == USED_KEY {
            self.entered.notify_one();
            self.release.acquire().await?.forget();
        }
        self.inner.set(key, value).await
    }
}

/// Reads work; every write fails.
struct FailingWrites {
    inner: MemoryKeyValueStore,
}

#[async_trait]
impl KeyValueStore for FailingWrites {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("disk full while writing {key}")
    }
}

// ===========================================================================
// Harness
// ===========================================================================

const USER: &str = "gardener";

struct TestEnv {
    pool: SqlitePool,
    dir: TempDir,
    store: Arc<EntitlementStore>,
}

impl TestEnv {
    async fn new(tier: Tier, used_today: u32) -> Self {
        let (pool, dir) = create_test_db().await;
        let used = used_today.to_string();
        let tier = tier.to_string();
        settings::upsert_settings(
            &pool,
            USER,
            &[
                (TIER_KEY, tier.as_str()),
                (USED_KEY, used.as_str()),
                (LAST_DATE_KEY, "2026-10-16"),
            ],
        )
        .await
        .unwrap();

        let store = Self::open_store(&pool).await;
        Self { pool, dir, store }
    }

    async fn open_store(pool: &SqlitePool) -> Arc<EntitlementStore> {
        let kv = Arc::new(SqliteKeyValueStore::new(pool.clone(), USER));
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        ));
        Arc::new(EntitlementStore::open(kv, clock).await.unwrap())
    }

    async fn used_today(&self) -> u32 {
        self.store.entitlement().await.unwrap().used_today
    }

    async fn persisted_used(&self) -> Option<String> {
        settings::get_setting(&self.pool, USER, USED_KEY).await.unwrap()
    }

    async fn teardown(self) {
        drop(self.store);
        drop_test_db(self.pool, self.dir).await;
    }
}

fn seeded_memory(used_today: &str) -> MemoryKeyValueStore {
    MemoryKeyValueStore::with_values([
        (TIER_KEY, "FREE"),
        (USED_KEY, used_today),
        (LAST_DATE_KEY, "2026-10-16"),
    ])
}

async fn store_over(kv: Arc<dyn KeyValueStore>) -> Arc<EntitlementStore> {
    let clock = Arc::new(ManualClock::new(
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
    ));
    Arc::new(EntitlementStore::open(kv, clock).await.unwrap())
}

fn request() -> RedesignRequest {
    RedesignRequest {
        source_image: EncodedImage::from_bytes(b"backyard", "image/jpeg"),
        style: default_preset(),
    }
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn exhausted_quota_fails_without_remote_calls() {
    let env = TestEnv::new(Tier::Free, 2).await;
    let client = FakeClient::new(Reply::Ok, Reply::Ok);
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    orch.start(request()).await.unwrap();

    // Refused synchronously: already terminal when start returns.
    let state = orch.state();
    assert_eq!(state.status(), WorkflowStatus::Failed);
    assert_eq!(
        state.error(),
        Some(&RedesignError::QuotaExceeded { limit: 2 })
    );
    assert_eq!(client.remote_calls(), 0);
    assert_eq!(env.used_today().await, 2);
    assert_eq!(env.persisted_used().await.as_deref(), Some("2"));

    env.teardown().await;
}

#[tokio::test]
async fn successful_attempt_consumes_exactly_one() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let client = FakeClient::new(Reply::Ok, Reply::Ok);
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    orch.start(request()).await.unwrap();
    let state = orch.settled().await;

    assert_eq!(state.status(), WorkflowStatus::Succeeded);
    let result = state.result().unwrap();
    assert!(!result.original_image.is_empty());
    assert!(!result.redesigned_image.is_empty());
    assert_eq!(result.style, default_preset());
    assert_eq!(result.item_names(), vec!["Mulch", "Shears"]);
    assert_eq!(result.maintenance_checklist, vec!["Water weekly"]);

    assert_eq!(client.image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.plan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.used_today().await, 1);
    assert_eq!(env.persisted_used().await.as_deref(), Some("1"));

    env.teardown().await;
}

#[tokio::test]
async fn plan_failure_fails_attempt_and_keeps_quota() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let client = FakeClient::new(Reply::Ok, Reply::Fail);
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    let state = orch.run(request()).await.unwrap();

    assert_eq!(state.status(), WorkflowStatus::Failed);
    assert!(matches!(state.error(), Some(RedesignError::Plan(_))));
    assert!(orch.result().is_none());
    assert_eq!(client.image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.used_today().await, 0);

    env.teardown().await;
}

#[tokio::test]
async fn image_failure_reports_synthesis_error() {
    let env = TestEnv::new(Tier::Free, 1).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Fail, Reply::Ok));

    let state = orch.run(request()).await.unwrap();
    let error = state.error().unwrap();
    assert!(matches!(error, RedesignError::Synthesis(_)));
    assert_eq!(error.user_message(), "Landscape synthesis interrupted. Try again.");
    assert_eq!(env.used_today().await, 1);

    env.teardown().await;
}

#[tokio::test]
async fn malformed_plan_still_succeeds_with_empty_plan() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let client = FakeClient::with_plan_text("{\"inventory\": [oops");
    let orch = Orchestrator::new(env.store.clone(), client);

    let state = orch.run(request()).await.unwrap();
    let result = state.result().unwrap();
    assert!(result.inventory.is_empty());
    assert!(result.implementation_guide.is_empty());
    assert!(result.maintenance_checklist.is_empty());
    assert_eq!(env.used_today().await, 1);

    env.teardown().await;
}

#[tokio::test]
async fn denied_location_leaves_result_readable() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));
    orch.run(request()).await.unwrap();
    let before = orch.result().unwrap();

    let search = Arc::new(FakeSearch::default());
    let locator = SupplierLocator::new(search.clone(), Arc::new(DeniedLocation));
    let err = locator
        .locate(&["mulch".to_string(), "shears".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err, LocateError::LocationDenied);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert_eq!(orch.status(), WorkflowStatus::Succeeded);
    assert_eq!(*orch.result().unwrap(), *before);
    assert_eq!(env.used_today().await, 1);

    env.teardown().await;
}

// ===========================================================================
// Lifecycle
// ===========================================================================

#[tokio::test]
async fn locate_for_uses_result_inventory() {
    let env = TestEnv::new(Tier::Pro, 0).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));
    let search = Arc::new(FakeSearch::default());
    let locator = SupplierLocator::new(
        search,
        Arc::new(FixedLocation(Coordinates::new(40.7, -74.0))),
    );

    assert_eq!(
        locator.locate_for(&orch).await.unwrap_err(),
        LocateError::NoResult
    );

    orch.run(request()).await.unwrap();
    let found = locator.locate_for(&orch).await.unwrap();
    let titles: Vec<_> = found.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Mulch Supply Co", "Shears Supply Co"]);
    assert!(matches!(locator.state(), LocatorState::Found(ref r) if r.len() == 2));

    env.teardown().await;
}

#[tokio::test]
async fn reset_after_success_clears_result_but_not_usage() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));

    orch.run(request()).await.unwrap();
    assert!(orch.result().is_some());

    orch.reset().await;
    assert_eq!(orch.state(), WorkflowState::Idle);
    assert!(orch.result().is_none());
    assert_eq!(env.used_today().await, 1);

    env.teardown().await;
}

#[tokio::test]
async fn second_success_exhausts_free_tier() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let client = FakeClient::new(Reply::Ok, Reply::Ok);
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    for _ in 0..2 {
        let state = orch.run(request()).await.unwrap();
        assert_eq!(state.status(), WorkflowStatus::Succeeded);
        orch.reset().await;
    }
    let calls = client.remote_calls();

    let state = orch.run(request()).await.unwrap();
    assert_eq!(
        state.error().map(|e| e.kind()),
        Some("quota_exceeded")
    );
    assert_eq!(client.remote_calls(), calls);
    assert_eq!(env.used_today().await, 2);

    // Upgrading lifts the cap without resetting usage.
    env.store.set_tier(Tier::Pro).await.unwrap();
    let state = orch.run(request()).await.unwrap();
    assert_eq!(state.status(), WorkflowStatus::Succeeded);
    assert_eq!(env.used_today().await, 3);

    env.teardown().await;
}

#[tokio::test]
async fn start_while_succeeded_is_rejected() {
    let env = TestEnv::new(Tier::Pro, 0).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));
    orch.run(request()).await.unwrap();

    let err = orch
        .start(RedesignRequest {
            source_image: EncodedImage::from_bytes(b"front yard", "image/jpeg"),
            style: find_preset("estate-luxury").unwrap(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    assert_eq!(orch.status(), WorkflowStatus::Succeeded);

    env.teardown().await;
}

#[tokio::test]
async fn reset_orphans_in_flight_attempt() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let gate = Arc::new(Semaphore::new(0));
    let client = FakeClient::gated(gate.clone());
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    orch.start(request()).await.unwrap();
    assert_eq!(orch.status(), WorkflowStatus::Running);

    orch.reset().await;
    assert_eq!(orch.state(), WorkflowState::Idle);

    // Let the orphaned calls finish; nothing should be published or charged.
    let mut rx = orch.subscribe();
    gate.add_permits(2);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(!rx.has_changed().unwrap());
    assert_eq!(orch.state(), WorkflowState::Idle);
    assert_eq!(env.used_today().await, 0);

    env.teardown().await;
}

#[tokio::test]
async fn new_start_replaces_running_attempt() {
    let env = TestEnv::new(Tier::Pro, 0).await;
    let gate = Arc::new(Semaphore::new(0));
    let client = FakeClient::gated(gate.clone());
    let orch = Orchestrator::new(env.store.clone(), client.clone());

    let first = orch.start(request()).await.unwrap();
    let second = orch.start(request()).await.unwrap();
    assert_ne!(first, second);

    gate.add_permits(4);
    let state = orch.settled().await;
    assert_eq!(state.attempt(), Some(second));
    assert_eq!(state.status(), WorkflowStatus::Succeeded);

    // Let the orphan drain too; only the current attempt is charged.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(orch.state().attempt(), Some(second));
    assert_eq!(env.used_today().await, 1);

    env.teardown().await;
}

#[tokio::test]
async fn usage_survives_reopening_the_store() {
    let env = TestEnv::new(Tier::Free, 0).await;
    let orch = Orchestrator::new(env.store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));
    orch.run(request()).await.unwrap();

    let reopened = TestEnv::open_store(&env.pool).await;
    assert_eq!(reopened.entitlement().await.unwrap().used_today, 1);

    drop(reopened);
    env.teardown().await;
}

// ===========================================================================
// Commit path
// ===========================================================================

#[tokio::test]
async fn racing_attempts_on_last_free_slot_charge_only_one() {
    let env = TestEnv::new(Tier::Free, 1).await;
    let first_gate = Arc::new(Semaphore::new(0));
    let second_gate = Arc::new(Semaphore::new(0));
    let first = Orchestrator::new(env.store.clone(), FakeClient::gated(first_gate.clone()));
    let second = Orchestrator::new(env.store.clone(), FakeClient::gated(second_gate.clone()));

    // Both pass the gate while one slot is still free.
    first.start(request()).await.unwrap();
    second.start(request()).await.unwrap();
    assert_eq!(first.status(), WorkflowStatus::Running);
    assert_eq!(second.status(), WorkflowStatus::Running);

    first_gate.add_permits(2);
    assert_eq!(first.settled().await.status(), WorkflowStatus::Succeeded);

    second_gate.add_permits(2);
    let state = second.settled().await;
    assert_eq!(
        state.error(),
        Some(&RedesignError::QuotaExceeded { limit: 2 })
    );
    assert!(second.result().is_none());
    assert!(first.result().is_some());
    assert_eq!(env.used_today().await, 2);
    assert_eq!(env.persisted_used().await.as_deref(), Some("2"));

    env.teardown().await;
}

#[tokio::test]
async fn failed_usage_write_fails_attempt_with_retry() {
    let kv = Arc::new(FailingWrites {
        inner: seeded_memory("0"),
    });
    let store = store_over(kv.clone()).await;
    let orch = Orchestrator::new(store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));

    let state = orch.run(request()).await.unwrap();

    let error = state.error().unwrap();
    assert!(matches!(error, RedesignError::Persistence(msg) if msg.contains("disk full")));
    assert_eq!(error.affordance(), Affordance::Retry);
    assert_eq!(error.kind(), "persistence_failure");
    assert_eq!(orch.status(), WorkflowStatus::Failed);
    assert!(orch.result().is_none());
    assert_eq!(store.entitlement().await.unwrap().used_today, 0);
    assert_eq!(kv.inner.get(USED_KEY).await.unwrap().as_deref(), Some("0"));
}

#[tokio::test]
async fn reset_during_usage_write_waits_for_the_commit() {
    let kv = BlockingUsageWrites::new("0");
    let store = store_over(kv.clone()).await;
    let orch = Orchestrator::new(store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));

    orch.start(request()).await.unwrap();
    kv.entered.notified().await;

    let resetter = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.reset().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!resetter.is_finished());
    assert_eq!(orch.status(), WorkflowStatus::Running);

    kv.release.add_permits(1);
    resetter.await.unwrap();

    // The charged attempt was committed before the reset took effect.
    assert_eq!(orch.state(), WorkflowState::Idle);
    assert_eq!(store.entitlement().await.unwrap().used_today, 1);
}

#[tokio::test]
async fn start_during_usage_write_sees_the_committed_success() {
    let kv = BlockingUsageWrites::new("0");
    let store = store_over(kv.clone()).await;
    let orch = Orchestrator::new(store.clone(), FakeClient::new(Reply::Ok, Reply::Ok));

    let first = orch.start(request()).await.unwrap();
    kv.entered.notified().await;

    let restarter = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start(request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!restarter.is_finished());

    kv.release.add_permits(1);
    let err = restarter.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::InvalidTransition {
            from: WorkflowStatus::Succeeded
        }
    );

    // Every charge belongs to an attempt whose result is visible.
    let state = orch.state();
    assert_eq!(state.attempt(), Some(first));
    assert!(state.result().is_some());
    assert_eq!(store.entitlement().await.unwrap().used_today, 1);
}
