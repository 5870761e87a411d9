//! Redesign orchestrator: runs one redesign attempt through the quota gate,
//! the two remote calls, and the entitlement commit.
//!
//! ```text
//! start(request)
//!   |-- validate request              (InvalidRequest: nothing happens)
//!   |-- check transition              (InvalidTransition from succeeded)
//!   |-- register attempt, orphan any previous one
//!   |-- quota gate                    (exhausted: -> failed, no remote calls)
//!   |-- -> running
//!   `-- spawned: join(transform_image, generate_plan)
//!          |-- either failed          -> failed   (usage untouched)
//!          `-- both ok -> try_consume -> succeeded (usage + 1)
//! ```
//!
//! State is published through a `tokio::sync::watch` channel. An attempt
//! that has been orphaned by a later `start` or by `reset` neither publishes
//! nor consumes quota.
//!
//! The interest check, `try_consume`, and the publish of the outcome run
//! under one async lock that `start` and `reset` also take. A `reset` that
//! arrives while usage is being written therefore lands after the success
//! is published, never between the charge and the publish.

pub mod state;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::ser::SerializeStruct;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::entitlement::{EntitlementError, EntitlementStore};
use crate::presets::StylePreset;
use crate::synthesis::{EncodedImage, MaintenancePlan, Phase, SupplyItem, SynthesisClient};

pub use state::{AttemptId, WorkflowState, WorkflowStatus};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to one redesign attempt.
#[derive(Debug, Clone)]
pub struct RedesignRequest {
    pub source_image: EncodedImage,
    pub style: StylePreset,
}

/// The aggregated output of a successful attempt.
///
/// Built only once both remote calls have succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedesignResult {
    pub original_image: EncodedImage,
    pub redesigned_image: EncodedImage,
    pub style: StylePreset,
    pub inventory: Vec<SupplyItem>,
    pub implementation_guide: Vec<Phase>,
    pub maintenance_checklist: Vec<String>,
}

impl RedesignResult {
    fn assemble(request: RedesignRequest, redesigned: EncodedImage, plan: MaintenancePlan) -> Self {
        Self {
            original_image: request.source_image,
            redesigned_image: redesigned,
            style: request.style,
            inventory: plan.inventory,
            implementation_guide: plan.guide,
            maintenance_checklist: plan.maintenance_checklist,
        }
    }

    /// Inventory item names in order, for supplier lookup.
    pub fn item_names(&self) -> Vec<String> {
        self.inventory.iter().map(|i| i.item.clone()).collect()
    }
}

/// What the user can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    /// Upgrade the tier or wait for the daily reset.
    Upgrade,
    /// Try the same thing again.
    Retry,
}

/// Why an attempt ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedesignError {
    #[error("daily limit of {limit} free redesigns reached")]
    QuotaExceeded { limit: u32 },

    #[error("image synthesis failed: {0}")]
    Synthesis(String),

    #[error("plan generation failed: {0}")]
    Plan(String),

    #[error("failed to record usage: {0}")]
    Persistence(String),
}

impl RedesignError {
    pub fn affordance(&self) -> Affordance {
        match self {
            Self::QuotaExceeded { .. } => Affordance::Upgrade,
            Self::Synthesis(_) | Self::Plan(_) | Self::Persistence(_) => Affordance::Retry,
        }
    }

    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Synthesis(_) => "synthesis_failure",
            Self::Plan(_) => "plan_failure",
            Self::Persistence(_) => "persistence_failure",
        }
    }

    /// The message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExceeded { limit } => format!(
                "You have reached your {limit} free transformations for today. \
                 Upgrade to Pro for unlimited access."
            ),
            Self::Synthesis(_) | Self::Plan(_) => {
                "Landscape synthesis interrupted. Try again.".to_string()
            }
            Self::Persistence(_) => {
                "Your redesign finished but could not be saved. Try again.".to_string()
            }
        }
    }
}

impl From<EntitlementError> for RedesignError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::QuotaExceeded { limit } => Self::QuotaExceeded { limit },
            EntitlementError::Persistence(msg) => Self::Persistence(msg),
        }
    }
}

impl Serialize for RedesignError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RedesignError", 4)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.user_message())?;
        s.serialize_field("detail", &self.to_string())?;
        s.serialize_field("affordance", &self.affordance())?;
        s.end()
    }
}

/// Errors returned synchronously by [`Orchestrator::start`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("cannot start a redesign while {from}; reset first")]
    InvalidTransition { from: WorkflowStatus },

    #[error("invalid redesign request: {0}")]
    InvalidRequest(String),
}

/// The attempt the orchestrator is currently interested in.
#[derive(Debug, Clone)]
struct Attempt {
    id: AttemptId,
    interest: CancellationToken,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coordinates redesign attempts for a single session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    entitlements: Arc<EntitlementStore>,
    client: Arc<dyn SynthesisClient>,
    state: watch::Sender<WorkflowState>,
    current: Mutex<Option<Attempt>>,
    commit: AsyncMutex<()>,
}

impl Orchestrator {
    pub fn new(entitlements: Arc<EntitlementStore>, client: Arc<dyn SynthesisClient>) -> Self {
        let (state, _) = watch::channel(WorkflowState::Idle);
        Self {
            inner: Arc::new(Inner {
                entitlements,
                client,
                state,
                current: Mutex::new(None),
                commit: AsyncMutex::new(()),
            }),
        }
    }

    pub fn entitlements(&self) -> &Arc<EntitlementStore> {
        &self.inner.entitlements
    }

    /// The current state.
    pub fn state(&self) -> WorkflowState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.inner.state.borrow().status()
    }

    /// The result of the current attempt, if it succeeded.
    pub fn result(&self) -> Option<Arc<RedesignResult>> {
        self.inner.state.borrow().result().cloned()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.inner.state.subscribe()
    }

    /// Wait until no attempt is running, then return the state.
    pub async fn settled(&self) -> WorkflowState {
        let mut rx = self.subscribe();
        match rx
            .wait_for(|s| s.status() != WorkflowStatus::Running)
            .await
        {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.state(),
        }
    }

    /// Start an attempt and return once it is either refused by the quota
    /// gate or running. The remote calls continue on a spawned task;
    /// completion is observed through [`Self::subscribe`] or [`Self::settled`].
    pub async fn start(&self, request: RedesignRequest) -> Result<AttemptId, OrchestratorError> {
        let attempt = self.begin(&request).await?;
        let id = attempt.id;
        if self.gate(&attempt, &request).await {
            let this = self.clone();
            tokio::spawn(async move {
                this.synthesize(attempt, request).await;
            });
        }
        Ok(id)
    }

    /// Run an attempt to completion and return its terminal state.
    pub async fn run(&self, request: RedesignRequest) -> Result<WorkflowState, OrchestratorError> {
        let attempt = self.begin(&request).await?;
        if !self.gate(&attempt, &request).await {
            return Ok(self.state());
        }
        Ok(self.synthesize(attempt, request).await)
    }

    /// Discard the current attempt and result and return to `Idle`.
    ///
    /// An in-flight attempt keeps running but its outcome is ignored.
    /// Entitlement is not touched. If the current attempt is committing,
    /// this waits for the commit to finish first.
    pub async fn reset(&self) {
        let _commit = self.inner.commit.lock().await;
        let mut current = self.lock_current();
        if let Some(previous) = current.take() {
            previous.interest.cancel();
            tracing::info!(attempt = %previous.id, "redesign reset");
        }
        self.inner.state.send_replace(WorkflowState::Idle);
    }

    // -----------------------------------------------------------------------
    // Attempt phases
    // -----------------------------------------------------------------------

    /// Validate and register a new attempt, orphaning any previous one.
    async fn begin(&self, request: &RedesignRequest) -> Result<Attempt, OrchestratorError> {
        if request.source_image.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "source image is empty".to_string(),
            ));
        }

        let _commit = self.inner.commit.lock().await;
        let mut current = self.lock_current();
        let from = self.status();
        if !WorkflowStatus::is_valid_transition(from, WorkflowStatus::Running) {
            return Err(OrchestratorError::InvalidTransition { from });
        }

        if let Some(previous) = current.take() {
            previous.interest.cancel();
            tracing::info!(attempt = %previous.id, "attempt orphaned by new start");
        }

        let attempt = Attempt {
            id: Uuid::new_v4(),
            interest: CancellationToken::new(),
        };
        *current = Some(attempt.clone());
        Ok(attempt)
    }

    /// Apply the quota gate. Returns `true` when the attempt is now running.
    async fn gate(&self, attempt: &Attempt, request: &RedesignRequest) -> bool {
        if let Err(err) = self.inner.entitlements.check_available().await {
            let error = RedesignError::from(err);
            tracing::info!(
                attempt = %attempt.id,
                style = %request.style.id,
                error = %error,
                "redesign refused before remote calls"
            );
            self.publish(
                attempt,
                WorkflowState::Failed {
                    attempt: attempt.id,
                    error,
                },
            );
            return false;
        }

        tracing::info!(
            attempt = %attempt.id,
            style = %request.style.id,
            client = self.inner.client.name(),
            "redesign started"
        );
        self.publish(
            attempt,
            WorkflowState::Running {
                attempt: attempt.id,
                style: request.style.clone(),
            },
        )
    }

    /// Issue both remote calls, then commit or fail.
    async fn synthesize(&self, attempt: Attempt, request: RedesignRequest) -> WorkflowState {
        let client = &self.inner.client;
        let (image, plan) = tokio::join!(
            client.transform_image(&request.source_image, &request.style),
            client.generate_plan(&request.style),
        );

        let outcome = match (image, plan) {
            (Err(e), _) => Err(RedesignError::Synthesis(e.to_string())),
            (Ok(_), Err(e)) => Err(RedesignError::Plan(e.to_string())),
            (Ok(image), Ok(plan)) => Ok((image, plan)),
        };

        match outcome {
            Err(error) => {
                tracing::warn!(attempt = %attempt.id, error = %error, "redesign failed");
                let state = WorkflowState::Failed {
                    attempt: attempt.id,
                    error,
                };
                if !self.publish(&attempt, state.clone()) {
                    tracing::debug!(attempt = %attempt.id, "outcome of orphaned attempt dropped");
                }
                state
            }
            Ok((image, plan)) => self.commit(&attempt, request, image, plan).await,
        }
    }

    /// Consume one attempt of quota, build the result, and publish it.
    ///
    /// Holds the commit lock throughout, so the attempt cannot be orphaned
    /// between the charge and the publish.
    async fn commit(
        &self,
        attempt: &Attempt,
        request: RedesignRequest,
        image: EncodedImage,
        plan: MaintenancePlan,
    ) -> WorkflowState {
        let _commit = self.inner.commit.lock().await;
        if attempt.interest.is_cancelled() {
            tracing::info!(
                attempt = %attempt.id,
                "orphaned attempt finished, discarding result"
            );
            return self.state();
        }

        let state = match self.inner.entitlements.try_consume().await {
            Ok(()) => {
                let result = RedesignResult::assemble(request, image, plan);
                tracing::info!(
                    attempt = %attempt.id,
                    inventory = result.inventory.len(),
                    phases = result.implementation_guide.len(),
                    "redesign succeeded"
                );
                WorkflowState::Succeeded {
                    attempt: attempt.id,
                    result: Arc::new(result),
                }
            }
            Err(err) => {
                let error = RedesignError::from(err);
                tracing::warn!(
                    attempt = %attempt.id,
                    error = %error,
                    "redesign could not be committed"
                );
                WorkflowState::Failed {
                    attempt: attempt.id,
                    error,
                }
            }
        };

        self.publish(attempt, state.clone());
        state
    }

    /// Publish `state` if `attempt` is still the current one.
    fn publish(&self, attempt: &Attempt, state: WorkflowState) -> bool {
        let current = self.lock_current();
        let is_current = current
            .as_ref()
            .is_some_and(|c| c.id == attempt.id && !c.interest.is_cancelled());
        if is_current {
            self.inner.state.send_replace(state);
        }
        is_current
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Attempt>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::entitlement::{ManualClock, MemoryKeyValueStore, Tier};
    use crate::presets::default_preset;
    use crate::synthesis::RemoteError;

    /// Succeeds or fails each call according to its flags.
    struct ScriptedClient {
        image_ok: bool,
        plan_ok: bool,
        image_calls: AtomicUsize,
        plan_calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(image_ok: bool, plan_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                image_ok,
                plan_ok,
                image_calls: AtomicUsize::new(0),
                plan_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SynthesisClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn transform_image(
            &self,
            _image: &EncodedImage,
            _style: &StylePreset,
        ) -> Result<EncodedImage, RemoteError> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            if self.image_ok {
                Ok(EncodedImage::new("data:image/png;base64,UkVE"))
            } else {
                Err(RemoteError::NoImage)
            }
        }

        async fn generate_plan(&self, _style: &StylePreset) -> Result<MaintenancePlan, RemoteError> {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            if self.plan_ok {
                Ok(MaintenancePlan {
                    inventory: vec![SupplyItem {
                        item: "Mulch".to_string(),
                        description: "Cedar".to_string(),
                        price_range: "$".to_string(),
                    }],
                    guide: vec![],
                    maintenance_checklist: vec!["Water".to_string()],
                })
            } else {
                Err(RemoteError::Http("connection reset".to_string()))
            }
        }
    }

    async fn entitlements(tier: Tier, used: u32) -> Arc<EntitlementStore> {
        let used = used.to_string();
        let tier = tier.to_string();
        let kv = Arc::new(MemoryKeyValueStore::with_values([
            (crate::entitlement::TIER_KEY, tier.as_str()),
            (crate::entitlement::USED_KEY, used.as_str()),
            (crate::entitlement::LAST_DATE_KEY, "2026-10-16"),
        ]));
        let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()));
        Arc::new(EntitlementStore::open(kv, clock).await.unwrap())
    }

    fn request() -> RedesignRequest {
        RedesignRequest {
            source_image: EncodedImage::new("data:image/jpeg;base64,T1JJRw=="),
            style: default_preset(),
        }
    }

    #[tokio::test]
    async fn starts_idle() {
        let orch = Orchestrator::new(entitlements(Tier::Free, 0).await, ScriptedClient::new(true, true));
        assert_eq!(orch.state(), WorkflowState::Idle);
        assert!(orch.result().is_none());
    }

    #[tokio::test]
    async fn run_success_commits_once() {
        let store = entitlements(Tier::Free, 0).await;
        let client = ScriptedClient::new(true, true);
        let orch = Orchestrator::new(store.clone(), client.clone());

        let state = orch.run(request()).await.unwrap();
        assert_eq!(state.status(), WorkflowStatus::Succeeded);
        assert_eq!(orch.status(), WorkflowStatus::Succeeded);

        let result = orch.result().unwrap();
        assert_eq!(result.original_image.as_str(), "data:image/jpeg;base64,T1JJRw==");
        assert_eq!(result.redesigned_image.as_str(), "data:image/png;base64,UkVE");
        assert_eq!(result.item_names(), vec!["Mulch"]);
        assert_eq!(store.entitlement().await.unwrap().used_today, 1);
        assert_eq!(client.image_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.plan_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_image_is_rejected_without_side_effects() {
        let store = entitlements(Tier::Free, 0).await;
        let client = ScriptedClient::new(true, true);
        let orch = Orchestrator::new(store.clone(), client.clone());

        let err = orch
            .run(RedesignRequest {
                source_image: EncodedImage::new(""),
                style: default_preset(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(orch.state(), WorkflowState::Idle);
        assert_eq!(client.image_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_from_succeeded_requires_reset() {
        let orch = Orchestrator::new(entitlements(Tier::Pro, 0).await, ScriptedClient::new(true, true));
        orch.run(request()).await.unwrap();

        let err = orch.start(request()).await.unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidTransition {
                from: WorkflowStatus::Succeeded
            }
        );
        assert_eq!(orch.status(), WorkflowStatus::Succeeded);

        orch.reset().await;
        assert_eq!(orch.state(), WorkflowState::Idle);
        orch.start(request()).await.unwrap();
        assert_eq!(orch.settled().await.status(), WorkflowStatus::Succeeded);
    }

    #[tokio::test]
    async fn failed_attempt_can_be_retried() {
        let store = entitlements(Tier::Free, 0).await;
        let orch = Orchestrator::new(store.clone(), ScriptedClient::new(false, true));

        let state = orch.run(request()).await.unwrap();
        assert!(matches!(
            state.error(),
            Some(RedesignError::Synthesis(_))
        ));

        // Retrying from failed is allowed and re-enters from the top.
        let state = orch.run(request()).await.unwrap();
        assert_eq!(state.status(), WorkflowStatus::Failed);
        assert_eq!(store.entitlement().await.unwrap().used_today, 0);
    }

    #[test]
    fn error_affordances() {
        assert_eq!(
            RedesignError::QuotaExceeded { limit: 2 }.affordance(),
            Affordance::Upgrade
        );
        assert_eq!(
            RedesignError::Synthesis("x".into()).affordance(),
            Affordance::Retry
        );
        assert_eq!(RedesignError::Plan("x".into()).affordance(), Affordance::Retry);
        assert!(
            RedesignError::QuotaExceeded { limit: 2 }
                .user_message()
                .contains("2 free transformations")
        );
    }

    #[test]
    fn entitlement_errors_convert() {
        assert_eq!(
            RedesignError::from(EntitlementError::QuotaExceeded { limit: 2 }),
            RedesignError::QuotaExceeded { limit: 2 }
        );
        assert_eq!(
            RedesignError::from(EntitlementError::Persistence("disk full".into())),
            RedesignError::Persistence("disk full".into())
        );
    }
}
