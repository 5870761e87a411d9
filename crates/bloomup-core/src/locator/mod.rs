//! Supplier locator: location acquisition followed by a grounded supplier
//! search for the items of a finished redesign.
//!
//! Runs independently of the orchestrator. Every failure here is reported
//! through [`LocatorState::Failed`] and leaves the redesign result alone.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::orchestrator::Orchestrator;
use crate::synthesis::{Coordinates, SupplierResult, SupplierSearch};

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Why a position could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location is not available on this device")]
    Unavailable,

    #[error("location permission denied")]
    Denied,
}

/// Source of the user's current position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

// Compile-time assertion: LocationProvider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn LocationProvider) {}
};

/// Always reports the configured position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        if !self.0.is_valid() {
            return Err(LocationError::Unavailable);
        }
        Ok(self.0)
    }
}

/// The user refused to share a position.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedLocation;

#[async_trait]
impl LocationProvider for DeniedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Denied)
    }
}

/// No location capability is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLocation;

#[async_trait]
impl LocationProvider for UnavailableLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// A position, or the failure to get one, reported by a remote client.
#[derive(Debug, Clone, Copy)]
pub struct ReportedLocation(pub Result<Coordinates, LocationError>);

#[async_trait]
impl LocationProvider for ReportedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        match self.0 {
            Ok(coords) if !coords.is_valid() => Err(LocationError::Unavailable),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Why a locate operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    #[error("location is not available")]
    LocationUnavailable,

    #[error("location permission denied")]
    LocationDenied,

    #[error("supplier lookup failed: {0}")]
    LookupFailed(String),

    #[error("no finished redesign to find suppliers for")]
    NoResult,
}

impl From<LocationError> for LocateError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::Unavailable => Self::LocationUnavailable,
            LocationError::Denied => Self::LocationDenied,
        }
    }
}

/// Observable state of the locator.
#[derive(Debug, Clone, PartialEq)]
pub enum LocatorState {
    Idle,
    Locating,
    Found(Vec<SupplierResult>),
    Failed(LocateError),
}

impl LocatorState {
    pub fn suppliers(&self) -> Option<&[SupplierResult]> {
        match self {
            Self::Found(results) => Some(results),
            _ => None,
        }
    }
}

/// Finds suppliers near the user for a list of items.
///
/// The provider given to [`SupplierLocator::new`] is the default location
/// source. A position reported for a single call goes through
/// [`SupplierLocator::locate_with`] and is not remembered.
///
/// Callers should not start a second `locate` while one is pending; a
/// `locate` after a previous completion or failure is fine and clears the
/// earlier results first.
pub struct SupplierLocator {
    search: Arc<dyn SupplierSearch>,
    location: Arc<dyn LocationProvider>,
    state: watch::Sender<LocatorState>,
}

impl SupplierLocator {
    pub fn new(search: Arc<dyn SupplierSearch>, location: Arc<dyn LocationProvider>) -> Self {
        let (state, _) = watch::channel(LocatorState::Idle);
        Self {
            search,
            location,
            state,
        }
    }

    pub fn state(&self) -> LocatorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocatorState> {
        self.state.subscribe()
    }

    /// Discard any previous results.
    pub fn clear(&self) {
        self.state.send_replace(LocatorState::Idle);
    }

    /// Find suppliers for the items of the orchestrator's current result.
    ///
    /// Fails with [`LocateError::NoResult`] unless the orchestrator has
    /// succeeded. The orchestrator is only read.
    pub async fn locate_for(
        &self,
        orchestrator: &Orchestrator,
    ) -> Result<Vec<SupplierResult>, LocateError> {
        self.locate_for_with(orchestrator, self.location.as_ref()).await
    }

    /// [`Self::locate_for`] with a location source for this call only.
    pub async fn locate_for_with(
        &self,
        orchestrator: &Orchestrator,
        location: &dyn LocationProvider,
    ) -> Result<Vec<SupplierResult>, LocateError> {
        let Some(result) = orchestrator.result() else {
            self.state.send_replace(LocatorState::Failed(LocateError::NoResult));
            return Err(LocateError::NoResult);
        };
        self.locate_with(&result.item_names(), location).await
    }

    /// Acquire a position from the default provider, then search for
    /// `items` near it.
    ///
    /// An empty result list is success.
    pub async fn locate(&self, items: &[String]) -> Result<Vec<SupplierResult>, LocateError> {
        self.locate_with(items, self.location.as_ref()).await
    }

    /// [`Self::locate`] with a location source for this call only.
    pub async fn locate_with(
        &self,
        items: &[String],
        location: &dyn LocationProvider,
    ) -> Result<Vec<SupplierResult>, LocateError> {
        self.state.send_replace(LocatorState::Locating);

        let outcome = self.run(items, location).await;
        let next = match &outcome {
            Ok(results) => LocatorState::Found(results.clone()),
            Err(err) => LocatorState::Failed(err.clone()),
        };
        self.state.send_replace(next);
        outcome
    }

    async fn run(
        &self,
        items: &[String],
        location: &dyn LocationProvider,
    ) -> Result<Vec<SupplierResult>, LocateError> {
        let coords = location.current_position().await.map_err(|e| {
            tracing::info!(error = %e, "location not acquired");
            LocateError::from(e)
        })?;

        let items = dedup_items(items);
        tracing::info!(items = items.len(), location = %coords, "searching for suppliers");

        let results = self.search.search(&items, coords).await.map_err(|e| {
            tracing::warn!(error = %e, "supplier lookup failed");
            LocateError::LookupFailed(e.to_string())
        })?;

        tracing::info!(found = results.len(), "supplier lookup finished");
        Ok(results)
    }
}

/// Trim, drop blanks, and keep the first occurrence of each item.
fn dedup_items(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}
