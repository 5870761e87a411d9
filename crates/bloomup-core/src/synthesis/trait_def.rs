//! The remote service contracts the orchestrator and locator depend on.
//!
//! Both traits are object-safe so implementations can be shared as
//! `Arc<dyn SynthesisClient>` / `Arc<dyn SupplierSearch>`.

use async_trait::async_trait;

use crate::presets::StylePreset;

use super::types::{Coordinates, EncodedImage, MaintenancePlan, SupplierResult};

/// Failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("the synthesis engine did not return an image")]
    NoImage,

    #[error("no API key configured")]
    MissingApiKey,
}

/// Image transformation and plan generation.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Human-readable name for this client (e.g. "gemini").
    fn name(&self) -> &str;

    /// Produce a redesigned version of `image` in `style`.
    async fn transform_image(
        &self,
        image: &EncodedImage,
        style: &StylePreset,
    ) -> Result<EncodedImage, RemoteError>;

    /// Produce the inventory, implementation guide, and maintenance
    /// checklist for `style`.
    ///
    /// Malformed structured output must come back as an empty plan, not an
    /// error; see [`super::plan::parse_plan`].
    async fn generate_plan(&self, style: &StylePreset) -> Result<MaintenancePlan, RemoteError>;
}

/// Location-grounded supplier lookup.
#[async_trait]
pub trait SupplierSearch: Send + Sync {
    /// Find suppliers near `location` carrying `items`.
    ///
    /// An empty result is a valid outcome.
    async fn search(
        &self,
        items: &[String],
        location: Coordinates,
    ) -> Result<Vec<SupplierResult>, RemoteError>;
}

// Compile-time assertion: both traits must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn SynthesisClient, _: &dyn SupplierSearch) {}
};
