//! Remote synthesis: the contracts for the three remote operations and the
//! Gemini implementation of them.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator --transform_image / generate_plan--> &dyn SynthesisClient
//! Locator      --search------------------------->  &dyn SupplierSearch
//!                                                        |
//!                                               GeminiClient (reqwest)
//! ```

pub mod gemini;
pub mod plan;
pub mod trait_def;
pub mod types;

// Re-export the primary public API at the module level.
pub use gemini::{GeminiClient, GeminiConfig};
pub use plan::parse_plan;
pub use trait_def::{RemoteError, SupplierSearch, SynthesisClient};
pub use types::{
    Coordinates, EncodedImage, MaintenancePlan, Phase, SupplierResult, SupplyItem,
};
