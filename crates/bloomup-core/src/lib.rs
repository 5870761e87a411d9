//! The BloomUp redesign engine.
//!
//! - [`entitlement`]: daily quota and subscription tier, persisted per user.
//! - [`synthesis`]: contracts for the remote image/plan/supplier operations
//!   and the Gemini HTTP implementation.
//! - [`orchestrator`]: the redesign state machine.
//! - [`locator`]: location-grounded supplier lookup for a finished redesign.
//! - [`presets`]: the embedded style preset library.

pub mod entitlement;
pub mod locator;
pub mod orchestrator;
pub mod presets;
pub mod synthesis;
