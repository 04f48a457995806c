//! # clearview-core
//!
//! Core types, traits, and pure logic for clearview: the call data model,
//! webhook payload parsing, insight extraction, propensity scoring, and the
//! pipeline event bus.
//!
//! Other clearview crates depend on this one; it performs no I/O of its own.

pub mod defaults;
pub mod error;
pub mod events;
pub mod insights;
pub mod logging;
pub mod models;
pub mod payload;
pub mod scoring;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventContext, EventEnvelope, ServerEvent};
pub use insights::{
    derive_scalars, extract, CallInsights, ExtractionHints, LensInterestLabel, ReadinessLabel,
};
pub use models::*;
pub use payload::{
    ConversationData, DataCollection, DataCollectionEntry, KeyedResults, WebhookEvent,
};
pub use scoring::{score, PropensityInputs, PropensityScore, PropensityTier};
pub use traits::*;
pub use uuid_utils::new_v7;
