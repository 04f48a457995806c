//! # clearview-inference
//!
//! Generative video backend abstraction for clearview.
//!
//! This crate provides:
//! - The [`VideoBackend`] long-running-operation trait
//! - A Veo implementation over HTTP
//! - A scripted mock backend (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockVideoBackend`] for tests in dependent crates

pub mod veo;
pub mod video;

// Mock video backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use veo::{VeoBackend, VeoConfig};
pub use video::{VideoAsset, VideoBackend, VideoGenerationConfig, VideoOperation};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockVideoBackend;
