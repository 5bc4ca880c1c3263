//! Configuration constants and structures for simlab
//!
//! This module centralizes all configuration values so run limits, cache
//! windows and poll cadences can be adjusted in one place.

pub mod errors;
pub mod limits;
pub mod paths;
pub mod resilience;
pub mod settings;
pub mod timeouts;

pub use settings::SimlabSettings;
