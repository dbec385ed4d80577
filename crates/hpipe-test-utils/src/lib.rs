//! Shared fixtures for hpipe tests.

pub mod executor;
pub mod fixtures;
pub mod store;

pub use executor::{Event, ScriptedExecutor, ScriptedRunner};
pub use fixtures::{diamond_flow, job, scenario_flow, wide_flow, SCRIPTED};
pub use store::{MemoryStore, SavedFlow};
