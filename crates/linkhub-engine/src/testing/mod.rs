//! Testing utilities for linkhub engines.
//!
//! Provides a scripted engine whose events are driven by the test and whose
//! calls are recorded for assertions.

pub mod scripted;

pub use scripted::{ScriptedEngine, ScriptedEngineFactory};
