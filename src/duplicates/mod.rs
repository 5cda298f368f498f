//! Duplicate detection module.
//!
//! This module provides:
//! - The two-phase pipeline orchestrator ([`DuplicateFinder`])
//! - Duplicate groups and the sinks that receive them

pub mod finder;
pub mod groups;

// Re-export main types
pub use finder::{is_stdio, DuplicateFinder, FindSummary, FinderConfig, FinderError, STDIO_PATH};
pub use groups::{DuplicateGroup, GroupSink};
