//! Conflict detection and resolution
//!
//! - **detector** - finds the single most safety-relevant disagreement
//! - **resolver** - adjusts the consensus score per resolution policy

pub mod detector;
pub mod resolver;

pub use detector::ConflictDetector;
pub use resolver::{attach_unresolved, ConflictResolver, Resolution};
