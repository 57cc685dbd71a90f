//! # Geosync Testkit
//!
//! Test utilities for geosync.
//!
//! This crate provides:
//! - Registry fixtures with a manual clock and known primary checksums
//! - Property-based generators for registry operation sequences
//! - Concurrent claim stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geosync_testkit::prelude::*;
//!
//! #[test]
//! fn verified_record() {
//!     let registry = TestRegistry::memory();
//!     let record = registry.verified(1);
//!     assert!(record.invariant_violations().is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
