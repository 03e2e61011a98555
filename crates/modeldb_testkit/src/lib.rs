//! # ModelDB Testkit
//!
//! Test utilities for ModelDB.
//!
//! This crate provides:
//! - A people / groups / organizations domain with its descriptors
//! - A [`Fixture`] wiring the domain stores into a database
//! - Property-based test generators using proptest
//! - Concurrent stress drivers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use modeldb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_fixture() {
//!     with_fixture(|fx| {
//!         let (_, bob) = fx.add_person("bob", 1);
//!         // ... test operations
//!     });
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
