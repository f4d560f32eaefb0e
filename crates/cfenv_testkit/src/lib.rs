//! # cfenv Testkit
//!
//! Test utilities for cfenv.
//!
//! This crate provides:
//! - Scripted HTTP clients for transport tests
//! - An in-memory Workers KV API for end-to-end client tests
//! - Seeded store fixtures with correct or corrupted metadata
//! - Property-based test generators using proptest
//! - Cross-language checksum test vectors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cfenv_testkit::prelude::*;
//!
//! #[test]
//! fn fetches_published_entries() {
//!     let fixture = EnvFixture::new();
//!     fixture.publish(&[("A", "1")]);
//!     let snapshot = fixture.fetcher().fetch_flat_env().unwrap();
//!     assert_eq!(snapshot.get("A"), Some("1"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod http;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::http::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use http::*;
pub use vectors::*;
