//! # Tuplespace Testkit
//!
//! Test utilities for the tuplespace engine.
//!
//! This crate provides:
//! - Test fixtures and space helpers
//! - Property-based test generators using proptest
//! - Crash recovery harnesses for persistent spaces
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use tuplespace_testkit::prelude::*;
//! use tuplespace_core::{Count, RequestContext, Selector};
//!
//! let (space, queue) = scenarios::populated_queue(3);
//! let all = space
//!     .read(queue.id, vec![Selector::fifo(Count::All)], RequestContext::new())
//!     .unwrap();
//! assert_eq!(all.len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use stress::*;
