//! # kvclone Testkit
//!
//! Test utilities for kvclone.
//!
//! This crate provides:
//! - Property-based test generators using proptest
//! - An in-process cluster fixture with fast heartbeats and scans
//! - Polling helpers for asserting on eventually-consistent replicas
//! - Fuzz harnesses for the decoders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvclone_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replicates() {
//!     let mut cluster = Cluster::start("replicates").await;
//!     let client = cluster.client("");
//!     cluster.handle().set("k", "v", None).await.unwrap();
//!     wait_for_value(&client, "k", Some(b"v")).await;
//!     cluster.shutdown().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod wait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::wait::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use wait::*;
