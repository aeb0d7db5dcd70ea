//! Warden Common — plumbing shared by every warden crate.
//!
//! Data directory resolution, atomic JSON persistence, the shared
//! key-value cache abstraction, identity ids, and the machine-readable
//! error codes surfaced to operators.

pub mod cache;
pub mod encoding;
pub mod error;
pub mod id;
pub mod paths;
pub mod persist;
