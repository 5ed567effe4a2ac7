//! # footprint-core: configuration for the footprint datastore layer
//!
//! Declares the stores map and models section consumed by the boot pipeline
//! in `footprint-orm`, plus boot-time validation. This crate owns no
//! connections and performs no I/O.

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
