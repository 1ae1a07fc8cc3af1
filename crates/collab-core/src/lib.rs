//! # collab-core
//!
//! Core types, traits, and abstractions for the collaboration matching
//! pipeline.
//!
//! This crate provides the domain model, the closed job payload set, and the
//! trait seams that the database, inference, matching, and job crates plug
//! into.

pub mod defaults;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod pair;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use jobs::*;
pub use models::*;
pub use pair::*;
pub use traits::*;
pub use uuid_utils::new_v7;
