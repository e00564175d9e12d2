//! Oxide CI Core
//!
//! Domain types, port traits and error handling shared by the admission
//! layer and its adapters. This crate has minimal dependencies and defines
//! the vocabulary used across all other crates.

pub mod build;
pub mod error;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod runner;
pub mod status;

pub use error::{Error, Result};
pub use ids::*;
