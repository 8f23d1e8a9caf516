//! Core types and trait definitions for Seriesly.
//!
//! This crate is deliberately free of HTTP, database and calendar-codec
//! dependencies. All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod airing;
pub mod error;
pub mod source;
pub mod store;
pub mod subscriber;

pub use error::{Error, Result};
