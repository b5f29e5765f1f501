//! imgfetch - Image fetching with de-duplicated requests and two-tier caching.
//!
//! This crate provides a client-side image pipeline with clean architecture:
//! a fetch coordinator that shares in-flight downloads, a transform
//! pipeline, memory and disk caches, progressive decoding, and the
//! boundary a UI layer calls into.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing use cases and delivery services.
pub mod application;
/// Domain layer containing entities, errors, ports and transforms.
pub mod domain;
/// Infrastructure layer containing caches, fetchers and configuration.
pub mod infrastructure;

#[cfg(test)]
mod test_support;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgfetch";
