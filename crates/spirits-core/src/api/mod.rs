//! Resource fetcher module.
//!
//! This module provides the `ResourceFetcher` abstraction used to download
//! the catalog data source and character images, plus the `reqwest`-backed
//! `HttpFetcher`.
//!
//! Non-success HTTP statuses are surfaced as `FetchError` values rather than
//! being decoded as content.

pub mod client;
pub mod error;

pub use client::{FetchedBinary, HttpFetcher, Resource, ResourceFetcher, ResourceKind};
pub use error::FetchError;
