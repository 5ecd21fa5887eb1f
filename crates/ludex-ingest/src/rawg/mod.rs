//! RAWG upstream catalog API
//!
//! The only thing the pipeline asks of upstream is "give me a page of raw
//! game records and tell me whether there is a next page". Everything else
//! (rate limiting, backoff, key rotation, detail enrichment) lives behind
//! [`client::RawgClient`].

pub mod client;
pub mod models;

pub use client::{FetchedPage, RawgClient};
pub use models::GamesPage;
