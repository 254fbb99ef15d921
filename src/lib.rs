//! DevFeed - a developer news aggregator
//!
//! Pulls RSS/Atom feeds (and scraped advisory listings) through a chain of
//! relay endpoints, merges them into one newest-first stream per topic, and
//! offers a sanitized in-app reader view for any article.

pub mod aggregator;
pub mod config;
pub mod dates;
pub mod db;
pub mod extractor;
pub mod model;
pub mod normalizer;
pub mod relay;
pub mod routes;
pub mod state;
